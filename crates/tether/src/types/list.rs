use std::{
    fmt::{self, Write},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    operators::py_lt,
    resource::ResourceTracker,
    types::{PyTrait, Type, iter::collect_iterable},
    value::{ReprGuard, Value},
};

/// Python list, a growable sequence of values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct List(Vec<Value>);

impl List {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn as_vec_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// `list()` / `list(iterable)`
    pub fn init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
        let items = match args.get_zero_one_arg("list")? {
            None => Vec::new(),
            Some(iterable) => collect_iterable(iterable, heap, interns)?,
        };
        heap.alloc_list(items)
    }
}

impl PyTrait for List {
    fn py_type(&self) -> Type {
        Type::List
    }

    fn py_len(&self) -> Option<usize> {
        Some(self.0.len())
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.0.len() * std::mem::size_of::<Value>()
    }

    fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        guard: &mut ReprGuard,
    ) -> fmt::Result {
        f.write_char('[')?;
        write_items(&self.0, f, heap, interns, guard)?;
        f.write_char(']')
    }

    fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: usize) -> RunResult<bool> {
        items_eq(&self.0, &other.0, heap, interns, depth)
    }
}

/// Writes `a, b, c`, shared by list and tuple reprs.
pub(crate) fn write_items(
    items: &[Value],
    f: &mut impl Write,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    guard: &mut ReprGuard,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.py_repr_fmt(f, heap, interns, guard)?;
    }
    Ok(())
}

pub(crate) fn items_eq(
    left: &[Value],
    right: &[Value],
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    depth: usize,
) -> RunResult<bool> {
    if left.len() != right.len() {
        return Ok(false);
    }
    for (l, r) in left.iter().zip(right) {
        if !l.eq_depth(*r, heap, interns, depth)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolves a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let normalized = if index < 0 { index + len } else { index };
    (0..len).contains(&normalized).then_some(normalized as usize)
}

/// Sorts `items`, comparing `keys` instead when given; stable, like Python's sort.
pub(crate) fn sort_values(
    items: Vec<Value>,
    keys: Option<Vec<Value>>,
    reverse: bool,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Vec<Value>> {
    let keys = keys.unwrap_or_else(|| items.clone());
    let pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    let sorted = merge_sort(pairs, &mut |a: &(Value, Value), b: &(Value, Value)| {
        if reverse {
            py_lt(b.0, a.0, heap, interns)
        } else {
            py_lt(a.0, b.0, heap, interns)
        }
    })?;
    Ok(sorted.into_iter().map(|(_, item)| item).collect())
}

/// Stable merge sort with a fallible "less than"; the first comparison error aborts the sort.
fn merge_sort<T: Copy>(items: Vec<T>, lt: &mut impl FnMut(&T, &T) -> RunResult<bool>) -> RunResult<Vec<T>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, lt)?;
    let right = merge_sort(right, lt)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if lt(&right[j], &left[i])? {
            out.push(right[j]);
            j += 1;
        } else {
            out.push(left[i]);
            i += 1;
        }
    }
    out.extend_from_slice(&left[i..]);
    out.extend_from_slice(&right[j..]);
    Ok(out)
}

/// Methods available on `list` values.
#[derive(Debug, Clone, Copy, EnumString)]
#[strum(serialize_all = "lowercase")]
enum ListMethod {
    Append,
    Extend,
    Pop,
    Insert,
    Remove,
    Index,
    Count,
    Sort,
    Reverse,
    Copy,
    Clear,
}

pub(crate) fn has_list_method(name: &str) -> bool {
    ListMethod::from_str(name).is_ok()
}

/// Calls `list.<name>(args)` on the list stored at `list_id`.
///
/// `sort(key=...)` needs to call back into the interpreter and is handled by the VM;
/// this only receives `sort()` calls without a key.
pub(crate) fn call_list_method(
    list_id: HeapId,
    name: &str,
    args: ArgValues,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    let method = ListMethod::from_str(name).map_err(|_| ExcType::attribute_error(Type::List, name))?;
    let qualified = format!("list.{name}");
    match method {
        ListMethod::Append => {
            let item = args.get_one_arg(&qualified)?;
            heap.note_growth(std::mem::size_of::<Value>())?;
            list_mut(heap, list_id).push(item);
            Ok(Value::None)
        }
        ListMethod::Extend => {
            let iterable = args.get_one_arg(&qualified)?;
            let items = collect_iterable(iterable, heap, interns)?;
            let current = list_mut(heap, list_id).0.len();
            heap.check_size((current + items.len()).saturating_mul(std::mem::size_of::<Value>()))?;
            heap.note_growth(items.len() * std::mem::size_of::<Value>())?;
            list_mut(heap, list_id).0.extend(items);
            Ok(Value::None)
        }
        ListMethod::Pop => {
            let index = match args.get_zero_one_arg(&qualified)? {
                None => -1,
                Some(v) => v.as_index(heap)?,
            };
            let list = list_mut(heap, list_id);
            if list.0.is_empty() {
                return Err(ExcType::index_error_msg("pop from empty list"));
            }
            let Some(index) = normalize_index(index, list.0.len()) else {
                return Err(ExcType::index_error_msg("pop index out of range"));
            };
            Ok(list.0.remove(index))
        }
        ListMethod::Insert => {
            let (index, item) = args.get_two_args(&qualified)?;
            let index = index.as_index(heap)?;
            heap.note_growth(std::mem::size_of::<Value>())?;
            let list = list_mut(heap, list_id);
            let len = list.0.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            list.0.insert(at as usize, item);
            Ok(Value::None)
        }
        ListMethod::Remove => {
            let item = args.get_one_arg(&qualified)?;
            let position = position_of(heap, list_id, item, interns)?;
            match position {
                Some(i) => {
                    list_mut(heap, list_id).0.remove(i);
                    Ok(Value::None)
                }
                None => Err(ExcType::value_error("list.remove(x): x not in list")),
            }
        }
        ListMethod::Index => {
            let item = args.get_one_arg(&qualified)?;
            match position_of(heap, list_id, item, interns)? {
                Some(i) => Ok(Value::Int(i as i64)),
                None => Err(ExcType::value_error(format!(
                    "{} is not in list",
                    item.py_repr(heap, interns)
                ))),
            }
        }
        ListMethod::Count => {
            let item = args.get_one_arg(&qualified)?;
            let HeapData::List(list) = heap.get(list_id) else {
                return Err(ExcType::type_error("expected a list"));
            };
            let mut count = 0;
            for v in &list.0 {
                if v.py_eq(item, heap, interns)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        ListMethod::Sort => {
            let (positional, mut kwargs) = args.split();
            if !positional.is_empty() {
                return Err(ExcType::type_error("sort() takes no positional arguments"));
            }
            let reverse = kwargs.take("reverse", interns).is_some_and(|v| v.py_bool(heap, interns));
            if kwargs.take("key", interns).is_some_and(|k| !matches!(k, Value::None)) {
                return Err(RunError::internal(
                    "list.sort(key=...) must be handled by the VM",
                ));
            }
            kwargs.finish("sort", interns)?;
            let items = list_mut(heap, list_id).0.clone();
            let sorted = sort_values(items, None, reverse, heap, interns)?;
            list_mut(heap, list_id).0 = sorted;
            Ok(Value::None)
        }
        ListMethod::Reverse => {
            args.check_zero_args(&qualified)?;
            list_mut(heap, list_id).0.reverse();
            Ok(Value::None)
        }
        ListMethod::Copy => {
            args.check_zero_args(&qualified)?;
            let items = list_mut(heap, list_id).0.clone();
            heap.alloc_list(items)
        }
        ListMethod::Clear => {
            args.check_zero_args(&qualified)?;
            list_mut(heap, list_id).0.clear();
            Ok(Value::None)
        }
    }
}

fn position_of(
    heap: &Heap<impl ResourceTracker>,
    list_id: HeapId,
    item: Value,
    interns: &Interns,
) -> RunResult<Option<usize>> {
    let HeapData::List(list) = heap.get(list_id) else {
        return Ok(None);
    };
    for (i, v) in list.0.iter().enumerate() {
        if v.py_eq(item, heap, interns)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn list_mut(heap: &mut Heap<impl ResourceTracker>, list_id: HeapId) -> &mut List {
    match heap.get_mut(list_id) {
        HeapData::List(list) => list,
        _ => unreachable!("list method called on a non-list heap entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker};

    #[test]
    fn negative_indices() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }

    #[test]
    fn sort_is_stable_and_reversible() {
        let heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let items = vec![Value::Int(3), Value::Int(1), Value::Int(2)];
        let sorted = sort_values(items.clone(), None, false, &heap, &interns).unwrap();
        let ints: Vec<_> = sorted.iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(ints, vec![1, 2, 3]);

        // equal keys keep their original order, also when reversed
        let keys = vec![Value::Int(0), Value::Int(1), Value::Int(0)];
        let sorted = sort_values(items, Some(keys), true, &heap, &interns).unwrap();
        let ints: Vec<_> = sorted.iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(ints, vec![1, 3, 2]);
    }

    #[test]
    fn sorting_mixed_types_fails() {
        let heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let items = vec![Value::Int(3), Value::None];
        assert!(sort_values(items, None, false, &heap, &interns).is_err());
    }
}
