use std::{
    fmt::{self, Write},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::Interns,
    resource::ResourceTracker,
    types::{
        PyTrait, Type,
        iter::collect_iterable,
        list::{items_eq, write_items},
    },
    value::{ReprGuard, Value},
};

/// Python tuple, an immutable sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tuple(Vec<Value>);

impl Tuple {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// `tuple()` / `tuple(iterable)`
    pub fn init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
        let items = match args.get_zero_one_arg("tuple")? {
            None => Vec::new(),
            Some(iterable) => collect_iterable(iterable, heap, interns)?,
        };
        heap.alloc_tuple(items)
    }
}

impl PyTrait for Tuple {
    fn py_type(&self) -> Type {
        Type::Tuple
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
        f.write_char('(')?;
        write_items(&self.0, f, heap, interns, guard)?;
        if self.0.len() == 1 {
            f.write_char(',')?;
        }
        f.write_char(')')
    }

    fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: usize) -> RunResult<bool> {
        items_eq(&self.0, &other.0, heap, interns, depth)
    }
}

#[derive(Debug, Clone, Copy, EnumString)]
#[strum(serialize_all = "lowercase")]
enum TupleMethod {
    Index,
    Count,
}

pub(crate) fn has_tuple_method(name: &str) -> bool {
    TupleMethod::from_str(name).is_ok()
}

/// Calls `tuple.<name>(args)`; the tuple's items are passed in by value.
pub(crate) fn call_tuple_method(
    items: &[Value],
    name: &str,
    args: ArgValues,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    let method = TupleMethod::from_str(name).map_err(|_| ExcType::attribute_error(Type::Tuple, name))?;
    let item = args.get_one_arg(&format!("tuple.{name}"))?;
    let mut count = 0;
    for (i, v) in items.iter().enumerate() {
        if v.py_eq(item, heap, interns)? {
            if matches!(method, TupleMethod::Index) {
                return Ok(Value::Int(i as i64));
            }
            count += 1;
        }
    }
    match method {
        TupleMethod::Index => Err(ExcType::value_error("tuple.index(x): x not in tuple")),
        TupleMethod::Count => Ok(Value::Int(count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::HeapData, intern::InternerBuilder, resource::NoLimitTracker};

    #[test]
    fn single_item_repr_has_trailing_comma() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let one = heap.allocate(HeapData::Tuple(Tuple::new(vec![Value::Int(1)]))).unwrap();
        let empty = heap.allocate(HeapData::Tuple(Tuple::default())).unwrap();
        assert_eq!(Value::Ref(one).py_repr(&heap, &interns), "(1,)");
        assert_eq!(Value::Ref(empty).py_repr(&heap, &interns), "()");
    }
}
