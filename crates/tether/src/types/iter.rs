//! Iteration state for `for` loops, comprehensions and constructors that consume iterables.
//!
//! Iterators store indices rather than Rust iterators so that advancing one can take
//! `&mut Heap` (string iteration allocates one-character strings).

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    resource::ResourceTracker,
    types::{PyTrait, Type},
    value::{ReprGuard, Value},
};

/// A live iterator, stored on the heap while a loop runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ForIterator {
    index: usize,
    source: IterSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum IterSource {
    Range { start: i64, step: i64, len: usize },
    /// Lists may grow or shrink while iterated, the length is read on every step.
    List(HeapId),
    Tuple { id: HeapId, len: usize },
    /// Yields keys; a size change raises `RuntimeError`.
    DictKeys { id: HeapId, len: usize },
    /// A copy of the string with the byte offset of the next character.
    Str { string: String, offset: usize },
}

impl ForIterator {
    /// Starts iterating `value`, raising `TypeError` for non-iterables.
    pub fn new(value: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Self> {
        let source = match value {
            Value::InternString(id) => IterSource::Str {
                string: interns.get_str(id).to_owned(),
                offset: 0,
            },
            Value::Ref(id) => match heap.get(id) {
                HeapData::List(_) => IterSource::List(id),
                HeapData::Tuple(t) => IterSource::Tuple {
                    id,
                    len: t.as_slice().len(),
                },
                HeapData::Dict(d) => IterSource::DictKeys { id, len: d.len() },
                HeapData::Str(s) => IterSource::Str {
                    string: s.as_str().to_owned(),
                    offset: 0,
                },
                HeapData::Range(r) => IterSource::Range {
                    start: r.start,
                    step: r.step,
                    len: r.len(),
                },
                other => return Err(ExcType::type_error_not_iterable(other.py_type())),
            },
            other => return Err(ExcType::type_error_not_iterable(other.py_type(heap))),
        };
        Ok(Self { index: 0, source })
    }

    /// The next item, `None` once exhausted.
    pub fn for_next(&mut self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
        let item = match &mut self.source {
            IterSource::Range { start, step, len } => {
                if self.index >= *len {
                    return Ok(None);
                }
                Value::Int(*start + *step * self.index as i64)
            }
            IterSource::List(id) => {
                let HeapData::List(list) = heap.get(*id) else {
                    unreachable!("list iterator over a non-list")
                };
                match list.as_slice().get(self.index) {
                    Some(item) => *item,
                    None => return Ok(None),
                }
            }
            IterSource::Tuple { id, len } => {
                if self.index >= *len {
                    return Ok(None);
                }
                let HeapData::Tuple(tuple) = heap.get(*id) else {
                    unreachable!("tuple iterator over a non-tuple")
                };
                tuple.as_slice()[self.index]
            }
            IterSource::DictKeys { id, len } => {
                let HeapData::Dict(dict) = heap.get(*id) else {
                    unreachable!("dict iterator over a non-dict")
                };
                if dict.len() != *len {
                    return Err(ExcType::runtime_error_dict_changed_size());
                }
                match dict.key_at(self.index) {
                    Some(key) => key,
                    None => return Ok(None),
                }
            }
            IterSource::Str { string, offset } => {
                let Some(c) = string[*offset..].chars().next() else {
                    return Ok(None);
                };
                *offset += c.len_utf8();
                self.index += 1;
                return heap.alloc_str(c.to_string()).map(Some);
            }
        };
        self.index += 1;
        Ok(Some(item))
    }

    /// Heap entries this iterator keeps alive.
    pub fn heap_ref(&self) -> Option<HeapId> {
        match &self.source {
            IterSource::List(id) | IterSource::Tuple { id, .. } | IterSource::DictKeys { id, .. } => Some(*id),
            IterSource::Range { .. } | IterSource::Str { .. } => None,
        }
    }
}

impl PyTrait for ForIterator {
    fn py_type(&self) -> Type {
        Type::Iterator
    }

    fn py_estimate_size(&self) -> usize {
        let extra = match &self.source {
            IterSource::Str { string, .. } => string.len(),
            _ => 0,
        };
        std::mem::size_of::<Self>() + extra
    }

    fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        _heap: &Heap<impl ResourceTracker>,
        _interns: &Interns,
        _guard: &mut ReprGuard,
    ) -> fmt::Result {
        f.write_str("<iterator>")
    }
}

/// Materializes every item of an iterable.
pub(crate) fn collect_iterable(
    value: Value,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Vec<Value>> {
    if let Value::Ref(id) = value {
        match heap.get(id) {
            HeapData::List(list) => return Ok(list.as_slice().to_vec()),
            HeapData::Tuple(tuple) => return Ok(tuple.as_slice().to_vec()),
            _ => {}
        }
    }
    let mut iter = ForIterator::new(value, heap, interns)?;
    let mut items = Vec::new();
    while let Some(item) = iter.for_next(heap)? {
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker, types::Range};

    #[test]
    fn strings_iterate_by_character() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let s = heap.alloc_str("hé!".to_owned()).unwrap();
        let items = collect_iterable(s, &mut heap, &interns).unwrap();
        let chars: Vec<String> = items.iter().map(|v| v.py_str(&heap, &interns)).collect();
        assert_eq!(chars, vec!["h", "é", "!"]);
    }

    #[test]
    fn dict_size_change_is_detected() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let mut dict = crate::types::Dict::new();
        dict.insert(crate::types::DictKey::Int(1), Value::Int(1), Value::None);
        let id = heap.allocate(HeapData::Dict(dict)).unwrap();
        let mut iter = ForIterator::new(Value::Ref(id), &heap, &interns).unwrap();
        let HeapData::Dict(dict) = heap.get_mut(id) else { unreachable!() };
        dict.insert(crate::types::DictKey::Int(2), Value::Int(2), Value::None);
        assert!(iter.for_next(&mut heap).is_err());
    }

    #[test]
    fn ranges_and_non_iterables() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let id = heap.allocate(HeapData::Range(Range::new(0, 6, 2))).unwrap();
        let items = collect_iterable(Value::Ref(id), &mut heap, &interns).unwrap();
        let ints: Vec<i64> = items.iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(ints, vec![0, 2, 4]);
        assert!(collect_iterable(Value::Int(3), &mut heap, &interns).is_err());
    }
}
