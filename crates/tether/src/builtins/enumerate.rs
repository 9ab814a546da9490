//! Implementation of the enumerate() builtin function.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::Interns,
    resource::ResourceTracker,
    types::iter::collect_iterable,
    value::Value,
};

/// Returns a list of `(index, item)` tuples.
///
/// Python returns a lazy iterator; a list behaves the same in loops and comprehensions.
pub fn builtin_enumerate(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let (positional, mut kwargs) = args.split();
    let start_kwarg = kwargs.take("start", interns);
    kwargs.finish("enumerate", interns)?;
    let (iterable, start) = match (positional.as_slice(), start_kwarg) {
        ([iterable], start) => (*iterable, start),
        ([iterable, start], None) => (*iterable, Some(*start)),
        (other, _) => {
            return Err(if other.is_empty() {
                ExcType::type_error("enumerate() missing required argument 'iterable'")
            } else {
                ExcType::type_error_at_most("enumerate", 2, other.len())
            });
        }
    };
    let mut index = match start {
        Some(start) => start.as_index(heap)?,
        None => 0,
    };

    let items = collect_iterable(iterable, heap, interns)?;
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        pairs.push(heap.alloc_tuple(vec![Value::Int(index), item])?);
        index += 1;
    }
    heap.alloc_list(pairs)
}
