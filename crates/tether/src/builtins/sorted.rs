//! Implementation of the sorted() and reversed() builtin functions.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    heap::Heap,
    intern::Interns,
    resource::ResourceTracker,
    types::{iter::collect_iterable, list::sort_values},
    value::Value,
};

/// Parsed arguments of `sorted(iterable, /, *, key=None, reverse=False)`.
#[derive(Debug)]
pub(crate) struct SortArgs {
    pub items: Vec<Value>,
    pub key: Option<Value>,
    pub reverse: bool,
}

impl SortArgs {
    pub fn parse(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Self> {
        let (positional, mut kwargs) = args.split();
        let key = kwargs.take("key", interns).filter(|k| !matches!(k, Value::None));
        let reverse = kwargs.take("reverse", interns).is_some_and(|v| v.py_bool(heap, interns));
        kwargs.finish("sorted", interns)?;
        let [iterable] = positional.as_slice() else {
            return Err(ExcType::type_error(format!(
                "sorted expected 1 argument, got {}",
                positional.len()
            )));
        };
        let items = collect_iterable(*iterable, heap, interns)?;
        Ok(Self { items, key, reverse })
    }
}

/// `sorted()` without a key function; calls with `key=` go through the VM.
pub fn builtin_sorted(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let SortArgs { items, key, reverse } = SortArgs::parse(heap, args, interns)?;
    if key.is_some() {
        return Err(RunError::internal("sorted() with key= must be handled by the VM"));
    }
    let sorted = sort_values(items, None, reverse, heap, interns)?;
    heap.alloc_list(sorted)
}

/// `reversed(seq)`, returned as a list.
pub fn builtin_reversed(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let sequence = args.get_one_arg("reversed")?;
    let mut items = collect_iterable(sequence, heap, interns)?;
    items.reverse();
    heap.alloc_list(items)
}
