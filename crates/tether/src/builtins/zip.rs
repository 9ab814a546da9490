//! Implementation of the zip() builtin function.

use crate::{
    args::ArgValues,
    exception_private::RunResult,
    heap::Heap,
    intern::Interns,
    resource::ResourceTracker,
    types::iter::collect_iterable,
    value::Value,
};

/// Returns a list of tuples, stopping at the shortest iterable.
pub fn builtin_zip(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let iterables = args.into_positional("zip")?;
    let mut columns = Vec::with_capacity(iterables.len());
    for iterable in iterables {
        columns.push(collect_iterable(iterable, heap, interns)?);
    }
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut rows = Vec::with_capacity(len);
    for i in 0..len {
        let row = columns.iter().map(|column| column[i]).collect();
        rows.push(heap.alloc_tuple(row)?);
    }
    heap.alloc_list(rows)
}
