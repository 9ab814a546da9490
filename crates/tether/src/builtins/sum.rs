//! Implementation of the sum() builtin function.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::Interns,
    operators::{Operator, binary_op},
    resource::ResourceTracker,
    types::iter::collect_iterable,
    value::Value,
};

/// `sum(iterable, start=0)`; strings are rejected like in Python.
pub fn builtin_sum(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let (positional, mut kwargs) = args.split();
    let start_kwarg = kwargs.take("start", interns);
    kwargs.finish("sum", interns)?;
    let (iterable, start) = match (positional.as_slice(), start_kwarg) {
        ([iterable], start) => (*iterable, start.unwrap_or(Value::Int(0))),
        ([iterable, start], None) => (*iterable, *start),
        (other, _) => {
            return Err(if other.is_empty() {
                ExcType::type_error_at_least("sum", 1, 0)
            } else {
                ExcType::type_error_at_most("sum", 2, other.len())
            });
        }
    };
    if start.as_str(heap, interns).is_some() {
        return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    let mut total = start;
    for item in collect_iterable(iterable, heap, interns)? {
        total = binary_op(Operator::Add, total, item, heap, interns)?;
    }
    Ok(total)
}
