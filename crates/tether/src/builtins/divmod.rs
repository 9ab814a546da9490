//! Implementation of the divmod() builtin function.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::Interns,
    numeric,
    operators::Operator,
    resource::ResourceTracker,
    value::Value,
};

/// `divmod(a, b)`: the tuple `(a // b, a % b)`.
pub fn builtin_divmod(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, _interns: &Interns) -> RunResult<Value> {
    let (a, b) = args.get_two_args("divmod")?;
    let quotient = numeric::numeric_binary(Operator::FloorDiv, a, b, heap)?;
    let remainder = numeric::numeric_binary(Operator::Mod, a, b, heap)?;
    match (quotient, remainder) {
        (Some(q), Some(r)) => heap.alloc_tuple(vec![q, r]),
        _ => Err(ExcType::binary_type_error("divmod()", a.py_type(heap), b.py_type(heap))),
    }
}
