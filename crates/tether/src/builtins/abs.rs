//! Implementation of the abs() builtin function.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, exc_err_fmt},
    heap::Heap,
    numeric,
    resource::ResourceTracker,
    value::Value,
};

/// Returns the absolute value of a number; `abs(True)` is `1`.
pub fn builtin_abs(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("abs")?;
    match numeric::numeric_abs(value, heap)? {
        Some(result) => Ok(result),
        None => exc_err_fmt!(ExcType::TypeError; "bad operand type for abs(): '{}'", value.py_type(heap)),
    }
}
