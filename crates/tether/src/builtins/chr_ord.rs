//! Implementation of the chr() and ord() builtin functions.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, exc_err_fmt},
    heap::Heap,
    intern::Interns,
    resource::ResourceTracker,
    value::Value,
};

/// `chr(i)`: the one character string for a code point.
pub fn builtin_chr(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("chr")?;
    let code = value.as_index(heap)?;
    let c = u32::try_from(code).ok().and_then(char::from_u32);
    match c {
        Some(c) => heap.alloc_str(c.to_string()),
        None => exc_err_fmt!(ExcType::ValueError; "chr() arg not in range(0x110000)"),
    }
}

/// `ord(c)`: the code point of a one character string.
pub fn builtin_ord(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let value = args.get_one_arg("ord")?;
    let Some(s) = value.as_str(heap, interns) else {
        return exc_err_fmt!(ExcType::TypeError; "ord() expected string of length 1, but {} found", value.py_type(heap));
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
        _ => exc_err_fmt!(ExcType::TypeError; "ord() expected a character, but string of length {} found", s.chars().count()),
    }
}
