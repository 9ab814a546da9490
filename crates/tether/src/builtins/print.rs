//! Implementation of the print() builtin function.

use std::borrow::Cow;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, exc_err_fmt},
    heap::Heap,
    intern::Interns,
    io::PrintWriter,
    resource::ResourceTracker,
    value::Value,
};

/// `print(*objects, sep=' ', end='\n', flush=False)`.
///
/// `file=` is not supported since all output goes to the run's [`PrintWriter`].
pub fn builtin_print(
    heap: &mut Heap<impl ResourceTracker>,
    args: ArgValues,
    interns: &Interns,
    print: &mut impl PrintWriter,
) -> RunResult<Value> {
    let (positional, kwargs) = args.split();
    let mut sep: Option<String> = None;
    let mut end: Option<String> = None;
    for (key, value) in kwargs.into_vec() {
        match interns.get_str(key) {
            "sep" => sep = separator_arg("sep", value, heap, interns)?,
            "end" => end = separator_arg("end", value, heap, interns)?,
            "flush" => {}
            "file" => return Err(ExcType::type_error("print() does not support the 'file' argument")),
            other => return exc_err_fmt!(ExcType::TypeError; "'{other}' is an invalid keyword argument for print()"),
        }
    }

    for (i, value) in positional.iter().enumerate() {
        if i > 0 {
            match &sep {
                Some(sep) => write_text(print, sep),
                None => print.stdout_push(' '),
            }
        }
        print.stdout_write(Cow::Owned(value.py_str(heap, interns)));
    }
    match &end {
        Some(end) => write_text(print, end),
        None => print.stdout_push('\n'),
    }
    Ok(Value::None)
}

/// `sep` and `end` accept `None` (the default) or a string.
fn separator_arg(
    name: &str,
    value: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Option<String>> {
    if matches!(value, Value::None) {
        return Ok(None);
    }
    match value.as_str(heap, interns) {
        Some(s) => Ok(Some(s.to_owned())),
        None => exc_err_fmt!(ExcType::TypeError; "{name} must be None or a string, not {}", value.py_type(heap)),
    }
}

fn write_text(print: &mut impl PrintWriter, text: &str) {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (None, _) => {}
        (Some(c), None) => print.stdout_push(c),
        _ => print.stdout_write(Cow::Owned(text.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        intern::{InternerBuilder, Interns},
        io::CollectStringPrint,
        resource::NoLimitTracker,
    };

    #[test]
    fn custom_separator_and_end() {
        let mut builder = InternerBuilder::new();
        let sep = builder.intern("sep");
        let end = builder.intern("end");
        let interns = Interns::new(builder, Vec::new(), Vec::new());
        let mut heap = Heap::new(NoLimitTracker);
        let dash = heap.alloc_str("--".to_owned()).unwrap();
        let bang = heap.alloc_str("!".to_owned()).unwrap();
        let mut out = CollectStringPrint::new();
        let args = ArgValues::new(vec![Value::Int(1), Value::Bool(true)], vec![(sep, dash), (end, bang)]);
        builtin_print(&mut heap, args, &interns, &mut out).unwrap();
        builtin_print(&mut heap, ArgValues::One(Value::None), &interns, &mut out).unwrap();
        assert_eq!(out.output(), "1--True!None\n");
    }

    #[test]
    fn rejects_non_string_separator() {
        let mut builder = InternerBuilder::new();
        let sep = builder.intern("sep");
        let interns = Interns::new(builder, Vec::new(), Vec::new());
        let mut heap = Heap::new(NoLimitTracker);
        let mut out = CollectStringPrint::new();
        let args = ArgValues::new(vec![], vec![(sep, Value::Int(3))]);
        assert!(builtin_print(&mut heap, args, &interns, &mut out).is_err());
        assert_eq!(out.output(), "");
    }
}
