//! Implementation of the min() and max() builtin functions.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult, exc_err_fmt},
    heap::Heap,
    intern::Interns,
    operators::py_lt,
    resource::ResourceTracker,
    types::iter::collect_iterable,
    value::Value,
};

/// Parsed arguments of `min()`/`max()`: `min(iterable, *, key=None, default=...)` or
/// `min(a, b, *more, key=None)`.
#[derive(Debug)]
pub(crate) struct MinMaxArgs {
    pub items: Vec<Value>,
    pub key: Option<Value>,
    pub default: Option<Value>,
}

impl MinMaxArgs {
    pub fn parse(
        heap: &mut Heap<impl ResourceTracker>,
        args: ArgValues,
        interns: &Interns,
        is_min: bool,
    ) -> RunResult<Self> {
        let func_name = if is_min { "min" } else { "max" };
        let (positional, mut kwargs) = args.split();
        let key = kwargs.take("key", interns).filter(|k| !matches!(k, Value::None));
        let default = kwargs.take("default", interns);
        kwargs.finish(func_name, interns)?;

        let items = match positional.as_slice() {
            [] => return Err(ExcType::type_error_at_least(func_name, 1, 0)),
            [iterable] => collect_iterable(*iterable, heap, interns)?,
            _ if default.is_some() => {
                return exc_err_fmt!(ExcType::TypeError; "Cannot specify a default for {func_name}() with multiple positional arguments");
            }
            _ => positional,
        };
        Ok(Self { items, key, default })
    }
}

/// Picks the smallest (or largest) item, comparing `keys` instead of the items when given.
///
/// The first of several equal items wins, as in Python.
pub(crate) fn select_min_max(
    args: MinMaxArgs,
    keys: Option<Vec<Value>>,
    is_min: bool,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    let MinMaxArgs { items, default, .. } = args;
    if items.is_empty() {
        let func_name = if is_min { "min" } else { "max" };
        return default.ok_or_else(|| ExcType::value_error(format!("{func_name}() iterable argument is empty")));
    }
    let keys = keys.unwrap_or_else(|| items.clone());
    let mut best = 0;
    for i in 1..items.len() {
        let replace = if is_min {
            py_lt(keys[i], keys[best], heap, interns)?
        } else {
            py_lt(keys[best], keys[i], heap, interns)?
        };
        if replace {
            best = i;
        }
    }
    Ok(items[best])
}

/// `min()`/`max()` without a key function; calls with `key=` go through the VM, which
/// computes the keys first.
pub fn builtin_min_max(
    heap: &mut Heap<impl ResourceTracker>,
    args: ArgValues,
    interns: &Interns,
    is_min: bool,
) -> RunResult<Value> {
    let args = MinMaxArgs::parse(heap, args, interns, is_min)?;
    if args.key.is_some() {
        return Err(RunError::internal("min()/max() with key= must be handled by the VM"));
    }
    select_min_max(args, None, is_min, heap, interns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker};

    #[test]
    fn min_of_arguments_and_iterables() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let args = ArgValues::new(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)], vec![]);
        let result = builtin_min_max(&mut heap, args, &interns, true).unwrap();
        assert!(matches!(result, Value::Float(f) if (f - 1.5).abs() < f64::EPSILON));

        let list = heap.alloc_list(vec![Value::Int(1), Value::Int(9), Value::Int(9)]).unwrap();
        let result = builtin_min_max(&mut heap, ArgValues::One(list), &interns, false).unwrap();
        assert!(matches!(result, Value::Int(9)));
    }

    #[test]
    fn empty_iterable_raises() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let list = heap.alloc_list(vec![]).unwrap();
        let err = builtin_min_max(&mut heap, ArgValues::One(list), &interns, true).unwrap_err();
        let RunError::Exc(raise) = err else { panic!("expected exception") };
        assert_eq!(raise.exc.arg(), Some("min() iterable argument is empty"));
    }
}
