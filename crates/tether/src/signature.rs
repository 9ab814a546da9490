//! Function signatures and argument binding.
//!
//! Functions only have positional-or-keyword parameters, the trailing ones optionally
//! with defaults. Default values are evaluated when the `def` executes and stored with the
//! function object; the signature only records how many there are.

use serde::{Deserialize, Serialize};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, exc_err_fmt},
    intern::{Interns, StringId},
    value::Value,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Signature {
    /// Parameter names, which are also the first namespace slots in this order.
    params: Vec<StringId>,
    /// Number of parameters (from the end) that have defaults.
    defaults_count: usize,
}

impl Signature {
    pub fn new(params: Vec<StringId>, defaults_count: usize) -> Self {
        debug_assert!(defaults_count <= params.len());
        Self { params, defaults_count }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn defaults_count(&self) -> usize {
        self.defaults_count
    }

    pub fn params(&self) -> &[StringId] {
        &self.params
    }

    fn required_count(&self) -> usize {
        self.params.len() - self.defaults_count
    }

    /// Binds call arguments to parameter slots following Python's rules.
    ///
    /// Positional arguments fill parameters in order, keyword arguments fill them by name,
    /// and missing trailing parameters take their defaults. `namespace` must be at least
    /// `param_count()` long; the bound values are written to its first slots.
    pub fn bind(
        &self,
        args: ArgValues,
        defaults: &[Value],
        interns: &Interns,
        func_name: StringId,
        namespace: &mut [Value],
    ) -> RunResult<()> {
        let func = interns.get_str(func_name);
        // fast path: exact positional call, the common case
        if !args.has_kwargs() && args.count() == self.params.len() {
            for (slot, value) in namespace.iter_mut().zip(args.values()) {
                *slot = value;
            }
            return Ok(());
        }

        let (positional, kwargs) = args.split();
        if positional.len() > self.params.len() {
            return Err(self.too_many_positional(func, positional.len()));
        }
        let mut bound = vec![false; self.params.len()];
        for (i, value) in positional.into_iter().enumerate() {
            namespace[i] = value;
            bound[i] = true;
        }

        for (key, value) in kwargs.into_vec() {
            let Some(i) = self.params.iter().position(|p| *p == key) else {
                return Err(ExcType::type_error_unexpected_keyword(func, interns.get_str(key)));
            };
            if bound[i] {
                return exc_err_fmt!(ExcType::TypeError; "{func}() got multiple values for argument '{}'", interns.get_str(key));
            }
            namespace[i] = value;
            bound[i] = true;
        }

        let first_default = self.required_count();
        let mut missing = Vec::new();
        for (i, is_bound) in bound.iter().enumerate() {
            if *is_bound {
                continue;
            }
            if i >= first_default {
                namespace[i] = defaults[i - first_default];
            } else {
                missing.push(interns.get_str(self.params[i]));
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            exc_err_fmt!(
                ExcType::TypeError;
                "{func}() missing {} required positional argument{}: {}",
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                join_names(&missing)
            )
        }
    }

    fn too_many_positional(&self, func: &str, given: usize) -> crate::exception_private::RunError {
        let max = self.params.len();
        let takes = if self.defaults_count == 0 {
            format!("{max} positional argument{}", if max == 1 { "" } else { "s" })
        } else {
            format!("from {} to {max} positional arguments", self.required_count())
        };
        let was = if given == 1 { "was" } else { "were" };
        ExcType::type_error(format!("{func}() takes {takes} but {given} {was} given"))
    }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`, as Python lists missing arguments.
fn join_names(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exception_private::RunError, intern::InternerBuilder};

    fn setup() -> (Interns, StringId, Vec<StringId>) {
        let mut builder = InternerBuilder::new();
        let name = builder.intern("f");
        let params = vec![builder.intern("a"), builder.intern("b"), builder.intern("c")];
        (Interns::new(builder, Vec::new(), Vec::new()), name, params)
    }

    fn message(err: RunError) -> String {
        match err {
            RunError::Exc(raise) => raise.exc.arg().unwrap_or_default().to_owned(),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn binds_keywords_and_defaults() {
        let (interns, name, params) = setup();
        let sig = Signature::new(params.clone(), 1);
        let mut ns = vec![Value::Undefined; 4];
        let args = ArgValues::new(vec![Value::Int(1)], vec![(params[1], Value::Int(2))]);
        sig.bind(args, &[Value::Int(3)], &interns, name, &mut ns).unwrap();
        assert!(matches!(ns[..3], [Value::Int(1), Value::Int(2), Value::Int(3)]));
        assert!(matches!(ns[3], Value::Undefined));
    }

    #[test]
    fn reports_python_messages() {
        let (interns, name, params) = setup();
        let sig = Signature::new(params.clone(), 0);
        let mut ns = vec![Value::Undefined; 3];

        let err = sig.bind(ArgValues::new(vec![Value::Int(1); 4], vec![]), &[], &interns, name, &mut ns);
        assert_eq!(message(err.unwrap_err()), "f() takes 3 positional arguments but 4 were given");

        let err = sig.bind(ArgValues::One(Value::Int(1)), &[], &interns, name, &mut ns);
        assert_eq!(
            message(err.unwrap_err()),
            "f() missing 2 required positional arguments: 'b' and 'c'"
        );

        let args = ArgValues::new(vec![Value::Int(1)], vec![(params[0], Value::Int(2))]);
        let err = sig.bind(args, &[], &interns, name, &mut ns);
        assert_eq!(message(err.unwrap_err()), "f() got multiple values for argument 'a'");

        let sig = Signature::new(params, 2);
        let err = sig.bind(ArgValues::new(vec![Value::Int(1); 4], vec![]), &[], &interns, name, &mut ns);
        assert_eq!(
            message(err.unwrap_err()),
            "f() takes from 1 to 3 positional arguments but 4 were given"
        );
    }

    #[test]
    fn joins_names_like_python() {
        assert_eq!(join_names(&["a", "b", "c"]), "'a', 'b', and 'c'");
    }
}
