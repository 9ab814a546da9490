use crate::{
    exception_private::{ExcType, RunResult},
    intern::{Interns, StringId},
    value::Value,
};

/// Evaluated arguments of a call to a builtin, a type constructor or a method.
///
/// Specific variants cover the common 0-2 positional argument cases without a `Vec`.
#[derive(Debug)]
pub(crate) enum ArgValues {
    Empty,
    One(Value),
    Two(Value, Value),
    ArgsKargs {
        args: Vec<Value>,
        kwargs: Vec<(StringId, Value)>,
    },
}

impl ArgValues {
    pub fn new(args: Vec<Value>, kwargs: Vec<(StringId, Value)>) -> Self {
        if !kwargs.is_empty() || args.len() > 2 {
            return Self::ArgsKargs { args, kwargs };
        }
        let mut iter = args.into_iter();
        match (iter.next(), iter.next()) {
            (None, _) => Self::Empty,
            (Some(a), None) => Self::One(a),
            (Some(a), Some(b)) => Self::Two(a, b),
        }
    }

    /// Number of positional arguments.
    pub fn count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::One(_) => 1,
            Self::Two(..) => 2,
            Self::ArgsKargs { args, .. } => args.len(),
        }
    }

    pub fn has_kwargs(&self) -> bool {
        matches!(self, Self::ArgsKargs { kwargs, .. } if !kwargs.is_empty())
    }

    /// Checks that zero arguments were passed.
    pub fn check_zero_args(&self, name: &str) -> RunResult<()> {
        self.reject_kwargs(name)?;
        match self.count() {
            0 => Ok(()),
            n => Err(ExcType::type_error_no_args(name, n)),
        }
    }

    /// Checks that exactly one argument was passed, returning it.
    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.reject_kwargs(name)?;
        match self.into_positional_vec().as_slice() {
            [a] => Ok(*a),
            other => Err(ExcType::type_error_arg_count(name, 1, other.len())),
        }
    }

    /// Checks that exactly two arguments were passed, returning them as a tuple.
    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.reject_kwargs(name)?;
        match self.into_positional_vec().as_slice() {
            [a, b] => Ok((*a, *b)),
            other => Err(ExcType::type_error_arg_count(name, 2, other.len())),
        }
    }

    /// Checks that one or two arguments were passed.
    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.reject_kwargs(name)?;
        match self.into_positional_vec().as_slice() {
            [a] => Ok((*a, None)),
            [a, b] => Ok((*a, Some(*b))),
            [] => Err(ExcType::type_error_at_least(name, 1, 0)),
            other => Err(ExcType::type_error_at_most(name, 2, other.len())),
        }
    }

    /// Checks that zero or one argument was passed.
    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.reject_kwargs(name)?;
        match self.into_positional_vec().as_slice() {
            [] => Ok(None),
            [a] => Ok(Some(*a)),
            other => Err(ExcType::type_error_at_most(name, 1, other.len())),
        }
    }

    /// Positional arguments only, keyword arguments are a `TypeError`.
    pub fn into_positional(self, name: &str) -> RunResult<Vec<Value>> {
        self.reject_kwargs(name)?;
        Ok(self.into_positional_vec())
    }

    /// Splits into positional arguments and keyword arguments.
    pub fn split(self) -> (Vec<Value>, Kwargs) {
        match self {
            Self::ArgsKargs { args, kwargs } => (args, Kwargs(kwargs)),
            other => (other.into_positional_vec(), Kwargs(Vec::new())),
        }
    }

    /// Every value passed, positional first.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Self::Empty => Vec::new(),
            Self::One(a) => vec![*a],
            Self::Two(a, b) => vec![*a, *b],
            Self::ArgsKargs { args, kwargs } => args.iter().copied().chain(kwargs.iter().map(|(_, v)| *v)).collect(),
        }
    }

    fn reject_kwargs(&self, name: &str) -> RunResult<()> {
        if self.has_kwargs() {
            Err(ExcType::type_error_no_kwargs(name))
        } else {
            Ok(())
        }
    }

    fn into_positional_vec(self) -> Vec<Value> {
        match self {
            Self::Empty => Vec::new(),
            Self::One(a) => vec![a],
            Self::Two(a, b) => vec![a, b],
            Self::ArgsKargs { args, .. } => args,
        }
    }
}

/// Keyword arguments still to be consumed by a builtin that accepts some.
#[derive(Debug, Default)]
pub(crate) struct Kwargs(Vec<(StringId, Value)>);

impl Kwargs {
    /// Removes and returns the argument called `name`.
    pub fn take(&mut self, name: &str, interns: &Interns) -> Option<Value> {
        let index = self.0.iter().position(|(key, _)| interns.get_str(*key) == name)?;
        Some(self.0.remove(index).1)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<(StringId, Value)> {
        self.0
    }

    /// Fails if any keyword argument was not consumed.
    pub fn finish(self, func_name: &str, interns: &Interns) -> RunResult<()> {
        match self.0.first() {
            Some((key, _)) => Err(ExcType::type_error_unexpected_keyword(func_name, interns.get_str(*key))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception_private::RunError;

    #[test]
    fn picks_compact_variants() {
        assert!(matches!(ArgValues::new(vec![], vec![]), ArgValues::Empty));
        assert!(matches!(ArgValues::new(vec![Value::None], vec![]), ArgValues::One(_)));
        assert!(matches!(
            ArgValues::new(vec![Value::None, Value::None], vec![]),
            ArgValues::Two(..)
        ));
        assert!(matches!(
            ArgValues::new(vec![Value::None; 3], vec![]),
            ArgValues::ArgsKargs { .. }
        ));
    }

    #[test]
    fn arity_errors() {
        let err = ArgValues::new(vec![Value::Int(1), Value::Int(2)], vec![])
            .get_one_arg("len")
            .unwrap_err();
        let RunError::Exc(raise) = err else { panic!("expected exception") };
        assert_eq!(raise.exc.arg(), Some("len() takes exactly one argument (2 given)"));
    }
}
