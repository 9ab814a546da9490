use std::fmt;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::{
    args::ArgValues,
    builtins::Builtins,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::Interns,
    numeric,
    resource::ResourceTracker,
    types::{Dict, List, Range, Str, Tuple},
    value::Value,
};

/// The Python type of a value.
///
/// Parsing from a string only accepts the names of the builtin types a program can
/// call as constructors (`int`, `list`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    Type,
    #[strum(disabled)]
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Range,
    #[strum(disabled)]
    Slice,
    #[strum(disabled)]
    Function,
    #[strum(disabled)]
    BuiltinFunction,
    #[strum(disabled)]
    Method,
    #[strum(disabled)]
    Iterator,
    #[strum(disabled)]
    Future,
    #[strum(disabled)]
    Cell,
    #[strum(disabled)]
    Exception(ExcType),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Type => "type",
            Self::NoneType => "NoneType",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Dict => "dict",
            Self::Range => "range",
            Self::Slice => "slice",
            Self::Function => "function",
            Self::BuiltinFunction => "builtin_function_or_method",
            Self::Method => "method",
            Self::Iterator => "iterator",
            Self::Future => "future",
            Self::Cell => "cell",
            Self::Exception(exc_type) => return write!(f, "{exc_type}"),
        };
        f.write_str(name)
    }
}

impl Type {
    /// `isinstance` relationship: `bool` is an `int`, exceptions follow their hierarchy.
    #[must_use]
    pub fn is_instance_of(self, other: Self) -> bool {
        match (self, other) {
            (Self::Bool, Self::Int) => true,
            (Self::Exception(exc), Self::Exception(handler)) => exc.is_subclass_of(handler),
            _ => self == other,
        }
    }

    /// Calls the type as a constructor, e.g. `list(x)` or `int('7')`.
    pub(crate) fn call(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        args: ArgValues,
        interns: &Interns,
    ) -> RunResult<Value> {
        match self {
            Self::List => List::init(heap, args, interns),
            Self::Tuple => Tuple::init(heap, args, interns),
            Self::Dict => Dict::init(heap, args, interns),
            Self::Str => Str::init(heap, args, interns),
            Self::Range => Range::init(heap, args, interns),
            Self::Int => numeric::int_init(heap, args, interns),
            Self::Float => numeric::float_init(heap, args, interns),
            Self::Bool => {
                let value = args.get_zero_one_arg("bool")?;
                Ok(Value::Bool(value.is_some_and(|v| v.py_bool(heap, interns))))
            }
            Self::Type => {
                let value = args.get_one_arg("type")?;
                Ok(Value::Builtin(Builtins::from_type(value.py_type(heap))))
            }
            Self::Exception(exc_type) => exc_type.call(heap, args, interns),
            _ => Err(ExcType::type_error(format!("cannot create '{self}' instances"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn subtype_relationships() {
        assert!(Type::Bool.is_instance_of(Type::Int));
        assert!(!Type::Int.is_instance_of(Type::Bool));
        assert!(Type::Exception(ExcType::KeyError).is_instance_of(Type::Exception(ExcType::LookupError)));
        assert!(!Type::Exception(ExcType::KeyError).is_instance_of(Type::Exception(ExcType::ValueError)));
    }

    #[test]
    fn only_constructor_names_parse() {
        assert_eq!(Type::from_str("list").ok(), Some(Type::List));
        assert!(Type::from_str("function").is_err());
        assert!(Type::from_str("NoneType").is_err());
        assert_eq!(Type::NoneType.to_string(), "NoneType");
        assert_eq!(Type::BuiltinFunction.to_string(), "builtin_function_or_method");
    }
}
