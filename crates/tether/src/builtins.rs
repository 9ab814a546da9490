//! Builtin functions, types and exception classes reachable by name from every program.

mod abs;
mod chr_ord;
mod divmod;
mod enumerate;
mod hash;
mod isinstance;
pub(crate) mod min_max;
mod pow;
mod print;
mod round;
pub(crate) mod sorted;
mod sum;
mod zip;

use std::{fmt::Write, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, exc_err_fmt},
    heap::Heap,
    intern::Interns,
    io::PrintWriter,
    resource::ResourceTracker,
    types::{Type, iter::collect_iterable},
    value::Value,
};

/// Anything a bare builtin name can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Builtins {
    Function(BuiltinsFunctions),
    /// An exception class like `ValueError`, callable to create an instance.
    ExcType(ExcType),
    /// A type like `int` or `list`, callable as a constructor.
    Type(Type),
}

impl Builtins {
    /// Resolves a builtin name, `None` if the name is not a builtin.
    pub fn from_name(name: &str) -> Option<Self> {
        if let Ok(function) = BuiltinsFunctions::from_str(name) {
            Some(Self::Function(function))
        } else if let Ok(exc_type) = ExcType::from_str(name) {
            Some(Self::ExcType(exc_type))
        } else {
            Type::from_str(name).ok().map(Self::Type)
        }
    }

    /// The value `type(x)` returns for a value of type `t`.
    ///
    /// Exception types map to the exception class itself so `type(e) is ValueError` holds.
    pub fn from_type(t: Type) -> Self {
        match t {
            Type::Exception(exc_type) => Self::ExcType(exc_type),
            other => Self::Type(other),
        }
    }

    pub fn py_type(self) -> Type {
        match self {
            Self::Function(_) => Type::BuiltinFunction,
            Self::ExcType(_) | Self::Type(_) => Type::Type,
        }
    }

    pub fn py_repr_fmt(self, f: &mut impl Write) -> std::fmt::Result {
        match self {
            Self::Function(b) => write!(f, "<built-in function {b}>"),
            Self::ExcType(e) => write!(f, "<class '{e}'>"),
            Self::Type(t) => write!(f, "<class '{t}'>"),
        }
    }

    /// Calls this builtin with the given arguments.
    pub fn call(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        args: ArgValues,
        interns: &Interns,
        print: &mut impl PrintWriter,
    ) -> RunResult<Value> {
        match self {
            Self::Function(b) => b.call(heap, args, interns, print),
            Self::ExcType(exc) => exc.call(heap, args, interns),
            Self::Type(t) => t.call(heap, args, interns),
        }
    }
}

/// Builtin functions like `print` and `len`; names are the lowercase variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BuiltinsFunctions {
    Print,
    Len,
    Repr,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Isinstance,
    Round,
    Divmod,
    Pow,
    Chr,
    Ord,
    Any,
    All,
    Hash,
}

impl BuiltinsFunctions {
    fn call(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        args: ArgValues,
        interns: &Interns,
        print: &mut impl PrintWriter,
    ) -> RunResult<Value> {
        match self {
            Self::Print => print::builtin_print(heap, args, interns, print),
            Self::Len => {
                let value = args.get_one_arg("len")?;
                match value.py_len(heap, interns) {
                    Some(len) => Ok(Value::Int(len as i64)),
                    None => exc_err_fmt!(ExcType::TypeError; "object of type '{}' has no len()", value.py_type(heap)),
                }
            }
            Self::Repr => {
                let value = args.get_one_arg("repr")?;
                let repr = value.py_repr(heap, interns);
                heap.alloc_str(repr)
            }
            Self::Abs => abs::builtin_abs(heap, args),
            Self::Min => min_max::builtin_min_max(heap, args, interns, true),
            Self::Max => min_max::builtin_min_max(heap, args, interns, false),
            Self::Sum => sum::builtin_sum(heap, args, interns),
            Self::Sorted => sorted::builtin_sorted(heap, args, interns),
            Self::Reversed => sorted::builtin_reversed(heap, args, interns),
            Self::Enumerate => enumerate::builtin_enumerate(heap, args, interns),
            Self::Zip => zip::builtin_zip(heap, args, interns),
            Self::Isinstance => isinstance::builtin_isinstance(heap, args),
            Self::Round => round::builtin_round(heap, args),
            Self::Divmod => divmod::builtin_divmod(heap, args, interns),
            Self::Pow => pow::builtin_pow(heap, args, interns),
            Self::Chr => chr_ord::builtin_chr(heap, args),
            Self::Ord => chr_ord::builtin_ord(heap, args, interns),
            Self::Any => {
                let iterable = args.get_one_arg("any")?;
                let items = collect_iterable(iterable, heap, interns)?;
                Ok(Value::Bool(items.iter().any(|v| v.py_bool(heap, interns))))
            }
            Self::All => {
                let iterable = args.get_one_arg("all")?;
                let items = collect_iterable(iterable, heap, interns)?;
                Ok(Value::Bool(items.iter().all(|v| v.py_bool(heap, interns))))
            }
            Self::Hash => hash::builtin_hash(heap, args, interns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_in_order() {
        assert_eq!(
            Builtins::from_name("len"),
            Some(Builtins::Function(BuiltinsFunctions::Len))
        );
        assert_eq!(
            Builtins::from_name("KeyError"),
            Some(Builtins::ExcType(ExcType::KeyError))
        );
        assert_eq!(Builtins::from_name("dict"), Some(Builtins::Type(Type::Dict)));
        assert_eq!(Builtins::from_name("fetch"), None);
        assert_eq!(Builtins::from_name("function"), None);
    }

    #[test]
    fn reprs() {
        let mut s = String::new();
        Builtins::Function(BuiltinsFunctions::Sorted).py_repr_fmt(&mut s).unwrap();
        Builtins::from_type(Type::Exception(ExcType::ValueError))
            .py_repr_fmt(&mut s)
            .unwrap();
        Builtins::Type(Type::Int).py_repr_fmt(&mut s).unwrap();
        assert_eq!(s, "<built-in function sorted><class 'ValueError'><class 'int'>");
    }
}
