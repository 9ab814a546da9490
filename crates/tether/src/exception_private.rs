use std::{
    borrow::Cow,
    fmt::{self, Write},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    args::ArgValues,
    exception_public::{CodeRange, StackFrame, TetherException},
    heap::{Heap, HeapData},
    intern::{Interns, StringId},
    resource::{ResourceError, ResourceTracker},
    types::{Type, str::string_repr_fmt},
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Python exception types supported by the interpreter.
///
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Base class of every other type here except `BaseException`.
    Exception,
    BaseException,

    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    LookupError,
    IndexError,
    KeyError,

    RuntimeError,
    NotImplementedError,
    RecursionError,
    MemoryError,

    NameError,
    UnboundLocalError,

    AttributeError,
    ValueError,
    TypeError,
    AssertionError,
    StopIteration,
    SyntaxError,
}

impl ExcType {
    /// Whether `except handler_type:` catches an exception of type `self`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            Self::Exception => self != Self::BaseException,
            Self::LookupError => matches!(self, Self::KeyError | Self::IndexError),
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            Self::RuntimeError => matches!(self, Self::RecursionError | Self::NotImplementedError),
            Self::NameError => matches!(self, Self::UnboundLocalError),
            _ => false,
        }
    }

    /// Creates an exception instance, handles `ValueError('message')` and friends.
    ///
    /// A non-string argument is converted with `str()`, more than one argument is a `TypeError`.
    pub(crate) fn call(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        args: ArgValues,
        interns: &Interns,
    ) -> RunResult<Value> {
        if args.has_kwargs() {
            return Err(ExcType::type_error_no_kwargs(<&'static str>::from(self)));
        }
        let exc = match args {
            ArgValues::Empty => SimpleException::new_none(self),
            ArgValues::One(value) => SimpleException::new_msg(self, value.py_str(heap, interns)),
            other => {
                return Err(ExcType::type_error(format!(
                    "{self}() takes at most 1 argument ({} given)",
                    other.count()
                )));
            }
        };
        let heap_id = heap.allocate(HeapData::Exception(exc))?;
        Ok(Value::Ref(heap_id))
    }

    #[must_use]
    pub(crate) fn type_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    #[must_use]
    pub(crate) fn value_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    #[must_use]
    pub(crate) fn attribute_error(type_: Type, attr: &str) -> RunError {
        exc_fmt!(Self::AttributeError; "'{type_}' object has no attribute '{attr}'").into()
    }

    #[must_use]
    pub(crate) fn type_error_not_sub(type_: Type) -> RunError {
        exc_fmt!(Self::TypeError; "'{type_}' object is not subscriptable").into()
    }

    #[must_use]
    pub(crate) fn type_error_not_sub_assignment(type_: Type) -> RunError {
        exc_fmt!(Self::TypeError; "'{type_}' object does not support item assignment").into()
    }

    #[must_use]
    pub(crate) fn type_error_unhashable(type_: Type) -> RunError {
        exc_fmt!(Self::TypeError; "unhashable type: '{type_}'").into()
    }

    /// `KeyError` whose message is the repr of the missing key, as CPython prints it.
    #[must_use]
    pub(crate) fn key_error(key: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunError {
        SimpleException::new_msg(Self::KeyError, key.py_repr(heap, interns)).into()
    }

    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            exc_fmt!(Self::TypeError; "{name}() takes exactly one argument ({actual} given)").into()
        } else {
            exc_fmt!(Self::TypeError; "{name} expected {expected} arguments, got {actual}").into()
        }
    }

    #[must_use]
    pub(crate) fn type_error_no_args(name: &str, actual: usize) -> RunError {
        exc_fmt!(Self::TypeError; "{name}() takes no arguments ({actual} given)").into()
    }

    #[must_use]
    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        exc_fmt!(Self::TypeError; "{name} expected at least {min} argument{}, got {actual}", plural(min)).into()
    }

    #[must_use]
    pub(crate) fn type_error_at_most(name: &str, max: usize, actual: usize) -> RunError {
        exc_fmt!(Self::TypeError; "{name} expected at most {max} argument{}, got {actual}", plural(max)).into()
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        exc_fmt!(Self::TypeError; "{name}() takes no keyword arguments").into()
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        exc_fmt!(Self::TypeError; "{name}() got an unexpected keyword argument '{key}'").into()
    }

    #[must_use]
    pub(crate) fn type_error_not_callable(type_: Type) -> RunError {
        exc_fmt!(Self::TypeError; "'{type_}' object is not callable").into()
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(type_: Type) -> RunError {
        exc_fmt!(Self::TypeError; "'{type_}' object is not iterable").into()
    }

    #[must_use]
    pub(crate) fn type_error_indices(type_: Type, index_type: Type) -> RunError {
        exc_fmt!(Self::TypeError; "{type_} indices must be integers or slices, not {index_type}").into()
    }

    #[must_use]
    pub(crate) fn type_error_not_integer(type_: Type) -> RunError {
        exc_fmt!(Self::TypeError; "'{type_}' object cannot be interpreted as an integer").into()
    }

    /// `IndexError` for reads, e.g. `list index out of range`.
    #[must_use]
    pub(crate) fn index_error(type_: Type) -> RunError {
        if type_ == Type::Str {
            return SimpleException::new_msg(Self::IndexError, "string index out of range").into();
        }
        exc_fmt!(Self::IndexError; "{type_} index out of range").into()
    }

    #[must_use]
    pub(crate) fn index_error_msg(msg: &'static str) -> RunError {
        SimpleException::new_msg(Self::IndexError, msg).into()
    }

    #[must_use]
    pub(crate) fn index_error_overflow() -> RunError {
        SimpleException::new_msg(Self::IndexError, "cannot fit 'int' into an index-sized integer").into()
    }

    #[must_use]
    pub(crate) fn list_assignment_index_error() -> RunError {
        SimpleException::new_msg(Self::IndexError, "list assignment index out of range").into()
    }

    #[must_use]
    pub(crate) fn value_error_range_step_zero() -> RunError {
        SimpleException::new_msg(Self::ValueError, "range() arg 3 must not be zero").into()
    }

    #[must_use]
    pub(crate) fn value_error_slice_step_zero() -> RunError {
        SimpleException::new_msg(Self::ValueError, "slice step cannot be zero").into()
    }

    #[must_use]
    pub(crate) fn runtime_error_dict_changed_size() -> RunError {
        SimpleException::new_msg(Self::RuntimeError, "dictionary changed size during iteration").into()
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> SimpleException {
        exc_fmt!(Self::NameError; "name '{name}' is not defined")
    }

    #[must_use]
    pub(crate) fn unbound_local_error(name: &str) -> SimpleException {
        exc_fmt!(Self::UnboundLocalError; "cannot access local variable '{name}' where it is not associated with a value")
    }

    #[must_use]
    pub(crate) fn name_error_free_variable(name: &str) -> SimpleException {
        exc_fmt!(Self::NameError; "cannot access free variable '{name}' where it is not associated with a value in enclosing scope")
    }

    #[must_use]
    pub(crate) fn not_implemented(feature: &str) -> SimpleException {
        exc_fmt!(Self::NotImplementedError; "{feature} is not supported")
    }

    #[must_use]
    pub(crate) fn zero_division(msg: &'static str) -> RunError {
        SimpleException::new_msg(Self::ZeroDivisionError, msg).into()
    }

    /// `unsupported operand type(s) for +: 'int' and 'str'`
    #[must_use]
    pub(crate) fn binary_type_error(op: &str, lhs_type: Type, rhs_type: Type) -> RunError {
        exc_fmt!(Self::TypeError; "unsupported operand type(s) for {op}: '{lhs_type}' and '{rhs_type}'").into()
    }

    #[must_use]
    pub(crate) fn unary_type_error(op: &str, value_type: Type) -> RunError {
        exc_fmt!(Self::TypeError; "bad operand type for unary {op}: '{value_type}'").into()
    }

    /// `'<' not supported between instances of 'int' and 'str'`
    #[must_use]
    pub(crate) fn compare_type_error(op: &str, lhs_type: Type, rhs_type: Type) -> RunError {
        exc_fmt!(Self::TypeError; "'{op}' not supported between instances of '{lhs_type}' and '{rhs_type}'").into()
    }

    #[must_use]
    pub(crate) fn except_invalid_type_error() -> RunError {
        SimpleException::new_msg(
            Self::TypeError,
            "catching classes that do not inherit from BaseException is not allowed",
        )
        .into()
    }

    #[must_use]
    pub(crate) fn overflow_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::OverflowError, msg).into()
    }

    #[must_use]
    pub(crate) fn memory_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::MemoryError, msg).into()
    }

    #[must_use]
    pub(crate) fn recursion_error_comparison() -> RunError {
        SimpleException::new_msg(Self::RecursionError, "maximum recursion depth exceeded in comparison").into()
    }

    #[must_use]
    pub(crate) fn recursion_error_hashing() -> RunError {
        SimpleException::new_msg(Self::RecursionError, "maximum recursion depth exceeded while hashing").into()
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

macro_rules! exc_fmt {
    ($error_type:expr; $($fmt_args:tt)*) => {
        crate::exception_private::SimpleException::new_msg($error_type, format!($($fmt_args)*))
    };
}
pub(crate) use exc_fmt;

macro_rules! exc_err_fmt {
    ($error_type:expr; $($fmt_args:tt)*) => {
        Err(crate::exception_private::exc_fmt!($error_type; $($fmt_args)*).into())
    };
}
pub(crate) use exc_err_fmt;

/// An exception value: the type plus an optional message.
///
/// Exceptions raised by the interpreter and exception objects stored on the heap both use this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.py_repr_fmt(f)
    }
}

impl From<TetherException> for SimpleException {
    fn from(exc: TetherException) -> Self {
        Self {
            exc_type: exc.exc_type(),
            arg: exc.into_message(),
        }
    }
}

impl SimpleException {
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl Into<String>) -> Self {
        Self {
            exc_type,
            arg: Some(arg.into()),
        }
    }

    #[must_use]
    pub fn new_none(exc_type: ExcType) -> Self {
        Self { exc_type, arg: None }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }

    /// `str(exc)`: the message, or an empty string.
    #[must_use]
    pub fn py_str(&self) -> String {
        self.arg.clone().unwrap_or_default()
    }

    /// Writes the exception as Python would repr it, e.g. `KeyError('x')`.
    pub fn py_repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        let type_str: &'static str = self.exc_type.into();
        write!(f, "{type_str}(")?;
        if let Some(arg) = &self.arg {
            string_repr_fmt(arg, f)?;
        }
        f.write_char(')')
    }

    pub(crate) fn with_position(self, position: CodeRange) -> ExceptionRaise {
        ExceptionRaise {
            exc: self,
            frame: Some(RawStackFrame::from_position(position)),
        }
    }
}

/// A raised exception with the traceback collected so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExceptionRaise {
    pub exc: SimpleException,
    /// Innermost frame, parents lead outwards to the module frame.
    pub frame: Option<RawStackFrame>,
}

impl From<SimpleException> for ExceptionRaise {
    fn from(exc: SimpleException) -> Self {
        Self { exc, frame: None }
    }
}

impl ExceptionRaise {
    /// Adds a caller's frame as the outermost frame in the traceback chain.
    ///
    /// If the innermost frame has a position but no name yet, the name is filled in
    /// instead of adding a parent.
    pub(crate) fn add_caller_frame(&mut self, position: CodeRange, name: StringId) {
        match &mut self.frame {
            Some(frame) => {
                if frame.frame_name.is_none() {
                    frame.frame_name = Some(name);
                    return;
                }
                let mut current = frame;
                while current.parent.is_some() {
                    current = current.parent.as_mut().expect("parent checked above");
                }
                current.parent = Some(Box::new(RawStackFrame::new(position, name)));
            }
            None => self.frame = Some(RawStackFrame::new(position, name)),
        }
    }

    /// Converts to the public exception, outermost frame first.
    #[must_use]
    pub fn into_exception(self, interns: &Interns, filename: &str, source: &str) -> TetherException {
        let mut frames = Vec::new();
        let mut current = self.frame.as_ref();
        while let Some(frame) = current {
            let name = frame.frame_name.map(|id| interns.get_str(id).to_owned());
            frames.push(StackFrame::new(frame.position, filename, name, source));
            current = frame.parent.as_deref();
        }
        frames.reverse();
        TetherException::new_full(self.exc.exc_type, self.exc.arg, frames)
    }
}

/// A traceback entry before names and source lines are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawStackFrame {
    pub position: CodeRange,
    /// Function name, or `None` until the frame executing the code fills it in.
    pub frame_name: Option<StringId>,
    pub parent: Option<Box<Self>>,
}

impl RawStackFrame {
    pub(crate) fn new(position: CodeRange, frame_name: StringId) -> Self {
        Self {
            position,
            frame_name: Some(frame_name),
            parent: None,
        }
    }

    fn from_position(position: CodeRange) -> Self {
        Self {
            position,
            frame_name: None,
            parent: None,
        }
    }
}

/// Everything that can stop the run loop short of a return.
#[derive(Debug)]
pub(crate) enum RunError {
    /// Interpreter bug, never caused by user code.
    Internal(Cow<'static, str>),
    /// Python exception, catchable by `try/except`.
    Exc(ExceptionRaise),
    /// Resource limit breach, skips every exception handler.
    Resource(ResourceError),
}

impl From<ExceptionRaise> for RunError {
    fn from(exc: ExceptionRaise) -> Self {
        Self::Exc(exc)
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(exc.into())
    }
}

impl From<TetherException> for RunError {
    fn from(exc: TetherException) -> Self {
        Self::Exc(SimpleException::from(exc).into())
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::UnboundLocalError.is_subclass_of(ExcType::NameError));
        assert!(ExcType::RecursionError.is_subclass_of(ExcType::RuntimeError));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::LookupError));
        assert!(!ExcType::BaseException.is_subclass_of(ExcType::Exception));
        assert!(ExcType::BaseException.is_subclass_of(ExcType::BaseException));
    }

    #[test]
    fn exc_type_names_round_trip() {
        let name: &'static str = ExcType::ZeroDivisionError.into();
        assert_eq!(name, "ZeroDivisionError");
        assert_eq!("KeyError".parse::<ExcType>().ok(), Some(ExcType::KeyError));
    }

    #[test]
    fn caller_frames_chain_outwards() {
        let pos = CodeRange::default();
        let mut raise = SimpleException::new_none(ExcType::ValueError).with_position(pos);
        raise.add_caller_frame(pos, StringId::from_operand(5));
        raise.add_caller_frame(pos, StringId::from_operand(0));
        let frame = raise.frame.expect("frame");
        assert_eq!(frame.frame_name, Some(StringId::from_operand(5)));
        let parent = frame.parent.expect("parent");
        assert_eq!(parent.frame_name, Some(StringId::from_operand(0)));
        assert!(parent.parent.is_none());
    }
}
