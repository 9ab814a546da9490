use std::{
    cmp::Ordering,
    fmt::{self, Write},
};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    builtins::Builtins,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{ExtFunctionId, FunctionId, Interns, StringId},
    numeric,
    resource::ResourceTracker,
    types::{Type, str::string_repr_fmt},
};

/// Identifies one external call within an execution.
pub(crate) type CallId = u32;

/// Comparisons of nested containers raise `RecursionError` beyond this depth; reprs
/// fall back to a placeholder.
pub(crate) const MAX_NESTING: usize = 200;

/// Primary value type of the interpreter.
///
/// Immediate values are stored inline; everything else lives in the [`Heap`] and is
/// referenced by `Ref`. Values are `Copy`: the heap reclaims unreachable entries with a
/// mark and sweep pass, so no reference counts need maintaining.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) enum Value {
    /// Marks an unassigned variable slot, never visible to programs.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// String literal from the source, interned at compile time.
    InternString(StringId),
    Builtin(Builtins),
    /// A function without defaults or captured cells.
    Function(FunctionId),
    ExtFunction(ExtFunctionId),
    /// The result of a deferred external call, resolved with `await`.
    ExternalFuture(CallId),
    Ref(HeapId),
}

impl Value {
    pub fn py_type(self, heap: &Heap<impl ResourceTracker>) -> Type {
        match self {
            Self::Undefined | Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::InternString(_) => Type::Str,
            Self::Builtin(b) => b.py_type(),
            Self::Function(_) | Self::ExtFunction(_) => Type::Function,
            Self::ExternalFuture(_) => Type::Future,
            Self::Ref(id) => heap.get(id).py_type(),
        }
    }

    /// Python truthiness.
    pub fn py_bool(self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
        match self {
            Self::Undefined | Self::None => false,
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
            Self::Float(f) => f != 0.0,
            Self::InternString(id) => !interns.get_str(id).is_empty(),
            Self::Ref(id) => heap.get(id).py_bool(),
            Self::Builtin(_) | Self::Function(_) | Self::ExtFunction(_) | Self::ExternalFuture(_) => true,
        }
    }

    /// `len(value)`, `None` for types without a length.
    pub fn py_len(self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Option<usize> {
        match self {
            Self::InternString(id) => Some(interns.get_str(id).chars().count()),
            Self::Ref(id) => heap.get(id).py_len(),
            _ => None,
        }
    }

    /// The string contents of a `str` value, interned or on the heap.
    pub fn as_str<'a>(&self, heap: &'a Heap<impl ResourceTracker>, interns: &'a Interns) -> Option<&'a str> {
        match self {
            Self::InternString(id) => Some(interns.get_str(*id)),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// An `int` (or `bool`) that fits in an `i64`.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i),
            Self::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    /// An integer used as an index or count; raises `TypeError` for other types.
    pub fn as_index(self, heap: &Heap<impl ResourceTracker>) -> RunResult<i64> {
        match self {
            Self::Int(i) => Ok(i),
            Self::Bool(b) => Ok(i64::from(b)),
            Self::Ref(id) if matches!(heap.get(id), HeapData::LongInt(_)) => Err(ExcType::index_error_overflow()),
            other => Err(ExcType::type_error_not_integer(other.py_type(heap))),
        }
    }

    pub fn heap_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// `is` comparison.
    pub fn is_identical(self, other: Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::InternString(a), Self::InternString(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::ExtFunction(a), Self::ExtFunction(b)) => a == b,
            (Self::ExternalFuture(a), Self::ExternalFuture(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }

    /// `==` with Python semantics: numbers compare across int, float and bool,
    /// containers compare structurally.
    pub fn py_eq(self, other: Self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<bool> {
        self.eq_depth(other, heap, interns, 0)
    }

    pub(crate) fn eq_depth(
        self,
        other: Self,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        depth: usize,
    ) -> RunResult<bool> {
        if depth > MAX_NESTING {
            return Err(ExcType::recursion_error_comparison());
        }
        if let Some(result) = numeric::numeric_eq(self, other, heap) {
            return Ok(result);
        }
        if let (Some(a), Some(b)) = (self.as_str(heap, interns), other.as_str(heap, interns)) {
            return Ok(a == b);
        }
        match (self, other) {
            (Self::Ref(a), Self::Ref(b)) if a == b => Ok(true),
            (Self::Ref(a), Self::Ref(b)) => heap.get(a).py_eq(heap.get(b), heap, interns, depth + 1),
            _ => Ok(self.is_identical(other)),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`; `Ok(None)` when the types are not orderable.
    pub fn py_cmp(self, other: Self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Option<Ordering>> {
        self.cmp_depth(other, heap, interns, 0)
    }

    fn cmp_depth(
        self,
        other: Self,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        depth: usize,
    ) -> RunResult<Option<Ordering>> {
        if depth > MAX_NESTING {
            return Err(ExcType::recursion_error_comparison());
        }
        if let Some(result) = numeric::numeric_cmp(self, other, heap) {
            return Ok(result);
        }
        if let (Some(a), Some(b)) = (self.as_str(heap, interns), other.as_str(heap, interns)) {
            return Ok(Some(a.cmp(b)));
        }
        let (Self::Ref(a), Self::Ref(b)) = (self, other) else {
            return Ok(None);
        };
        let (left, right) = match (heap.get(a), heap.get(b)) {
            (HeapData::List(l), HeapData::List(r)) => (l.as_slice(), r.as_slice()),
            (HeapData::Tuple(l), HeapData::Tuple(r)) => (l.as_slice(), r.as_slice()),
            _ => return Ok(None),
        };
        for (l, r) in left.iter().zip(right) {
            if !l.eq_depth(*r, heap, interns, depth + 1)? {
                return l.cmp_depth(*r, heap, interns, depth + 1);
            }
        }
        Ok(Some(left.len().cmp(&right.len())))
    }

    /// `repr(value)`
    pub fn py_repr(self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> String {
        let mut s = String::new();
        // writing to a String cannot fail
        let _ = self.py_repr_fmt(&mut s, heap, interns, &mut ReprGuard::default());
        s
    }

    /// `str(value)`: strings are not quoted and exceptions show only their message.
    pub fn py_str(self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> String {
        if let Some(s) = self.as_str(heap, interns) {
            return s.to_owned();
        }
        if let Self::Ref(id) = self
            && let HeapData::Exception(exc) = heap.get(id)
        {
            return exc.py_str();
        }
        self.py_repr(heap, interns)
    }

    pub fn py_repr_fmt(
        self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        guard: &mut ReprGuard,
    ) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("<undefined>"),
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&numeric::float_repr(v)),
            Self::InternString(id) => string_repr_fmt(interns.get_str(id), f),
            Self::Builtin(b) => b.py_repr_fmt(f),
            Self::Function(id) => write!(f, "<function {}>", interns.get_str(interns.get_function(id).name)),
            Self::ExtFunction(id) => write!(f, "<function {}>", interns.get_external_function_name(id)),
            Self::ExternalFuture(call_id) => write!(f, "<future {call_id}>"),
            Self::Ref(id) => {
                if guard.depth > MAX_NESTING || !guard.seen.insert(id) {
                    return f.write_str(heap.get(id).recursive_placeholder());
                }
                guard.depth += 1;
                let result = heap.get(id).py_repr_fmt(f, heap, interns, guard);
                guard.depth -= 1;
                guard.seen.remove(&id);
                result
            }
        }
    }
}

/// Tracks the containers currently being printed so self-references render as `[...]`.
#[derive(Debug, Default)]
pub(crate) struct ReprGuard {
    seen: AHashSet<HeapId>,
    depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker, types::List};

    fn interns() -> Interns {
        Interns::new(InternerBuilder::new(), Vec::new(), Vec::new())
    }

    #[test]
    fn numbers_compare_across_types() {
        let heap = Heap::new(NoLimitTracker);
        let interns = interns();
        assert!(Value::Int(1).py_eq(Value::Float(1.0), &heap, &interns).unwrap());
        assert!(Value::Bool(true).py_eq(Value::Int(1), &heap, &interns).unwrap());
        assert!(!Value::Int(1).py_eq(Value::None, &heap, &interns).unwrap());
        assert_eq!(
            Value::Int(2).py_cmp(Value::Float(1.5), &heap, &interns).unwrap(),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int(2).py_cmp(Value::None, &heap, &interns).unwrap(), None);
    }

    #[test]
    fn deep_comparison_is_a_recursion_error() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = interns();
        let (mut a, mut b) = (Value::None, Value::None);
        for _ in 0..=MAX_NESTING + 1 {
            a = heap.alloc_list(vec![a]).unwrap();
            b = heap.alloc_list(vec![b]).unwrap();
        }
        assert!(a.py_eq(b, &heap, &interns).is_err());
        assert!(a.py_cmp(b, &heap, &interns).is_err());
        assert!(a.py_eq(a, &heap, &interns).unwrap());
    }

    #[test]
    fn self_referencing_list_repr() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = interns();
        let id = heap.allocate(HeapData::List(List::new(vec![Value::Int(1)]))).unwrap();
        let HeapData::List(list) = heap.get_mut(id) else { unreachable!() };
        list.push(Value::Ref(id));
        assert_eq!(Value::Ref(id).py_repr(&heap, &interns), "[1, [...]]");
    }

    #[test]
    fn str_of_strings_is_unquoted() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = interns();
        let s = heap.alloc_str("it's".to_owned()).unwrap();
        assert_eq!(s.py_str(&heap, &interns), "it's");
        assert_eq!(s.py_repr(&heap, &interns), "\"it's\"");
    }
}
