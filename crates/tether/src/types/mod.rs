//! Heap-allocated runtime types and the operations they share.

pub mod dict;
pub mod iter;
pub mod list;
pub mod range;
pub mod slice;
pub mod str;
pub mod tuple;
pub mod r#type;

use std::fmt::{self, Write};

pub(crate) use dict::{Dict, DictKey};
pub(crate) use iter::ForIterator;
pub(crate) use list::List;
pub(crate) use range::Range;
pub(crate) use slice::Slice;
pub(crate) use str::Str;
pub(crate) use tuple::Tuple;
pub(crate) use r#type::Type;

use crate::{exception_private::RunResult, heap::Heap, intern::Interns, resource::ResourceTracker, value::ReprGuard};

/// Operations every heap-allocated value supports.
///
/// Methods that inspect nested values take the heap so `Value::Ref` items can be followed.
pub(crate) trait PyTrait {
    fn py_type(&self) -> Type;

    /// `len()`, `None` for types without a length.
    fn py_len(&self) -> Option<usize> {
        None
    }

    /// Truthiness; sized values are falsy when empty, everything else is truthy.
    fn py_bool(&self) -> bool {
        self.py_len().is_none_or(|len| len != 0)
    }

    /// Approximate number of bytes owned, reported to the resource tracker.
    fn py_estimate_size(&self) -> usize;

    fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        guard: &mut ReprGuard,
    ) -> fmt::Result;

    /// Structural equality with another value of the same kind.
    fn py_eq(&self, _other: &Self, _heap: &Heap<impl ResourceTracker>, _interns: &Interns, _depth: usize) -> RunResult<bool> {
        Ok(false)
    }
}
