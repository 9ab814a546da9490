//! Values as seen by the host, and marshaling them across the interpreter boundary.

use std::{
    fmt::{self, Write},
    hash::{Hash, Hasher},
    ops::Deref,
};

use ahash::AHashSet;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{
    error::TetherError,
    exception_private::{ExcType, SimpleException},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    numeric::float_repr,
    resource::ResourceTracker,
    types::{Dict, DictKey, List, Str, Tuple, str::string_repr},
    value::{MAX_NESTING, Value},
};

/// A value that can be passed into or returned from the interpreter.
///
/// Unlike the internal `Value`, a `TetherObject` owns all of its data and needs no heap.
///
/// # Input vs output variants
///
/// `None`, `Bool`, `Int`, `BigInt`, `Float`, `String`, `List` and `Dict` map both ways
/// and survive a round trip unchanged. `Tuple` comes out of the interpreter as an
/// immutable [`FrozenSeq`]; passing one in is accepted as a convenience. `Exception`
/// and `Repr` are output only: passing them in fails with
/// [`TetherError::UnsupportedValue`].
///
/// # Equality
///
/// Floats compare by bit pattern so that `NaN == NaN` and round trips are exact, which
/// also makes `TetherObject` usable as a map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TetherObject {
    None,
    Bool(bool),
    /// An integer that fits in 64 bits.
    Int(i64),
    /// An integer outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    String(String),
    List(Vec<Self>),
    /// Immutable sequence, produced from Python tuples.
    Tuple(FrozenSeq),
    /// Insertion-ordered mapping with unique keys.
    Dict(DictPairs),
    /// An exception object returned by the program.
    Exception {
        exc_type: ExcType,
        arg: Option<String>,
    },
    /// `repr()` of a value with no data representation: functions, ranges, iterators.
    Repr(String),
}

impl TetherObject {
    /// Converts a host symbolic value, such as a fieldless enum, to a string by its display text.
    pub fn symbol(value: impl fmt::Display) -> Self {
        Self::String(value.to_string())
    }

    pub fn dict(pairs: impl Into<DictPairs>) -> Self {
        Self::Dict(pairs.into())
    }

    pub fn tuple(items: impl Into<FrozenSeq>) -> Self {
        Self::Tuple(items.into())
    }

    /// Converts an internal value to a host object.
    ///
    /// Fails when a container contains itself or containers nest too deeply.
    pub(crate) fn from_value(
        value: Value,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
    ) -> Result<Self, TetherError> {
        let mut visiting = AHashSet::new();
        Self::from_value_inner(value, heap, interns, &mut visiting)
    }

    fn from_value_inner(
        value: Value,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        visiting: &mut AHashSet<HeapId>,
    ) -> Result<Self, TetherError> {
        let heap_id = match value {
            Value::Undefined => {
                return Err(TetherError::UnsupportedValue("unbound value".to_owned()));
            }
            Value::None => return Ok(Self::None),
            Value::Bool(b) => return Ok(Self::Bool(b)),
            Value::Int(i) => return Ok(Self::Int(i)),
            Value::Float(f) => return Ok(Self::Float(f)),
            Value::InternString(id) => return Ok(Self::String(interns.get_str(id).to_owned())),
            Value::Ref(heap_id) => heap_id,
            other => return Ok(Self::Repr(other.py_repr(heap, interns))),
        };

        // `visiting` holds exactly the containers enclosing this one
        if visiting.len() > MAX_NESTING {
            return Err(too_deep());
        }
        if !visiting.insert(heap_id) {
            return Err(TetherError::UnsupportedValue(format!(
                "cannot marshal a self-referential {}",
                heap.get(heap_id).py_type()
            )));
        }
        let mut convert = |item: Value| Self::from_value_inner(item, heap, interns, visiting);
        let object = match heap.get(heap_id) {
            HeapData::Str(s) => Self::String(s.as_str().to_owned()),
            HeapData::LongInt(big) => Self::BigInt(big.clone()),
            HeapData::List(list) => Self::List(list.as_slice().iter().map(|v| convert(*v)).collect::<Result<_, _>>()?),
            HeapData::Tuple(tuple) => Self::Tuple(
                tuple
                    .as_slice()
                    .iter()
                    .map(|v| convert(*v))
                    .collect::<Result<FrozenSeq, _>>()?,
            ),
            HeapData::Dict(dict) => Self::Dict(
                dict.items()
                    .map(|(k, v)| Ok((convert(k)?, convert(v)?)))
                    .collect::<Result<DictPairs, TetherError>>()?,
            ),
            HeapData::Cell(inner) => convert(*inner)?,
            HeapData::Exception(exc) => Self::Exception {
                exc_type: exc.exc_type(),
                arg: exc.arg().map(str::to_owned),
            },
            _ => Self::Repr(value.py_repr(heap, interns)),
        };
        visiting.remove(&heap_id);
        Ok(object)
    }

    /// Converts this object into an internal value, allocating on the heap where needed.
    pub(crate) fn to_value(self, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> Result<Value, TetherError> {
        self.to_value_at(heap, interns, 0)
    }

    fn to_value_at(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
        depth: usize,
    ) -> Result<Value, TetherError> {
        if depth > MAX_NESTING {
            return Err(too_deep());
        }
        let data = match self {
            Self::None => return Ok(Value::None),
            Self::Bool(b) => return Ok(Value::Bool(b)),
            Self::Int(i) => return Ok(Value::Int(i)),
            Self::Float(f) => return Ok(Value::Float(f)),
            Self::BigInt(big) => match big.to_i64() {
                Some(i) => return Ok(Value::Int(i)),
                None => HeapData::LongInt(big),
            },
            Self::String(s) => HeapData::Str(Str::new(s)),
            Self::List(items) => HeapData::List(List::new(Self::values(items, heap, interns, depth)?)),
            Self::Tuple(items) => HeapData::Tuple(Tuple::new(Self::values(items.0.into_vec(), heap, interns, depth)?)),
            Self::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key_type = key.type_name();
                    let key_value = key.to_value_at(heap, interns, depth + 1)?;
                    let value = value.to_value_at(heap, interns, depth + 1)?;
                    let dict_key = DictKey::from_value(key_value, heap, interns)
                        .map_err(|_| TetherError::UnsupportedValue(format!("unhashable dict key of type {key_type}")))?;
                    // the interpreter would merge keys such as `1` and `1.0`
                    if dict.contains(&dict_key) {
                        return Err(TetherError::UnsupportedValue(format!(
                            "duplicate dict key {}",
                            key_value.py_repr(heap, interns)
                        )));
                    }
                    dict.insert(dict_key, key_value, value);
                }
                HeapData::Dict(dict)
            }
            Self::Exception { .. } | Self::Repr(_) => {
                return Err(TetherError::UnsupportedValue(format!(
                    "{} values can only be returned, not passed in",
                    self.type_name()
                )));
            }
        };
        Ok(Value::Ref(heap.allocate(data)?))
    }

    fn values(
        items: Vec<Self>,
        heap: &mut Heap<impl ResourceTracker>,
        interns: &Interns,
        depth: usize,
    ) -> Result<Vec<Value>, TetherError> {
        items
            .into_iter()
            .map(|item| item.to_value_at(heap, interns, depth + 1))
            .collect()
    }

    /// Returns the Python `repr()` of this object.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = String::new();
        // writing to a String cannot fail
        let _ = self.repr_fmt(&mut s);
        s
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => f.write_str(&float_repr(*v)),
            Self::String(s) => f.write_str(&string_repr(s)),
            Self::List(items) => {
                f.write_char('[')?;
                repr_items(items, f)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                repr_items(items, f)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(pairs) => {
                f.write_char('{')?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    k.repr_fmt(f)?;
                    f.write_str(": ")?;
                    v.repr_fmt(f)?;
                }
                f.write_char('}')
            }
            Self::Exception { exc_type, arg } => {
                write!(f, "{exc_type}(")?;
                if let Some(arg) = arg {
                    f.write_str(&string_repr(arg))?;
                }
                f.write_char(')')
            }
            Self::Repr(s) => f.write_str(s),
        }
    }

    /// Python truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(_) | Self::Exception { .. } | Self::Repr(_) => true,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(pairs) => !pairs.is_empty(),
        }
    }

    /// The Python type name, as `type(x).__name__` would give it.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Exception { exc_type, .. } => exc_type.into(),
            Self::Repr(_) => "repr",
        }
    }
}

fn too_deep() -> TetherError {
    TetherError::UnsupportedValue(format!("value is nested deeper than {MAX_NESTING} levels"))
}

fn repr_items(items: &[TetherObject], f: &mut impl Write) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f)?;
    }
    Ok(())
}

/// Python `str()`: strings print without quotes, everything else like `repr()`.
impl fmt::Display for TetherObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Exception { arg, .. } => f.write_str(arg.as_deref().unwrap_or_default()),
            _ => self.repr_fmt(f),
        }
    }
}

impl PartialEq for TetherObject {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) | (Self::Repr(a), Self::Repr(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (
                Self::Exception {
                    exc_type: a_type,
                    arg: a_arg,
                },
                Self::Exception {
                    exc_type: b_type,
                    arg: b_arg,
                },
            ) => a_type == b_type && a_arg == b_arg,
            _ => false,
        }
    }
}

impl Eq for TetherObject {}

impl Hash for TetherObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::None => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::BigInt(b) => b.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) | Self::Repr(s) => s.hash(state),
            Self::List(items) => items.hash(state),
            Self::Tuple(items) => items.hash(state),
            Self::Dict(pairs) => pairs.hash(state),
            Self::Exception { exc_type, arg } => {
                exc_type.hash(state);
                arg.hash(state);
            }
        }
    }
}

impl From<bool> for TetherObject {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for TetherObject {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for TetherObject {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for TetherObject {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for TetherObject {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<BigInt> for TetherObject {
    /// Keeps integers that fit in an `i64` as [`TetherObject::Int`].
    fn from(big: BigInt) -> Self {
        match big.to_i64() {
            Some(i) => Self::Int(i),
            None => Self::BigInt(big),
        }
    }
}

impl<T: Into<TetherObject>> From<Vec<T>> for TetherObject {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<&SimpleException> for TetherObject {
    fn from(exc: &SimpleException) -> Self {
        Self::Exception {
            exc_type: exc.exc_type(),
            arg: exc.arg().map(str::to_owned),
        }
    }
}

/// Error returned when a [`TetherObject`] does not hold the requested Rust type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, got {actual}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl ConversionError {
    #[must_use]
    pub fn new(expected: &'static str, actual: &'static str) -> Self {
        Self { expected, actual }
    }
}

impl TryFrom<&TetherObject> for i64 {
    type Error = ConversionError;

    fn try_from(value: &TetherObject) -> Result<Self, Self::Error> {
        match value {
            TetherObject::Int(i) => Ok(*i),
            _ => Err(ConversionError::new("int", value.type_name())),
        }
    }
}

/// Ints convert too, as Python would accept them where a float is expected.
impl TryFrom<&TetherObject> for f64 {
    type Error = ConversionError;

    fn try_from(value: &TetherObject) -> Result<Self, Self::Error> {
        match value {
            TetherObject::Float(f) => Ok(*f),
            TetherObject::Int(i) => Ok(*i as Self),
            _ => Err(ConversionError::new("float", value.type_name())),
        }
    }
}

impl TryFrom<&TetherObject> for String {
    type Error = ConversionError;

    fn try_from(value: &TetherObject) -> Result<Self, Self::Error> {
        match value {
            TetherObject::String(s) => Ok(s.clone()),
            _ => Err(ConversionError::new("str", value.type_name())),
        }
    }
}

/// Only `True` and `False` convert; this is not truthiness, see [`TetherObject::is_truthy`].
impl TryFrom<&TetherObject> for bool {
    type Error = ConversionError;

    fn try_from(value: &TetherObject) -> Result<Self, Self::Error> {
        match value {
            TetherObject::Bool(b) => Ok(*b),
            _ => Err(ConversionError::new("bool", value.type_name())),
        }
    }
}

/// The items of a tuple. Read only: there is no way to change an item once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrozenSeq(Box<[TetherObject]>);

impl FrozenSeq {
    #[must_use]
    pub fn as_slice(&self) -> &[TetherObject] {
        &self.0
    }
}

impl Deref for FrozenSeq {
    type Target = [TetherObject];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<TetherObject>> for FrozenSeq {
    fn from(items: Vec<TetherObject>) -> Self {
        Self(items.into_boxed_slice())
    }
}

impl FromIterator<TetherObject> for FrozenSeq {
    fn from_iter<I: IntoIterator<Item = TetherObject>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FrozenSeq {
    type Item = &'a TetherObject;
    type IntoIter = std::slice::Iter<'a, TetherObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Key/value pairs of a dict, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DictPairs(Vec<(TetherObject, TetherObject)>);

impl DictPairs {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TetherObject, TetherObject)> {
        self.0.iter()
    }

    /// Value for `key`, compared with `==`.
    #[must_use]
    pub fn get(&self, key: &TetherObject) -> Option<&TetherObject> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl From<Vec<(TetherObject, TetherObject)>> for DictPairs {
    fn from(pairs: Vec<(TetherObject, TetherObject)>) -> Self {
        Self(pairs)
    }
}

impl From<IndexMap<TetherObject, TetherObject>> for DictPairs {
    fn from(map: IndexMap<TetherObject, TetherObject>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl From<DictPairs> for IndexMap<TetherObject, TetherObject> {
    fn from(pairs: DictPairs) -> Self {
        pairs.into_iter().collect()
    }
}

impl FromIterator<(TetherObject, TetherObject)> for DictPairs {
    fn from_iter<I: IntoIterator<Item = (TetherObject, TetherObject)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DictPairs {
    type Item = (TetherObject, TetherObject);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DictPairs {
    type Item = &'a (TetherObject, TetherObject);
    type IntoIter = std::slice::Iter<'a, (TetherObject, TetherObject)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker};

    fn round_trip(object: TetherObject) -> TetherObject {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let value = object.to_value(&mut heap, &interns).unwrap();
        TetherObject::from_value(value, &heap, &interns).unwrap()
    }

    #[test]
    fn nested_containers_round_trip() {
        let object = TetherObject::dict(vec![
            ("name".into(), "héllo ✓".into()),
            (TetherObject::Int(1), TetherObject::from(vec![TetherObject::Float(f64::NAN), TetherObject::None])),
            (TetherObject::Bool(false), TetherObject::BigInt(BigInt::from(u64::MAX) * 3)),
        ]);
        assert_eq!(round_trip(object.clone()), object);
    }

    #[test]
    fn small_big_int_becomes_int() {
        assert_eq!(round_trip(TetherObject::BigInt(BigInt::from(7))), TetherObject::Int(7));
    }

    #[test]
    fn tuples_come_back_frozen() {
        let tuple = TetherObject::tuple(vec![TetherObject::Int(1), "a".into()]);
        assert_eq!(round_trip(tuple.clone()), tuple);
        assert_eq!(tuple.py_repr(), "(1, 'a')");
        assert_eq!(TetherObject::tuple(vec![TetherObject::Int(1)]).py_repr(), "(1,)");
    }

    #[test]
    fn output_only_variants_are_rejected() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let err = TetherObject::Repr("<function f>".to_owned())
            .to_value(&mut heap, &interns)
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported value: repr values can only be returned, not passed in");

        let unhashable = TetherObject::dict(vec![(TetherObject::from(vec![1_i64]), TetherObject::None)]);
        let err = unhashable.to_value(&mut heap, &interns).unwrap_err();
        assert_eq!(err.to_string(), "unsupported value: unhashable dict key of type list");
    }

    #[test]
    fn self_referential_list_is_rejected() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let list = heap.alloc_list(Vec::new()).unwrap();
        let Value::Ref(id) = list else { unreachable!() };
        if let HeapData::List(items) = heap.get_mut(id) {
            items.push(list);
        }
        let err = TetherObject::from_value(list, &heap, &interns).unwrap_err();
        assert_eq!(err.to_string(), "unsupported value: cannot marshal a self-referential list");
    }

    #[test]
    fn shared_items_are_not_cycles() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let inner = heap.alloc_list(vec![Value::Int(1)]).unwrap();
        let outer = heap.alloc_list(vec![inner, inner]).unwrap();
        let object = TetherObject::from_value(outer, &heap, &interns).unwrap();
        assert_eq!(object.py_repr(), "[[1], [1]]");
    }

    #[test]
    fn symbols_and_conversions() {
        #[derive(Debug)]
        enum Colour {
            Red,
        }
        impl fmt::Display for Colour {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self:?}")
            }
        }
        assert_eq!(TetherObject::symbol(Colour::Red), TetherObject::String("Red".to_owned()));
        assert_eq!(f64::try_from(&TetherObject::Int(2)).unwrap(), 2.0);
        let err = i64::try_from(&TetherObject::None).unwrap_err();
        assert_eq!(err.to_string(), "expected int, got NoneType");
    }
}
