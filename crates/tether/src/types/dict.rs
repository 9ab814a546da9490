//! Insertion-ordered dictionaries.
//!
//! Keys are normalized into an owned [`DictKey`] so that values Python considers equal
//! (`1`, `1.0` and `True`) land in the same slot. The original key value is stored next to
//! the value so `keys()` and `repr()` show the key that was inserted first.

use std::{
    fmt::{self, Write},
    str::FromStr,
};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    resource::ResourceTracker,
    types::{PyTrait, Type, iter::collect_iterable},
    value::{MAX_NESTING, ReprGuard, Value},
};

/// Hashable, owned form of a dict key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum DictKey {
    None,
    /// Also used for `bool` and integral floats.
    Int(i64),
    BigInt(BigInt),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    /// Normalizes a value into a key, raising `TypeError` for unhashable types.
    pub fn from_value(value: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Self> {
        Self::from_value_at(value, heap, interns, 0)
    }

    fn from_value_at(value: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: usize) -> RunResult<Self> {
        if depth > MAX_NESTING {
            return Err(ExcType::recursion_error_hashing());
        }
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Int(i64::from(b))),
            Value::Int(i) => Ok(Self::Int(i)),
            Value::Float(f) => Ok(Self::from_float(f)),
            Value::InternString(id) => Ok(Self::Str(interns.get_str(id).to_owned())),
            Value::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => Ok(Self::Str(s.as_str().to_owned())),
                HeapData::LongInt(b) => Ok(Self::BigInt(b.clone())),
                HeapData::Tuple(t) => t
                    .as_slice()
                    .iter()
                    .map(|item| Self::from_value_at(*item, heap, interns, depth + 1))
                    .collect::<RunResult<Vec<_>>>()
                    .map(Self::Tuple),
                other => Err(ExcType::type_error_unhashable(other.py_type())),
            },
            other => Err(ExcType::type_error_unhashable(other.py_type(heap))),
        }
    }

    fn from_float(f: f64) -> Self {
        if f.is_finite() && f.fract() == 0.0 {
            if let Some(i) = f.to_i64() {
                return Self::Int(i);
            }
            if let Some(b) = BigInt::from_f64(f) {
                return Self::BigInt(b);
            }
        }
        Self::Float(f.to_bits())
    }

    /// Stable hash used by the `hash()` builtin; small ints hash to themselves as in Python.
    pub fn hash_value(&self) -> i64 {
        match self {
            Self::Int(-1) => -2,
            Self::Int(i) => *i,
            other => {
                let state = ahash::RandomState::with_seeds(0x7465_7468, 0x6572_5f68, 0x6173_685f, 0x7365_6564);
                let mut hash = state.hash_one(other) as i64;
                if hash == -1 {
                    hash = -2;
                }
                hash
            }
        }
    }
}

/// Python dict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Dict {
    map: IndexMap<DictKey, (Value, Value), ahash::RandomState>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, key: &DictKey) -> Option<Value> {
        self.map.get(key).map(|(_, v)| *v)
    }

    /// Inserts or replaces; an existing entry keeps its original key value and position.
    pub fn insert(&mut self, key: DictKey, key_value: Value, value: Value) -> Option<Value> {
        match self.map.get_mut(&key) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, value)),
            None => {
                self.map.insert(key, (key_value, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        self.map.shift_remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn key_at(&self, index: usize) -> Option<Value> {
        self.map.get_index(index).map(|(_, (k, _))| *k)
    }

    /// `(key, value)` pairs in insertion order.
    pub fn items(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.map.values().copied()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// `dict()`, `dict(mapping)`, `dict(iterable_of_pairs)` and `dict(**kwargs)`.
    pub fn init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
        let (positional, kwargs) = args.split();
        if positional.len() > 1 {
            return Err(ExcType::type_error_at_most("dict", 1, positional.len()));
        }
        let mut dict = Self::new();
        if let Some(source) = positional.first() {
            dict.update_from(*source, heap, interns)?;
        }
        for (key, value) in kwargs.into_vec() {
            dict.insert(DictKey::Str(interns.get_str(key).to_owned()), Value::InternString(key), value);
        }
        let id = heap.allocate(HeapData::Dict(dict))?;
        Ok(Value::Ref(id))
    }

    /// Adds the entries of another dict or of an iterable of 2-item sequences.
    fn update_from(&mut self, source: Value, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<()> {
        if let Value::Ref(id) = source
            && let HeapData::Dict(other) = heap.get(id)
        {
            for (k, v) in other.map.iter().map(|(key, (kv, v))| (key.clone(), (*kv, *v))).collect::<Vec<_>>() {
                self.insert(k, v.0, v.1);
            }
            return Ok(());
        }
        for (index, item) in collect_iterable(source, heap, interns)?.into_iter().enumerate() {
            let pair = collect_iterable(item, heap, interns)
                .map_err(|_| {
                    ExcType::type_error(format!(
                        "cannot convert dictionary update sequence element #{index} to a sequence"
                    ))
                })?;
            let [key, value] = pair.as_slice() else {
                return Err(ExcType::value_error(format!(
                    "dictionary update sequence element #{index} has length {}; 2 is required",
                    pair.len()
                )));
            };
            self.insert(DictKey::from_value(*key, heap, interns)?, *key, *value);
        }
        Ok(())
    }
}

impl PyTrait for Dict {
    fn py_type(&self) -> Type {
        Type::Dict
    }

    fn py_len(&self) -> Option<usize> {
        Some(self.map.len())
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.map.len() * (std::mem::size_of::<DictKey>() + 2 * std::mem::size_of::<Value>())
    }

    fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        guard: &mut ReprGuard,
    ) -> fmt::Result {
        f.write_char('{')?;
        for (i, (key, value)) in self.items().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            key.py_repr_fmt(f, heap, interns, guard)?;
            f.write_str(": ")?;
            value.py_repr_fmt(f, heap, interns, guard)?;
        }
        f.write_char('}')
    }

    fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: usize) -> RunResult<bool> {
        if self.map.len() != other.map.len() {
            return Ok(false);
        }
        for (key, (_, value)) in &self.map {
            let Some((_, other_value)) = other.map.get(key) else {
                return Ok(false);
            };
            if !value.eq_depth(*other_value, heap, interns, depth)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, EnumString)]
#[strum(serialize_all = "lowercase")]
enum DictMethod {
    Get,
    Keys,
    Values,
    Items,
    Pop,
    Update,
    Setdefault,
    Copy,
    Clear,
}

pub(crate) fn has_dict_method(name: &str) -> bool {
    DictMethod::from_str(name).is_ok()
}

/// Calls `dict.<name>(args)` on the dict stored at `dict_id`.
///
/// `keys()`, `values()` and `items()` return lists rather than live views.
pub(crate) fn call_dict_method(
    dict_id: HeapId,
    name: &str,
    args: ArgValues,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    let method = DictMethod::from_str(name).map_err(|_| ExcType::attribute_error(Type::Dict, name))?;
    let qualified = format!("dict.{name}");
    match method {
        DictMethod::Get => {
            let (key, default) = args.get_one_two_args(&qualified)?;
            let key = DictKey::from_value(key, heap, interns)?;
            Ok(dict_ref(heap, dict_id).get(&key).unwrap_or(default.unwrap_or(Value::None)))
        }
        DictMethod::Keys => {
            args.check_zero_args(&qualified)?;
            let keys = dict_ref(heap, dict_id).items().map(|(k, _)| k).collect();
            heap.alloc_list(keys)
        }
        DictMethod::Values => {
            args.check_zero_args(&qualified)?;
            let values = dict_ref(heap, dict_id).items().map(|(_, v)| v).collect();
            heap.alloc_list(values)
        }
        DictMethod::Items => {
            args.check_zero_args(&qualified)?;
            let pairs: Vec<(Value, Value)> = dict_ref(heap, dict_id).items().collect();
            let items = pairs
                .into_iter()
                .map(|(k, v)| heap.alloc_tuple(vec![k, v]))
                .collect::<RunResult<Vec<_>>>()?;
            heap.alloc_list(items)
        }
        DictMethod::Pop => {
            let (key_value, default) = args.get_one_two_args(&qualified)?;
            let key = DictKey::from_value(key_value, heap, interns)?;
            match dict_mut(heap, dict_id).remove(&key) {
                Some(value) => Ok(value),
                None => default.ok_or_else(|| ExcType::key_error(key_value, heap, interns)),
            }
        }
        DictMethod::Update => {
            let (positional, kwargs) = args.split();
            if positional.len() > 1 {
                return Err(ExcType::type_error_at_most(&qualified, 1, positional.len()));
            }
            let mut staged = Dict::new();
            if let Some(source) = positional.first() {
                staged.update_from(*source, heap, interns)?;
            }
            for (key, value) in kwargs.into_vec() {
                staged.insert(DictKey::Str(interns.get_str(key).to_owned()), Value::InternString(key), value);
            }
            heap.note_growth(staged.py_estimate_size())?;
            let dict = dict_mut(heap, dict_id);
            for (key, (key_value, value)) in staged.map {
                dict.insert(key, key_value, value);
            }
            Ok(Value::None)
        }
        DictMethod::Setdefault => {
            let (key_value, default) = args.get_one_two_args(&qualified)?;
            let key = DictKey::from_value(key_value, heap, interns)?;
            if let Some(existing) = dict_ref(heap, dict_id).get(&key) {
                return Ok(existing);
            }
            let default = default.unwrap_or(Value::None);
            heap.note_growth(std::mem::size_of::<DictKey>() + 2 * std::mem::size_of::<Value>())?;
            dict_mut(heap, dict_id).insert(key, key_value, default);
            Ok(default)
        }
        DictMethod::Copy => {
            args.check_zero_args(&qualified)?;
            let copy = dict_ref(heap, dict_id).clone();
            let id = heap.allocate(HeapData::Dict(copy))?;
            Ok(Value::Ref(id))
        }
        DictMethod::Clear => {
            args.check_zero_args(&qualified)?;
            dict_mut(heap, dict_id).clear();
            Ok(Value::None)
        }
    }
}

fn dict_ref(heap: &Heap<impl ResourceTracker>, dict_id: HeapId) -> &Dict {
    match heap.get(dict_id) {
        HeapData::Dict(dict) => dict,
        _ => unreachable!("dict method called on a non-dict heap entry"),
    }
}

fn dict_mut(heap: &mut Heap<impl ResourceTracker>, dict_id: HeapId) -> &mut Dict {
    match heap.get_mut(dict_id) {
        HeapData::Dict(dict) => dict,
        _ => unreachable!("dict method called on a non-dict heap entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker};

    #[test]
    fn equal_numbers_share_a_key() {
        let heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let one = DictKey::from_value(Value::Int(1), &heap, &interns).unwrap();
        assert_eq!(DictKey::from_value(Value::Float(1.0), &heap, &interns).unwrap(), one);
        assert_eq!(DictKey::from_value(Value::Bool(true), &heap, &interns).unwrap(), one);
        assert_eq!(
            DictKey::from_value(Value::Float(-0.0), &heap, &interns).unwrap(),
            DictKey::Int(0)
        );
        assert_eq!(
            DictKey::from_value(Value::Float(1.5), &heap, &interns).unwrap(),
            DictKey::Float(1.5f64.to_bits())
        );
    }

    #[test]
    fn lists_are_unhashable() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let list = heap.alloc_list(vec![]).unwrap();
        assert!(DictKey::from_value(list, &heap, &interns).is_err());
    }

    #[test]
    fn first_key_is_kept_on_overwrite() {
        let mut dict = Dict::new();
        dict.insert(DictKey::Int(1), Value::Int(1), Value::Int(10));
        let old = dict.insert(DictKey::Int(1), Value::Float(1.0), Value::Int(20));
        assert!(matches!(old, Some(Value::Int(10))));
        assert!(matches!(dict.key_at(0), Some(Value::Int(1))));
        assert!(matches!(dict.get(&DictKey::Int(1)), Some(Value::Int(20))));
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(DictKey::Int(5).hash_value(), 5);
        assert_eq!(DictKey::Int(-1).hash_value(), -2);
        let a = DictKey::Str("abc".to_owned()).hash_value();
        assert_eq!(a, DictKey::Str("abc".to_owned()).hash_value());
    }
}
