//! Integer and float arithmetic with Python semantics.
//!
//! `int` values live inline as `i64` and spill into a heap `LongInt` when an operation
//! overflows; results that fit are demoted again by [`Heap::int_value`]. `bool` takes
//! part in arithmetic as `0`/`1`.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData},
    intern::Interns,
    operators::Operator,
    resource::ResourceTracker,
    types::str::string_repr,
    value::Value,
};

/// A numeric operand read out of a value.
#[derive(Debug, Clone)]
enum Num {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Num {
    fn from_value(value: Value, heap: &Heap<impl ResourceTracker>) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Int(i64::from(b))),
            Value::Int(i) => Some(Self::Int(i)),
            Value::Float(f) => Some(Self::Float(f)),
            Value::Ref(id) => match heap.get(id) {
                HeapData::LongInt(b) => Some(Self::Big(b.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    fn to_big(&self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Big(b) => Some(b.clone()),
            Self::Float(_) => None,
        }
    }

    fn to_f64(&self) -> RunResult<f64> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::Float(f) => Ok(*f),
            Self::Big(b) => big_to_f64(b),
        }
    }
}

fn big_to_f64(b: &BigInt) -> RunResult<f64> {
    match b.to_f64() {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(ExcType::overflow_error("int too large to convert to float")),
    }
}

/// The value as an `f64` if it is an `int`, `bool` or `float`.
pub(crate) fn as_f64(value: Value, heap: &Heap<impl ResourceTracker>) -> Option<RunResult<f64>> {
    Num::from_value(value, heap).map(|n| n.to_f64())
}

/// The value as a `BigInt` if it is an `int` or `bool`.
pub(crate) fn as_bigint(value: Value, heap: &Heap<impl ResourceTracker>) -> Option<BigInt> {
    Num::from_value(value, heap).and_then(|n| n.to_big())
}

/// `==` between two numbers, `None` unless both are numeric.
pub(crate) fn numeric_eq(a: Value, b: Value, heap: &Heap<impl ResourceTracker>) -> Option<bool> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Some(x == y);
    }
    numeric_cmp(a, b, heap).map(|ordering| ordering == Some(Ordering::Equal))
}

/// Ordering between two numbers.
///
/// The outer `None` means "not both numeric", the inner `None` means a NaN was involved.
pub(crate) fn numeric_cmp(a: Value, b: Value, heap: &Heap<impl ResourceTracker>) -> Option<Option<Ordering>> {
    let (a, b) = (Num::from_value(a, heap)?, Num::from_value(b, heap)?);
    Some(match (&a, &b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(y)),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(y),
        (Num::Float(f), other) => cmp_int_float(&other.to_big()?, *f).map(Ordering::reverse),
        (other, Num::Float(f)) => cmp_int_float(&other.to_big()?, *f),
        _ => Some(a.to_big()?.cmp(&b.to_big()?)),
    })
}

/// Exact comparison of an integer with a float, no precision is lost for large values.
fn cmp_int_float(int: &BigInt, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let floor = f.floor();
    let floor_int = BigInt::from_f64(floor)?;
    match int.cmp(&floor_int) {
        Ordering::Equal if f > floor => Some(Ordering::Less),
        ordering => Some(ordering),
    }
}

/// `repr()` of a float: the shortest string that round-trips, in Python's layout.
///
/// Positional notation is used for decimal exponents in `-4..16`, scientific notation
/// (`1e-05`, `1.5e+16`) otherwise.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let sign = if f.is_sign_negative() { "-" } else { "" };

    if (-4..16).contains(&exponent) {
        let point = exponent + 1;
        let body = if point <= 0 {
            format!("0.{}{digits}", "0".repeat((-point) as usize))
        } else {
            let point = point as usize;
            if digits.len() <= point {
                format!("{digits}{}.0", "0".repeat(point - digits.len()))
            } else {
                format!("{}.{}", &digits[..point], &digits[point..])
            }
        };
        format!("{sign}{body}")
    } else {
        let mantissa = if digits.len() > 1 {
            format!("{}.{}", &digits[..1], &digits[1..])
        } else {
            digits
        };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{sign}{mantissa}e{exp_sign}{:02}", exponent.abs())
    }
}

/// Applies an arithmetic or bitwise operator to two numbers.
///
/// Returns `Ok(None)` when the operands are not numbers, or when the operator is not
/// defined for them (bitwise operators on floats), so the caller can raise `TypeError`.
pub(crate) fn numeric_binary(
    op: Operator,
    lhs: Value,
    rhs: Value,
    heap: &mut Heap<impl ResourceTracker>,
) -> RunResult<Option<Value>> {
    if let (Value::Bool(x), Value::Bool(y)) = (lhs, rhs) {
        match op {
            Operator::BitAnd => return Ok(Some(Value::Bool(x & y))),
            Operator::BitOr => return Ok(Some(Value::Bool(x | y))),
            Operator::BitXor => return Ok(Some(Value::Bool(x ^ y))),
            _ => {}
        }
    }
    let (Some(a), Some(b)) = (Num::from_value(lhs, heap), Num::from_value(rhs, heap)) else {
        return Ok(None);
    };
    match (&a, &b) {
        (Num::Float(_), _) | (_, Num::Float(_)) => float_binary(op, a.to_f64()?, b.to_f64()?),
        (Num::Int(x), Num::Int(y)) => match int_binary_fast(op, *x, *y)? {
            Some(value) => Ok(Some(value)),
            None => big_binary(op, BigInt::from(*x), BigInt::from(*y), heap),
        },
        _ => match (a.to_big(), b.to_big()) {
            (Some(x), Some(y)) => big_binary(op, x, y, heap),
            _ => Ok(None),
        },
    }
}

/// `i64` arithmetic; `Ok(None)` when the result needs a big integer.
fn int_binary_fast(op: Operator, a: i64, b: i64) -> RunResult<Option<Value>> {
    let result = match op {
        Operator::Add => a.checked_add(b).map(Value::Int),
        Operator::Sub => a.checked_sub(b).map(Value::Int),
        Operator::Mult => a.checked_mul(b).map(Value::Int),
        Operator::Div => {
            if b == 0 {
                return Err(ExcType::zero_division("division by zero"));
            }
            Some(Value::Float(a as f64 / b as f64))
        }
        Operator::FloorDiv => {
            if b == 0 {
                return Err(ExcType::zero_division("integer division or modulo by zero"));
            }
            if a == i64::MIN && b == -1 { None } else { Some(Value::Int(a.div_floor(&b))) }
        }
        Operator::Mod => {
            if b == 0 {
                return Err(ExcType::zero_division("integer modulo by zero"));
            }
            if b == -1 { Some(Value::Int(0)) } else { Some(Value::Int(a.mod_floor(&b))) }
        }
        Operator::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
                }
                return float_binary(Operator::Pow, a as f64, b as f64);
            }
            u32::try_from(b)
                .ok()
                .and_then(|exp| a.checked_pow(exp))
                .map(Value::Int)
        }
        Operator::LShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if a == 0 {
                Some(Value::Int(0))
            } else if b < 63 && (a << b) >> b == a {
                Some(Value::Int(a << b))
            } else {
                None
            }
        }
        Operator::RShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            Some(Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b }))
        }
        Operator::BitAnd => Some(Value::Int(a & b)),
        Operator::BitOr => Some(Value::Int(a | b)),
        Operator::BitXor => Some(Value::Int(a ^ b)),
    };
    Ok(result)
}

/// Big integer arithmetic; results are demoted back to `i64` when they fit.
fn big_binary(op: Operator, a: BigInt, b: BigInt, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => {
            heap.check_int_bits(a.bits() + b.bits())?;
            a * b
        }
        Operator::Div => {
            if b.is_zero() {
                return Err(ExcType::zero_division("division by zero"));
            }
            return Ok(Some(Value::Float(big_true_div(&a, &b)?)));
        }
        Operator::FloorDiv => {
            if b.is_zero() {
                return Err(ExcType::zero_division("integer division or modulo by zero"));
            }
            a.div_floor(&b)
        }
        Operator::Mod => {
            if b.is_zero() {
                return Err(ExcType::zero_division("integer modulo by zero"));
            }
            a.mod_floor(&b)
        }
        Operator::Pow => {
            if b.is_negative() {
                if a.is_zero() {
                    return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
                }
                return float_binary(Operator::Pow, big_to_f64(&a)?, big_to_f64(&b)?);
            }
            if a.is_zero() || a == BigInt::from(1) {
                return heap.int_value(if b.is_zero() { BigInt::from(1) } else { a }).map(Some);
            }
            if a == BigInt::from(-1) {
                let odd = b.is_odd();
                return Ok(Some(Value::Int(if odd { -1 } else { 1 })));
            }
            let Some(exp) = b.to_u32() else {
                return Err(ExcType::overflow_error("exponent too large"));
            };
            heap.check_int_bits(a.bits().saturating_mul(u64::from(exp)))?;
            a.pow(exp)
        }
        Operator::LShift => {
            if b.is_negative() {
                return Err(ExcType::value_error("negative shift count"));
            }
            if a.is_zero() {
                return Ok(Some(Value::Int(0)));
            }
            let Some(shift) = b.to_usize() else {
                return Err(ExcType::overflow_error("too many digits in integer"));
            };
            heap.check_int_bits(a.bits().saturating_add(shift as u64))?;
            a << shift
        }
        Operator::RShift => {
            if b.is_negative() {
                return Err(ExcType::value_error("negative shift count"));
            }
            match b.to_usize() {
                Some(shift) => a >> shift,
                None => BigInt::from(if a.is_negative() { -1 } else { 0 }),
            }
        }
        Operator::BitAnd => a & b,
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
    };
    heap.int_value(result).map(Some)
}

fn big_true_div(a: &BigInt, b: &BigInt) -> RunResult<f64> {
    match (a.to_f64(), b.to_f64()) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(x / y),
        _ => {
            // scale both down until they fit, the quotient keeps its magnitude
            let shift = a.bits().max(b.bits()).saturating_sub(1000) as usize;
            let (x, y) = (big_to_f64(&(a >> shift))?, big_to_f64(&(b >> shift))?);
            let result = x / y;
            if result.is_finite() {
                Ok(result)
            } else {
                Err(ExcType::overflow_error("integer division result too large for a float"))
            }
        }
    }
}

fn float_binary(op: Operator, a: f64, b: f64) -> RunResult<Option<Value>> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float division by zero"));
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float floor division by zero"));
            }
            float_divmod(a, b).0
        }
        Operator::Mod => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            float_divmod(a, b).1
        }
        Operator::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.is_finite() && b.fract() != 0.0 {
                return Err(ExcType::value_error("negative number cannot be raised to a fractional power"));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(ExcType::overflow_error("(34, 'Numerical result out of range')"));
            }
            result
        }
        Operator::LShift | Operator::RShift | Operator::BitAnd | Operator::BitOr | Operator::BitXor => {
            return Ok(None);
        }
    };
    Ok(Some(Value::Float(result)))
}

/// Floor division and modulo of floats, following the sign rules of Python's `divmod`.
pub(crate) fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem == 0.0 {
        rem = 0.0_f64.copysign(b);
    } else if (b < 0.0) != (rem < 0.0) {
        rem += b;
        div -= 1.0;
    }
    let floor_div = if div == 0.0 {
        0.0_f64.copysign(a / b)
    } else {
        let floored = div.floor();
        if div - floored > 0.5 { floored + 1.0 } else { floored }
    };
    (floor_div, rem)
}

/// Unary `-`, `Ok(None)` for non-numbers.
pub(crate) fn numeric_neg(value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
    match Num::from_value(value, heap) {
        Some(Num::Int(i)) => match i.checked_neg() {
            Some(neg) => Ok(Some(Value::Int(neg))),
            None => heap.int_value(-BigInt::from(i)).map(Some),
        },
        Some(Num::Big(b)) => heap.int_value(-b).map(Some),
        Some(Num::Float(f)) => Ok(Some(Value::Float(-f))),
        None => Ok(None),
    }
}

/// Unary `+`, which turns a `bool` into an `int`.
pub(crate) fn numeric_pos(value: Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Int(i64::from(b))),
        Value::Int(_) | Value::Float(_) => Some(value),
        _ => None,
    }
}

/// Unary `~`, defined for integers only.
pub(crate) fn numeric_invert(value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
    match Num::from_value(value, heap) {
        Some(Num::Int(i)) => Ok(Some(Value::Int(!i))),
        Some(Num::Big(b)) => heap.int_value(!b).map(Some),
        _ => Ok(None),
    }
}

/// `abs(x)`, `Ok(None)` for non-numbers.
pub(crate) fn numeric_abs(value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
    match Num::from_value(value, heap) {
        Some(Num::Int(i)) => match i.checked_abs() {
            Some(abs) => Ok(Some(Value::Int(abs))),
            None => heap.int_value(BigInt::from(i).abs()).map(Some),
        },
        Some(Num::Big(b)) => heap.int_value(b.abs()).map(Some),
        Some(Num::Float(f)) => Ok(Some(Value::Float(f.abs()))),
        None => Ok(None),
    }
}

/// Parses an integer literal in `base`, accepting a sign, underscores between digits and,
/// for base 0 or a matching base, a `0x`/`0o`/`0b` prefix.
///
/// Base 0 infers the base from the prefix and rejects leading zeros in decimals, like
/// Python source literals.
pub(crate) fn parse_int(s: &str, base: u32) -> Option<BigInt> {
    let (negative, rest) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let lower = rest.to_ascii_lowercase();
    let prefixed = |p: &str, radix: u32| (base == 0 || base == radix) && lower.starts_with(p);
    let (radix, digits) = if prefixed("0x", 16) {
        (16, &rest[2..])
    } else if prefixed("0o", 8) {
        (8, &rest[2..])
    } else if prefixed("0b", 2) {
        (2, &rest[2..])
    } else if base == 0 {
        let trimmed = rest.trim_start_matches(['0', '_']);
        if rest.starts_with('0') && !trimmed.is_empty() {
            return None;
        }
        (10, rest)
    } else {
        (base, rest)
    };
    // a prefix may be followed by one underscore: 0x_ff
    let digits = if digits.len() < rest.len() {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let value = BigInt::parse_bytes(cleaned.as_bytes(), radix)?;
    Some(if negative { -value } else { value })
}

/// `int()`, `int(x)` and `int(s, base)`.
pub(crate) fn int_init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let values = args.into_positional("int")?;
    match values.as_slice() {
        [] => Ok(Value::Int(0)),
        [value] => int_from_value(*value, 10, false, heap, interns),
        [value, base] => {
            let base = base.as_index(heap)?;
            if base != 0 && !(2..=36).contains(&base) {
                return Err(ExcType::value_error("int() base must be >= 2 and <= 36, or 0"));
            }
            int_from_value(*value, base as u32, true, heap, interns)
        }
        other => Err(ExcType::type_error_at_most("int", 2, other.len())),
    }
}

fn int_from_value(
    value: Value,
    base: u32,
    explicit_base: bool,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    if let Some(s) = value.as_str(heap, interns) {
        let parsed = parse_int(s.trim(), base);
        return match parsed {
            Some(int) => heap.int_value(int),
            None => Err(ExcType::value_error(format!(
                "invalid literal for int() with base {base}: {}",
                string_repr(s)
            ))),
        };
    }
    if explicit_base {
        return Err(ExcType::type_error("int() can't convert non-string with explicit base"));
    }
    match Num::from_value(value, heap) {
        Some(Num::Int(i)) => Ok(Value::Int(i)),
        Some(Num::Big(_)) => Ok(value),
        Some(Num::Float(f)) => float_to_int(f, heap),
        None => Err(ExcType::type_error(format!(
            "int() argument must be a string or a real number, not '{}'",
            value.py_type(heap)
        ))),
    }
}

/// Truncates a float towards zero.
pub(crate) fn float_to_int(f: f64, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(ExcType::overflow_error("cannot convert float infinity to integer"));
    }
    let truncated = f.trunc();
    if truncated.abs() < 9.0e18 {
        return Ok(Value::Int(truncated as i64));
    }
    match BigInt::from_f64(truncated) {
        Some(big) => heap.int_value(big),
        None => Err(ExcType::overflow_error("cannot convert float infinity to integer")),
    }
}

/// `float()` and `float(x)`.
pub(crate) fn float_init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let Some(value) = args.get_zero_one_arg("float")? else {
        return Ok(Value::Float(0.0));
    };
    if let Some(s) = value.as_str(heap, interns) {
        return parse_float(s.trim())
            .map(Value::Float)
            .ok_or_else(|| ExcType::value_error(format!("could not convert string to float: {}", string_repr(s))));
    }
    match Num::from_value(value, heap) {
        Some(num) => Ok(Value::Float(num.to_f64()?)),
        None => Err(ExcType::type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            value.py_type(heap)
        ))),
    }
}

/// Parses a float, accepting `inf`, `nan` and underscores between digits.
pub(crate) fn parse_float(s: &str) -> Option<f64> {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    match unsigned {
        "inf" | "infinity" | "nan" => {}
        _ if unsigned.chars().any(|c| c.is_ascii_alphabetic() && c != 'e') => return None,
        _ => {}
    }
    lower.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn float_reprs() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(1e-5), "1e-05");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123_456_789_012_345.6), "123456789012345.6");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(f64::NAN), "nan");
    }

    #[test]
    fn int_overflow_promotes() {
        let mut heap = Heap::new(NoLimitTracker);
        let result = numeric_binary(Operator::Mult, Value::Int(i64::MAX), Value::Int(2), &mut heap)
            .unwrap()
            .unwrap();
        assert_eq!(as_bigint(result, &heap), Some(BigInt::from(i64::MAX) * 2));
        let back = numeric_binary(Operator::FloorDiv, result, Value::Int(2), &mut heap)
            .unwrap()
            .unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
    }

    #[test]
    fn floor_semantics() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut op = |op, a, b| numeric_binary(op, a, b, &mut heap).unwrap().unwrap();
        assert!(matches!(op(Operator::FloorDiv, Value::Int(-7), Value::Int(2)), Value::Int(-4)));
        assert!(matches!(op(Operator::Mod, Value::Int(-7), Value::Int(2)), Value::Int(1)));
        assert!(matches!(op(Operator::Mod, Value::Int(7), Value::Int(-2)), Value::Int(-1)));
        let Value::Float(f) = op(Operator::Mod, Value::Float(-7.5), Value::Int(2)) else { panic!() };
        assert!((f - 0.5).abs() < f64::EPSILON);
        assert!(matches!(op(Operator::Div, Value::Int(1), Value::Int(2)), Value::Float(f) if (f - 0.5).abs() < f64::EPSILON));
        assert!(matches!(op(Operator::Pow, Value::Int(2), Value::Int(-1)), Value::Float(f) if (f - 0.5).abs() < f64::EPSILON));
        assert!(matches!(op(Operator::BitAnd, Value::Bool(true), Value::Bool(false)), Value::Bool(false)));
    }

    #[test]
    fn division_by_zero_messages() {
        let mut heap = Heap::new(NoLimitTracker);
        let messages: Vec<String> = [
            (Operator::Div, Value::Int(1), Value::Int(0)),
            (Operator::FloorDiv, Value::Int(1), Value::Int(0)),
            (Operator::Mod, Value::Float(1.0), Value::Float(0.0)),
        ]
        .into_iter()
        .map(|(op, a, b)| match numeric_binary(op, a, b, &mut heap) {
            Err(crate::exception_private::RunError::Exc(raise)) => raise.exc.arg().unwrap_or_default().to_owned(),
            _ => String::new(),
        })
        .collect();
        assert_eq!(
            messages,
            vec!["division by zero", "integer division or modulo by zero", "float modulo"]
        );
    }

    #[test]
    fn comparisons_are_exact() {
        let heap = Heap::new(NoLimitTracker);
        assert_eq!(numeric_eq(Value::Int(1), Value::Float(1.0), &heap), Some(true));
        assert_eq!(
            numeric_cmp(Value::Int(9_007_199_254_740_993), Value::Float(9_007_199_254_740_992.0), &heap),
            Some(Some(Ordering::Greater))
        );
        assert_eq!(numeric_cmp(Value::Int(1), Value::Float(f64::NAN), &heap), Some(None));
        assert_eq!(numeric_cmp(Value::Int(1), Value::None, &heap), None);
    }

    #[test]
    fn int_parsing() {
        assert_eq!(parse_int("1_000", 10), Some(BigInt::from(1000)));
        assert_eq!(parse_int("0x_ff", 0), Some(BigInt::from(255)));
        assert_eq!(parse_int("-0b101", 0), Some(BigInt::from(-5)));
        assert_eq!(parse_int("ff", 16), Some(BigInt::from(255)));
        assert_eq!(parse_int("017", 0), None);
        assert_eq!(parse_int("000", 0), Some(BigInt::from(0)));
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("abc", 10), None);
        assert_eq!(parse_float("1_000.5"), Some(1000.5));
        assert!(parse_float("-inf").is_some_and(f64::is_infinite));
        assert_eq!(parse_float("x"), None);
    }
}
