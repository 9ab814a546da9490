//! Implementation of the round() builtin function.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, exc_err_fmt},
    heap::Heap,
    numeric,
    resource::ResourceTracker,
    value::Value,
};

/// `round(number, ndigits=None)` with Python's round-half-to-even semantics.
///
/// Without `ndigits` the result is an int; with it the result has the number's type.
pub fn builtin_round(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let (number, ndigits) = args.get_one_two_args("round")?;
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(n) => Some(n.as_index(heap)?),
    };

    if let Value::Float(f) = number {
        return match ndigits {
            None => numeric::float_to_int(round_float_checked(f)?, heap),
            Some(n) => Ok(Value::Float(round_float_digits(f, n))),
        };
    }
    let Some(int) = numeric::as_bigint(number, heap) else {
        return exc_err_fmt!(ExcType::TypeError; "type {} doesn't define __round__ method", number.py_type(heap));
    };
    match ndigits {
        Some(n) if n < 0 => heap.int_value(round_int_digits(&int, n)),
        _ => heap.int_value(int),
    }
}

fn round_float_checked(f: f64) -> RunResult<f64> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(ExcType::overflow_error("cannot convert float infinity to integer"));
    }
    Ok(f.round_ties_even())
}

fn round_float_digits(f: f64, ndigits: i64) -> f64 {
    if !f.is_finite() {
        return f;
    }
    if ndigits >= 0 {
        // decimal formatting rounds the exact binary value, matching CPython
        let digits = usize::try_from(ndigits.min(340)).unwrap_or(340);
        return format!("{f:.digits$}").parse().unwrap_or(f);
    }
    let scale = 10f64.powi(i32::try_from(-ndigits).unwrap_or(i32::MAX));
    if scale.is_infinite() {
        return 0.0 * f.signum();
    }
    (f / scale).round_ties_even() * scale
}

/// Rounds an int to a multiple of `10**-ndigits`, ties to the even multiple.
fn round_int_digits(value: &BigInt, ndigits: i64) -> BigInt {
    let exponent = u32::try_from(-ndigits).unwrap_or(u32::MAX).min(4300);
    let step = BigInt::from(10).pow(exponent);
    let (quotient, remainder) = value.div_mod_floor(&step);
    let twice: BigInt = &remainder * 2;
    let round_up = match twice.cmp(&step) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => quotient.is_odd(),
    };
    let rounded = if round_up { quotient + 1 } else { quotient };
    let result = rounded * step;
    if result.is_zero() && value.is_negative() { BigInt::zero() } else { result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn half_to_even() {
        let mut heap = Heap::new(NoLimitTracker);
        let result = builtin_round(&mut heap, ArgValues::One(Value::Float(2.5))).unwrap();
        assert!(matches!(result, Value::Int(2)));
        let result = builtin_round(&mut heap, ArgValues::One(Value::Float(-3.5))).unwrap();
        assert!(matches!(result, Value::Int(-4)));
        let result = builtin_round(&mut heap, ArgValues::Two(Value::Int(1250), Value::Int(-2))).unwrap();
        assert!(matches!(result, Value::Int(1200)));
        let result = builtin_round(&mut heap, ArgValues::Two(Value::Int(1350), Value::Int(-2))).unwrap();
        assert!(matches!(result, Value::Int(1400)));
    }

    #[test]
    fn float_digits() {
        assert!((round_float_digits(3.14159, 2) - 3.14).abs() < 1e-12);
        assert!((round_float_digits(1234.5, -2) - 1200.0).abs() < 1e-9);
        assert!((round_float_digits(7.0, 0) - 7.0).abs() < f64::EPSILON);
    }
}
