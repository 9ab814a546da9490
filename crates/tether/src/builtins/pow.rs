//! Implementation of the pow() builtin function.

use num_traits::{Signed, Zero};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::Heap,
    intern::Interns,
    numeric,
    operators::{Operator, binary_op},
    resource::ResourceTracker,
    value::Value,
};

/// `pow(base, exp)` is `base ** exp`; `pow(base, exp, mod)` is modular exponentiation on ints.
pub fn builtin_pow(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let values = args.into_positional("pow")?;
    match values.as_slice() {
        [base, exp] => binary_op(Operator::Pow, *base, *exp, heap, interns),
        [base, exp, modulus] => {
            let (Some(b), Some(e), Some(m)) = (
                numeric::as_bigint(*base, heap),
                numeric::as_bigint(*exp, heap),
                numeric::as_bigint(*modulus, heap),
            ) else {
                return Err(ExcType::type_error(
                    "pow() 3rd argument not allowed unless all arguments are integers",
                ));
            };
            if m.is_zero() {
                return Err(ExcType::value_error("pow() 3rd argument cannot be 0"));
            }
            if e.is_negative() {
                return Err(ExcType::value_error("base is not invertible for the given modulus"));
            }
            heap.int_value(b.modpow(&e, &m))
        }
        other => Err(ExcType::type_error(format!(
            "pow expected 2 or 3 arguments, got {}",
            other.len()
        ))),
    }
}
