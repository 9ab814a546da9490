//! Binary, comparison and unary operators on runtime values.

use std::fmt::{self, Write};

use strum::Display;

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData},
    intern::Interns,
    numeric,
    resource::ResourceTracker,
    types::{DictKey, iter::collect_iterable},
    value::Value,
};

/// Binary operators for arithmetic and bitwise operations.
///
/// `Display` gives the operator's symbol, as used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
}

/// Defined separately since these operators always return a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl fmt::Display for CmpOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => f.write_str("=="),
            Self::NotEq => f.write_str("!="),
            Self::Lt => f.write_char('<'),
            Self::LtE => f.write_str("<="),
            Self::Gt => f.write_char('>'),
            Self::GtE => f.write_str(">="),
            Self::Is => f.write_str("is"),
            Self::IsNot => f.write_str("is not"),
            Self::In => f.write_str("in"),
            Self::NotIn => f.write_str("not in"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum UnaryOperator {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "+")]
    Pos,
    #[strum(serialize = "~")]
    Invert,
}

/// `lhs <op> rhs`
pub(crate) fn binary_op(
    op: Operator,
    lhs: Value,
    rhs: Value,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    if let Some(value) = numeric::numeric_binary(op, lhs, rhs, heap)? {
        return Ok(value);
    }
    let result = match op {
        Operator::Add => concat(lhs, rhs, heap, interns)?,
        Operator::Mult => match (repeat_count(rhs, heap)?, repeat_count(lhs, heap)?) {
            (Some(count), _) => repeat(lhs, count, heap, interns)?,
            (None, Some(count)) => repeat(rhs, count, heap, interns)?,
            (None, None) => None,
        },
        _ => None,
    };
    result.ok_or_else(|| ExcType::binary_type_error(&op.to_string(), lhs.py_type(heap), rhs.py_type(heap)))
}

/// `lhs <op>= rhs`; `+=` on a list extends it in place, everything else rebinds.
pub(crate) fn inplace_op(
    op: Operator,
    lhs: Value,
    rhs: Value,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    if op == Operator::Add
        && let Value::Ref(id) = lhs
        && matches!(heap.get(id), HeapData::List(_))
    {
        let items = collect_iterable(rhs, heap, interns)?;
        let current = heap.get(id).py_len().unwrap_or(0);
        heap.check_size((current + items.len()).saturating_mul(std::mem::size_of::<Value>()))?;
        heap.note_growth(items.len() * std::mem::size_of::<Value>())?;
        if let HeapData::List(list) = heap.get_mut(id) {
            list.as_vec_mut().extend(items);
        }
        return Ok(lhs);
    }
    binary_op(op, lhs, rhs, heap, interns)
}

fn concat(lhs: Value, rhs: Value, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<Option<Value>> {
    if let (Some(a), Some(b)) = (lhs.as_str(heap, interns), rhs.as_str(heap, interns)) {
        let joined = format!("{a}{b}");
        heap.check_size(joined.len())?;
        return heap.alloc_str(joined).map(Some);
    }
    let (Value::Ref(a), Value::Ref(b)) = (lhs, rhs) else {
        return Ok(None);
    };
    if let (Some(l), Some(r)) = (heap.get(a).py_len(), heap.get(b).py_len()) {
        heap.check_size((l + r).saturating_mul(std::mem::size_of::<Value>()))?;
    }
    match (heap.get(a), heap.get(b)) {
        (HeapData::List(l), HeapData::List(r)) => {
            let items = [l.as_slice(), r.as_slice()].concat();
            heap.alloc_list(items).map(Some)
        }
        (HeapData::Tuple(l), HeapData::Tuple(r)) => {
            let items = [l.as_slice(), r.as_slice()].concat();
            heap.alloc_tuple(items).map(Some)
        }
        _ => Ok(None),
    }
}

/// The repeat count when `value` is an int, negative counts mean zero.
fn repeat_count(value: Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Option<usize>> {
    match value {
        Value::Int(i) => Ok(Some(usize::try_from(i).unwrap_or(0))),
        Value::Bool(b) => Ok(Some(usize::from(b))),
        Value::Ref(id) if matches!(heap.get(id), HeapData::LongInt(_)) => Err(ExcType::overflow_error(
            "cannot fit 'int' into an index-sized integer",
        )),
        _ => Ok(None),
    }
}

fn repeat(
    sequence: Value,
    count: usize,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Option<Value>> {
    if let Some(s) = sequence.as_str(heap, interns).map(str::to_owned) {
        heap.check_size(s.len().saturating_mul(count))?;
        let repeated = s.repeat(count);
        return heap.alloc_str(repeated).map(Some);
    }
    let Value::Ref(id) = sequence else {
        return Ok(None);
    };
    let (items, is_list) = match heap.get(id) {
        HeapData::List(l) => (l.as_slice().to_vec(), true),
        HeapData::Tuple(t) => (t.as_slice().to_vec(), false),
        _ => return Ok(None),
    };
    heap.check_size(items.len().saturating_mul(count).saturating_mul(std::mem::size_of::<Value>()))?;
    let repeated = items.repeat(count);
    if is_list {
        heap.alloc_list(repeated).map(Some)
    } else {
        heap.alloc_tuple(repeated).map(Some)
    }
}

/// `lhs <op> rhs` for comparison operators.
pub(crate) fn compare(
    op: CmpOperator,
    lhs: Value,
    rhs: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<bool> {
    let ordering = match op {
        CmpOperator::Eq => return lhs.py_eq(rhs, heap, interns),
        CmpOperator::NotEq => return lhs.py_eq(rhs, heap, interns).map(|eq| !eq),
        CmpOperator::Is => return Ok(lhs.is_identical(rhs)),
        CmpOperator::IsNot => return Ok(!lhs.is_identical(rhs)),
        CmpOperator::In => return contains(rhs, lhs, heap, interns),
        CmpOperator::NotIn => return contains(rhs, lhs, heap, interns).map(|found| !found),
        CmpOperator::Lt | CmpOperator::LtE | CmpOperator::Gt | CmpOperator::GtE => lhs.py_cmp(rhs, heap, interns)?,
    };
    let Some(ordering) = ordering else {
        // NaN compares false with everything
        if numeric::numeric_cmp(lhs, rhs, heap).is_some() {
            return Ok(false);
        }
        return Err(ExcType::compare_type_error(
            &op.to_string(),
            lhs.py_type(heap),
            rhs.py_type(heap),
        ));
    };
    Ok(match op {
        CmpOperator::Lt => ordering.is_lt(),
        CmpOperator::LtE => ordering.is_le(),
        CmpOperator::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

/// `a < b`, used by sorting and `min`/`max`.
pub(crate) fn py_lt(a: Value, b: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<bool> {
    compare(CmpOperator::Lt, a, b, heap, interns)
}

fn items_contain(items: &[Value], item: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> RunResult<bool> {
    for v in items {
        if v.py_eq(item, heap, interns)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `item in container`
pub(crate) fn contains(
    container: Value,
    item: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<bool> {
    if let Some(haystack) = container.as_str(heap, interns) {
        return match item.as_str(heap, interns) {
            Some(needle) => Ok(haystack.contains(needle)),
            None => Err(ExcType::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                item.py_type(heap)
            ))),
        };
    }
    if let Value::Ref(id) = container {
        match heap.get(id) {
            HeapData::List(l) => return items_contain(l.as_slice(), item, heap, interns),
            HeapData::Tuple(t) => return items_contain(t.as_slice(), item, heap, interns),
            HeapData::Dict(d) => return Ok(d.contains(&DictKey::from_value(item, heap, interns)?)),
            HeapData::Range(r) => {
                return Ok(match item {
                    Value::Int(i) => r.contains(i),
                    Value::Bool(b) => r.contains(i64::from(b)),
                    Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => r.contains(f as i64),
                    _ => false,
                });
            }
            _ => {}
        }
    }
    Err(ExcType::type_error(format!(
        "argument of type '{}' is not iterable",
        container.py_type(heap)
    )))
}

/// `-x`, `+x` and `~x`.
pub(crate) fn unary_op(op: UnaryOperator, value: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
    let result = match op {
        UnaryOperator::Neg => numeric::numeric_neg(value, heap)?,
        UnaryOperator::Pos => numeric::numeric_pos(value),
        UnaryOperator::Invert => numeric::numeric_invert(value, heap)?,
    };
    result.ok_or_else(|| ExcType::unary_type_error(&op.to_string(), value.py_type(heap)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exception_private::RunError,
        intern::InternerBuilder,
        resource::{LimitedTracker, NoLimitTracker, ResourceLimits},
    };

    fn interns() -> Interns {
        Interns::new(InternerBuilder::new(), Vec::new(), Vec::new())
    }

    fn message(err: RunError) -> String {
        match err {
            RunError::Exc(raise) => raise.exc.arg().unwrap_or_default().to_owned(),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn sequence_operators() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = interns();
        let s = heap.alloc_str("ab".to_owned()).unwrap();
        let repeated = binary_op(Operator::Mult, Value::Int(3), s, &mut heap, &interns).unwrap();
        assert_eq!(repeated.py_str(&heap, &interns), "ababab");
        let list = heap.alloc_list(vec![Value::Int(1)]).unwrap();
        let empty = binary_op(Operator::Mult, list, Value::Int(-2), &mut heap, &interns).unwrap();
        assert_eq!(empty.py_repr(&heap, &interns), "[]");
        let joined = binary_op(Operator::Add, list, list, &mut heap, &interns).unwrap();
        assert_eq!(joined.py_repr(&heap, &interns), "[1, 1]");
    }

    #[test]
    fn type_errors() {
        let mut heap = Heap::new(NoLimitTracker);
        let interns = interns();
        let s = heap.alloc_str("a".to_owned()).unwrap();
        let err = binary_op(Operator::Add, Value::Int(1), s, &mut heap, &interns).unwrap_err();
        assert_eq!(message(err), "unsupported operand type(s) for +: 'int' and 'str'");
        let err = compare(CmpOperator::Lt, Value::Int(1), s, &heap, &interns).unwrap_err();
        assert_eq!(message(err), "'<' not supported between instances of 'int' and 'str'");
        let err = contains(s, Value::Int(1), &heap, &interns).unwrap_err();
        assert_eq!(message(err), "'in <string>' requires string as left operand, not int");
        let err = unary_op(UnaryOperator::Neg, s, &mut heap).unwrap_err();
        assert_eq!(message(err), "bad operand type for unary -: 'str'");
    }

    #[test]
    fn nan_compares_false() {
        let heap = Heap::new(NoLimitTracker);
        let interns = interns();
        assert!(!compare(CmpOperator::Lt, Value::Float(f64::NAN), Value::Int(1), &heap, &interns).unwrap());
        assert!(!compare(CmpOperator::GtE, Value::Float(f64::NAN), Value::Int(1), &heap, &interns).unwrap());
    }

    #[test]
    fn large_repeat_hits_memory_limit() {
        let mut heap = Heap::new(LimitedTracker::new(ResourceLimits::new().max_memory(1000)));
        let interns = interns();
        let s = heap.alloc_str("x".to_owned()).unwrap();
        let err = binary_op(Operator::Mult, s, Value::Int(1_000_000), &mut heap, &interns).unwrap_err();
        assert!(matches!(err, RunError::Resource(_)));
    }
}
