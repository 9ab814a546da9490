use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData},
    intern::Interns,
    resource::ResourceTracker,
    types::{PyTrait, Type},
    value::{ReprGuard, Value},
};

/// Python `range`, an immutable arithmetic sequence computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        debug_assert!(step != 0, "range step must not be zero");
        Self { start, stop, step }
    }

    pub fn len(&self) -> usize {
        let (start, stop, step) = (i128::from(self.start), i128::from(self.stop), i128::from(self.step));
        let len = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    /// Item at a non-negative position, `None` past the end.
    pub fn get(&self, index: usize) -> Option<i64> {
        (index < self.len()).then(|| self.start + self.step * index as i64)
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }

    /// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
    pub fn init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, _interns: &Interns) -> RunResult<Value> {
        let values = args.into_positional("range")?;
        let ints = values
            .iter()
            .map(|v| v.as_index(heap))
            .collect::<RunResult<Vec<_>>>()?;
        let range = match ints.as_slice() {
            [stop] => Self::new(0, *stop, 1),
            [start, stop] => Self::new(*start, *stop, 1),
            [_, _, 0] => return Err(ExcType::value_error_range_step_zero()),
            [start, stop, step] => Self::new(*start, *stop, *step),
            [] => return Err(ExcType::type_error("range expected at least 1 argument, got 0")),
            _ => {
                return Err(ExcType::type_error(format!(
                    "range expected at most 3 arguments, got {}",
                    ints.len()
                )));
            }
        };
        let id = heap.allocate(HeapData::Range(range))?;
        Ok(Value::Ref(id))
    }
}

impl PyTrait for Range {
    fn py_type(&self) -> Type {
        Type::Range
    }

    fn py_len(&self) -> Option<usize> {
        Some(self.len())
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        _heap: &Heap<impl ResourceTracker>,
        _interns: &Interns,
        _guard: &mut ReprGuard,
    ) -> fmt::Result {
        if self.step == 1 {
            write!(f, "range({}, {})", self.start, self.stop)
        } else {
            write!(f, "range({}, {}, {})", self.start, self.stop, self.step)
        }
    }

    /// Ranges are equal when they produce the same sequence.
    fn py_eq(&self, other: &Self, _heap: &Heap<impl ResourceTracker>, _interns: &Interns, _depth: usize) -> RunResult<bool> {
        let len = self.len();
        if len != other.len() {
            return Ok(false);
        }
        Ok(match len {
            0 => true,
            1 => self.start == other.start,
            _ => self.start == other.start && self.step == other.step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths() {
        assert_eq!(Range::new(0, 10, 1).len(), 10);
        assert_eq!(Range::new(0, 10, 3).len(), 4);
        assert_eq!(Range::new(10, 0, -2).len(), 5);
        assert_eq!(Range::new(5, 5, 1).len(), 0);
        assert_eq!(Range::new(5, 0, 1).len(), 0);
    }

    #[test]
    fn membership() {
        let r = Range::new(1, 10, 3);
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert!(!r.contains(10));
        let down = Range::new(10, 0, -5);
        assert!(down.contains(5));
        assert!(!down.contains(0));
        assert_eq!(down.get(1), Some(5));
        assert_eq!(down.get(2), None);
    }
}
