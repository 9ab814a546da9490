//! Slice objects created by `seq[start:stop:step]`.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::{
    exception_private::{ExcType, RunResult},
    heap::Heap,
    resource::ResourceTracker,
    value::Value,
};

/// `start:stop:step`, where `None` means "the default for this direction".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    /// Builds a slice from the three evaluated bounds; each must be an int or `None`.
    pub fn from_values(start: Value, stop: Value, step: Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Self> {
        Ok(Self {
            start: bound(start, heap)?,
            stop: bound(stop, heap)?,
            step: bound(step, heap)?,
        })
    }

    /// Concrete indices selected from a sequence of `length` items, in selection order.
    pub fn indices(&self, length: usize) -> RunResult<Vec<usize>> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ExcType::value_error_slice_step_zero());
        }
        let len = i64::try_from(length).unwrap_or(i64::MAX);
        let mut out = Vec::new();
        if step > 0 {
            let start = self.start.map_or(0, |s| clamp(s, len, 0, len));
            let stop = self.stop.map_or(len, |s| clamp(s, len, 0, len));
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let start = self.start.map_or(len - 1, |s| clamp(s, len, -1, len - 1));
            let stop = self.stop.map_or(-1, |s| clamp(s, len, -1, len - 1));
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }

    /// `(start, stop)` for a contiguous forward slice, used by slice assignment.
    pub fn contiguous_bounds(&self, length: usize) -> Option<(usize, usize)> {
        if self.step.unwrap_or(1) != 1 {
            return None;
        }
        let len = i64::try_from(length).unwrap_or(i64::MAX);
        let start = self.start.map_or(0, |s| clamp(s, len, 0, len));
        let stop = self.stop.map_or(len, |s| clamp(s, len, 0, len)).max(start);
        Some((start as usize, stop as usize))
    }

    pub fn py_repr_fmt(&self, f: &mut impl Write) -> std::fmt::Result {
        let part = |v: Option<i64>| v.map_or_else(|| "None".to_owned(), |i| i.to_string());
        write!(
            f,
            "slice({}, {}, {})",
            part(self.start),
            part(self.stop),
            part(self.step)
        )
    }
}

fn bound(value: Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Int(i) => Ok(Some(i)),
        Value::Bool(b) => Ok(Some(i64::from(b))),
        other => Err(ExcType::type_error(format!(
            "slice indices must be integers or None, not {}",
            other.py_type(heap)
        ))),
    }
}

/// Resolves a negative index against `length` and clamps it to `[lower, upper]`.
fn clamp(index: i64, length: i64, lower: i64, upper: i64) -> i64 {
    let index = if index < 0 { index.saturating_add(length) } else { index };
    index.clamp(lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Slice {
        Slice { start, stop, step }
    }

    #[test]
    fn forward_and_backward() {
        assert_eq!(slice(Some(1), Some(3), None).indices(5).unwrap(), vec![1, 2]);
        assert_eq!(slice(None, None, Some(2)).indices(5).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice(None, None, Some(-1)).indices(3).unwrap(), vec![2, 1, 0]);
        assert_eq!(slice(Some(-2), None, None).indices(4).unwrap(), vec![2, 3]);
        assert_eq!(slice(Some(10), Some(20), None).indices(4).unwrap(), Vec::<usize>::new());
        assert_eq!(slice(Some(-10), Some(2), Some(-1)).indices(4).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn zero_step_is_an_error() {
        assert!(slice(None, None, Some(0)).indices(3).is_err());
    }

    #[test]
    fn contiguous() {
        assert_eq!(slice(Some(1), Some(3), None).contiguous_bounds(5), Some((1, 3)));
        assert_eq!(slice(Some(3), Some(1), None).contiguous_bounds(5), Some((3, 3)));
        assert_eq!(slice(None, None, Some(2)).contiguous_bounds(5), None);
    }
}
