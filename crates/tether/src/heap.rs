use std::fmt::{self, Write};

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{
    exception_private::{ExcType, RunResult, SimpleException},
    intern::{FunctionId, Interns, StringId},
    resource::{ResourceError, ResourceTracker},
    types::{Dict, ForIterator, List, PyTrait, Range, Slice, Str, Tuple, Type},
    value::{ReprGuard, Value},
};

/// Largest string, list or tuple a single operation may build, in bytes.
///
/// Applies with every tracker, so a program without a memory limit still gets a
/// `MemoryError` instead of taking the process down with a failed allocation.
pub(crate) const MAX_SEQUENCE_BYTES: usize = 1 << 27;

/// Largest integer a single operation may produce, in bits.
///
/// Keeps one `**` or `<<` from running far past the time limit between safepoints.
pub(crate) const MAX_INT_BITS: u64 = 1 << 20;

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct HeapId(usize);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Every runtime value that must live in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum HeapData {
    Str(Str),
    List(List),
    Tuple(Tuple),
    Dict(Dict),
    Range(Range),
    Slice(Slice),
    /// An exception instance, e.g. `ValueError('message')`.
    Exception(SimpleException),
    Iterator(ForIterator),
    /// An integer outside the `i64` range; results that fit are demoted back to `Value::Int`.
    LongInt(BigInt),
    /// A variable shared between a function and the functions nested in it.
    Cell(Value),
    /// A function capturing cells from enclosing scopes, plus its evaluated defaults.
    Closure(FunctionId, Vec<HeapId>, Vec<Value>),
    /// A function with evaluated default parameter values and no captured cells.
    FunctionDefaults(FunctionId, Vec<Value>),
    /// A method looked up but not yet called, e.g. `f = items.append`.
    BoundMethod(Value, StringId),
}

impl HeapData {
    pub fn py_type(&self) -> Type {
        match self {
            Self::Str(s) => s.py_type(),
            Self::List(l) => l.py_type(),
            Self::Tuple(t) => t.py_type(),
            Self::Dict(d) => d.py_type(),
            Self::Range(r) => r.py_type(),
            Self::Slice(_) => Type::Slice,
            Self::Exception(e) => Type::Exception(e.exc_type()),
            Self::Iterator(i) => i.py_type(),
            Self::LongInt(_) => Type::Int,
            Self::Cell(_) => Type::Cell,
            Self::Closure(..) | Self::FunctionDefaults(..) => Type::Function,
            Self::BoundMethod(..) => Type::Method,
        }
    }

    pub fn py_len(&self) -> Option<usize> {
        match self {
            Self::Str(s) => s.py_len(),
            Self::List(l) => l.py_len(),
            Self::Tuple(t) => t.py_len(),
            Self::Dict(d) => d.py_len(),
            Self::Range(r) => r.py_len(),
            _ => None,
        }
    }

    pub fn py_bool(&self) -> bool {
        match self {
            Self::LongInt(b) => b.sign() != num_bigint::Sign::NoSign,
            other => other.py_len().is_none_or(|len| len != 0),
        }
    }

    pub fn py_estimate_size(&self) -> usize {
        match self {
            Self::Str(s) => s.py_estimate_size(),
            Self::List(l) => l.py_estimate_size(),
            Self::Tuple(t) => t.py_estimate_size(),
            Self::Dict(d) => d.py_estimate_size(),
            Self::Range(r) => r.py_estimate_size(),
            Self::Slice(_) => std::mem::size_of::<Slice>(),
            Self::Exception(e) => std::mem::size_of::<SimpleException>() + e.arg().map_or(0, str::len),
            Self::Iterator(i) => i.py_estimate_size(),
            Self::LongInt(b) => std::mem::size_of::<BigInt>() + (b.bits() / 8) as usize,
            Self::Cell(_) => std::mem::size_of::<Value>(),
            Self::Closure(_, cells, defaults) => {
                std::mem::size_of::<Self>()
                    + cells.len() * std::mem::size_of::<HeapId>()
                    + defaults.len() * std::mem::size_of::<Value>()
            }
            Self::FunctionDefaults(_, defaults) => {
                std::mem::size_of::<Self>() + defaults.len() * std::mem::size_of::<Value>()
            }
            Self::BoundMethod(..) => std::mem::size_of::<Self>(),
        }
    }

    pub fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        guard: &mut ReprGuard,
    ) -> fmt::Result {
        match self {
            Self::Str(s) => s.py_repr_fmt(f, heap, interns, guard),
            Self::List(l) => l.py_repr_fmt(f, heap, interns, guard),
            Self::Tuple(t) => t.py_repr_fmt(f, heap, interns, guard),
            Self::Dict(d) => d.py_repr_fmt(f, heap, interns, guard),
            Self::Range(r) => r.py_repr_fmt(f, heap, interns, guard),
            Self::Slice(s) => s.py_repr_fmt(f),
            Self::Exception(e) => e.py_repr_fmt(f),
            Self::Iterator(i) => i.py_repr_fmt(f, heap, interns, guard),
            Self::LongInt(b) => write!(f, "{b}"),
            Self::Cell(_) => f.write_str("<cell>"),
            Self::Closure(func_id, ..) | Self::FunctionDefaults(func_id, _) => {
                write!(f, "<function {}>", interns.get_str(interns.get_function(*func_id).name))
            }
            Self::BoundMethod(receiver, name) => {
                write!(
                    f,
                    "<built-in method {} of {} object>",
                    interns.get_str(*name),
                    receiver.py_type(heap)
                )
            }
        }
    }

    /// Structural equality between two heap entries of the same kind.
    pub fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>, interns: &Interns, depth: usize) -> RunResult<bool> {
        match (self, other) {
            (Self::List(a), Self::List(b)) => a.py_eq(b, heap, interns, depth),
            (Self::Tuple(a), Self::Tuple(b)) => a.py_eq(b, heap, interns, depth),
            (Self::Dict(a), Self::Dict(b)) => a.py_eq(b, heap, interns, depth),
            (Self::Range(a), Self::Range(b)) => a.py_eq(b, heap, interns, depth),
            (Self::Slice(a), Self::Slice(b)) => Ok(a == b),
            (Self::BoundMethod(ra, na), Self::BoundMethod(rb, nb)) => Ok(na == nb && ra.is_identical(*rb)),
            _ => Ok(false),
        }
    }

    /// Shown in place of a container that is already being printed.
    pub fn recursive_placeholder(&self) -> &'static str {
        match self {
            Self::List(_) => "[...]",
            Self::Tuple(_) => "(...)",
            Self::Dict(_) => "{...}",
            _ => "...",
        }
    }

    fn push_child_ids(&self, work_list: &mut Vec<HeapId>) {
        let push_values = |values: &[Value], work_list: &mut Vec<HeapId>| {
            work_list.extend(values.iter().filter_map(|v| v.heap_id()));
        };
        match self {
            Self::List(l) => push_values(l.as_slice(), work_list),
            Self::Tuple(t) => push_values(t.as_slice(), work_list),
            Self::Dict(d) => {
                for (key, value) in d.items() {
                    work_list.extend(key.heap_id());
                    work_list.extend(value.heap_id());
                }
            }
            Self::Iterator(i) => work_list.extend(i.heap_ref()),
            Self::Cell(value) | Self::BoundMethod(value, _) => work_list.extend(value.heap_id()),
            Self::Closure(_, cells, defaults) => {
                work_list.extend(cells.iter().copied());
                push_values(defaults, work_list);
            }
            Self::FunctionDefaults(_, defaults) => push_values(defaults, work_list),
            Self::Str(_) | Self::Range(_) | Self::Slice(_) | Self::Exception(_) | Self::LongInt(_) => {}
        }
    }
}

/// Arena backing every heap-only runtime value.
///
/// Values are `Copy` handles into this arena; nothing is freed until a mark and sweep
/// pass finds it unreachable from the roots the VM supplies. Freed slots are reused.
///
/// Generic over `T: ResourceTracker`: with `NoLimitTracker` all resource checks
/// compile away to no-ops.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapData>>,
    free_list: Vec<HeapId>,
    tracker: T,
    allocations_since_gc: usize,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            allocations_since_gc: 0,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new heap entry, failing when a resource limit would be exceeded.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.py_estimate_size())?;
        self.allocations_since_gc += 1;
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(data);
            id
        } else {
            self.entries.push(Some(data));
            HeapId(self.entries.len() - 1)
        };
        Ok(id)
    }

    /// # Panics
    /// Panics if the id was freed, which means a root was missed during collection.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .expect("Heap::get: object already freed")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("Heap::get_mut: object already freed")
    }

    pub fn alloc_str(&mut self, s: String) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Str(Str::new(s)))?))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::List(List::new(items)))?))
    }

    pub fn alloc_tuple(&mut self, items: Vec<Value>) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Tuple(Tuple::new(items)))?))
    }

    /// An integer value: inline when it fits in `i64`, otherwise a heap `LongInt`.
    pub fn int_value(&mut self, value: BigInt) -> RunResult<Value> {
        match value.to_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => Ok(Value::Ref(self.allocate(HeapData::LongInt(value))?)),
        }
    }

    /// Reports that an existing container grew by roughly `bytes`.
    pub fn note_growth(&mut self, bytes: usize) -> Result<(), ResourceError> {
        self.tracker.on_grow(bytes)
    }

    /// Checks that a new sequence of `bytes` may be built, without keeping the memory.
    ///
    /// Called before building large results such as `'x' * n` or `a + b`.
    pub fn check_size(&mut self, bytes: usize) -> RunResult<()> {
        if bytes > MAX_SEQUENCE_BYTES {
            return Err(ExcType::memory_error(format!(
                "cannot build a sequence of {bytes} bytes (limit: {MAX_SEQUENCE_BYTES})"
            )));
        }
        self.tracker.on_grow(bytes)?;
        self.tracker.on_free(|| bytes);
        Ok(())
    }

    /// Checks that an integer result of about `bits` bits may be computed.
    pub fn check_int_bits(&mut self, bits: u64) -> RunResult<()> {
        if bits > MAX_INT_BITS {
            return Err(ExcType::overflow_error(format!(
                "integer result too large: about {bits} bits (limit: {MAX_INT_BITS})"
            )));
        }
        self.check_size((bits / 8) as usize)
    }

    pub fn get_cell_value(&self, id: HeapId) -> Value {
        match self.get(id) {
            HeapData::Cell(value) => *value,
            _ => unreachable!("cell access on a non-cell heap entry"),
        }
    }

    pub fn set_cell_value(&mut self, id: HeapId, value: Value) {
        match self.get_mut(id) {
            HeapData::Cell(slot) => *slot = value,
            _ => unreachable!("cell access on a non-cell heap entry"),
        }
    }

    /// Advances the iterator stored at `iter_id`, `None` once exhausted.
    pub fn advance_iterator(&mut self, iter_id: HeapId) -> RunResult<Option<Value>> {
        let HeapData::Iterator(mut iter) = std::mem::replace(self.get_mut(iter_id), HeapData::Cell(Value::None)) else {
            unreachable!("ForIter on a non-iterator heap entry")
        };
        let result = iter.for_next(self);
        *self.get_mut(iter_id) = HeapData::Iterator(iter);
        result
    }

    /// Number of live entries.
    pub fn entry_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn should_gc(&self) -> bool {
        self.tracker.should_gc(self.allocations_since_gc)
    }

    /// Frees every entry not reachable from `roots`, returning the memory to the tracker.
    pub fn collect_garbage(&mut self, roots: Vec<HeapId>) {
        let mut reachable = vec![false; self.entries.len()];
        let mut work_list = roots;
        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(data)) = self.entries.get(idx) {
                data.push_child_ids(&mut work_list);
            }
        }

        let mut freed = 0usize;
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(data) = slot.take() {
                self.tracker.on_free(|| data.py_estimate_size());
                self.free_list.push(HeapId(idx));
                freed += 1;
            }
        }
        log::trace!(
            "garbage collection: {} live, {freed} freed",
            reachable.iter().filter(|r| **r).count()
        );
        self.allocations_since_gc = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits};

    #[test]
    fn unreachable_cycles_are_collected() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = heap.allocate(HeapData::List(List::new(vec![]))).unwrap();
        let b = heap.allocate(HeapData::List(List::new(vec![Value::Ref(a)]))).unwrap();
        let HeapData::List(list) = heap.get_mut(a) else { unreachable!() };
        list.push(Value::Ref(b));
        let kept = heap.alloc_str("kept".to_owned()).unwrap();
        assert_eq!(heap.entry_count(), 3);

        heap.collect_garbage(vec![kept.heap_id().unwrap()]);
        assert_eq!(heap.entry_count(), 1);

        // freed slots are reused
        let c = heap.allocate(HeapData::List(List::new(vec![]))).unwrap();
        assert!(c == a || c == b);
    }

    #[test]
    fn long_ints_are_demoted() {
        let mut heap = Heap::new(NoLimitTracker);
        assert!(matches!(heap.int_value(BigInt::from(7)).unwrap(), Value::Int(7)));
        let big = heap.int_value(BigInt::from(i64::MAX) + 1).unwrap();
        assert!(matches!(big, Value::Ref(_)));
    }

    #[test]
    fn allocation_limit_applies() {
        let mut heap = Heap::new(LimitedTracker::new(ResourceLimits::new().max_allocations(2)));
        heap.alloc_str("a".to_owned()).unwrap();
        heap.alloc_str("b".to_owned()).unwrap();
        assert!(heap.alloc_str("c".to_owned()).is_err());
    }
}
