//! Collection building, subscripts and unpacking for the VM.

use std::cmp::Ordering;

use super::VM;
use crate::{
    exception_private::{ExcType, RunError, RunResult, exc_err_fmt},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{
        Dict, DictKey, List, Range, Slice, Tuple, Type,
        iter::collect_iterable,
        list::normalize_index,
        str::str_getitem,
    },
    value::Value,
};

/// Approximate memory added by one new dict entry.
const DICT_ENTRY_SIZE: usize = std::mem::size_of::<DictKey>() + 2 * std::mem::size_of::<Value>();

/// A sequence subscript after type checking.
enum SeqIndex {
    Item(i64),
    Slice(Slice),
}

impl<T: ResourceTracker, P: PrintWriter> VM<'_, T, P> {
    /// Builds a list from the top n stack values.
    pub(super) fn build_list(&mut self, count: usize) -> RunResult<()> {
        let items = self.pop_n(count);
        let heap_id = self.heap.allocate(HeapData::List(List::new(items)))?;
        self.push(Value::Ref(heap_id));
        Ok(())
    }

    /// Builds a tuple from the top n stack values.
    pub(super) fn build_tuple(&mut self, count: usize) -> RunResult<()> {
        let items = self.pop_n(count);
        let heap_id = self.heap.allocate(HeapData::Tuple(Tuple::new(items)))?;
        self.push(Value::Ref(heap_id));
        Ok(())
    }

    /// Builds a dict from the top 2n stack values (key/value pairs).
    ///
    /// A repeated key keeps its first position and takes the last value.
    pub(super) fn build_dict(&mut self, count: usize) -> RunResult<()> {
        let items = self.pop_n(count * 2);
        let mut dict = Dict::new();
        for pair in items.chunks_exact(2) {
            let key = DictKey::from_value(pair[0], self.heap, self.interns)?;
            dict.insert(key, pair[0], pair[1]);
        }
        let heap_id = self.heap.allocate(HeapData::Dict(dict))?;
        self.push(Value::Ref(heap_id));
        Ok(())
    }

    /// Stack: [start, stop, step] -> [slice]
    pub(super) fn build_slice(&mut self) -> RunResult<()> {
        let step = self.pop();
        let stop = self.pop();
        let start = self.pop();
        let slice = Slice::from_values(start, stop, step, self.heap)?;
        let heap_id = self.heap.allocate(HeapData::Slice(slice))?;
        self.push(Value::Ref(heap_id));
        Ok(())
    }

    /// Appends TOS to the list a comprehension is building.
    ///
    /// Stack: [list, iter1, ..., iterN, value] -> [list, iter1, ..., iterN]
    pub(super) fn list_append(&mut self, depth: usize) -> RunResult<()> {
        let value = self.pop();
        let Value::Ref(list_id) = self.stack[self.stack.len() - 1 - depth] else {
            return Err(RunError::internal("ListAppend: expected a list below the iterators"));
        };
        self.heap.note_growth(std::mem::size_of::<Value>())?;
        self.list_mut(list_id)?.push(value);
        Ok(())
    }

    /// Stores a key/value pair into the dict a comprehension is building.
    ///
    /// Stack: [dict, iter1, ..., iterN, key, value] -> [dict, iter1, ..., iterN]
    pub(super) fn dict_set_item(&mut self, depth: usize) -> RunResult<()> {
        let value = self.pop();
        let key_value = self.pop();
        let Value::Ref(dict_id) = self.stack[self.stack.len() - 1 - depth] else {
            return Err(RunError::internal("DictSetItem: expected a dict below the iterators"));
        };
        let key = DictKey::from_value(key_value, self.heap, self.interns)?;
        self.dict_insert(dict_id, key, key_value, value)
    }

    /// Unpacks TOS into `count` values, the first one ending on top.
    pub(super) fn unpack_sequence(&mut self, count: usize) -> RunResult<()> {
        let value = self.pop();
        let iterable = match value {
            Value::InternString(_) => true,
            Value::Ref(id) => matches!(
                self.heap.get(id),
                HeapData::List(_)
                    | HeapData::Tuple(_)
                    | HeapData::Str(_)
                    | HeapData::Dict(_)
                    | HeapData::Range(_)
                    | HeapData::Iterator(_)
            ),
            _ => false,
        };
        if !iterable {
            return exc_err_fmt!(ExcType::TypeError; "cannot unpack non-iterable {} object", value.py_type(self.heap));
        }
        let items = collect_iterable(value, self.heap, self.interns)?;
        match items.len().cmp(&count) {
            Ordering::Less => {
                exc_err_fmt!(ExcType::ValueError; "not enough values to unpack (expected {count}, got {})", items.len())
            }
            Ordering::Greater => exc_err_fmt!(ExcType::ValueError; "too many values to unpack (expected {count})"),
            Ordering::Equal => {
                self.stack.extend(items.into_iter().rev());
                Ok(())
            }
        }
    }

    /// `obj[index]`: pops index and obj, pushes the item.
    pub(super) fn binary_subscr(&mut self) -> RunResult<()> {
        let index = self.pop();
        let obj = self.pop();
        let item = self.getitem(obj, index)?;
        self.push(item);
        Ok(())
    }

    fn getitem(&mut self, obj: Value, index: Value) -> RunResult<Value> {
        let interns = self.interns;
        let heap_id = match obj {
            Value::Ref(heap_id) => heap_id,
            Value::InternString(id) => return str_getitem(interns.get_str(id), index, self.heap),
            other => return Err(ExcType::type_error_not_sub(other.py_type(self.heap))),
        };
        match self.heap.get(heap_id) {
            HeapData::Str(s) => {
                let s = s.as_str().to_owned();
                str_getitem(&s, index, self.heap)
            }
            HeapData::Dict(dict) => {
                let key = DictKey::from_value(index, self.heap, interns)?;
                dict.get(&key)
                    .ok_or_else(|| ExcType::key_error(index, self.heap, interns))
            }
            HeapData::List(_) | HeapData::Tuple(_) => self.sequence_getitem(heap_id, index),
            HeapData::Range(range) => {
                let range = *range;
                self.range_getitem(range, index)
            }
            other => Err(ExcType::type_error_not_sub(other.py_type())),
        }
    }

    fn sequence_getitem(&mut self, heap_id: HeapId, index: Value) -> RunResult<Value> {
        let container = self.heap.get(heap_id).py_type();
        let index = self.seq_index(container, index)?;
        let items = match self.heap.get(heap_id) {
            HeapData::List(list) => list.as_slice(),
            HeapData::Tuple(tuple) => tuple.as_slice(),
            _ => return Err(RunError::internal("sequence_getitem: expected a list or tuple")),
        };
        match index {
            SeqIndex::Item(i) => normalize_index(i, items.len())
                .map(|i| items[i])
                .ok_or_else(|| ExcType::index_error(container)),
            SeqIndex::Slice(slice) => {
                let picked: Vec<Value> = slice.indices(items.len())?.into_iter().map(|i| items[i]).collect();
                if container == Type::List {
                    self.heap.alloc_list(picked)
                } else {
                    self.heap.alloc_tuple(picked)
                }
            }
        }
    }

    /// Indexing a range computes the item; slicing it gives another range.
    fn range_getitem(&mut self, range: Range, index: Value) -> RunResult<Value> {
        match self.seq_index(Type::Range, index)? {
            SeqIndex::Item(i) => normalize_index(i, range.len())
                .and_then(|i| range.get(i))
                .map(Value::Int)
                .ok_or_else(|| ExcType::index_error(Type::Range)),
            SeqIndex::Slice(slice) => {
                let indices = slice.indices(range.len())?;
                let step = range.step * slice.step.unwrap_or(1);
                let start = indices
                    .first()
                    .map_or(range.start, |&i| range.start + range.step * i as i64);
                let stop = start + step * indices.len() as i64;
                let heap_id = self.heap.allocate(HeapData::Range(Range::new(start, stop, step)))?;
                Ok(Value::Ref(heap_id))
            }
        }
    }

    /// `obj[index] = value`
    ///
    /// Stack: [value, obj, index] -> []
    pub(super) fn store_subscr(&mut self) -> RunResult<()> {
        let index = self.pop();
        let obj = self.pop();
        let value = self.pop();
        let Value::Ref(heap_id) = obj else {
            return Err(ExcType::type_error_not_sub_assignment(obj.py_type(self.heap)));
        };
        match self.heap.get(heap_id) {
            HeapData::List(_) => self.list_setitem(heap_id, index, value),
            HeapData::Dict(_) => {
                let key = DictKey::from_value(index, self.heap, self.interns)?;
                self.dict_insert(heap_id, key, index, value)
            }
            other => Err(ExcType::type_error_not_sub_assignment(other.py_type())),
        }
    }

    /// Item and slice assignment on a list.
    ///
    /// A contiguous slice may be replaced by any number of items, an extended slice only
    /// by exactly as many items as it selects.
    fn list_setitem(&mut self, list_id: HeapId, index: Value, value: Value) -> RunResult<()> {
        match self.seq_index(Type::List, index)? {
            SeqIndex::Item(i) => {
                let list = self.list_mut(list_id)?;
                let slot = normalize_index(i, list.len()).ok_or_else(ExcType::list_assignment_index_error)?;
                list.as_vec_mut()[slot] = value;
                Ok(())
            }
            SeqIndex::Slice(slice) => {
                let new_items = collect_iterable(value, self.heap, self.interns)?;
                let len = self.list_mut(list_id)?.len();
                if let Some((start, stop)) = slice.contiguous_bounds(len) {
                    let growth = new_items.len().saturating_sub(stop - start);
                    self.heap.note_growth(growth * std::mem::size_of::<Value>())?;
                    self.list_mut(list_id)?.as_vec_mut().splice(start..stop, new_items);
                    return Ok(());
                }
                let indices = slice.indices(len)?;
                if indices.len() != new_items.len() {
                    return exc_err_fmt!(
                        ExcType::ValueError;
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        new_items.len(),
                        indices.len()
                    );
                }
                let items = self.list_mut(list_id)?.as_vec_mut();
                for (i, item) in indices.into_iter().zip(new_items) {
                    items[i] = item;
                }
                Ok(())
            }
        }
    }

    fn dict_insert(&mut self, dict_id: HeapId, key: DictKey, key_value: Value, value: Value) -> RunResult<()> {
        let HeapData::Dict(dict) = self.heap.get_mut(dict_id) else {
            return Err(RunError::internal("dict_insert: expected a dict"));
        };
        if dict.insert(key, key_value, value).is_none() {
            self.heap.note_growth(DICT_ENTRY_SIZE)?;
        }
        Ok(())
    }

    fn list_mut(&mut self, list_id: HeapId) -> RunResult<&mut List> {
        match self.heap.get_mut(list_id) {
            HeapData::List(list) => Ok(list),
            _ => Err(RunError::internal("expected a list")),
        }
    }

    /// Checks a list, tuple or range subscript: an int, a bool or a slice.
    fn seq_index(&self, container: Type, index: Value) -> RunResult<SeqIndex> {
        match index {
            Value::Int(i) => Ok(SeqIndex::Item(i)),
            Value::Bool(b) => Ok(SeqIndex::Item(i64::from(b))),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Slice(slice) => Ok(SeqIndex::Slice(slice.clone())),
                HeapData::LongInt(_) => Err(ExcType::index_error_overflow()),
                other => Err(ExcType::type_error_indices(container, other.py_type())),
            },
            other => Err(ExcType::type_error_indices(container, other.py_type(self.heap))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        heap::Heap,
        intern::{InternerBuilder, Interns},
        io::NoPrint,
        namespace::Namespaces,
        resource::NoLimitTracker,
    };

    fn with_vm(check: impl FnOnce(&mut VM<'_, NoLimitTracker, NoPrint>)) {
        let mut heap = Heap::new(NoLimitTracker);
        let mut namespaces = Namespaces::new(Vec::new());
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let mut print = NoPrint;
        let mut vm = VM::new(&mut heap, &mut namespaces, &interns, &mut print);
        check(&mut vm);
    }

    fn list_of(vm: &mut VM<'_, NoLimitTracker, NoPrint>, items: &[i64]) -> Value {
        vm.heap.alloc_list(items.iter().map(|i| Value::Int(*i)).collect()).unwrap()
    }

    fn ints(vm: &VM<'_, NoLimitTracker, NoPrint>, value: Value) -> Vec<i64> {
        let Value::Ref(id) = value else { panic!("expected a heap value") };
        let items = match vm.heap.get(id) {
            HeapData::List(list) => list.as_slice().to_vec(),
            HeapData::Tuple(tuple) => tuple.as_slice().to_vec(),
            other => panic!("not a sequence: {other:?}"),
        };
        items.into_iter().map(|v| v.as_int().unwrap()).collect()
    }

    #[test]
    fn unpack_pushes_first_item_on_top() {
        with_vm(|vm| {
            let list = list_of(vm, &[1, 2, 3]);
            vm.push(list);
            vm.unpack_sequence(3).unwrap();
            assert_eq!(vm.stack.iter().map(|v| v.as_int().unwrap()).collect::<Vec<_>>(), [3, 2, 1]);
        });
    }

    #[test]
    fn unpack_count_mismatch() {
        with_vm(|vm| {
            let list = list_of(vm, &[1, 2, 3]);
            vm.push(list);
            let Err(RunError::Exc(exc)) = vm.unpack_sequence(2) else { panic!("expected an exception") };
            assert_eq!(exc.exc.arg(), Some("too many values to unpack (expected 2)"));

            vm.push(list);
            let Err(RunError::Exc(exc)) = vm.unpack_sequence(4) else { panic!("expected an exception") };
            assert_eq!(exc.exc.arg(), Some("not enough values to unpack (expected 4, got 3)"));

            vm.push(Value::Int(5));
            let Err(RunError::Exc(exc)) = vm.unpack_sequence(2) else { panic!("expected an exception") };
            assert_eq!(exc.exc.arg(), Some("cannot unpack non-iterable int object"));
        });
    }

    #[test]
    fn negative_index_and_slices() {
        with_vm(|vm| {
            let list = list_of(vm, &[10, 20, 30, 40]);
            assert_eq!(vm.getitem(list, Value::Int(-1)).unwrap().as_int(), Some(40));

            let slice = vm.heap.allocate(HeapData::Slice(Slice {
                start: None,
                stop: None,
                step: Some(-2),
            }));
            let picked = vm.getitem(list, Value::Ref(slice.unwrap())).unwrap();
            assert_eq!(ints(vm, picked), [40, 20]);

            let Err(RunError::Exc(exc)) = vm.getitem(list, Value::Int(4)) else { panic!("expected IndexError") };
            assert_eq!(exc.exc.exc_type(), ExcType::IndexError);
        });
    }

    #[test]
    fn range_slice_is_a_range() {
        with_vm(|vm| {
            let range = Range::new(0, 10, 1);
            let slice = vm.heap.allocate(HeapData::Slice(Slice {
                start: Some(2),
                stop: Some(8),
                step: Some(3),
            }));
            let sliced = vm.range_getitem(range, Value::Ref(slice.unwrap())).unwrap();
            let Value::Ref(id) = sliced else { panic!("expected a heap range") };
            let HeapData::Range(r) = vm.heap.get(id) else { panic!("expected a range") };
            assert_eq!((r.get(0), r.get(1), r.len()), (Some(2), Some(5), 2));
        });
    }

    #[test]
    fn slice_assignment_replaces_and_checks_extended_size() {
        with_vm(|vm| {
            let list = list_of(vm, &[1, 2, 3, 4]);
            let Value::Ref(list_id) = list else { unreachable!() };
            let replacement = list_of(vm, &[7, 8, 9]);
            let head = vm.heap.allocate(HeapData::Slice(Slice {
                start: None,
                stop: Some(2),
                step: None,
            }));
            vm.list_setitem(list_id, Value::Ref(head.unwrap()), replacement).unwrap();
            assert_eq!(ints(vm, list), [7, 8, 9, 3, 4]);

            let every_other = vm.heap.allocate(HeapData::Slice(Slice {
                start: None,
                stop: None,
                step: Some(2),
            }));
            let pair = list_of(vm, &[0, 0]);
            let Err(RunError::Exc(exc)) = vm.list_setitem(list_id, Value::Ref(every_other.unwrap()), pair) else {
                panic!("expected ValueError")
            };
            assert_eq!(
                exc.exc.arg(),
                Some("attempt to assign sequence of size 2 to extended slice of size 3")
            );
        });
    }
}
