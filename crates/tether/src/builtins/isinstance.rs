//! Implementation of the isinstance() builtin function.

use crate::{
    args::ArgValues,
    builtins::Builtins,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    types::Type,
    value::Value,
};

/// `isinstance(obj, classinfo)`, where `classinfo` is a type, an exception class or a
/// tuple of those.
pub fn builtin_isinstance(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let (obj, classinfo) = args.get_two_args("isinstance")?;
    let obj_type = obj.py_type(heap);
    matches_classinfo(obj_type, classinfo, heap).map(Value::Bool)
}

fn matches_classinfo(obj_type: Type, classinfo: Value, heap: &Heap<impl ResourceTracker>) -> RunResult<bool> {
    match classinfo {
        Value::Builtin(Builtins::Type(t)) => return Ok(obj_type.is_instance_of(t)),
        Value::Builtin(Builtins::ExcType(e)) => return Ok(obj_type.is_instance_of(Type::Exception(e))),
        Value::Ref(id) => {
            if let HeapData::Tuple(tuple) = heap.get(id) {
                for item in tuple.as_slice() {
                    if matches_classinfo(obj_type, *item, heap)? {
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
        }
        _ => {}
    }
    Err(ExcType::type_error(
        "isinstance() arg 2 must be a type, a tuple of types, or a union",
    ))
}
