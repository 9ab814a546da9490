//! Implementation of the hash() builtin function.

use crate::{
    args::ArgValues,
    exception_private::RunResult,
    heap::Heap,
    intern::Interns,
    resource::ResourceTracker,
    types::DictKey,
    value::Value,
};

/// `hash(x)`, consistent with how dict keys compare: `hash(1) == hash(1.0) == hash(True)`.
pub fn builtin_hash(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
    let value = args.get_one_arg("hash")?;
    let key = DictKey::from_value(value, heap, interns)?;
    Ok(Value::Int(key.hash_value()))
}
