//! Attribute access for the VM.
//!
//! Only builtin methods and `exception.args` are readable; nothing is assignable.

use super::VM;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    intern::StringId,
    io::PrintWriter,
    resource::ResourceTracker,
    types::{Type, dict::has_dict_method, list::has_list_method, str::has_str_method, tuple::has_tuple_method},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<'_, T, P> {
    /// `obj.name`: pops obj, pushes a bound method or the attribute value.
    pub(super) fn load_attr(&mut self, name_id: StringId) -> RunResult<()> {
        let obj = self.pop();
        let interns = self.interns;
        let name = interns.get_str(name_id);
        let obj_type = obj.py_type(self.heap);
        let has_method = match obj_type {
            Type::Str => has_str_method(name),
            Type::List => has_list_method(name),
            Type::Dict => has_dict_method(name),
            Type::Tuple => has_tuple_method(name),
            _ => false,
        };
        let value = if has_method {
            Value::Ref(self.heap.allocate(HeapData::BoundMethod(obj, name_id))?)
        } else {
            match (obj, name) {
                (Value::Ref(id), "args") if matches!(obj_type, Type::Exception(_)) => {
                    let HeapData::Exception(exc) = self.heap.get(id) else {
                        return Err(ExcType::attribute_error(obj_type, name));
                    };
                    let arg = exc.arg().map(str::to_owned);
                    let items = match arg {
                        Some(arg) => vec![self.heap.alloc_str(arg)?],
                        None => Vec::new(),
                    };
                    self.heap.alloc_tuple(items)?
                }
                _ => return Err(ExcType::attribute_error(obj_type, name)),
            }
        };
        self.push(value);
        Ok(())
    }

    /// `obj.name = value` is never supported.
    pub(super) fn store_attr(&mut self, name_id: StringId) -> RunResult<()> {
        let obj = self.pop();
        let _value = self.pop();
        let obj_type = obj.py_type(self.heap);
        Err(ExcType::attribute_error(obj_type, self.interns.get_str(name_id)))
    }
}
