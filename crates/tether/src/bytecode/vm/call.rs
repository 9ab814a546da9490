//! Function and method call helpers for the VM.

use super::{CallFrame, FrameExit, VM};
use crate::{
    args::ArgValues,
    builtins::{
        Builtins, BuiltinsFunctions,
        min_max::{MinMaxArgs, select_min_max},
        sorted::SortArgs,
    },
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{FunctionId, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{
        dict::call_dict_method,
        list::{call_list_method, sort_values},
        str::call_str_method,
        tuple::call_tuple_method,
    },
    value::Value,
};

/// Result of calling a value.
pub(super) enum CallResult {
    /// The call finished, push the value.
    Value(Value),
    /// A user function frame was pushed; `ReturnValue` pushes its result later.
    FramePushed,
    /// The run loop has to hand control back to the host.
    External(FrameExit),
}

impl<T: ResourceTracker, P: PrintWriter> VM<'_, T, P> {
    /// Calls a callable value with the given arguments.
    pub(super) fn call_function(&mut self, callable: Value, args: ArgValues) -> RunResult<CallResult> {
        match callable {
            Value::Builtin(builtin) => self.call_builtin(builtin, args).map(CallResult::Value),
            Value::ExtFunction(ext_function_id) => {
                self.heap.tracker().check_time()?;
                let call_id = self.next_call_id;
                self.next_call_id += 1;
                log::debug!(
                    "suspending on external call {call_id} to {}",
                    self.interns.get_external_function_name(ext_function_id)
                );
                Ok(CallResult::External(FrameExit::ExternalCall {
                    ext_function_id,
                    args,
                    call_id,
                }))
            }
            Value::Function(func_id) => {
                self.call_user_function(func_id, &[], &[], args)?;
                Ok(CallResult::FramePushed)
            }
            Value::Ref(heap_id) => match self.heap.get(heap_id) {
                HeapData::Closure(func_id, cells, defaults) => {
                    let (func_id, cells, defaults) = (*func_id, cells.clone(), defaults.clone());
                    self.call_user_function(func_id, &cells, &defaults, args)?;
                    Ok(CallResult::FramePushed)
                }
                HeapData::FunctionDefaults(func_id, defaults) => {
                    let (func_id, defaults) = (*func_id, defaults.clone());
                    self.call_user_function(func_id, &[], &defaults, args)?;
                    Ok(CallResult::FramePushed)
                }
                HeapData::BoundMethod(receiver, name_id) => {
                    let (receiver, name_id) = (*receiver, *name_id);
                    self.call_method(receiver, name_id, args).map(CallResult::Value)
                }
                other => Err(ExcType::type_error_not_callable(other.py_type())),
            },
            other => Err(ExcType::type_error_not_callable(other.py_type(self.heap))),
        }
    }

    /// Calls a builtin, running key functions through the interpreter where needed.
    fn call_builtin(&mut self, builtin: Builtins, args: ArgValues) -> RunResult<Value> {
        match builtin {
            Builtins::Function(BuiltinsFunctions::Sorted) if self.has_key_argument(&args) => {
                let SortArgs { items, key, reverse } = SortArgs::parse(self.heap, args, self.interns)?;
                let keys = self.key_values(key, &items)?;
                let sorted = sort_values(items, keys, reverse, self.heap, self.interns)?;
                self.heap.alloc_list(sorted)
            }
            Builtins::Function(func @ (BuiltinsFunctions::Min | BuiltinsFunctions::Max))
                if self.has_key_argument(&args) =>
            {
                let is_min = func == BuiltinsFunctions::Min;
                let parsed = MinMaxArgs::parse(self.heap, args, self.interns, is_min)?;
                let keys = self.key_values(parsed.key, &parsed.items)?;
                select_min_max(parsed, keys, is_min, self.heap, self.interns)
            }
            _ => builtin.call(self.heap, args, self.interns, self.print_writer),
        }
    }

    /// Calls a method on an object.
    pub(super) fn call_method(&mut self, obj: Value, name_id: StringId, args: ArgValues) -> RunResult<Value> {
        let interns = self.interns;
        let name = interns.get_str(name_id);
        match obj {
            Value::InternString(id) => call_str_method(interns.get_str(id), name, args, self.heap, interns),
            Value::Ref(heap_id) => match self.heap.get(heap_id) {
                HeapData::Str(s) => {
                    let s = s.as_str().to_owned();
                    call_str_method(&s, name, args, self.heap, self.interns)
                }
                HeapData::List(_) if name == "sort" && self.has_key_argument(&args) => {
                    self.sort_list_with_key(heap_id, args)
                }
                HeapData::List(_) => call_list_method(heap_id, name, args, self.heap, self.interns),
                HeapData::Dict(_) => call_dict_method(heap_id, name, args, self.heap, self.interns),
                HeapData::Tuple(tuple) => {
                    let items = tuple.as_slice().to_vec();
                    call_tuple_method(&items, name, args, self.heap, self.interns)
                }
                other => Err(ExcType::attribute_error(other.py_type(), name)),
            },
            other => Err(ExcType::attribute_error(other.py_type(self.heap), name)),
        }
    }

    /// Calls a user-defined function by pushing a new frame.
    ///
    /// Binds the arguments into a fresh namespace, creates the function's own cells
    /// (initialized from parameters where a parameter is captured) and appends the
    /// cells captured at definition time.
    fn call_user_function(
        &mut self,
        func_id: FunctionId,
        captured: &[HeapId],
        defaults: &[Value],
        args: ArgValues,
    ) -> RunResult<()> {
        self.heap.tracker().check_recursion_depth(self.frames.len() + 1)?;
        let call_position = self.current_position();
        let interns = self.interns;
        let func = interns.get_function(func_id);

        let mut locals = vec![Value::Undefined; func.namespace_size];
        func.signature.bind(args, defaults, interns, func.name, &mut locals)?;

        let mut cells = Vec::with_capacity(func.cell_param_slots.len() + captured.len());
        for param_slot in &func.cell_param_slots {
            let initial = param_slot.map_or(Value::Undefined, |slot| locals[slot]);
            cells.push(self.heap.allocate(HeapData::Cell(initial))?);
        }
        cells.extend_from_slice(captured);

        let namespace_idx = self.namespaces.push(locals);
        self.frames.push(CallFrame {
            code: &func.code,
            ip: 0,
            stack_base: self.stack.len(),
            namespace_idx,
            function_id: Some(func_id),
            cells,
            call_position: Some(call_position),
            exc_base: self.exception_stack.len(),
        });
        Ok(())
    }

    /// Calls `callable` to completion from inside an instruction and returns its result.
    ///
    /// Used for key functions of `sorted`, `min`, `max` and `list.sort`. A user function
    /// runs in a nested run loop that stops when its frame returns. External calls and
    /// awaits cannot suspend from here and raise instead.
    pub(super) fn call_sync(&mut self, callable: Value, args: ArgValues) -> RunResult<Value> {
        if matches!(callable, Value::ExtFunction(_)) {
            return Err(ExcType::not_implemented("calling an external function as a key function").into());
        }
        let base = self.frames.len();
        let saved_ip = self.instruction_ip;
        let result = match self.call_function(callable, args)? {
            CallResult::Value(value) => return Ok(value),
            CallResult::External(_) => unreachable!("external functions are rejected above"),
            CallResult::FramePushed => {
                let saved_exit = std::mem::replace(&mut self.exit_frame_count, base + 1);
                let result = self.run();
                self.exit_frame_count = saved_exit;
                result
            }
        };

        let call_position = self.frames.get(base).and_then(|frame| frame.call_position);
        while self.frames.len() > base {
            self.pop_frame();
        }
        self.instruction_ip = saved_ip;

        match result {
            Ok(FrameExit::Return(value)) => Ok(value),
            Ok(FrameExit::ExternalCall { .. } | FrameExit::ResolveFutures(_)) => {
                Err(ExcType::not_implemented("suspending inside a key function").into())
            }
            Err(RunError::Exc(mut exc)) => {
                if let Some(position) = call_position {
                    exc.add_caller_frame(position, self.current_frame_name());
                }
                Err(RunError::Exc(exc))
            }
            Err(err) => Err(err),
        }
    }

    /// Whether a call passes a `key=` argument other than `None`.
    fn has_key_argument(&self, args: &ArgValues) -> bool {
        match args {
            ArgValues::ArgsKargs { kwargs, .. } => kwargs
                .iter()
                .any(|(name, value)| self.interns.get_str(*name) == "key" && !matches!(value, Value::None)),
            _ => false,
        }
    }

    /// Applies the key function to every item.
    fn key_values(&mut self, key: Option<Value>, items: &[Value]) -> RunResult<Option<Vec<Value>>> {
        let Some(key) = key else { return Ok(None) };
        let keys = items
            .iter()
            .map(|item| self.call_sync(key, ArgValues::One(*item)))
            .collect::<RunResult<Vec<_>>>()?;
        Ok(Some(keys))
    }

    /// `list.sort(key=..., reverse=...)`
    fn sort_list_with_key(&mut self, list_id: HeapId, args: ArgValues) -> RunResult<Value> {
        let (positional, mut kwargs) = args.split();
        if !positional.is_empty() {
            return Err(ExcType::type_error("sort() takes no positional arguments"));
        }
        let key = kwargs.take("key", self.interns).filter(|k| !matches!(k, Value::None));
        let reverse = kwargs
            .take("reverse", self.interns)
            .is_some_and(|v| v.py_bool(self.heap, self.interns));
        kwargs.finish("sort", self.interns)?;

        let HeapData::List(list) = self.heap.get(list_id) else {
            return Err(RunError::internal("sort: expected a list"));
        };
        let items = list.as_slice().to_vec();
        let keys = self.key_values(key, &items)?;
        let sorted = sort_values(items, keys, reverse, self.heap, self.interns)?;
        if let HeapData::List(list) = self.heap.get_mut(list_id) {
            *list.as_vec_mut() = sorted;
        }
        Ok(Value::None)
    }
}
