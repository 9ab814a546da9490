//! Exception handling helpers for the VM.

use super::VM;
use crate::{
    builtins::Builtins,
    exception_private::{ExcType, RawStackFrame, RunError, RunResult, SimpleException},
    heap::HeapData,
    intern::{MODULE_STRING_ID, StringId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::Type,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<'_, T, P> {
    /// The current frame's name for tracebacks: the function name, or `<module>`.
    pub(super) fn current_frame_name(&self) -> StringId {
        match self.current_frame().function_id {
            Some(func_id) => self.interns.get_function(func_id).name,
            None => MODULE_STRING_ID,
        }
    }

    /// Attaches the current execution point to an exception that has no frame yet,
    /// or names the frame an error creator positioned without knowing the function.
    fn attach_frame_to_error(&self, error: RunError) -> RunError {
        match error {
            RunError::Exc(mut exc) => {
                let name = self.current_frame_name();
                match exc.frame.as_mut() {
                    Some(frame) => {
                        frame.frame_name.get_or_insert(name);
                    }
                    None => exc.frame = Some(RawStackFrame::new(self.current_position(), name)),
                }
                RunError::Exc(exc)
            }
            other => other,
        }
    }

    /// Turns the operand of `raise` into an error.
    ///
    /// Accepts exception instances and exception classes (instantiated without a message).
    pub(super) fn make_exception(&self, exc_value: Value) -> RunError {
        let exc = match exc_value {
            Value::Ref(heap_id) => match self.heap.get(heap_id) {
                HeapData::Exception(exc) => exc.clone(),
                _ => SimpleException::new_msg(ExcType::TypeError, "exceptions must derive from BaseException"),
            },
            Value::Builtin(Builtins::ExcType(exc_type)) => SimpleException::new_none(exc_type),
            _ => SimpleException::new_msg(ExcType::TypeError, "exceptions must derive from BaseException"),
        };
        exc.with_position(self.current_position()).into()
    }

    /// Handles an exception by searching the exception tables of the active frames.
    ///
    /// Returns `Some(error)` if nothing catches it before the run loop's exit frame,
    /// `None` if a handler was found and the current frame now points at it.
    ///
    /// When an exception is caught the operand stack and the stack of handled exceptions
    /// are unwound to the depths recorded for the handler, then the exception value is
    /// pushed on both.
    pub(super) fn handle_exception(&mut self, error: RunError) -> Option<RunError> {
        let mut error = self.attach_frame_to_error(error);

        // resource errors and interpreter faults are never caught
        let RunError::Exc(exc) = &error else {
            return Some(self.unwind_for_traceback(error));
        };
        let exc_value = match self.heap.allocate(HeapData::Exception(exc.exc.clone())) {
            Ok(heap_id) => Value::Ref(heap_id),
            Err(e) => return Some(self.unwind_for_traceback(e.into())),
        };

        loop {
            let frame = self.current_frame();
            let (code, stack_base, exc_base) = (frame.code, frame.stack_base, frame.exc_base);
            if let Some(entry) = code.find_handler(self.instruction_ip) {
                let handler = entry.handler as usize;
                self.stack.truncate(stack_base + usize::from(entry.stack_depth));
                self.exception_stack.truncate(exc_base + usize::from(entry.exc_depth));
                self.push(exc_value);
                self.exception_stack.push(exc_value);
                self.current_frame_mut().ip = handler;
                return None;
            }

            if self.frames.len() <= self.exit_frame_count {
                return Some(error);
            }
            self.pop_caller_frame(&mut error);
        }
    }

    /// Pops frames down to the run loop's exit frame, extending the traceback.
    fn unwind_for_traceback(&mut self, mut error: RunError) -> RunError {
        while self.frames.len() > self.exit_frame_count {
            self.pop_caller_frame(&mut error);
        }
        error
    }

    /// Pops the current frame and records its call site in the traceback.
    ///
    /// Afterwards `instruction_ip` points into the call instruction of the caller, so
    /// the caller's exception table applies.
    fn pop_caller_frame(&mut self, error: &mut RunError) {
        let call_position = self.current_frame().call_position;
        self.pop_frame();
        if let (Some(position), RunError::Exc(exc)) = (call_position, &mut *error) {
            exc.add_caller_frame(position, self.current_frame_name());
        }
        // the caller's ip was synced to just after its call instruction
        self.instruction_ip = self.current_frame().ip.saturating_sub(1);
    }

    /// Checks if an exception matches the type of an except clause.
    ///
    /// `exc_type` must be an exception class or a tuple of them.
    pub(super) fn check_exc_match(&self, exception: Value, exc_type: Value) -> RunResult<bool> {
        let Type::Exception(raised) = exception.py_type(self.heap) else {
            return Err(RunError::internal("CheckExcMatch: expected an exception on the stack"));
        };
        self.exc_type_matches(raised, exc_type)
    }

    fn exc_type_matches(&self, raised: ExcType, exc_type: Value) -> RunResult<bool> {
        match exc_type {
            Value::Builtin(Builtins::ExcType(handler_type)) => Ok(raised.is_subclass_of(handler_type)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Tuple(tuple) => {
                    for handler in tuple.as_slice() {
                        if self.exc_type_matches(raised, *handler)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                _ => Err(ExcType::except_invalid_type_error()),
            },
            _ => Err(ExcType::except_invalid_type_error()),
        }
    }
}
