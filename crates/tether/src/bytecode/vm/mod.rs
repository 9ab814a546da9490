//! Bytecode virtual machine for executing compiled code.
//!
//! The VM uses a stack-based execution model with an operand stack for computation
//! and a call stack for function frames. Each frame owns its instruction pointer (IP).
//!
//! Execution leaves the run loop in three ways besides errors: the module returns, a
//! declared external function is called, or an `await` hits a future the host has not
//! resolved yet. In the last two cases the VM can be turned into a [`VMSnapshot`] and
//! restored later to continue exactly where it stopped.

mod attr;
mod binary;
mod call;
mod collections;
mod exceptions;
mod format;

use std::collections::BTreeMap;

use call::CallResult;
use serde::{Deserialize, Serialize};

use crate::{
    args::ArgValues,
    bytecode::{
        code::{Code, Constant},
        op::{FORMAT_SPEC_FLAG, Opcode},
    },
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    exception_public::CodeRange,
    heap::{Heap, HeapData, HeapId},
    intern::{ExtFunctionId, FunctionId, Interns, StringId},
    io::PrintWriter,
    namespace::{GLOBAL_NS_IDX, NamespaceId, Namespaces},
    operators::{CmpOperator, Operator, UnaryOperator},
    resource::{ResourceTracker, TIME_CHECK_INTERVAL},
    types::ForIterator,
    value::{CallId, Value},
};

/// Tries an operation and handles exceptions, reloading cached frame state.
///
/// After catching an exception, reloads the cache since the handler may be in a
/// different frame.
macro_rules! try_catch_sync {
    ($self:expr, $cached_frame:ident, $expr:expr) => {
        if let Err(e) = $expr {
            if let Some(result) = $self.handle_exception(e) {
                return Err(result);
            }
            reload_cache!($self, $cached_frame);
        }
    };
}

/// Handles an exception and reloads cached frame state if caught.
///
/// Wrapped in a block to allow use in match arm expressions.
macro_rules! catch_sync {
    ($self:expr, $cached_frame:ident, $err:expr) => {{
        if let Some(result) = $self.handle_exception($err) {
            return Err(result);
        }
        reload_cache!($self, $cached_frame);
    }};
}

/// Fetches a byte from bytecode using cached code/ip, advancing ip.
macro_rules! fetch_byte {
    ($cached_frame:expr) => {{
        let byte = $cached_frame.code.bytecode()[$cached_frame.ip];
        $cached_frame.ip += 1;
        byte
    }};
}

macro_rules! fetch_u8 {
    ($cached_frame:expr) => {
        fetch_byte!($cached_frame)
    };
}

macro_rules! fetch_i8 {
    ($cached_frame:expr) => {{ i8::from_le_bytes([fetch_byte!($cached_frame)]) }};
}

/// Fetches a u16 operand (little-endian) using cached code/ip.
macro_rules! fetch_u16 {
    ($cached_frame:expr) => {{
        let lo = $cached_frame.code.bytecode()[$cached_frame.ip];
        let hi = $cached_frame.code.bytecode()[$cached_frame.ip + 1];
        $cached_frame.ip += 2;
        u16::from_le_bytes([lo, hi])
    }};
}

/// Fetches an i16 operand (little-endian) using cached code/ip.
macro_rules! fetch_i16 {
    ($cached_frame:expr) => {{
        let lo = $cached_frame.code.bytecode()[$cached_frame.ip];
        let hi = $cached_frame.code.bytecode()[$cached_frame.ip + 1];
        $cached_frame.ip += 2;
        i16::from_le_bytes([lo, hi])
    }};
}

/// Reloads cached frame state from the current frame.
///
/// Call this after any operation that modifies the frame stack (calls, returns,
/// exception handling).
macro_rules! reload_cache {
    ($self:expr, $cached_frame:ident) => {{
        $cached_frame = $self.new_cached_frame();
    }};
}

/// Applies a relative jump offset to the cached IP.
///
/// The compiler only emits jumps that land inside the code object.
macro_rules! jump_relative {
    ($ip:expr, $offset:expr) => {{
        let ip_i64 = i64::try_from($ip).expect("instruction pointer exceeds i64");
        let new_ip = ip_i64 + i64::from($offset);
        $ip = usize::try_from(new_ip).expect("jump resulted in negative or overflowing IP");
    }};
}

/// Result of VM execution.
#[derive(Debug)]
pub(crate) enum FrameExit {
    /// Execution completed successfully with a return value.
    Return(Value),

    /// Execution paused for an external function call.
    ///
    /// The caller should execute the external function and call `resume()` with the
    /// result, `resume_with_exception()` with an error, or `resume_deferred()` to turn
    /// the call into a future.
    ExternalCall {
        ext_function_id: ExtFunctionId,
        /// Positional and keyword arguments, still internal values.
        args: ArgValues,
        call_id: CallId,
    },

    /// Execution is blocked on an `await` of a future the host has not resolved.
    ///
    /// Lists every unresolved call id; resume with `resolve_futures()`.
    ResolveFutures(Vec<CallId>),
}

/// Resolution state of a deferred external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum FutureState {
    Pending,
    Resolved(Value),
    Failed(SimpleException),
}

/// A single function activation record.
///
/// Each frame represents one level in the call stack and owns its own
/// instruction pointer.
#[derive(Debug)]
pub(crate) struct CallFrame<'code> {
    code: &'code Code,

    ip: usize,

    /// Base index into the operand stack for this frame.
    stack_base: usize,

    /// Namespace index for this frame's locals.
    namespace_idx: NamespaceId,

    /// Function ID (for tracebacks and cell names). None for module-level code.
    function_id: Option<FunctionId>,

    /// Own cells first, then the cells captured from enclosing functions.
    cells: Vec<HeapId>,

    /// Call site position (for tracebacks).
    call_position: Option<CodeRange>,

    /// Length of the exception stack when the frame was entered.
    exc_base: usize,
}

impl<'code> CallFrame<'code> {
    fn new_module(code: &'code Code) -> Self {
        Self {
            code,
            ip: 0,
            stack_base: 0,
            namespace_idx: GLOBAL_NS_IDX,
            function_id: None,
            cells: Vec::new(),
            call_position: None,
            exc_base: 0,
        }
    }
}

/// Cached state of the VM derived from the current frame.
#[derive(Debug, Copy, Clone)]
pub(crate) struct CachedFrame<'code> {
    code: &'code Code,
    ip: usize,
    namespace_idx: NamespaceId,
}

impl<'code> From<&CallFrame<'code>> for CachedFrame<'code> {
    fn from(frame: &CallFrame<'code>) -> Self {
        Self {
            code: frame.code,
            ip: frame.ip,
            namespace_idx: frame.namespace_idx,
        }
    }
}

/// Serializable representation of a call frame.
///
/// Cannot store `&Code`; stores the `FunctionId` to look the code up again on restore.
/// Module-level code uses `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedFrame {
    function_id: Option<FunctionId>,
    ip: usize,
    stack_base: usize,
    namespace_idx: NamespaceId,
    cells: Vec<HeapId>,
    call_position: Option<CodeRange>,
    exc_base: usize,
}

impl CallFrame<'_> {
    fn serialize(&self) -> SerializedFrame {
        SerializedFrame {
            function_id: self.function_id,
            ip: self.ip,
            stack_base: self.stack_base,
            namespace_idx: self.namespace_idx,
            cells: self.cells.clone(),
            call_position: self.call_position,
            exc_base: self.exc_base,
        }
    }
}

/// VM state at a suspension point.
///
/// Must be used with the heap and namespaces it was taken with: `HeapId`s are indices
/// into that heap. On resume, [`VM::restore`] reconstructs the VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VMSnapshot {
    stack: Vec<Value>,
    frames: Vec<SerializedFrame>,
    /// Exceptions being handled by enclosing except blocks, innermost last.
    exception_stack: Vec<Value>,
    /// IP of the instruction that caused the pause.
    instruction_ip: usize,
    futures: BTreeMap<CallId, FutureState>,
    next_call_id: CallId,
}

/// The bytecode virtual machine.
pub(crate) struct VM<'a, T: ResourceTracker, P: PrintWriter> {
    /// Operand stack - values being computed.
    stack: Vec<Value>,

    /// Call stack - function frames (each frame has its own IP).
    frames: Vec<CallFrame<'a>>,

    heap: &'a mut Heap<T>,

    namespaces: &'a mut Namespaces,

    interns: &'a Interns,

    print_writer: &'a mut P,

    /// Stack of exceptions being handled for nested except blocks.
    ///
    /// Used by bare `raise` to re-raise the current exception. Entering a handler
    /// pushes, `ClearException` pops.
    exception_stack: Vec<Value>,

    /// IP of the instruction being executed (for exception table lookup).
    ///
    /// Updated at the start of each instruction before operands are fetched.
    instruction_ip: usize,

    /// Deferred external calls, keyed by call id.
    futures: BTreeMap<CallId, FutureState>,

    /// Id handed to the next external call.
    next_call_id: CallId,

    /// The run loop returns once the call stack is back to this many frames.
    ///
    /// 1 for the module; raised while a key function runs inside a builtin.
    exit_frame_count: usize,

    /// Instructions executed since the last wall clock check.
    instructions_since_check: u32,
}

impl<'a, T: ResourceTracker, P: PrintWriter> VM<'a, T, P> {
    pub fn new(heap: &'a mut Heap<T>, namespaces: &'a mut Namespaces, interns: &'a Interns, print_writer: &'a mut P) -> Self {
        Self {
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(16),
            heap,
            namespaces,
            interns,
            print_writer,
            exception_stack: Vec::new(),
            instruction_ip: 0,
            futures: BTreeMap::new(),
            next_call_id: 0,
            exit_frame_count: 1,
            instructions_since_check: 0,
        }
    }

    /// Pushes an initial frame for module-level code and runs the VM.
    pub fn run_module(&mut self, code: &'a Code) -> Result<FrameExit, RunError> {
        self.frames.push(CallFrame::new_module(code));
        self.run()
    }

    /// Main execution loop.
    ///
    /// Fetches opcodes from the current frame's bytecode and executes them. Returns
    /// when execution completes, an error escapes every handler, or the host is needed.
    ///
    /// Uses a locally cached code reference and ip, reloaded after any operation that
    /// changes the frame stack.
    pub fn run(&mut self) -> Result<FrameExit, RunError> {
        let mut cached_frame: CachedFrame<'a> = self.new_cached_frame();

        loop {
            self.instructions_since_check += 1;
            if self.instructions_since_check >= TIME_CHECK_INTERVAL {
                self.instructions_since_check = 0;
                self.heap.tracker().check_time()?;
            }
            // nested runs (key functions) hold values outside the roots
            if self.exit_frame_count == 1 && self.heap.should_gc() {
                self.current_frame_mut().ip = cached_frame.ip;
                self.run_gc();
            }

            self.instruction_ip = cached_frame.ip;

            let byte = fetch_byte!(cached_frame);
            let Ok(opcode) = Opcode::try_from(byte) else {
                return Err(RunError::internal(format!("invalid opcode {byte} in bytecode")));
            };

            match opcode {
                // Stack Operations
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Dup => {
                    let value = self.peek();
                    self.push(value);
                }
                Opcode::DupTwo => {
                    let len = self.stack.len();
                    self.stack.extend_from_within(len - 2..);
                }
                Opcode::Rot2 => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
                Opcode::Rot3 => {
                    // [a, b, c] -> [c, a, b]
                    let len = self.stack.len();
                    self.stack[len - 3..].rotate_right(1);
                }
                // Constants & Literals
                Opcode::LoadConst => {
                    let idx = fetch_u16!(cached_frame);
                    match cached_frame.code.constant(idx).to_value(self.heap) {
                        Ok(value) => self.push(value),
                        Err(e) => catch_sync!(self, cached_frame, e),
                    }
                }
                Opcode::LoadNone => self.push(Value::None),
                Opcode::LoadTrue => self.push(Value::Bool(true)),
                Opcode::LoadFalse => self.push(Value::Bool(false)),
                Opcode::LoadSmallInt => {
                    let n = fetch_i8!(cached_frame);
                    self.push(Value::Int(i64::from(n)));
                }
                // Variables
                Opcode::LoadLocal => {
                    let slot = usize::from(fetch_u8!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.load_local(&cached_frame, slot));
                }
                Opcode::LoadLocalW => {
                    let slot = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.load_local(&cached_frame, slot));
                }
                Opcode::StoreLocal => {
                    let slot = usize::from(fetch_u8!(cached_frame));
                    self.store_local(&cached_frame, slot);
                }
                Opcode::StoreLocalW => {
                    let slot = usize::from(fetch_u16!(cached_frame));
                    self.store_local(&cached_frame, slot);
                }
                Opcode::LoadGlobal => {
                    let slot = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.load_global(slot));
                }
                Opcode::StoreGlobal => {
                    let slot = usize::from(fetch_u16!(cached_frame));
                    let value = self.pop();
                    self.namespaces.get_mut(GLOBAL_NS_IDX).set(slot, value);
                }
                Opcode::LoadCell => {
                    let idx = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.load_cell(idx));
                }
                Opcode::StoreCell => {
                    let idx = usize::from(fetch_u16!(cached_frame));
                    let value = self.pop();
                    let cell_id = self.current_frame().cells[idx];
                    self.heap.set_cell_value(cell_id, value);
                }
                Opcode::LoadClosure => {
                    let idx = usize::from(fetch_u16!(cached_frame));
                    let cell_id = self.current_frame().cells[idx];
                    self.push(Value::Ref(cell_id));
                }
                // Binary Operations
                Opcode::BinaryAdd => try_catch_sync!(self, cached_frame, self.binary_op(Operator::Add)),
                Opcode::BinarySub => try_catch_sync!(self, cached_frame, self.binary_op(Operator::Sub)),
                Opcode::BinaryMul => try_catch_sync!(self, cached_frame, self.binary_op(Operator::Mult)),
                Opcode::BinaryDiv => try_catch_sync!(self, cached_frame, self.binary_op(Operator::Div)),
                Opcode::BinaryFloorDiv => try_catch_sync!(self, cached_frame, self.binary_op(Operator::FloorDiv)),
                Opcode::BinaryMod => try_catch_sync!(self, cached_frame, self.binary_op(Operator::Mod)),
                Opcode::BinaryPow => try_catch_sync!(self, cached_frame, self.binary_op(Operator::Pow)),
                Opcode::BinaryAnd => try_catch_sync!(self, cached_frame, self.binary_op(Operator::BitAnd)),
                Opcode::BinaryOr => try_catch_sync!(self, cached_frame, self.binary_op(Operator::BitOr)),
                Opcode::BinaryXor => try_catch_sync!(self, cached_frame, self.binary_op(Operator::BitXor)),
                Opcode::BinaryLShift => try_catch_sync!(self, cached_frame, self.binary_op(Operator::LShift)),
                Opcode::BinaryRShift => try_catch_sync!(self, cached_frame, self.binary_op(Operator::RShift)),
                // Comparison Operations
                Opcode::CompareEq => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::Eq)),
                Opcode::CompareNe => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::NotEq)),
                Opcode::CompareLt => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::Lt)),
                Opcode::CompareLe => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::LtE)),
                Opcode::CompareGt => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::Gt)),
                Opcode::CompareGe => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::GtE)),
                Opcode::CompareIs => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::Is)),
                Opcode::CompareIsNot => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::IsNot)),
                Opcode::CompareIn => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::In)),
                Opcode::CompareNotIn => try_catch_sync!(self, cached_frame, self.compare_op(CmpOperator::NotIn)),
                // Unary Operations
                Opcode::UnaryNot => {
                    let value = self.pop();
                    let result = !value.py_bool(self.heap, self.interns);
                    self.push(Value::Bool(result));
                }
                Opcode::UnaryNeg => try_catch_sync!(self, cached_frame, self.unary_op(UnaryOperator::Neg)),
                Opcode::UnaryPos => try_catch_sync!(self, cached_frame, self.unary_op(UnaryOperator::Pos)),
                Opcode::UnaryInvert => try_catch_sync!(self, cached_frame, self.unary_op(UnaryOperator::Invert)),
                // In-place Operations
                Opcode::InplaceAdd => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::Add)),
                Opcode::InplaceSub => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::Sub)),
                Opcode::InplaceMul => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::Mult)),
                Opcode::InplaceDiv => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::Div)),
                Opcode::InplaceFloorDiv => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::FloorDiv)),
                Opcode::InplaceMod => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::Mod)),
                Opcode::InplacePow => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::Pow)),
                Opcode::InplaceAnd => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::BitAnd)),
                Opcode::InplaceOr => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::BitOr)),
                Opcode::InplaceXor => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::BitXor)),
                Opcode::InplaceLShift => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::LShift)),
                Opcode::InplaceRShift => try_catch_sync!(self, cached_frame, self.inplace_op(Operator::RShift)),
                // Collection Building
                Opcode::BuildList => {
                    let count = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.build_list(count));
                }
                Opcode::BuildTuple => {
                    let count = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.build_tuple(count));
                }
                Opcode::BuildDict => {
                    let count = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.build_dict(count));
                }
                Opcode::FormatValue => {
                    let flags = fetch_u8!(cached_frame);
                    let spec = if flags & FORMAT_SPEC_FLAG == 0 {
                        None
                    } else {
                        let idx = fetch_u16!(cached_frame);
                        match cached_frame.code.constant(idx) {
                            Constant::FormatSpec(spec) => Some(spec),
                            _ => return Err(RunError::internal("FormatValue: constant is not a format spec")),
                        }
                    };
                    try_catch_sync!(self, cached_frame, self.format_value(flags, spec));
                }
                Opcode::BuildFString => {
                    let count = usize::from(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.build_fstring(count));
                }
                Opcode::BuildSlice => try_catch_sync!(self, cached_frame, self.build_slice()),
                Opcode::ListAppend => {
                    let depth = usize::from(fetch_u8!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.list_append(depth));
                }
                Opcode::DictSetItem => {
                    let depth = usize::from(fetch_u8!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.dict_set_item(depth));
                }
                // Subscript & Attribute
                Opcode::BinarySubscr => try_catch_sync!(self, cached_frame, self.binary_subscr()),
                Opcode::StoreSubscr => try_catch_sync!(self, cached_frame, self.store_subscr()),
                Opcode::LoadAttr => {
                    let name_id = StringId::from_operand(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.load_attr(name_id));
                }
                Opcode::StoreAttr => {
                    let name_id = StringId::from_operand(fetch_u16!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.store_attr(name_id));
                }
                // Function Calls - sync IP before call, reload cache after frame changes
                Opcode::CallFunction => {
                    let arg_count = usize::from(fetch_u8!(cached_frame));
                    self.current_frame_mut().ip = cached_frame.ip;

                    let args = ArgValues::new(self.pop_n(arg_count), Vec::new());
                    let callable = self.pop();
                    match self.call_function(callable, args) {
                        Ok(CallResult::Value(result)) => self.push(result),
                        Ok(CallResult::FramePushed) => reload_cache!(self, cached_frame),
                        Ok(CallResult::External(exit)) => return Ok(exit),
                        Err(err) => catch_sync!(self, cached_frame, err),
                    }
                }
                Opcode::CallFunctionKw => {
                    let pos_count = usize::from(fetch_u8!(cached_frame));
                    let kw_count = usize::from(fetch_u8!(cached_frame));
                    let mut kw_names = Vec::with_capacity(kw_count);
                    for _ in 0..kw_count {
                        kw_names.push(StringId::from_operand(fetch_u16!(cached_frame)));
                    }
                    self.current_frame_mut().ip = cached_frame.ip;

                    let kw_values = self.pop_n(kw_count);
                    let pos_args = self.pop_n(pos_count);
                    let callable = self.pop();
                    let args = ArgValues::new(pos_args, kw_names.into_iter().zip(kw_values).collect());
                    match self.call_function(callable, args) {
                        Ok(CallResult::Value(result)) => self.push(result),
                        Ok(CallResult::FramePushed) => reload_cache!(self, cached_frame),
                        Ok(CallResult::External(exit)) => return Ok(exit),
                        Err(err) => catch_sync!(self, cached_frame, err),
                    }
                }
                Opcode::CallMethod => {
                    // Stack: [obj, arg1, ..., argN] -> [result]
                    let name_id = StringId::from_operand(fetch_u16!(cached_frame));
                    let arg_count = usize::from(fetch_u8!(cached_frame));
                    self.current_frame_mut().ip = cached_frame.ip;

                    let args = ArgValues::new(self.pop_n(arg_count), Vec::new());
                    let obj = self.pop();
                    match self.call_method(obj, name_id, args) {
                        Ok(result) => self.push(result),
                        Err(err) => catch_sync!(self, cached_frame, err),
                    }
                }
                Opcode::CallMethodKw => {
                    let name_id = StringId::from_operand(fetch_u16!(cached_frame));
                    let pos_count = usize::from(fetch_u8!(cached_frame));
                    let kw_count = usize::from(fetch_u8!(cached_frame));
                    let mut kw_names = Vec::with_capacity(kw_count);
                    for _ in 0..kw_count {
                        kw_names.push(StringId::from_operand(fetch_u16!(cached_frame)));
                    }
                    self.current_frame_mut().ip = cached_frame.ip;

                    let kw_values = self.pop_n(kw_count);
                    let pos_args = self.pop_n(pos_count);
                    let obj = self.pop();
                    let args = ArgValues::new(pos_args, kw_names.into_iter().zip(kw_values).collect());
                    match self.call_method(obj, name_id, args) {
                        Ok(result) => self.push(result),
                        Err(err) => catch_sync!(self, cached_frame, err),
                    }
                }
                // Control Flow
                Opcode::Jump => {
                    let offset = fetch_i16!(cached_frame);
                    jump_relative!(cached_frame.ip, offset);
                }
                Opcode::JumpIfTrue => {
                    let offset = fetch_i16!(cached_frame);
                    if self.pop().py_bool(self.heap, self.interns) {
                        jump_relative!(cached_frame.ip, offset);
                    }
                }
                Opcode::JumpIfFalse => {
                    let offset = fetch_i16!(cached_frame);
                    if !self.pop().py_bool(self.heap, self.interns) {
                        jump_relative!(cached_frame.ip, offset);
                    }
                }
                Opcode::JumpIfTrueOrPop => {
                    let offset = fetch_i16!(cached_frame);
                    if self.peek().py_bool(self.heap, self.interns) {
                        jump_relative!(cached_frame.ip, offset);
                    } else {
                        self.pop();
                    }
                }
                Opcode::JumpIfFalseOrPop => {
                    let offset = fetch_i16!(cached_frame);
                    if self.peek().py_bool(self.heap, self.interns) {
                        self.pop();
                    } else {
                        jump_relative!(cached_frame.ip, offset);
                    }
                }
                // Iteration
                Opcode::GetIter => {
                    let value = self.pop();
                    match ForIterator::new(value, self.heap, self.interns) {
                        Ok(iter) => match self.heap.allocate(HeapData::Iterator(iter)) {
                            Ok(heap_id) => self.push(Value::Ref(heap_id)),
                            Err(e) => catch_sync!(self, cached_frame, e.into()),
                        },
                        Err(e) => catch_sync!(self, cached_frame, e),
                    }
                }
                Opcode::ForIter => {
                    let offset = fetch_i16!(cached_frame);
                    let Value::Ref(heap_id) = self.peek() else {
                        return Err(RunError::internal("ForIter: expected iterator ref on stack"));
                    };
                    match self.heap.advance_iterator(heap_id) {
                        Ok(Some(value)) => self.push(value),
                        Ok(None) => {
                            self.pop();
                            jump_relative!(cached_frame.ip, offset);
                        }
                        Err(e) => {
                            self.pop();
                            catch_sync!(self, cached_frame, e);
                        }
                    }
                }
                // Function Definition
                Opcode::MakeFunction => {
                    let func_id = FunctionId::new(usize::from(fetch_u16!(cached_frame)));
                    let defaults_count = usize::from(fetch_u8!(cached_frame));
                    if defaults_count == 0 {
                        self.push(Value::Function(func_id));
                    } else {
                        let defaults = self.pop_n(defaults_count);
                        match self.heap.allocate(HeapData::FunctionDefaults(func_id, defaults)) {
                            Ok(heap_id) => self.push(Value::Ref(heap_id)),
                            Err(e) => catch_sync!(self, cached_frame, e.into()),
                        }
                    }
                }
                Opcode::MakeClosure => {
                    let func_id = FunctionId::new(usize::from(fetch_u16!(cached_frame)));
                    let defaults_count = usize::from(fetch_u8!(cached_frame));
                    let cell_count = usize::from(fetch_u8!(cached_frame));
                    // cells were pushed after the defaults, so they are on top
                    let mut cells = Vec::with_capacity(cell_count);
                    for value in self.pop_n(cell_count) {
                        let Value::Ref(cell_id) = value else {
                            return Err(RunError::internal("MakeClosure: expected cell reference on stack"));
                        };
                        cells.push(cell_id);
                    }
                    let defaults = self.pop_n(defaults_count);
                    match self.heap.allocate(HeapData::Closure(func_id, cells, defaults)) {
                        Ok(heap_id) => self.push(Value::Ref(heap_id)),
                        Err(e) => catch_sync!(self, cached_frame, e.into()),
                    }
                }
                // Exception Handling
                Opcode::Raise => {
                    let exc = self.pop();
                    let error = self.make_exception(exc);
                    catch_sync!(self, cached_frame, error);
                }
                Opcode::Reraise => {
                    // the handler that catches it pushes it again
                    let error = match self.exception_stack.pop() {
                        Some(exc) => self.make_exception(exc),
                        None => SimpleException::new_msg(ExcType::RuntimeError, "No active exception to reraise").into(),
                    };
                    catch_sync!(self, cached_frame, error);
                }
                Opcode::ClearException => {
                    self.exception_stack.pop();
                }
                Opcode::CheckExcMatch => {
                    // Stack: [exception, exc_type] -> [exception, bool]
                    let exc_type = self.pop();
                    let exception = self.peek();
                    match self.check_exc_match(exception, exc_type) {
                        Ok(matched) => self.push(Value::Bool(matched)),
                        Err(e) => catch_sync!(self, cached_frame, e),
                    }
                }
                // Futures
                Opcode::Await => match self.await_future() {
                    Ok(None) => {}
                    Ok(Some(pending)) => {
                        // re-executes this Await on resume
                        cached_frame.ip = self.instruction_ip;
                        self.current_frame_mut().ip = cached_frame.ip;
                        return Ok(FrameExit::ResolveFutures(pending));
                    }
                    Err(e) => catch_sync!(self, cached_frame, e),
                },
                // Return
                Opcode::ReturnValue => {
                    let value = self.pop();
                    if self.frames.len() <= self.exit_frame_count {
                        // whoever pushed the boundary frame pops it
                        return Ok(FrameExit::Return(value));
                    }
                    self.pop_frame();
                    self.push(value);
                    reload_cache!(self, cached_frame);
                }
                Opcode::UnpackSequence => {
                    let count = usize::from(fetch_u8!(cached_frame));
                    try_catch_sync!(self, cached_frame, self.unpack_sequence(count));
                }
                Opcode::Nop => {}
            }
        }
    }

    /// Resumes execution after an external call completes.
    ///
    /// Pushes the return value onto the stack and continues execution.
    pub fn resume(&mut self, result: Value) -> Result<FrameExit, RunError> {
        self.push(result);
        self.run()
    }

    /// Resumes execution after an external call raised an exception.
    ///
    /// The exception is raised at the call site and can be caught by the program.
    pub fn resume_with_exception(&mut self, error: RunError) -> Result<FrameExit, RunError> {
        if let Some(uncaught_error) = self.handle_exception(error) {
            return Err(uncaught_error);
        }
        self.run()
    }

    /// Resumes after the host deferred external call `call_id`.
    ///
    /// The call expression evaluates to a future that a later `await` resolves.
    pub fn resume_deferred(&mut self, call_id: CallId) -> Result<FrameExit, RunError> {
        self.futures.insert(call_id, FutureState::Pending);
        self.push(Value::ExternalFuture(call_id));
        self.run()
    }

    /// Records host results for deferred calls and continues if the awaited one is ready.
    ///
    /// The caller is responsible for only passing ids from [`Self::pending_futures`].
    pub fn resolve_futures(
        &mut self,
        results: Vec<(CallId, Result<Value, SimpleException>)>,
    ) -> Result<FrameExit, RunError> {
        for (call_id, result) in results {
            let state = match result {
                Ok(value) => FutureState::Resolved(value),
                Err(exc) => FutureState::Failed(exc),
            };
            if let Some(previous) = self.futures.insert(call_id, state)
                && !matches!(previous, FutureState::Pending)
            {
                log::warn!("external call {call_id} resolved twice");
            }
        }
        log::debug!("futures resolved, {} still pending", self.pending_futures().len());

        if let Value::ExternalFuture(awaited) = self.peek()
            && matches!(self.futures.get(&awaited), Some(FutureState::Pending))
        {
            return Ok(FrameExit::ResolveFutures(self.pending_futures()));
        }
        self.run()
    }

    /// Call ids of every deferred call the host has not resolved yet.
    pub fn pending_futures(&self) -> Vec<CallId> {
        self.futures
            .iter()
            .filter(|(_, state)| matches!(state, FutureState::Pending))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Consumes the VM and captures its state at a suspension point.
    ///
    /// The heap and namespaces must be stored alongside this snapshot.
    pub fn into_snapshot(self) -> VMSnapshot {
        VMSnapshot {
            stack: self.stack,
            frames: self.frames.iter().map(CallFrame::serialize).collect(),
            exception_stack: self.exception_stack,
            instruction_ip: self.instruction_ip,
            futures: self.futures,
            next_call_id: self.next_call_id,
        }
    }

    /// Reconstructs a VM from a snapshot.
    ///
    /// `FunctionId`s in frames look the compiled code up in `interns`, frames without
    /// one run `module_code`.
    pub fn restore(
        snapshot: VMSnapshot,
        module_code: &'a Code,
        heap: &'a mut Heap<T>,
        namespaces: &'a mut Namespaces,
        interns: &'a Interns,
        print_writer: &'a mut P,
    ) -> Self {
        let frames = snapshot
            .frames
            .into_iter()
            .map(|sf| {
                let code = match sf.function_id {
                    Some(func_id) => &interns.get_function(func_id).code,
                    None => module_code,
                };
                CallFrame {
                    code,
                    ip: sf.ip,
                    stack_base: sf.stack_base,
                    namespace_idx: sf.namespace_idx,
                    function_id: sf.function_id,
                    cells: sf.cells,
                    call_position: sf.call_position,
                    exc_base: sf.exc_base,
                }
            })
            .collect();

        Self {
            stack: snapshot.stack,
            frames,
            heap,
            namespaces,
            interns,
            print_writer,
            exception_stack: snapshot.exception_stack,
            instruction_ip: snapshot.instruction_ip,
            futures: snapshot.futures,
            next_call_id: snapshot.next_call_id,
            exit_frame_count: 1,
            instructions_since_check: 0,
        }
    }

    // ========================================================================
    // Stack Operations
    // ========================================================================

    #[inline]
    pub(super) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(super) fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    #[inline]
    pub(super) fn peek(&self) -> Value {
        *self.stack.last().expect("stack underflow")
    }

    /// Pops n values, keeping their push order (first pushed is first in the vec).
    pub(super) fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let start = self.stack.len() - n;
        self.stack.drain(start..).collect()
    }

    // ========================================================================
    // Frame Operations
    // ========================================================================

    #[inline]
    pub(super) fn current_frame(&self) -> &CallFrame<'a> {
        self.frames.last().expect("no active frame")
    }

    #[inline]
    pub(super) fn new_cached_frame(&self) -> CachedFrame<'a> {
        self.current_frame().into()
    }

    #[inline]
    pub(super) fn current_frame_mut(&mut self) -> &mut CallFrame<'a> {
        self.frames.last_mut().expect("no active frame")
    }

    /// Pops the current frame, discarding its stack region, handled exceptions and
    /// namespace (except for the global namespace).
    pub(super) fn pop_frame(&mut self) {
        let frame = self.frames.pop().expect("no frame to pop");
        self.stack.truncate(frame.stack_base);
        self.exception_stack.truncate(frame.exc_base);
        if frame.namespace_idx != GLOBAL_NS_IDX {
            self.namespaces.pop();
        }
    }

    /// Runs garbage collection from every value the VM can still reach.
    fn run_gc(&mut self) {
        let stack_roots = self.stack.iter().filter_map(|v| v.heap_id());
        let exc_roots = self.exception_stack.iter().filter_map(|v| v.heap_id());
        let cell_roots = self.frames.iter().flat_map(|f| f.cells.iter().copied());
        let future_roots = self.futures.values().filter_map(|state| match state {
            FutureState::Resolved(value) => value.heap_id(),
            _ => None,
        });
        let ns_roots = self.namespaces.iter_heap_ids();

        let roots: Vec<HeapId> = stack_roots
            .chain(exc_roots)
            .chain(cell_roots)
            .chain(future_roots)
            .chain(ns_roots)
            .collect();
        let before = self.heap.entry_count();
        self.heap.collect_garbage(roots);
        log::trace!(
            "gc pass: {} live, {} freed",
            self.heap.entry_count(),
            before - self.heap.entry_count()
        );
    }

    /// Source position of the instruction being executed, for tracebacks.
    pub(super) fn current_position(&self) -> CodeRange {
        self.current_frame()
            .code
            .location(self.instruction_ip)
            .unwrap_or_default()
    }

    // ========================================================================
    // Variable Operations
    // ========================================================================

    /// Pushes a local, raising `UnboundLocalError` if it was never assigned.
    fn load_local(&mut self, cached_frame: &CachedFrame<'a>, slot: usize) -> RunResult<()> {
        let value = self.namespaces.get(cached_frame.namespace_idx).get(slot);
        if matches!(value, Value::Undefined) {
            let name = self.slot_name(cached_frame.code.local_name(slot));
            // module level locals are globals
            return Err(if cached_frame.namespace_idx == GLOBAL_NS_IDX {
                ExcType::name_error(&name).into()
            } else {
                ExcType::unbound_local_error(&name).into()
            });
        }
        self.push(value);
        Ok(())
    }

    fn store_local(&mut self, cached_frame: &CachedFrame<'a>, slot: usize) {
        let value = self.pop();
        self.namespaces.get_mut(cached_frame.namespace_idx).set(slot, value);
    }

    /// Pushes a global, raising `NameError` if it was never assigned.
    fn load_global(&mut self, slot: usize) -> RunResult<()> {
        let value = self.namespaces.get(GLOBAL_NS_IDX).get(slot);
        if matches!(value, Value::Undefined) {
            // the module code names the global slots
            let name = self.slot_name(self.frames[0].code.local_name(slot));
            return Err(ExcType::name_error(&name).into());
        }
        self.push(value);
        Ok(())
    }

    /// Pushes the content of a cell.
    ///
    /// An empty own cell is an unassigned local, an empty captured cell a free variable
    /// the enclosing function has not assigned yet.
    fn load_cell(&mut self, idx: usize) -> RunResult<()> {
        let frame = self.current_frame();
        let value = self.heap.get_cell_value(frame.cells[idx]);
        if matches!(value, Value::Undefined) {
            let own_cells = frame
                .function_id
                .map_or(0, |id| self.interns.get_function(id).cell_param_slots.len());
            let name = self.slot_name(frame.code.cell_name(idx));
            return Err(if idx < own_cells {
                ExcType::unbound_local_error(&name).into()
            } else {
                ExcType::name_error_free_variable(&name).into()
            });
        }
        self.push(value);
        Ok(())
    }

    fn slot_name(&self, name: Option<StringId>) -> String {
        name.map_or_else(|| "<unknown>".to_owned(), |id| self.interns.get_str(id).to_owned())
    }

    // ========================================================================
    // Futures
    // ========================================================================

    /// Executes `Await` on the value at TOS.
    ///
    /// Returns the pending call ids when the future is not resolved yet, leaving the
    /// stack untouched so the instruction can run again. A resolved future can be
    /// awaited any number of times.
    fn await_future(&mut self) -> RunResult<Option<Vec<CallId>>> {
        let value = self.peek();
        let Value::ExternalFuture(call_id) = value else {
            self.pop();
            return Err(ExcType::type_error(format!(
                "object {} can't be used in 'await' expression",
                value.py_type(self.heap)
            )));
        };
        match self.futures.get(&call_id) {
            Some(FutureState::Resolved(result)) => {
                let result = *result;
                self.pop();
                self.push(result);
                Ok(None)
            }
            Some(FutureState::Failed(exc)) => {
                let exc = exc.clone();
                self.pop();
                Err(exc.into())
            }
            Some(FutureState::Pending) => Ok(Some(self.pending_futures())),
            None => Err(RunError::internal(format!("await on unknown external call {call_id}"))),
        }
    }
}
