//! Public interface for compiling and running programs.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    args::ArgValues,
    bytecode::{Code, FrameExit, VM, VMSnapshot},
    error::TetherError,
    exception_private::{ExcType, RunError, SimpleException},
    exception_public::TetherException,
    heap::Heap,
    intern::{ExtFunctionId, Interns},
    io::{CollectStringPrint, PrintWriter, StdPrint},
    namespace::Namespaces,
    object::TetherObject,
    persist::{self, PayloadKind},
    resource::{NoLimitTracker, ResourceTracker},
    value::{CallId, Value},
};
#[cfg(feature = "parser")]
use crate::{
    bytecode::{CompileResult, Compiler},
    intern::{InternerBuilder, StringId},
    parse::{ParseError, parse},
    prepare::prepare,
};

/// A compiled program.
///
/// `TetherRun` supports two execution modes:
/// - **Run to completion**: [`TetherRun::run`] and friends. External function calls are
///   either serviced by a host callback ([`TetherRun::run_with_externals`]) or fail.
/// - **Iterative execution**: [`TetherRun::start`] pauses at every external function call
///   and returns a [`RunProgress`] that can be resumed, or dumped and resumed later.
///
/// The program itself is never modified by running it, so it can be run any number of
/// times and shared between threads.
///
/// # Example
/// ```
/// use tether::{TetherObject, TetherRun};
///
/// let program = TetherRun::new("x + 1".to_owned(), "test.py", vec!["x".to_owned()], vec![]).unwrap();
/// let result = program.run_no_limits(vec![TetherObject::Int(41)]).unwrap();
/// assert_eq!(result, TetherObject::Int(42));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TetherRun {
    executor: Executor,
}

impl TetherRun {
    /// Parses and compiles `code`.
    ///
    /// # Arguments
    /// * `code` - The Python source
    /// * `script_name` - The file name used in tracebacks
    /// * `input_names` - Names of the variables filled from the inputs of each run, in order
    /// * `external_functions` - Names of functions the host implements
    ///
    /// # Errors
    /// Returns [`TetherError::Syntax`] if the code cannot be parsed or compiled, or if the
    /// input and external function names clash.
    #[cfg(feature = "parser")]
    pub fn new(
        code: String,
        script_name: &str,
        input_names: Vec<String>,
        external_functions: Vec<String>,
    ) -> Result<Self, TetherError> {
        Executor::new(code, script_name, input_names, external_functions).map(|executor| Self { executor })
    }

    /// The source this program was compiled from.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.executor.code
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.executor.script_name
    }

    #[must_use]
    pub fn input_names(&self) -> &[String] {
        &self.executor.input_names
    }

    #[must_use]
    pub fn external_functions(&self) -> &[String] {
        self.executor.interns.external_functions()
    }

    /// Runs the program to completion.
    ///
    /// Calling an external function raises `NotImplementedError`, use
    /// [`TetherRun::run_with_externals`] or [`TetherRun::start`] for programs that need them.
    ///
    /// # Arguments
    /// * `inputs` - One value per input name
    /// * `resource_tracker` - Enforces resource limits, see [`crate::LimitedTracker`]
    /// * `print` - Receives the output of `print()`
    pub fn run(
        &self,
        inputs: Vec<TetherObject>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
    ) -> Result<TetherObject, TetherError> {
        self.executor.run_to_completion(inputs, resource_tracker, print)
    }

    /// Runs the program with no resource limits, printing to stdout.
    pub fn run_no_limits(&self, inputs: Vec<TetherObject>) -> Result<TetherObject, TetherError> {
        self.run(inputs, NoLimitTracker, &mut StdPrint)
    }

    /// Runs the program and collects everything it prints.
    ///
    /// The output is kept even when the run fails.
    pub fn run_capturing(&self, inputs: Vec<TetherObject>, resource_tracker: impl ResourceTracker) -> CapturedRun {
        let mut print = CollectStringPrint::new();
        let result = self.run(inputs, resource_tracker, &mut print);
        CapturedRun {
            result,
            output: print.into_output(),
        }
    }

    /// Runs the program to completion, calling `handler` for every external function call.
    ///
    /// Calls reach the handler one at a time, in program order. A handler returning
    /// [`ExternalResult::Future`] defers the call; awaiting a deferred call then fails
    /// since nothing can resolve it.
    pub fn run_with_externals<T: ResourceTracker>(
        &self,
        inputs: Vec<TetherObject>,
        resource_tracker: T,
        mut handler: impl FnMut(&FunctionCallRequest) -> ExternalResult,
        print: &mut impl PrintWriter,
    ) -> Result<TetherObject, TetherError> {
        let mut progress = self.clone().start(inputs, resource_tracker, print)?;
        loop {
            progress = match progress {
                RunProgress::Complete(value) => return Ok(value),
                RunProgress::FunctionCall {
                    function_name,
                    args,
                    kwargs,
                    call_id,
                    state,
                } => {
                    let request = FunctionCallRequest {
                        call_id,
                        function_name,
                        args,
                        kwargs,
                    };
                    state.run(handler(&request), print)?
                }
                RunProgress::ResolveFutures(state) => {
                    return Err(state.executor.unresolvable_futures(state.pending_call_ids()));
                }
            };
        }
    }

    /// Starts iterative execution, consuming the program.
    ///
    /// Returns [`RunProgress::FunctionCall`] at the first external call,
    /// [`RunProgress::ResolveFutures`] when the program awaits a deferred call, or
    /// [`RunProgress::Complete`] if it finishes without either.
    ///
    /// # Errors
    /// Fails if the inputs don't match the declared input names, if an input cannot be
    /// marshaled, or if the program raises an uncaught exception or breaches a limit.
    pub fn start<T: ResourceTracker>(
        self,
        inputs: Vec<TetherObject>,
        resource_tracker: T,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, TetherError> {
        let mut heap = Heap::new(resource_tracker);
        let namespaces = self.executor.prepare_namespaces(inputs, &mut heap)?;
        log::debug!("starting {}", self.executor.script_name);
        advance(self.executor, heap, namespaces, None, Resume::Start, print)
    }

    /// Serializes the compiled program, so it can be loaded without parsing again.
    pub fn dump(&self) -> Result<Vec<u8>, TetherError> {
        persist::encode(PayloadKind::Program, self)
    }

    /// Restores a program written by [`TetherRun::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, TetherError> {
        persist::decode(PayloadKind::Program, bytes)
    }
}

/// Result of [`TetherRun::run_capturing`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRun {
    pub result: Result<TetherObject, TetherError>,
    /// Everything the program printed before it finished or failed.
    pub output: String,
}

/// An external function call waiting for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Increases by one for every external call of an execution, starting at 0.
    pub call_id: u32,
    pub function_name: String,
    pub args: Vec<TetherObject>,
    pub kwargs: Vec<(String, TetherObject)>,
}

/// Result of a single step of iterative execution.
///
/// Each variant that can continue owns the whole execution state, so a paused
/// execution can only be resumed once.
///
/// Serialization requires `T: Serialize + Deserialize`.
#[expect(clippy::large_enum_variant)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub enum RunProgress<T: ResourceTracker> {
    /// Execution paused at an external function call. Call `state.run(return_value)` to resume.
    FunctionCall {
        function_name: String,
        args: Vec<TetherObject>,
        kwargs: Vec<(String, TetherObject)>,
        call_id: u32,
        state: Snapshot<T>,
    },
    /// Execution awaits a deferred call that has not been resolved yet.
    ResolveFutures(FutureSnapshot<T>),
    /// Execution completed with a final result.
    Complete(TetherObject),
}

impl<T: ResourceTracker> RunProgress<T> {
    /// Returns the call and the state to resume, if execution paused at a call.
    #[must_use]
    pub fn into_function_call(self) -> Option<(FunctionCallRequest, Snapshot<T>)> {
        match self {
            Self::FunctionCall {
                function_name,
                args,
                kwargs,
                call_id,
                state,
            } => Some((
                FunctionCallRequest {
                    call_id,
                    function_name,
                    args,
                    kwargs,
                },
                state,
            )),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_complete(self) -> Option<TetherObject> {
        match self {
            Self::Complete(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: ResourceTracker + Serialize> RunProgress<T> {
    /// Serializes the paused (or completed) execution.
    pub fn dump(&self) -> Result<Vec<u8>, TetherError> {
        persist::encode(PayloadKind::Progress, self)
    }
}

impl<T: ResourceTracker + DeserializeOwned> RunProgress<T> {
    /// Restores a state written by [`RunProgress::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, TetherError> {
        persist::decode(PayloadKind::Progress, bytes)
    }
}

/// How the host answers an external function call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalResult {
    /// The call returned this value.
    Return(TetherObject),
    /// The call raised this exception; the program can catch it.
    Error(TetherException),
    /// The host will answer later: the call evaluates to a future the program can `await`.
    Future,
}

impl From<TetherObject> for ExternalResult {
    fn from(value: TetherObject) -> Self {
        Self::Return(value)
    }
}

impl From<TetherException> for ExternalResult {
    fn from(exception: TetherException) -> Self {
        Self::Error(exception)
    }
}

/// Execution state paused at an external function call.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Snapshot<T: ResourceTracker> {
    executor: Executor,
    vm_state: VMSnapshot,
    heap: Heap<T>,
    namespaces: Namespaces,
    /// Id of the call being waited on.
    call_id: CallId,
}

impl<T: ResourceTracker> Snapshot<T> {
    /// Id of the external call this state waits on.
    #[must_use]
    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    /// Continues execution with the result of the external function.
    pub fn run(
        mut self,
        result: impl Into<ExternalResult>,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, TetherError> {
        let resume = match result.into() {
            ExternalResult::Return(object) => Resume::Value(object.to_value(&mut self.heap, &self.executor.interns)?),
            ExternalResult::Error(exc) => Resume::Error(SimpleException::from(exc).into()),
            ExternalResult::Future => Resume::Deferred(self.call_id),
        };
        log::debug!("resuming after external call {}", self.call_id);
        advance(
            self.executor,
            self.heap,
            self.namespaces,
            Some(self.vm_state),
            resume,
            print,
        )
    }

    /// Raises `RuntimeError(message)` at the call site.
    pub fn resume_with_error(
        self,
        message: impl Into<String>,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, TetherError> {
        self.run(ExternalResult::Error(TetherException::runtime_error(message)), print)
    }

    /// Defers the call: it evaluates to a future and execution continues.
    pub fn run_pending(self, print: &mut impl PrintWriter) -> Result<RunProgress<T>, TetherError> {
        self.run(ExternalResult::Future, print)
    }
}

/// Execution state blocked on an `await` of a deferred call.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct FutureSnapshot<T: ResourceTracker> {
    executor: Executor,
    vm_state: VMSnapshot,
    heap: Heap<T>,
    namespaces: Namespaces,
    pending_call_ids: Vec<CallId>,
}

impl<T: ResourceTracker> FutureSnapshot<T> {
    /// Ids of every deferred call without a result yet.
    #[must_use]
    pub fn pending_call_ids(&self) -> &[u32] {
        &self.pending_call_ids
    }

    /// Supplies results for any subset of the pending calls.
    ///
    /// If the awaited call is still pending afterwards, the state is returned as
    /// [`RunProgress::ResolveFutures`] again without running any code.
    ///
    /// # Errors
    /// Rejects ids that are not pending and [`ExternalResult::Future`] results.
    pub fn resume(
        mut self,
        results: Vec<(u32, ExternalResult)>,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, TetherError> {
        let mut resolved = Vec::with_capacity(results.len());
        for (call_id, result) in results {
            if !self.pending_call_ids.contains(&call_id) {
                return Err(TetherError::Runtime(TetherException::runtime_error(format!(
                    "external call {call_id} is not pending"
                ))));
            }
            let result = match result {
                ExternalResult::Return(object) => Ok(object.to_value(&mut self.heap, &self.executor.interns)?),
                ExternalResult::Error(exc) => Err(SimpleException::from(exc)),
                ExternalResult::Future => {
                    return Err(TetherError::Runtime(TetherException::runtime_error(format!(
                        "external call {call_id} is already deferred"
                    ))));
                }
            };
            resolved.push((call_id, result));
        }
        log::debug!("resolving {} of {} pending futures", resolved.len(), self.pending_call_ids.len());
        advance(
            self.executor,
            self.heap,
            self.namespaces,
            Some(self.vm_state),
            Resume::Futures(resolved),
            print,
        )
    }
}

/// How execution continues on the next [`advance`].
enum Resume {
    Start,
    Value(Value),
    Error(RunError),
    Deferred(CallId),
    Futures(Vec<(CallId, Result<Value, SimpleException>)>),
}

/// Where the run loop stopped, with the VM already turned into owned state.
enum Outcome {
    Complete(Value),
    Call {
        ext_function_id: ExtFunctionId,
        args: ArgValues,
        call_id: CallId,
        vm_state: VMSnapshot,
    },
    Futures {
        pending: Vec<CallId>,
        vm_state: VMSnapshot,
    },
    Failed(RunError),
}

/// Runs the VM from a fresh start or a snapshot until it stops, then packages the state.
fn advance<T: ResourceTracker>(
    executor: Executor,
    mut heap: Heap<T>,
    mut namespaces: Namespaces,
    vm_state: Option<VMSnapshot>,
    resume: Resume,
    print: &mut impl PrintWriter,
) -> Result<RunProgress<T>, TetherError> {
    heap.tracker_mut().start_clock();
    let outcome = {
        let mut vm = match vm_state {
            Some(state) => VM::restore(
                state,
                &executor.module_code,
                &mut heap,
                &mut namespaces,
                &executor.interns,
                print,
            ),
            None => VM::new(&mut heap, &mut namespaces, &executor.interns, print),
        };
        let result = match resume {
            Resume::Start => vm.run_module(&executor.module_code),
            Resume::Value(value) => vm.resume(value),
            Resume::Error(error) => vm.resume_with_exception(error),
            Resume::Deferred(call_id) => vm.resume_deferred(call_id),
            Resume::Futures(results) => vm.resolve_futures(results),
        };
        match result {
            Ok(FrameExit::Return(value)) => Outcome::Complete(value),
            Ok(FrameExit::ExternalCall {
                ext_function_id,
                args,
                call_id,
            }) => Outcome::Call {
                ext_function_id,
                args,
                call_id,
                vm_state: vm.into_snapshot(),
            },
            Ok(FrameExit::ResolveFutures(pending)) => Outcome::Futures {
                pending,
                vm_state: vm.into_snapshot(),
            },
            Err(err) => Outcome::Failed(err),
        }
    };

    match outcome {
        Outcome::Complete(value) => {
            let object = TetherObject::from_value(value, &heap, &executor.interns)?;
            log::debug!("{} completed", executor.script_name);
            Ok(RunProgress::Complete(object))
        }
        Outcome::Call {
            ext_function_id,
            args,
            call_id,
            vm_state,
        } => {
            let function_name = executor.interns.get_external_function_name(ext_function_id).to_owned();
            let (args, kwargs) = args_to_objects(args, &heap, &executor.interns)?;
            log::debug!("suspended on {function_name}(), call {call_id}");
            Ok(RunProgress::FunctionCall {
                function_name,
                args,
                kwargs,
                call_id,
                state: Snapshot {
                    executor,
                    vm_state,
                    heap,
                    namespaces,
                    call_id,
                },
            })
        }
        Outcome::Futures { pending, vm_state } => {
            log::debug!("suspended awaiting futures {pending:?}");
            Ok(RunProgress::ResolveFutures(FutureSnapshot {
                executor,
                vm_state,
                heap,
                namespaces,
                pending_call_ids: pending,
            }))
        }
        Outcome::Failed(err) => Err(executor.run_error(err)),
    }
}

/// Marshals the arguments of an external call.
fn args_to_objects(
    args: ArgValues,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> Result<(Vec<TetherObject>, Vec<(String, TetherObject)>), TetherError> {
    let (positional, kwargs) = args.split();
    let positional = positional
        .into_iter()
        .map(|value| TetherObject::from_value(value, heap, interns))
        .collect::<Result<_, _>>()?;
    let kwargs = kwargs
        .into_vec()
        .into_iter()
        .map(|(name, value)| Ok((interns.get_str(name).to_owned(), TetherObject::from_value(value, heap, interns)?)))
        .collect::<Result<_, TetherError>>()?;
    Ok((positional, kwargs))
}

/// The compiled program and everything needed to report errors against its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Executor {
    /// Number of global slots: external functions, then inputs, then other globals.
    namespace_size: usize,
    input_names: Vec<String>,
    module_code: Code,
    interns: Interns,
    script_name: String,
    /// Source code, for the preview lines of tracebacks.
    code: String,
}

impl Executor {
    #[cfg(feature = "parser")]
    fn new(
        code: String,
        script_name: &str,
        input_names: Vec<String>,
        external_functions: Vec<String>,
    ) -> Result<Self, TetherError> {
        let syntax_error = |e: ParseError| TetherError::Syntax(e.into_exception(script_name, &code));

        let mut interner = InternerBuilder::new();
        let mut nodes = parse(&code, &mut interner).map_err(syntax_error)?;
        let input_ids: Vec<StringId> = input_names.iter().map(|name| interner.intern(name)).collect();
        let external_ids: Vec<StringId> = external_functions.iter().map(|name| interner.intern(name)).collect();
        let scope = prepare(&mut nodes, &interner, &input_ids, &external_ids).map_err(syntax_error)?;
        let namespace_size = scope.global_names.len();
        let CompileResult {
            code: module_code,
            functions,
        } = Compiler::compile_module(&nodes, scope.global_names).map_err(syntax_error)?;
        log::debug!(
            "compiled {script_name}: {} functions, {} bytes of module bytecode",
            functions.len(),
            module_code.bytecode().len()
        );

        Ok(Self {
            namespace_size,
            input_names,
            module_code,
            interns: Interns::new(interner, functions, external_functions),
            script_name: script_name.to_owned(),
            code,
        })
    }

    fn run_to_completion(
        &self,
        inputs: Vec<TetherObject>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
    ) -> Result<TetherObject, TetherError> {
        let mut heap = Heap::new(resource_tracker);
        let mut namespaces = self.prepare_namespaces(inputs, &mut heap)?;
        heap.tracker_mut().start_clock();

        let result = {
            let mut vm = VM::new(&mut heap, &mut namespaces, &self.interns, print);
            vm.run_module(&self.module_code)
        };
        let value = match result {
            Ok(FrameExit::Return(value)) => value,
            Ok(FrameExit::ExternalCall { ext_function_id, .. }) => {
                let name = self.interns.get_external_function_name(ext_function_id);
                return Err(not_implemented(format!(
                    "calling external function '{name}' while running to completion"
                )));
            }
            Ok(FrameExit::ResolveFutures(pending)) => return Err(self.unresolvable_futures(&pending)),
            Err(err) => return Err(self.run_error(err)),
        };
        TetherObject::from_value(value, &heap, &self.interns)
    }

    /// Builds the global namespace: external functions, then the inputs, then unbound slots.
    fn prepare_namespaces(
        &self,
        inputs: Vec<TetherObject>,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> Result<Namespaces, TetherError> {
        if inputs.len() != self.input_names.len() {
            return Err(TetherError::UnsupportedValue(format!(
                "expected {} inputs, got {}",
                self.input_names.len(),
                inputs.len()
            )));
        }
        let mut namespace = Vec::with_capacity(self.namespace_size);
        let external_count = self.interns.external_functions().len();
        namespace.extend((0..external_count).map(|index| Value::ExtFunction(ExtFunctionId::new(index))));
        for input in inputs {
            namespace.push(input.to_value(heap, &self.interns)?);
        }
        namespace.resize(self.namespace_size, Value::Undefined);
        Ok(Namespaces::new(namespace))
    }

    fn run_error(&self, err: RunError) -> TetherError {
        match err {
            RunError::Exc(exc) => {
                TetherError::Runtime(exc.into_exception(&self.interns, &self.script_name, &self.code))
            }
            RunError::Resource(err) => {
                log::debug!("{} stopped: {err}", self.script_name);
                TetherError::Resource(err)
            }
            RunError::Internal(msg) => {
                TetherError::Runtime(TetherException::runtime_error(format!("internal interpreter error: {msg}")))
            }
        }
    }

    fn unresolvable_futures(&self, pending: &[CallId]) -> TetherError {
        log::debug!("{} awaited futures nobody can resolve", self.script_name);
        not_implemented(format!("awaiting deferred external calls {pending:?} while running to completion"))
    }
}

fn not_implemented(what: String) -> TetherError {
    TetherError::Runtime(TetherException::new(
        ExcType::NotImplementedError,
        Some(format!("{what} is not supported")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NoPrint;

    #[test]
    fn external_call_id_and_kwargs() {
        let program = TetherRun::new(
            "fetch(1, retries=3)".to_owned(),
            "call.py",
            vec![],
            vec!["fetch".to_owned()],
        )
        .unwrap();
        let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
        let (request, state) = progress.into_function_call().unwrap();
        assert_eq!(request.call_id, 0);
        assert_eq!(request.function_name, "fetch");
        assert_eq!(request.args, vec![TetherObject::Int(1)]);
        assert_eq!(request.kwargs, vec![("retries".to_owned(), TetherObject::Int(3))]);
        assert_eq!(state.call_id(), 0);
    }

    #[test]
    fn wrong_input_count() {
        let program = TetherRun::new("x".to_owned(), "x.py", vec!["x".to_owned()], vec![]).unwrap();
        let err = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap_err();
        assert_eq!(err.to_string(), "unsupported value: expected 1 inputs, got 0");
    }
}
