//! A single execution of a program with an explicit lifecycle.
//!
//! [`Execution`] wraps the lower level [`TetherRun::start`] / [`Snapshot`] API in a
//! mutable state machine. It can be run to completion any number of times while
//! fresh, or driven once through `start` and the resume methods; once started it is
//! consumed and every further `start` or `run` fails with [`TetherError::Consumed`].

use std::mem;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::Display;

use crate::{
    error::TetherError,
    io::PrintWriter,
    object::TetherObject,
    persist::{self, PayloadKind},
    resource::ResourceTracker,
    run::{ExternalResult, FunctionCallRequest, FutureSnapshot, RunProgress, Snapshot, TetherRun},
};

/// Where an [`Execution`] currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ExecutionStatus {
    /// Not started; can be run or started.
    #[strum(serialize = "fresh")]
    Fresh,
    /// Waiting for the result of an external call.
    #[strum(serialize = "suspended on an external call")]
    SuspendedOnCall,
    /// Waiting for the results of deferred external calls.
    #[strum(serialize = "suspended on pending futures")]
    SuspendedOnFutures,
    #[strum(serialize = "complete")]
    Complete,
    #[strum(serialize = "failed")]
    Failed,
}

/// What the host must do next after driving an [`Execution`] one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// The program called an external function; answer with `resume`,
    /// `resume_with_error` or `defer`.
    Call(FunctionCallRequest),
    /// The program awaits deferred calls; answer any subset with `resume_futures`.
    PendingFutures { requests: Vec<FunctionCallRequest> },
    /// The program finished with this value.
    Complete(TetherObject),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
enum State<T: ResourceTracker> {
    Fresh {
        program: TetherRun,
        tracker: T,
    },
    SuspendedOnCall {
        request: FunctionCallRequest,
        snapshot: Snapshot<T>,
    },
    SuspendedOnFutures {
        snapshot: FutureSnapshot<T>,
    },
    Complete(TetherObject),
    Failed,
}

impl<T: ResourceTracker> State<T> {
    fn status(&self) -> ExecutionStatus {
        match self {
            Self::Fresh { .. } => ExecutionStatus::Fresh,
            Self::SuspendedOnCall { .. } => ExecutionStatus::SuspendedOnCall,
            Self::SuspendedOnFutures { .. } => ExecutionStatus::SuspendedOnFutures,
            Self::Complete(_) => ExecutionStatus::Complete,
            Self::Failed => ExecutionStatus::Failed,
        }
    }
}

/// One execution of a program.
///
/// # Example
/// ```
/// use tether::{Execution, NoLimitTracker, NoPrint, Progress, TetherObject, TetherRun};
///
/// let program = TetherRun::new("double(x) + 1".to_owned(), "calc.py", vec!["x".to_owned()], vec!["double".to_owned()]).unwrap();
/// let mut execution = Execution::new(program, NoLimitTracker);
///
/// let Progress::Call(call) = execution.start(vec![TetherObject::Int(20)], &mut NoPrint).unwrap() else {
///     panic!("expected an external call");
/// };
/// assert_eq!(call.function_name, "double");
/// let progress = execution.resume(TetherObject::Int(40), &mut NoPrint).unwrap();
/// assert_eq!(progress, Progress::Complete(TetherObject::Int(41)));
///
/// // started executions can't be run again
/// assert!(execution.run(vec![TetherObject::Int(1)], &mut NoPrint).is_err());
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Execution<T: ResourceTracker> {
    state: State<T>,
    /// Requests the host deferred and has not resolved yet, in call order.
    deferred: Vec<FunctionCallRequest>,
}

impl<T: ResourceTracker> Execution<T> {
    /// Creates a fresh execution; `tracker` is cloned for every run.
    pub fn new(program: TetherRun, tracker: T) -> Self {
        Self {
            state: State::Fresh { program, tracker },
            deferred: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ExecutionStatus {
        self.state.status()
    }

    /// Whether `start` has been called, directly or on the execution this one was dumped from.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        !matches!(self.state, State::Fresh { .. })
    }

    /// The call the execution is waiting on, if suspended on one.
    #[must_use]
    pub fn pending_call(&self) -> Option<&FunctionCallRequest> {
        match &self.state {
            State::SuspendedOnCall { request, .. } => Some(request),
            _ => None,
        }
    }

    /// The value the program returned, once complete.
    #[must_use]
    pub fn result(&self) -> Option<&TetherObject> {
        match &self.state {
            State::Complete(value) => Some(value),
            _ => None,
        }
    }

    /// Runs the program to completion without consuming the execution.
    ///
    /// External calls raise `NotImplementedError`.
    pub fn run(&self, inputs: Vec<TetherObject>, print: &mut impl PrintWriter) -> Result<TetherObject, TetherError> {
        let (program, tracker) = self.fresh("run")?;
        program.run(inputs, tracker.clone(), print)
    }

    /// Runs the program to completion, answering external calls with `handler`.
    pub fn run_with_externals(
        &self,
        inputs: Vec<TetherObject>,
        handler: impl FnMut(&FunctionCallRequest) -> ExternalResult,
        print: &mut impl PrintWriter,
    ) -> Result<TetherObject, TetherError> {
        let (program, tracker) = self.fresh("run")?;
        program.run_with_externals(inputs, tracker.clone(), handler, print)
    }

    /// Starts iterative execution and consumes the execution.
    pub fn start(&mut self, inputs: Vec<TetherObject>, print: &mut impl PrintWriter) -> Result<Progress, TetherError> {
        let (program, tracker) = match mem::replace(&mut self.state, State::Failed) {
            State::Fresh { program, tracker } => (program, tracker),
            other => return Err(self.restore_state(other, "start")),
        };
        log::debug!("execution started");
        let progress = program.start(inputs, tracker, print);
        self.advance(progress)
    }

    /// Answers the pending call with `value`.
    pub fn resume(&mut self, value: TetherObject, print: &mut impl PrintWriter) -> Result<Progress, TetherError> {
        let snapshot = self.take_call("resume")?;
        self.advance(snapshot.run(value, print))
    }

    /// Raises `RuntimeError(message)` at the pending call.
    pub fn resume_with_error(
        &mut self,
        message: impl Into<String>,
        print: &mut impl PrintWriter,
    ) -> Result<Progress, TetherError> {
        let snapshot = self.take_call("resume with an error")?;
        self.advance(snapshot.resume_with_error(message, print))
    }

    /// Turns the pending call into a future that the program can `await` later.
    pub fn defer(&mut self, print: &mut impl PrintWriter) -> Result<Progress, TetherError> {
        let (request, snapshot) = match mem::replace(&mut self.state, State::Failed) {
            State::SuspendedOnCall { request, snapshot } => (request, snapshot),
            other => return Err(self.restore_state(other, "defer")),
        };
        self.deferred.push(request);
        self.advance(snapshot.run_pending(print))
    }

    /// Supplies results for any subset of the deferred calls.
    pub fn resume_futures(
        &mut self,
        results: Vec<(u32, ExternalResult)>,
        print: &mut impl PrintWriter,
    ) -> Result<Progress, TetherError> {
        let snapshot = match mem::replace(&mut self.state, State::Failed) {
            State::SuspendedOnFutures { snapshot } => snapshot,
            other => return Err(self.restore_state(other, "resume futures")),
        };
        let resolved: Vec<u32> = results.iter().map(|(call_id, _)| *call_id).collect();
        let progress = snapshot.resume(results, print);
        if progress.is_ok() {
            self.deferred.retain(|request| !resolved.contains(&request.call_id));
        }
        self.advance(progress)
    }

    /// Serializes the execution in whatever state it is in.
    pub fn dump(&self) -> Result<Vec<u8>, TetherError>
    where
        T: Serialize,
    {
        persist::encode(PayloadKind::Execution, self)
    }

    /// Restores an execution written by [`Execution::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, TetherError>
    where
        T: DeserializeOwned,
    {
        persist::decode(PayloadKind::Execution, bytes)
    }

    fn fresh(&self, action: &str) -> Result<(&TetherRun, &T), TetherError> {
        match &self.state {
            State::Fresh { program, tracker } => Ok((program, tracker)),
            _ => Err(self.wrong_state(action)),
        }
    }

    fn take_call(&mut self, action: &str) -> Result<Snapshot<T>, TetherError> {
        match mem::replace(&mut self.state, State::Failed) {
            State::SuspendedOnCall { snapshot, .. } => Ok(snapshot),
            other => Err(self.restore_state(other, action)),
        }
    }

    /// Puts back a state taken by a driver that doesn't apply to it.
    fn restore_state(&mut self, state: State<T>, action: &str) -> TetherError {
        self.state = state;
        self.wrong_state(action)
    }

    fn wrong_state(&self, action: &str) -> TetherError {
        TetherError::Consumed(format!("cannot {action}: execution is {}", self.state()))
    }

    /// Records the state reached by one step. The state is `Failed` on entry.
    fn advance(&mut self, progress: Result<RunProgress<T>, TetherError>) -> Result<Progress, TetherError> {
        let progress = match progress {
            Ok(progress) => progress,
            Err(err) => {
                log::debug!("execution failed: {}", err.kind());
                self.deferred.clear();
                return Err(err);
            }
        };
        Ok(match progress {
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
                self.state = State::SuspendedOnCall {
                    request: request.clone(),
                    snapshot: state,
                };
                Progress::Call(request)
            }
            RunProgress::ResolveFutures(snapshot) => {
                let pending = snapshot.pending_call_ids();
                let requests = self
                    .deferred
                    .iter()
                    .filter(|request| pending.contains(&request.call_id))
                    .cloned()
                    .collect();
                self.state = State::SuspendedOnFutures { snapshot };
                Progress::PendingFutures { requests }
            }
            RunProgress::Complete(value) => {
                self.deferred.clear();
                self.state = State::Complete(value.clone());
                Progress::Complete(value)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::NoPrint, resource::NoLimitTracker};

    fn execution(code: &str) -> Execution<NoLimitTracker> {
        let program = TetherRun::new(code.to_owned(), "exec.py", vec![], vec!["ext".to_owned()]).unwrap();
        Execution::new(program, NoLimitTracker)
    }

    #[test]
    fn wrong_driver_keeps_state() {
        let mut exec = execution("ext(1) + ext(2)");
        let err = exec.resume(TetherObject::None, &mut NoPrint).unwrap_err();
        assert_eq!(err.to_string(), "execution consumed: cannot resume: execution is fresh");
        assert_eq!(exec.state(), ExecutionStatus::Fresh);

        exec.start(vec![], &mut NoPrint).unwrap();
        let err = exec.resume_futures(vec![], &mut NoPrint).unwrap_err();
        assert_eq!(
            err.to_string(),
            "execution consumed: cannot resume futures: execution is suspended on an external call"
        );
        assert_eq!(exec.pending_call().unwrap().call_id, 0);
    }

    #[test]
    fn failure_is_terminal() {
        let mut exec = execution("ext(1)\n1 / 0");
        exec.start(vec![], &mut NoPrint).unwrap();
        let err = exec.resume(TetherObject::None, &mut NoPrint).unwrap_err();
        assert_eq!(err.summary(), "ZeroDivisionError: division by zero");
        assert_eq!(exec.state(), ExecutionStatus::Failed);
        assert!(exec.is_consumed());
        assert!(exec.resume(TetherObject::None, &mut NoPrint).is_err());
    }

    #[test]
    fn deferred_requests_are_listed() {
        let mut exec = execution("a = ext(1)\nb = ext(2)\n(await a) + (await b)");
        exec.start(vec![], &mut NoPrint).unwrap();
        exec.defer(&mut NoPrint).unwrap();
        let Progress::PendingFutures { requests } = exec.defer(&mut NoPrint).unwrap() else {
            panic!("expected pending futures");
        };
        let ids: Vec<u32> = requests.iter().map(|r| r.call_id).collect();
        assert_eq!(ids, vec![0, 1]);

        let progress = exec
            .resume_futures(vec![(1, TetherObject::Int(2).into())], &mut NoPrint)
            .unwrap();
        let Progress::PendingFutures { requests } = progress else {
            panic!("expected pending futures");
        };
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].args, vec![TetherObject::Int(1)]);

        let progress = exec
            .resume_futures(vec![(0, TetherObject::Int(40).into())], &mut NoPrint)
            .unwrap();
        assert_eq!(progress, Progress::Complete(TetherObject::Int(42)));
        assert_eq!(exec.result(), Some(&TetherObject::Int(42)));
    }
}
