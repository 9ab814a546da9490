#![doc = include_str!("../../../README.md")]
mod args;
mod builtins;
mod bytecode;
mod error;
mod exception_private;
mod exception_public;
mod execution;
mod expressions;
mod fstring;
mod function;
mod heap;
mod intern;
mod io;
#[cfg(feature = "parser")]
mod lexer;
mod namespace;
mod numeric;
mod object;
mod operators;
#[cfg(feature = "parser")]
mod parse;
mod persist;
#[cfg(feature = "parser")]
mod prepare;
mod resource;
mod run;
mod signature;
mod types;
mod value;

pub use crate::{
    error::{ErrorKind, TetherError},
    exception_private::ExcType,
    exception_public::{CodeLoc, StackFrame, TetherException},
    execution::{Execution, ExecutionStatus, Progress},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::{ConversionError, DictPairs, FrozenSeq, TetherObject},
    persist::FORMAT_VERSION,
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    run::{CapturedRun, ExternalResult, FunctionCallRequest, FutureSnapshot, RunProgress, Snapshot, TetherRun},
};
