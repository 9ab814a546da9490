//! Bytecode representation, compiler and virtual machine.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definitions
//! - `code` - Code object containing bytecode and its tables
//! - `builder` - CodeBuilder for emitting bytecode during compilation
//! - `compiler` - AST to bytecode compiler
//! - `vm` - Virtual machine for bytecode execution

#[cfg(feature = "parser")]
mod builder;
mod code;
#[cfg(feature = "parser")]
mod compiler;
mod op;
mod vm;

pub(crate) use code::Code;
#[cfg(feature = "parser")]
pub(crate) use compiler::{CompileResult, Compiler};
pub(crate) use vm::{FrameExit, VM, VMSnapshot};
