//! Opcode definitions for the bytecode VM.
//!
//! Bytecode is stored as raw `Vec<u8>`. The `Opcode` enum is a pure discriminant with no
//! data; operands follow in the byte stream and are fetched separately.
//!
//! # Operand Encoding
//!
//! - No suffix, 0 bytes: `BinaryAdd`, `Pop`, `LoadNone`
//! - No suffix, 1 byte (u8/i8): `LoadLocal`, `StoreLocal`, `LoadSmallInt`
//! - `W` suffix, 2 bytes (u16): `LoadLocalW`, `StoreLocalW`
//! - Jumps: i16 offset relative to the byte after the operand
//! - Compound (multiple operands): `CallFunctionKw` (u8 + u8 + u16s), `MakeClosure` (u16 + u8 + u8)
//!
//! Multi-byte operands are little-endian.

use strum::FromRepr;

/// Opcode discriminant - just identifies the instruction type.
///
/// With `#[repr(u8)]`, each opcode is exactly 1 byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub(crate) enum Opcode {
    // === Stack Operations (no operand) ===
    /// Discard top of stack.
    Pop,
    /// Duplicate top of stack.
    Dup,
    /// Duplicate the top two: [a, b] -> [a, b, a, b].
    DupTwo,
    /// Swap top two: [a, b] -> [b, a].
    Rot2,
    /// Rotate top three: [a, b, c] -> [c, a, b].
    Rot3,

    // === Constants & Literals ===
    /// Push constant from pool. Operand: u16 const_id.
    LoadConst,
    /// Push None.
    LoadNone,
    /// Push True.
    LoadTrue,
    /// Push False.
    LoadFalse,
    /// Push small integer (-128 to 127). Operand: i8.
    LoadSmallInt,

    // === Variables ===
    /// Push local variable. Operand: u8 slot.
    LoadLocal,
    /// Push local (wide, slot > 255). Operand: u16 slot.
    LoadLocalW,
    /// Pop and store to local. Operand: u8 slot.
    StoreLocal,
    /// Store local (wide). Operand: u16 slot.
    StoreLocalW,
    /// Push from global namespace. Operand: u16 slot.
    LoadGlobal,
    /// Store to global. Operand: u16 slot.
    StoreGlobal,
    /// Load through a closure cell. Operand: u16 index into the frame's cells.
    LoadCell,
    /// Store through a closure cell. Operand: u16 index into the frame's cells.
    StoreCell,
    /// Push the cell itself (not its content), to be captured by `MakeClosure`.
    /// Operand: u16 index into the frame's cells.
    LoadClosure,

    // === Binary Operations (no operand) ===
    BinaryAdd,
    BinarySub,
    BinaryMul,
    BinaryDiv,
    BinaryFloorDiv,
    BinaryMod,
    BinaryPow,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    BinaryLShift,
    BinaryRShift,

    // === Comparison Operations (no operand) ===
    CompareEq,
    CompareNe,
    CompareLt,
    CompareLe,
    CompareGt,
    CompareGe,
    CompareIs,
    CompareIsNot,
    CompareIn,
    CompareNotIn,

    // === Unary Operations (no operand) ===
    /// Logical not: not a.
    UnaryNot,
    UnaryNeg,
    UnaryPos,
    UnaryInvert,

    // === In-place Operations (no operand) ===
    /// In-place add: a += b. Lists are extended in place.
    InplaceAdd,
    InplaceSub,
    InplaceMul,
    InplaceDiv,
    InplaceFloorDiv,
    InplaceMod,
    InplacePow,
    InplaceAnd,
    InplaceOr,
    InplaceXor,
    InplaceLShift,
    InplaceRShift,

    // === Collection Building ===
    /// Pop n items, build list. Operand: u16 count.
    BuildList,
    /// Pop n items, build tuple. Operand: u16 count.
    BuildTuple,
    /// Pop 2n items (k/v pairs), build dict. Operand: u16 count.
    BuildDict,
    /// Format a value for f-string interpolation. Operand: u8 flags.
    ///
    /// Flags encoding:
    /// - bits 0-1: conversion (0=none, 1=str, 2=repr)
    /// - bit 2: has a format spec, operand includes a u16 const_id of the parsed spec after the flags
    ///
    /// Pops the value, pushes the formatted string.
    FormatValue,
    /// Pop n parts, concatenate for f-string. Operand: u16 count.
    BuildFString,
    /// Build a slice object from stack values. No operand.
    ///
    /// Pops step, stop, start (TOS order); each may be None.
    BuildSlice,

    // === Comprehension Building ===
    /// Append TOS to list for comprehension. Operand: u8 depth (number of iterators).
    ///
    /// Stack: [..., list, iter1, ..., iterN, value] -> [..., list, iter1, ..., iterN]
    ListAppend,
    /// Set dict[key] = value for comprehension. Operand: u8 depth (number of iterators).
    ///
    /// Stack: [..., dict, iter1, ..., iterN, key, value] -> [..., dict, iter1, ..., iterN]
    DictSetItem,

    // === Subscript & Attribute ===
    /// a[b]: pop index, pop obj, push result.
    BinarySubscr,
    /// a[b] = c: pop index, pop obj, pop value.
    StoreSubscr,
    /// Pop obj, push obj.attr. Operand: u16 name_id.
    LoadAttr,
    /// Pop obj, pop value, set obj.attr. Operand: u16 name_id.
    ///
    /// No value in this language has settable attributes, so this always raises.
    StoreAttr,

    // === Function Calls ===
    /// Call with n positional args. Operand: u8 arg_count.
    ///
    /// Stack: [callable, args...]
    CallFunction,
    /// Call with positional and keyword args.
    ///
    /// Operands: u8 pos_count, u8 kw_count, then kw_count u16 name ids.
    ///
    /// Stack: [callable, pos_args..., kw_values...]
    CallFunctionKw,
    /// Call method. Operands: u16 name_id, u8 arg_count.
    ///
    /// Stack: [obj, args...]
    CallMethod,
    /// Call method with keyword args. Operands: u16 name_id, u8 pos_count, u8 kw_count,
    /// then kw_count u16 name ids.
    CallMethodKw,

    // === Control Flow ===
    /// Unconditional relative jump. Operand: i16 offset.
    Jump,
    /// Jump if TOS truthy, always pop. Operand: i16 offset.
    JumpIfTrue,
    /// Jump if TOS falsy, always pop. Operand: i16 offset.
    JumpIfFalse,
    /// Jump if TOS truthy (keep), else pop. Operand: i16 offset.
    JumpIfTrueOrPop,
    /// Jump if TOS falsy (keep), else pop. Operand: i16 offset.
    JumpIfFalseOrPop,

    // === Iteration ===
    /// Convert TOS to iterator.
    GetIter,
    /// Push the next item of the iterator at TOS, or pop the iterator and jump.
    /// Operand: i16 offset.
    ForIter,

    // === Function Definition ===
    /// Create function object. Operands: u16 func_id, u8 defaults_count.
    ///
    /// Stack: [defaults...] -> [function]
    MakeFunction,
    /// Create closure. Operands: u16 func_id, u8 defaults_count, u8 cell_count.
    ///
    /// Stack: [defaults..., cells...] -> [closure]
    MakeClosure,

    // === Exception Handling ===
    // No SetupTry/PopExceptHandler: handlers come from the static exception table.
    /// Raise TOS as exception.
    Raise,
    /// Re-raise the exception being handled (bare `raise`, end of `finally`).
    Reraise,
    /// Pop the exception being handled when leaving an except block.
    ClearException,
    /// Check if exception matches type for except clause.
    ///
    /// Stack: [..., exception, exc_type] -> [..., exception, bool]
    /// Raises TypeError if exc_type is not an exception class or a tuple of them.
    CheckExcMatch,

    // === Futures ===
    /// Replace the external future at TOS with its result, suspending while pending.
    Await,

    // === Return ===
    /// Return TOS from function.
    ReturnValue,

    // === Unpacking ===
    /// Unpack TOS into n values, first item ending on top. Operand: u8 count.
    UnpackSequence,

    /// No operation.
    Nop,
}

/// `FormatValue` flag bit: a u16 format spec constant index follows the flags.
pub(crate) const FORMAT_SPEC_FLAG: u8 = 0b100;

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcodeError(byte))
    }
}

/// Error returned when attempting to convert an invalid byte to an Opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidOpcodeError(pub u8);

impl std::fmt::Display for InvalidOpcodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid opcode byte: {}", self.0)
    }
}

impl std::error::Error for InvalidOpcodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for byte in 0..=Opcode::Nop as u8 {
            let opcode = Opcode::try_from(byte).unwrap();
            assert_eq!(opcode as u8, byte, "opcode {opcode:?} has wrong discriminant");
        }
    }

    #[test]
    fn invalid_opcode() {
        assert!(Opcode::try_from(Opcode::Nop as u8 + 1).is_err());
        assert!(Opcode::try_from(255u8).is_err());
    }
}
