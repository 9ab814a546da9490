//! Low level bytecode emission used by the compiler.
//!
//! `CodeBuilder` appends opcodes and operands, interns constants, records source
//! locations and exception table entries, and finally produces an immutable [`Code`].
//! Operand overflows are recorded rather than panicking so the compiler can report
//! them as syntax errors at the end.

use super::{
    code::{Code, Constant, ExceptionEntry, LocationEntry},
    op::{FORMAT_SPEC_FLAG, Opcode},
};
use crate::{exception_public::CodeRange, intern::StringId};

/// A forward jump whose offset is patched once the target is known.
///
/// Holds the position of the jump's i16 operand.
#[derive(Debug)]
#[must_use = "forward jumps must be patched"]
pub(crate) struct JumpLabel(usize);

#[derive(Debug, Default)]
pub(crate) struct CodeBuilder {
    bytecode: Vec<u8>,
    constants: Vec<Constant>,
    locations: Vec<LocationEntry>,
    exception_table: Vec<ExceptionEntry>,
    /// Source range of the instructions emitted next.
    location: Option<CodeRange>,
    /// First operand that did not fit its encoding.
    overflow: Option<String>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source range attributed to the following instructions.
    pub fn set_location(&mut self, range: CodeRange) {
        self.location = Some(range);
    }

    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    pub fn emit(&mut self, op: Opcode) {
        self.record_location();
        self.bytecode.push(op as u8);
    }

    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.emit(op);
        self.bytecode.push(operand);
    }

    pub fn emit_i8(&mut self, op: Opcode, operand: i8) {
        self.emit(op);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.emit(op);
        self.push_u16(operand);
    }

    pub fn emit_u16_u8(&mut self, op: Opcode, first: u16, second: u8) {
        self.emit_u16(op, first);
        self.bytecode.push(second);
    }

    pub fn emit_u16_u8_u8(&mut self, op: Opcode, first: u16, second: u8, third: u8) {
        self.emit_u16_u8(op, first, second);
        self.bytecode.push(third);
    }

    /// Emits `LoadLocal` or its wide form depending on the slot.
    pub fn emit_load_local(&mut self, slot: u16) {
        match u8::try_from(slot) {
            Ok(slot) => self.emit_u8(Opcode::LoadLocal, slot),
            Err(_) => self.emit_u16(Opcode::LoadLocalW, slot),
        }
    }

    /// Emits `StoreLocal` or its wide form depending on the slot.
    pub fn emit_store_local(&mut self, slot: u16) {
        match u8::try_from(slot) {
            Ok(slot) => self.emit_u8(Opcode::StoreLocal, slot),
            Err(_) => self.emit_u16(Opcode::StoreLocalW, slot),
        }
    }

    /// `CallFunctionKw pos_count kw_count name_ids...`
    pub fn emit_call_function_kw(&mut self, pos_count: u8, kw_names: &[StringId]) {
        self.emit_u8(Opcode::CallFunctionKw, pos_count);
        self.push_kw_names(kw_names);
    }

    /// `CallMethodKw name_id pos_count kw_count name_ids...`
    pub fn emit_call_method_kw(&mut self, name: u16, pos_count: u8, kw_names: &[StringId]) {
        self.emit_u16_u8(Opcode::CallMethodKw, name, pos_count);
        self.push_kw_names(kw_names);
    }

    /// `FormatValue flags [spec_const]`; the spec constant index is present when bit 2 is set.
    pub fn emit_format_value(&mut self, conversion_bits: u8, spec_const: Option<u16>) {
        match spec_const {
            Some(index) => {
                self.emit_u8(Opcode::FormatValue, conversion_bits | FORMAT_SPEC_FLAG);
                self.push_u16(index);
            }
            None => self.emit_u8(Opcode::FormatValue, conversion_bits),
        }
    }

    /// Emits a jump with a placeholder offset, to be fixed by [`Self::patch_jump`].
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.emit(op);
        let label = JumpLabel(self.bytecode.len());
        self.push_u16(0);
        label
    }

    /// Points a forward jump at the current offset.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.bytecode.len();
        let offset = self.jump_offset(label.0 + 2, target);
        self.bytecode[label.0..label.0 + 2].copy_from_slice(&offset.to_le_bytes());
    }

    /// Emits a jump to an already known (usually backward) target.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        self.emit(op);
        let offset = self.jump_offset(self.bytecode.len() + 2, target);
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
    }

    /// Adds a constant to the pool, reusing an identical existing entry.
    pub fn add_const(&mut self, constant: Constant) -> u16 {
        let existing = self.constants.iter().position(|c| same_constant(c, &constant));
        let index = existing.unwrap_or_else(|| {
            self.constants.push(constant);
            self.constants.len() - 1
        });
        self.operand_u16(index, "constants")
    }

    pub fn add_exception_entry(&mut self, entry: ExceptionEntry) {
        self.exception_table.push(entry);
    }

    /// Converts an index to a u16 operand, recording an overflow when it does not fit.
    pub fn operand_u16(&mut self, value: usize, what: &str) -> u16 {
        u16::try_from(value).unwrap_or_else(|_| {
            self.overflow
                .get_or_insert_with(|| format!("too many {what} (limit is {})", u16::MAX));
            0
        })
    }

    /// Finishes the code object, failing with a message if an operand overflowed.
    pub fn build(self, local_names: Vec<StringId>, cell_names: Vec<StringId>) -> Result<Code, String> {
        if let Some(msg) = self.overflow {
            return Err(msg);
        }
        if u32::try_from(self.bytecode.len()).is_err() {
            return Err("code object too large".to_owned());
        }
        Ok(Code::new(
            self.bytecode,
            self.constants,
            self.locations,
            self.exception_table,
            local_names,
            cell_names,
        ))
    }

    fn push_u16(&mut self, operand: u16) {
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    fn push_kw_names(&mut self, kw_names: &[StringId]) {
        let count = u8::try_from(kw_names.len()).unwrap_or_else(|_| {
            self.overflow.get_or_insert_with(|| "too many keyword arguments".to_owned());
            0
        });
        self.bytecode.push(count);
        for name in kw_names {
            let operand = self.operand_u16(name.index(), "names");
            self.push_u16(operand);
        }
    }

    /// Relative offset from `from` (the byte after the operand) to `target`.
    fn jump_offset(&mut self, from: usize, target: usize) -> i16 {
        let delta = i64::try_from(target).unwrap_or(i64::MAX) - i64::try_from(from).unwrap_or(i64::MAX);
        i16::try_from(delta).unwrap_or_else(|_| {
            self.overflow
                .get_or_insert_with(|| "code block too large, jump offset exceeds 32767 bytes".to_owned());
            0
        })
    }

    fn record_location(&mut self) {
        let Some(range) = self.location else { return };
        if self.locations.last().is_some_and(|entry| entry.range == range) {
            return;
        }
        let offset = u32::try_from(self.bytecode.len()).unwrap_or(u32::MAX);
        self.locations.push(LocationEntry { offset, range });
    }
}

/// Constant pool equality: floats compare by bit pattern so `0.0` and `-0.0` stay apart.
fn same_constant(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Float(x), Constant::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_jumps() {
        let mut builder = CodeBuilder::new();
        let start = builder.current_offset();
        builder.emit(Opcode::Nop);
        let label = builder.emit_jump(Opcode::JumpIfFalse);
        builder.emit(Opcode::Pop);
        builder.patch_jump(label);
        builder.emit_jump_to(Opcode::Jump, start);
        let code = builder.build(vec![], vec![]).unwrap();
        let bytes = code.bytecode();
        // JumpIfFalse operand skips the single Pop
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 1);
        // Jump back to offset 0 from offset 8
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), -8);
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut builder = CodeBuilder::new();
        assert_eq!(builder.add_const(Constant::Int(1000)), 0);
        assert_eq!(builder.add_const(Constant::Float(0.0)), 1);
        assert_eq!(builder.add_const(Constant::Float(-0.0)), 2);
        assert_eq!(builder.add_const(Constant::Int(1000)), 0);
    }

    #[test]
    fn wide_locals() {
        let mut builder = CodeBuilder::new();
        builder.emit_load_local(3);
        builder.emit_load_local(300);
        let code = builder.build(vec![], vec![]).unwrap();
        assert_eq!(code.bytecode()[0], Opcode::LoadLocal as u8);
        assert_eq!(code.bytecode()[2], Opcode::LoadLocalW as u8);
    }

    #[test]
    fn overflow_is_reported_at_build() {
        let mut builder = CodeBuilder::new();
        builder.operand_u16(70_000, "names");
        assert_eq!(builder.build(vec![], vec![]).unwrap_err(), "too many names (limit is 65535)");
    }
}
