//! Compiled code objects: bytecode plus the tables the VM consults while running it.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{
    builtins::Builtins,
    exception_private::RunResult,
    exception_public::CodeRange,
    fstring::ParsedFormatSpec,
    heap::Heap,
    intern::StringId,
    resource::ResourceTracker,
    value::Value,
};

/// An entry of the constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Constant {
    Int(i64),
    LongInt(BigInt),
    Float(f64),
    Str(StringId),
    /// A builtin referenced by name where no global of that name is ever assigned.
    Builtin(Builtins),
    /// Format spec of an f-string interpolation, only read by `FormatValue`.
    FormatSpec(ParsedFormatSpec),
}

impl Constant {
    /// Converts to a runtime value, allocating big integers on the heap.
    pub fn to_value(&self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
        match self {
            Self::Int(i) => Ok(Value::Int(*i)),
            Self::LongInt(big) => heap.int_value(big.clone()),
            Self::Float(f) => Ok(Value::Float(*f)),
            Self::Str(id) => Ok(Value::InternString(*id)),
            Self::Builtin(b) => Ok(Value::Builtin(*b)),
            Self::FormatSpec(_) => Err(crate::exception_private::RunError::internal(
                "format spec constant loaded as a value",
            )),
        }
    }
}

/// Maps a bytecode offset to the source range it was compiled from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct LocationEntry {
    /// First bytecode offset this entry covers; it extends to the next entry.
    pub offset: u32,
    pub range: CodeRange,
}

/// A protected bytecode range and where to go when an exception is raised inside it.
///
/// Entries are ordered innermost first, so the first match is the right handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    /// Operand stack depth (relative to the frame's base) to unwind to before jumping.
    pub stack_depth: u16,
    /// Depth of the stack of exceptions being handled (relative to the frame) to restore.
    pub exc_depth: u16,
}

impl ExceptionEntry {
    pub fn contains(&self, offset: usize) -> bool {
        (self.start as usize..self.end as usize).contains(&offset)
    }
}

/// Bytecode for the module or one function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Code {
    bytecode: Vec<u8>,
    constants: Vec<Constant>,
    locations: Vec<LocationEntry>,
    exception_table: Vec<ExceptionEntry>,
    /// Names of the namespace slots, for `UnboundLocalError`/`NameError` messages.
    local_names: Vec<StringId>,
    /// Names of the cells (own cells first, then captured ones).
    cell_names: Vec<StringId>,
}

impl Code {
    pub fn new(
        bytecode: Vec<u8>,
        constants: Vec<Constant>,
        locations: Vec<LocationEntry>,
        exception_table: Vec<ExceptionEntry>,
        local_names: Vec<StringId>,
        cell_names: Vec<StringId>,
    ) -> Self {
        Self {
            bytecode,
            constants,
            locations,
            exception_table,
            local_names,
            cell_names,
        }
    }

    #[inline]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn constant(&self, index: u16) -> &Constant {
        &self.constants[usize::from(index)]
    }

    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    /// Source range of the instruction at `offset`.
    pub fn location(&self, offset: usize) -> Option<CodeRange> {
        let idx = self.locations.partition_point(|entry| entry.offset as usize <= offset);
        idx.checked_sub(1).map(|i| self.locations[i].range)
    }

    /// Innermost handler protecting `offset`.
    pub fn find_handler(&self, offset: usize) -> Option<&ExceptionEntry> {
        self.exception_table.iter().find(|entry| entry.contains(offset))
    }

    pub fn exception_table(&self) -> &[ExceptionEntry] {
        &self.exception_table
    }

    pub fn local_name(&self, slot: usize) -> Option<StringId> {
        self.local_names.get(slot).copied()
    }

    pub fn cell_name(&self, index: usize) -> Option<StringId> {
        self.cell_names.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception_public::CodeLoc;

    fn range(line: u32) -> CodeRange {
        CodeRange::new(CodeLoc::new(line, 1), CodeLoc::new(line, 2))
    }

    #[test]
    fn locations_cover_until_next_entry() {
        let code = Code::new(
            vec![0; 10],
            vec![],
            vec![
                LocationEntry { offset: 0, range: range(1) },
                LocationEntry { offset: 4, range: range(2) },
            ],
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(code.location(3), Some(range(1)));
        assert_eq!(code.location(4), Some(range(2)));
        assert_eq!(code.location(9), Some(range(2)));
    }

    #[test]
    fn innermost_handler_wins() {
        let inner = ExceptionEntry { start: 2, end: 4, handler: 10, stack_depth: 0, exc_depth: 0 };
        let outer = ExceptionEntry { start: 0, end: 8, handler: 20, stack_depth: 0, exc_depth: 0 };
        let code = Code::new(vec![0; 30], vec![], vec![], vec![inner, outer], vec![], vec![]);
        assert_eq!(code.find_handler(3).map(|e| e.handler), Some(10));
        assert_eq!(code.find_handler(5).map(|e| e.handler), Some(20));
        assert_eq!(code.find_handler(8), None);
    }
}
