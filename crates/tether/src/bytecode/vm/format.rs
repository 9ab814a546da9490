//! F-string helpers for the VM.

use super::VM;
use crate::{
    exception_private::RunResult,
    fstring::{ConversionFlag, ParsedFormatSpec, format_value},
    io::PrintWriter,
    resource::ResourceTracker,
};

impl<T: ResourceTracker, P: PrintWriter> VM<'_, T, P> {
    /// Concatenates the top `count` string parts into one string.
    pub(super) fn build_fstring(&mut self, count: usize) -> RunResult<()> {
        let parts = self.pop_n(count);
        let mut result = String::new();
        for part in parts {
            match part.as_str(self.heap, self.interns) {
                Some(s) => result.push_str(s),
                None => result.push_str(&part.py_str(self.heap, self.interns)),
            }
        }
        let value = self.heap.alloc_str(result)?;
        self.push(value);
        Ok(())
    }

    /// Formats TOS for an interpolation.
    ///
    /// Bits 0-1 of `flags` hold the conversion; the format spec, if any, comes from the
    /// code's constant table.
    pub(super) fn format_value(&mut self, flags: u8, spec: Option<&ParsedFormatSpec>) -> RunResult<()> {
        let value = self.pop();
        let formatted = format_value(value, ConversionFlag::from_bits(flags), spec, self.heap, self.interns)?;
        let value = self.heap.alloc_str(formatted)?;
        self.push(value);
        Ok(())
    }
}
