//! String interning and the per-program lookup tables.
//!
//! Identifiers, attribute names and string literals are interned once at compile time and
//! referred to by [`StringId`] afterwards, so bytecode operands and AST nodes stay small
//! and `Copy`. The [`Interns`] table produced by compilation also owns the compiled
//! functions and the declared external function names; it is immutable while a program runs.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::function::Function;

/// Index of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Builds an id from a raw bytecode operand.
    #[inline]
    pub fn from_operand(operand: u16) -> Self {
        Self(u32::from(operand))
    }
}

/// `<module>`, used as the frame name of module level code in tracebacks.
pub(crate) const MODULE_STRING_ID: StringId = StringId(0);
/// `<lambda>`, the name given to every lambda function.
pub(crate) const LAMBDA_STRING_ID: StringId = StringId(1);

/// Strings interned by every builder, in this exact order.
const PREDEFINED: [&str; 2] = ["<module>", "<lambda>"];

/// Index of a compiled function in [`Interns`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct FunctionId(u32);

impl FunctionId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("function index exceeds u32"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a declared external function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct ExtFunctionId(u32);

impl ExtFunctionId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("external function index exceeds u32"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mutable interner used while lexing, parsing and preparing code.
#[derive(Debug)]
pub(crate) struct InternerBuilder {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl Default for InternerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InternerBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            strings: Vec::new(),
            lookup: AHashMap::new(),
        };
        for s in PREDEFINED {
            builder.intern(s);
        }
        builder
    }

    /// Returns the id of `s`, adding it to the table if it hasn't been seen before.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.lookup.get(s) {
            return *id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("too many interned strings"));
        self.strings.push(s.to_owned());
        self.lookup.insert(s.to_owned(), id);
        id
    }

    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Number of interned strings, bytecode operands for names are u16 so the compiler
    /// checks this against `u16::MAX`.
    pub fn len(&self) -> usize {
        self.strings.len()
    }
}

/// Immutable lookup tables shared by every execution of one program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Interns {
    strings: Vec<String>,
    functions: Vec<Function>,
    external_functions: Vec<String>,
}

impl Interns {
    pub fn new(builder: InternerBuilder, functions: Vec<Function>, external_functions: Vec<String>) -> Self {
        Self {
            strings: builder.strings,
            functions,
            external_functions,
        }
    }

    #[inline]
    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    #[inline]
    pub fn get_function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn set_functions(&mut self, functions: Vec<Function>) {
        self.functions = functions;
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn get_external_function_name(&self, id: ExtFunctionId) -> &str {
        &self.external_functions[id.index()]
    }

    pub fn external_functions(&self) -> &[String] {
        &self.external_functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_ids_are_stable() {
        let builder = InternerBuilder::new();
        assert_eq!(builder.get_str(MODULE_STRING_ID), "<module>");
        assert_eq!(builder.get_str(LAMBDA_STRING_ID), "<lambda>");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut builder = InternerBuilder::new();
        let a = builder.intern("fetch");
        let b = builder.intern("other");
        assert_ne!(a, b);
        assert_eq!(builder.intern("fetch"), a);
        assert_eq!(builder.len(), PREDEFINED.len() + 2);
    }
}
