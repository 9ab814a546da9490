//! Exceptions as seen by the host, with a Python style traceback.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{exception_private::ExcType, types::str::string_repr};

/// A position in the source code, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A span of source code, attached to AST nodes and to the bytecode location table.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) struct CodeRange {
    start: CodeLoc,
    end: CodeLoc,
}

impl fmt::Debug for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

impl CodeRange {
    pub fn new(start: CodeLoc, end: CodeLoc) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> CodeLoc {
        self.start
    }

    pub fn end(&self) -> CodeLoc {
        self.end
    }

    /// Range from the start of `self` to the end of `end`.
    #[must_use]
    pub fn extend(&self, end: &Self) -> Self {
        Self {
            start: self.start,
            end: end.end,
        }
    }
}

/// One entry of a traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub filename: String,
    pub start: CodeLoc,
    pub end: CodeLoc,
    /// Function name, `None` for module level code and for syntax errors.
    pub frame_name: Option<String>,
    /// The source line the frame points at, without leading indentation.
    pub preview_line: Option<String>,
}

impl StackFrame {
    pub(crate) fn new(position: CodeRange, filename: &str, frame_name: Option<String>, source: &str) -> Self {
        let preview_line = source
            .lines()
            .nth(position.start().line.saturating_sub(1) as usize)
            .map(|line| line.trim().to_owned())
            .filter(|line| !line.is_empty());
        Self {
            filename: filename.to_owned(),
            start: position.start(),
            end: position.end(),
            frame_name,
            preview_line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  File \"{}\", line {}", self.filename, self.start.line)?;
        if let Some(name) = &self.frame_name {
            write!(f, ", in {name}")?;
        }
        if let Some(line) = &self.preview_line {
            write!(f, "\n    {line}")?;
        }
        Ok(())
    }
}

/// An exception raised by the interpreted program, or a syntax error in it.
///
/// `Display` renders the full traceback; [`TetherException::summary`] renders just
/// `ExcType: message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TetherException {
    exc_type: ExcType,
    message: Option<String>,
    traceback: Vec<StackFrame>,
}

impl TetherException {
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            message,
            traceback: Vec::new(),
        }
    }

    #[must_use]
    pub fn new_full(exc_type: ExcType, message: Option<String>, traceback: Vec<StackFrame>) -> Self {
        Self {
            exc_type,
            message,
            traceback,
        }
    }

    /// Shorthand for a `RuntimeError` with a message and no traceback.
    #[must_use]
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::RuntimeError, Some(message.into()))
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message
    }

    /// Frames from outermost to innermost, like Python prints them.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// `ValueError: bad value`, or just `ValueError` without a message.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = self.exc_type.to_string();
        if let Some(message) = &self.message {
            if !message.is_empty() {
                s.push_str(": ");
                s.push_str(message);
            }
        }
        s
    }

    /// `ValueError('bad value')`, the repr of the exception object.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = format!("{}(", self.exc_type);
        if let Some(message) = &self.message {
            s.push_str(&string_repr(message));
        }
        s.push(')');
        s
    }
}

impl fmt::Display for TetherException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            f.write_str("Traceback (most recent call last):\n")?;
            for frame in &self.traceback {
                writeln!(f, "{frame}")?;
            }
        }
        f.write_str(&self.summary())
    }
}

impl std::error::Error for TetherException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_and_repr() {
        let exc = TetherException::new(ExcType::ValueError, Some("bad 'x'".to_owned()));
        assert_eq!(exc.summary(), "ValueError: bad 'x'");
        assert_eq!(exc.py_repr(), r#"ValueError("bad 'x'")"#);
        let bare = TetherException::new(ExcType::KeyError, None);
        assert_eq!(bare.summary(), "KeyError");
        assert_eq!(bare.py_repr(), "KeyError()");
    }

    #[test]
    fn traceback_display() {
        let source = "def f():\n    1 / 0\nf()\n";
        let frames = vec![
            StackFrame::new(
                CodeRange::new(CodeLoc::new(3, 1), CodeLoc::new(3, 4)),
                "t.py",
                Some("<module>".to_owned()),
                source,
            ),
            StackFrame::new(
                CodeRange::new(CodeLoc::new(2, 5), CodeLoc::new(2, 10)),
                "t.py",
                Some("f".to_owned()),
                source,
            ),
        ];
        let exc = TetherException::new_full(ExcType::ZeroDivisionError, Some("division by zero".to_owned()), frames);
        assert_eq!(
            exc.to_string(),
            "Traceback (most recent call last):\n  File \"t.py\", line 3, in <module>\n    f()\n  File \"t.py\", line 2, in f\n    1 / 0\nZeroDivisionError: division by zero"
        );
    }
}
