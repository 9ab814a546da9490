//! The error type returned by every public entry point.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::{exception_public::TetherException, resource::ResourceError};

/// Every way compiling, running, resuming or restoring a program can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum TetherError {
    /// The source could not be parsed or compiled. Carries the location in its traceback.
    #[error("{0}")]
    Syntax(TetherException),
    /// The program raised an exception nobody caught, or hit an interpreter fault.
    ///
    /// The exception keeps the precise Python type, e.g. `KeyError`.
    #[error("{0}")]
    Runtime(TetherException),
    /// A resource limit was breached; the run was stopped with no partial result.
    #[error(transparent)]
    Resource(ResourceError),
    /// An execution was driven after it was consumed, or along the wrong path.
    #[error("execution consumed: {0}")]
    Consumed(String),
    /// A host value could not be marshaled into or out of the interpreter.
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),
    /// Bytes passed to `load` are not a valid snapshot.
    #[error("invalid snapshot: {0}")]
    Format(String),
}

/// The tag of a [`TetherError`], for hosts that only branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ErrorKind {
    #[strum(serialize = "SyntaxError")]
    Syntax,
    #[strum(serialize = "RuntimeError")]
    Runtime,
    #[strum(serialize = "ResourceError")]
    Resource,
    #[strum(serialize = "ConsumedError")]
    Consumed,
    #[strum(serialize = "UnsupportedValueError")]
    UnsupportedValue,
    #[strum(serialize = "FormatError")]
    Format,
}

impl TetherError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Consumed(_) => ErrorKind::Consumed,
            Self::UnsupportedValue(_) => ErrorKind::UnsupportedValue,
            Self::Format(_) => ErrorKind::Format,
        }
    }

    /// The exception behind a syntax or runtime error.
    #[must_use]
    pub fn exception(&self) -> Option<&TetherException> {
        match self {
            Self::Syntax(exc) | Self::Runtime(exc) => Some(exc),
            _ => None,
        }
    }

    /// A single line description: `ExcType: message` for exceptions, the `Display`
    /// output otherwise.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Syntax(exc) | Self::Runtime(exc) => exc.summary(),
            other => other.to_string(),
        }
    }
}

impl From<ResourceError> for TetherError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception_private::ExcType;

    #[test]
    fn kind_names() {
        let err = TetherError::Runtime(TetherException::new(ExcType::KeyError, Some("'a'".to_owned())));
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(err.kind().to_string(), "RuntimeError");
        assert_eq!(err.summary(), "KeyError: 'a'");
        assert_eq!(TetherError::Consumed("x".to_owned()).kind().to_string(), "ConsumedError");
    }
}
