//! Bridge error taxonomy
//!
//! `TypeMismatch`, `BufferTooSmall` and `ArgumentCount` are local failures the
//! caller may recover from, usually by raising a host-visible error.
//! `PendingException` and `EnvironmentFatal` are not recoverable: the native
//! function must return immediately without further boundary calls.

use crate::boundary::{ErrorKind, Status};
use crate::value::ValueType;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// An error raised by native code for the host to see
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JsError {
    pub kind: ErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl JsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        JsError {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    /// Attach a machine-readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValueType, found: ValueType },

    #[error("buffer too small: {required} bytes required, {written} written")]
    BufferTooSmall { required: usize, written: usize },

    #[error("a host exception is pending")]
    PendingException,

    #[error("environment is unusable: {0}")]
    EnvironmentFatal(String),

    #[error("expected at least {expected} arguments, received {received}")]
    ArgumentCount { expected: usize, received: usize },

    #[error("export `{0}` is defined more than once")]
    DuplicateExport(String),

    #[error("boundary call failed: {0}")]
    Boundary(Status),

    #[error(transparent)]
    Thrown(#[from] JsError),
}

impl From<Status> for BridgeError {
    fn from(status: Status) -> Self {
        match status {
            Status::PendingException => BridgeError::PendingException,
            Status::EnvironmentClosed => BridgeError::EnvironmentFatal(status.to_string()),
            other => BridgeError::Boundary(other),
        }
    }
}

impl BridgeError {
    /// Whether native code must stop making boundary calls
    pub fn is_unwinding(&self) -> bool {
        matches!(
            self,
            BridgeError::PendingException | BridgeError::EnvironmentFatal(_)
        )
    }

    /// Host-visible error for a local failure
    ///
    /// Returns `None` for errors that propagate by early return.
    pub fn to_js_error(&self) -> Option<JsError> {
        let err = match self {
            BridgeError::PendingException | BridgeError::EnvironmentFatal(_) => return None,
            BridgeError::Thrown(err) => return Some(err.clone()),
            BridgeError::TypeMismatch { .. } => {
                JsError::type_error(self.to_string()).with_code("E_TYPE_MISMATCH")
            }
            BridgeError::ArgumentCount { .. } => {
                JsError::type_error(self.to_string()).with_code("E_ARGUMENT_COUNT")
            }
            BridgeError::BufferTooSmall { .. } => {
                JsError::range_error(self.to_string()).with_code("E_BUFFER_TOO_SMALL")
            }
            BridgeError::DuplicateExport(_) => {
                JsError::error(self.to_string()).with_code("E_DUPLICATE_EXPORT")
            }
            BridgeError::Boundary(status) => JsError::error(self.to_string()).with_code(status.code()),
        };
        Some(err)
    }
}
