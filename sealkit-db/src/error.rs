//! Database error types.

use std::fmt;

use thiserror::Error;

use crate::ffi::{self, NativeError};

/// Result code returned by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbErrorCode(pub i32);

impl DbErrorCode {
    /// Generic engine error (`SQLITE_ERROR`).
    pub const ERROR: Self = Self(ffi::SQLITE_ERROR);
    /// Library used incorrectly (`SQLITE_MISUSE`).
    pub const MISUSE: Self = Self(ffi::SQLITE_MISUSE);
}

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned by database operations.
///
/// Engine failures carry the native result code and the engine's diagnostic
/// message verbatim. A wrong cipher key is not detected up front: it shows up
/// as a [`PrepareFailed`](Self::PrepareFailed) or
/// [`StepFailed`](Self::StepFailed) on the first statement that reads a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// The native connection could not be opened.
    #[error("open failed ({code}): {message}")]
    OpenFailed {
        /// Engine result code.
        code: DbErrorCode,
        /// Engine diagnostic message.
        message: String,
    },

    /// SQL compilation failed.
    #[error("prepare failed ({code}): {message}")]
    PrepareFailed {
        /// Engine result code.
        code: DbErrorCode,
        /// Engine diagnostic message.
        message: String,
    },

    /// Statement execution failed.
    #[error("step failed ({code}): {message}")]
    StepFailed {
        /// Engine result code.
        code: DbErrorCode,
        /// Engine diagnostic message.
        message: String,
    },

    /// A zero-length cipher key was configured.
    #[error("invalid cipher key: key must not be empty")]
    InvalidCipherKey,

    /// The engine rejected a key or rekey request.
    #[error("cipher failed ({code}): {message}")]
    CipherFailed {
        /// Engine result code.
        code: DbErrorCode,
        /// Engine diagnostic message.
        message: String,
    },

    /// A configuration invocation failed; later configurations did not run.
    #[error("configuration `{name}` failed: {source}")]
    ConfigurationFailed {
        /// Name of the failing configuration.
        name: String,
        /// The error raised by the invocation.
        #[source]
        source: Box<DbError>,
    },

    /// A positional bind index was 0 or beyond the parameter count.
    #[error("bind index {index} out of range (statement has {count} parameters)")]
    BindIndexOutOfRange {
        /// The 1-based index that was requested.
        index: usize,
        /// The statement's parameter count.
        count: usize,
    },

    /// A named parameter does not occur in the statement.
    #[error("unknown parameter name `{0}`")]
    UnknownParameter(String),

    /// The API was used against its contract (e.g. a finalized statement).
    #[error("misuse: {0}")]
    Misuse(String),

    /// A single-row query produced no row.
    #[error("query returned no rows")]
    NoRows,

    /// Caller code aborted a configuration or transaction body.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl DbError {
    pub(crate) fn open(err: NativeError) -> Self {
        Self::OpenFailed {
            code: DbErrorCode(err.code),
            message: err.message,
        }
    }

    pub(crate) fn prepare(err: NativeError) -> Self {
        Self::PrepareFailed {
            code: DbErrorCode(err.code),
            message: err.message,
        }
    }

    pub(crate) fn step(err: NativeError) -> Self {
        Self::StepFailed {
            code: DbErrorCode(err.code),
            message: err.message,
        }
    }

    pub(crate) fn cipher(err: NativeError) -> Self {
        Self::CipherFailed {
            code: DbErrorCode(err.code),
            message: err.message,
        }
    }

    /// Builds an [`Aborted`](Self::Aborted) error from caller code.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    /// Returns the engine result code, if the error came from the engine.
    #[must_use]
    pub fn code(&self) -> Option<DbErrorCode> {
        match self {
            Self::OpenFailed { code, .. }
            | Self::PrepareFailed { code, .. }
            | Self::StepFailed { code, .. }
            | Self::CipherFailed { code, .. } => Some(*code),
            Self::ConfigurationFailed { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Returns `true` for programmer-contract violations. These are never
    /// worth retrying: the calling code has to change.
    #[must_use]
    pub const fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            Self::BindIndexOutOfRange { .. } | Self::UnknownParameter(_) | Self::Misuse(_)
        )
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
