//! Error types for the engine boundary.

use std::io;
use thiserror::Error;

/// Result type for boundary calls.
pub type BoundaryResult<T> = Result<T, BoundaryError>;

/// Errors raised by an engine behind the boundary.
///
/// These are failures of the boundary call itself: the store could not be
/// opened, JSON did not decode, a query did not compile. Usage errors
/// (operating on a closed database, for example) are detected client-side
/// and never reach an engine; see the client crate's error type for those.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// The underlying store could not be opened or created.
    #[error("open failed: {message}")]
    OpenFailed {
        /// Description of the failure.
        message: String,
    },

    /// Another handle or process holds exclusive access to the store.
    #[error("database locked: another handle has exclusive access")]
    DatabaseLocked,

    /// The handle passed in is not registered with this engine.
    #[error("unknown {kind} handle")]
    NoSuchHandle {
        /// Resource kind the handle claimed to name.
        kind: &'static str,
    },

    /// I/O error from the underlying store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON text crossing the boundary failed to decode.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// The decoder's diagnostic.
        message: String,
    },

    /// Query source text failed to compile.
    #[error("query compile error: {message}")]
    QueryCompile {
        /// The compiler's diagnostic.
        message: String,
    },

    /// Persisted data could not be interpreted.
    #[error("storage corrupt: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted against this handle in its current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A replicator request could not be carried out.
    #[error("replicator error: {message}")]
    Replicator {
        /// Description of the failure.
        message: String,
    },
}

impl BoundaryError {
    /// Creates an open failure error.
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::OpenFailed {
            message: message.into(),
        }
    }

    /// Creates an unknown-handle error for the given resource kind.
    pub fn no_such_handle(kind: &'static str) -> Self {
        Self::NoSuchHandle { kind }
    }

    /// Creates an invalid JSON error.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Creates a query compile error.
    pub fn query_compile(message: impl Into<String>) -> Self {
        Self::QueryCompile {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a replicator error.
    pub fn replicator(message: impl Into<String>) -> Self {
        Self::Replicator {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BoundaryError::open_failed("permission denied");
        assert_eq!(err.to_string(), "open failed: permission denied");

        let err = BoundaryError::no_such_handle("query");
        assert_eq!(err.to_string(), "unknown query handle");

        let err = BoundaryError::DatabaseLocked;
        assert!(err.to_string().contains("exclusive access"));
    }

    #[test]
    fn query_compile_carries_diagnostic() {
        let err = BoundaryError::query_compile("unexpected token at line 1");
        assert!(err.to_string().contains("unexpected token"));
    }
}
