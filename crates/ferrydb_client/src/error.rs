//! Error types for the client object model.

use ferrydb_boundary::BoundaryError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the object model.
///
/// Usage errors are detected client-side, before any engine call is made,
/// and are never retried. Boundary errors come from the engine itself and
/// pass through unchanged.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Operation attempted on a closed or deleted database, or on an
    /// invalidated document, query, or replicator.
    #[error("invalid state: {message}")]
    InvalidState {
        /// What was attempted and why it is invalid.
        message: String,
    },

    /// The engine boundary call failed.
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
}

impl ClientError {
    /// Creates a usage error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns true for usage errors.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display() {
        let err = ClientError::invalid_state("cannot close a closed database");
        assert!(err.is_invalid_state());
        assert_eq!(
            err.to_string(),
            "invalid state: cannot close a closed database"
        );
    }

    #[test]
    fn boundary_errors_pass_through() {
        let err = ClientError::from(BoundaryError::open_failed("no permission"));
        assert!(!err.is_invalid_state());
        assert_eq!(err.to_string(), "open failed: no permission");
    }
}
