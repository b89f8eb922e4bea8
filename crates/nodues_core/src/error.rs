//! crates/nodues_core/src/error.rs
//!
//! The error type returned by the clearance workflows.

use crate::domain::ClearanceStatus;
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    /// Nothing to show yet; callers render this as an empty state.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required selection or argument is missing or malformed. Raised before any write.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Cannot move an entry from {from} to {to}")]
    InvalidTransition {
        from: ClearanceStatus,
        to: ClearanceStatus,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Another writer changed the record and re-applying did not converge.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Already assigned: {0}")]
    AlreadyAssigned(String),

    #[error("Store error: {0}")]
    Store(PortError),
}

impl From<PortError> for ClearanceError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => ClearanceError::NotFound(what),
            PortError::Conflict(what) => ClearanceError::WriteConflict(what),
            other => ClearanceError::Store(other),
        }
    }
}

pub type ClearanceResult<T> = Result<T, ClearanceError>;
