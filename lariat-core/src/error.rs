use thiserror::Error;

use crate::types::{VmId, VmLifecycleState};

#[derive(Error, Debug)]
pub enum LariatError {
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid state transition for VM {vm}: '{requested}' is not legal from {from:?}")]
    InvalidStateTransition {
        vm: VmId,
        from: VmLifecycleState,
        requested: String,
    },

    #[error("State conflict: {message}")]
    StateConflict { message: String },

    #[error("Resource exhausted: {resource} requested {requested}, available {available}")]
    ResourceExhausted {
        resource: String,
        requested: u64,
        available: u64,
    },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Unsupported operation '{operation}': {reason}")]
    UnsupportedOperation { operation: String, reason: String },

    #[error("Transient failure: {details}")]
    TransientFailure { details: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("Hypervisor unavailable during '{operation}' after {attempts} attempts")]
    HypervisorUnavailable { operation: String, attempts: u32 },

    #[error("Hypervisor rejected '{operation}': {reason}")]
    HypervisorRejected { operation: String, reason: String },

    #[error("Corruption detected: {message}")]
    Corruption { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LariatError {
    /// Whether a hypervisor call failure may succeed on a later attempt.
    /// Timeouts count as transient for retry accounting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LariatError::TransientFailure { .. } | LariatError::Timeout { .. }
        )
    }
}

pub type LariatResult<T> = std::result::Result<T, LariatError>;
