//! Error types for modeltx core.

use crate::lock::LockError;
use crate::model::EntityId;
use crate::status::{Status, StatusCode};
use crate::types::{ResourceId, TransactionId};
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in modeltx core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The model was modified without an active write transaction on the
    /// calling thread.
    #[error("cannot modify the model without a write transaction")]
    IllegalWrite,

    /// A write arrived from a thread that does not own the active write
    /// transaction. The owning transaction has been aborted.
    #[error("concurrent write detected while {transaction} is active on another thread")]
    ConcurrentWrite {
        /// The write transaction that was aborted.
        transaction: TransactionId,
    },

    /// A transaction was touched from a thread that does not own it.
    #[error("{transaction} is owned by another thread")]
    WrongThread {
        /// The transaction that was accessed.
        transaction: TransactionId,
    },

    /// Operation not permitted in the current transaction state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of why the operation is illegal.
        message: String,
    },

    /// The activation or nesting protocol was violated.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    /// The transaction was rolled back instead of committing.
    #[error("transaction rolled back: {status}")]
    RolledBack {
        /// Why the rollback happened.
        status: Status,
    },

    /// The thread was interrupted while waiting for the domain lock.
    #[error("interrupted while waiting for the domain lock")]
    Interrupted,

    /// The domain lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for the domain lock")]
    LockTimeout {
        /// How long the thread waited.
        waited: Duration,
    },

    /// Lock contract violation.
    #[error("lock error: {0}")]
    Lock(LockError),

    /// Entity not found.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Resource not found.
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// The slot does not support the requested operation.
    #[error("invalid slot {slot}: {message}")]
    InvalidSlot {
        /// Slot name.
        slot: String,
        /// Description of the problem.
        message: String,
    },

    /// A list index was out of range.
    #[error("index {index} out of bounds for slot {slot} of length {len}")]
    IndexOutOfBounds {
        /// Slot name.
        slot: String,
        /// Requested index.
        index: usize,
        /// Current length.
        len: usize,
    },

    /// A command failed to execute.
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of the failure.
        message: String,
    },
}

impl From<LockError> for CoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Interrupted => Self::Interrupted,
            LockError::Timeout { waited } => Self::LockTimeout { waited },
            other => Self::Lock(other),
        }
    }
}

impl CoreError {
    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid slot error.
    pub fn invalid_slot(slot: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSlot {
            slot: slot.into(),
            message: message.into(),
        }
    }

    /// Creates a command failed error.
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Check if this error is a programming error that callers should not
    /// try to recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::IllegalWrite
                | CoreError::WrongThread { .. }
                | CoreError::IllegalState { .. }
                | CoreError::ProtocolViolation { .. }
                | CoreError::Lock(_)
        )
    }

    /// Check if this error reports a rollback.
    pub fn is_rollback(&self) -> bool {
        matches!(self, CoreError::RolledBack { .. })
    }

    /// Returns the status that a rollback caused by this error carries.
    pub fn rollback_status(&self) -> Status {
        match self {
            CoreError::RolledBack { status } => status.clone(),
            CoreError::ConcurrentWrite { .. } => {
                Status::error(StatusCode::ConcurrentWrite, self.to_string())
            }
            CoreError::CommandFailed { .. } => {
                Status::error(StatusCode::TriggerFailed, self.to_string())
            }
            other => Status::error(StatusCode::Aborted, other.to_string()),
        }
    }
}
