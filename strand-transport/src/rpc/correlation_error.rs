//! Error types for reply correlation.
//!
//! - No pending entry for the id ([`CorrelationError::NotFound`])
//! - The deadline passed ([`CorrelationError::Timeout`])
//! - The waiter was cancelled ([`CorrelationError::Cancelled`])
//! - A value was already delivered ([`CorrelationError::AlreadyResolved`])

use serde::{Deserialize, Serialize};
use strand_core::CorrelationId;

/// Errors from [`super::Correlator`] operations.
///
/// Serializable so a responder can report the outcome back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationError {
    /// No pending entry has this id: never created, already consumed, or
    /// purged after expiring.
    NotFound {
        /// The id that was looked up.
        id: CorrelationId,
    },

    /// The entry's deadline passed before a value arrived.
    Timeout {
        /// The expired id.
        id: CorrelationId,
    },

    /// The entry was cancelled.
    Cancelled {
        /// The cancelled id.
        id: CorrelationId,
    },

    /// A value was already delivered for this id.
    AlreadyResolved {
        /// The resolved id.
        id: CorrelationId,
    },
}

impl CorrelationError {
    /// The id this error is about.
    pub fn id(&self) -> &CorrelationId {
        match self {
            CorrelationError::NotFound { id }
            | CorrelationError::Timeout { id }
            | CorrelationError::Cancelled { id }
            | CorrelationError::AlreadyResolved { id } => id,
        }
    }
}

impl std::fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationError::NotFound { id } => write!(f, "no pending reply for {}", id),
            CorrelationError::Timeout { id } => write!(f, "reply {} timed out", id),
            CorrelationError::Cancelled { id } => write!(f, "reply {} was cancelled", id),
            CorrelationError::AlreadyResolved { id } => {
                write!(f, "reply {} was already delivered", id)
            }
        }
    }
}

impl std::error::Error for CorrelationError {}
