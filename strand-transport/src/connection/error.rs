//! Error types for connection operations.

use strand_core::{CodecError, TransportError};
use thiserror::Error;

/// Error returned by user callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The connect callback rejected the connection.
    #[error("handshake rejected: {0}")]
    Handshake(#[source] HandlerError),

    /// The connected callback failed after the loops started.
    #[error("connected callback failed: {0}")]
    Connected(#[source] HandlerError),

    /// The receive or ping callback failed.
    #[error("callback failed: {0}")]
    Callback(#[source] HandlerError),

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A header slot was already written, or written outside the connect phase.
    #[error("stream metadata can only be set once during connect")]
    MetadataLocked,

    /// The send queue is full (non-blocking send only).
    #[error("send queue is full")]
    QueueFull,

    /// The connection is draining and accepts no new messages.
    #[error("connection is draining")]
    Draining,

    /// The connection is closed.
    #[error("connection is closed")]
    Closed,
}

impl From<CodecError> for ConnectionError {
    fn from(error: CodecError) -> Self {
        ConnectionError::Transport(TransportError::Codec(error))
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
