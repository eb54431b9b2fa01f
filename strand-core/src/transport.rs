//! Transport abstraction consumed by the connection engine.
//!
//! A [`Transport`] is one live duplex stream: an RPC stream, a WebSocket, or
//! a framed TCP socket. The engine drives it from two tasks at once (one
//! reading, one writing), so every method takes `&self` and implementations
//! keep their read and write halves behind separate locks.
//!
//! Besides plain messages a transport carries:
//! - a header blob in each direction at connect time,
//! - ping/pong control payloads for keep-alive,
//! - an optional [`CloseFrame`] at teardown,
//! - [`PreparedMessage`]s: payloads encoded once and written verbatim to many
//!   connections.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::codec::CodecError;

/// Close code used when the local (server) side ends a connection.
pub const CLOSED_BY_SERVER: u16 = 4000;

/// Code plus human-readable reason attached to a connection teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Numeric close code.
    pub code: u16,
    /// Reason text, carried to the peer as the trailer.
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame with an explicit code.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close frame with the [`CLOSED_BY_SERVER`] code.
    pub fn closed_by_server(reason: impl Into<String>) -> Self {
        Self::new(CLOSED_BY_SERVER, reason)
    }
}

impl std::fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

/// A payload already encoded into its transport-level form.
///
/// Cloning is cheap (reference counted), so one prepared message can sit in
/// the broadcast queues of many connections at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    frame: Bytes,
}

impl PreparedMessage {
    /// Wrap already-encoded bytes.
    pub fn new(frame: impl Into<Bytes>) -> Self {
        Self {
            frame: frame.into(),
        }
    }

    /// Encoded bytes, exactly as they go on the wire.
    pub fn as_bytes(&self) -> &Bytes {
        &self.frame
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    /// Whether the encoded form is empty.
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}

/// One inbound item read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming<M> {
    /// An application message.
    Message(M),
    /// Keep-alive probe from the peer.
    Ping(Bytes),
    /// Answer to one of our pings.
    Pong(Bytes),
}

/// Errors surfaced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer finished the stream cleanly, optionally with a close frame.
    #[error("end of stream")]
    EndOfStream(Option<CloseFrame>),

    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent something that violates the framing protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Payload encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The transport was already closed locally.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether this is the expected end-of-stream signal rather than a failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TransportError::EndOfStream(_))
    }

    /// Close frame the peer attached to its end of stream, if any.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        match self {
            TransportError::EndOfStream(frame) => frame.as_ref(),
            _ => None,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A live duplex stream the connection engine can drive.
///
/// `receive` and the `send*` methods are called concurrently from different
/// tasks; `close` is called exactly once by the engine, after both loops have
/// stopped.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Messages written by the local side.
    type Outbound: Send + 'static;
    /// Messages read from the peer.
    type Inbound: Send + 'static;

    /// Write one message.
    async fn send(&self, message: Self::Outbound) -> TransportResult<()>;

    /// Write a payload produced by [`Transport::prepare`].
    async fn send_prepared(&self, prepared: &PreparedMessage) -> TransportResult<()>;

    /// Answer a ping. Transports without keep-alive frames ignore this.
    async fn send_pong(&self, _payload: Bytes) -> TransportResult<()> {
        Ok(())
    }

    /// Read the next inbound item.
    ///
    /// A clean shutdown by the peer is reported as
    /// [`TransportError::EndOfStream`].
    async fn receive(&self) -> TransportResult<Incoming<Self::Inbound>>;

    /// Send the local header blob.
    async fn send_header(&self, header: Bytes) -> TransportResult<()>;

    /// Wait for the peer's header blob.
    async fn receive_header(&self) -> TransportResult<Bytes>;

    /// Release the stream, optionally telling the peer why.
    async fn close(&self, frame: Option<CloseFrame>) -> TransportResult<()>;

    /// Encode a raw payload once so it can be fanned out to many connections
    /// of this transport type.
    fn prepare(payload: &[u8]) -> TransportResult<PreparedMessage>
    where
        Self: Sized;
}
