//! # strand-transport
//!
//! Node-to-node messaging building blocks over long-lived duplex streams.
//!
//! This crate provides:
//! - **Connection**: a duplex connection engine with a handshake, concurrent
//!   receive/transmit loops, bounded FIFO send queues, graceful or immediate
//!   close and lifecycle callbacks
//! - **Broadcast**: encode once, queue on many connections
//! - **Health**: readiness polling that reports connected/disconnected edges
//! - **Correlation**: pairing asynchronous replies with waiting callers
//! - **Registry**: keyed connection sets with random and round-robin picks
//! - **Wire format**: checksummed frames and a [`FramedTransport`] for any
//!   byte stream

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use strand_core::{
    CLOSED_BY_SERVER, CloseFrame, CodecError, ConnectionId, CorrelationId, Incoming, JsonCodec,
    MessageCodec, PreparedMessage, Readiness, Transport, TransportError, TransportResult,
};

// =============================================================================
// Modules
// =============================================================================

/// Duplex connection engine.
pub mod connection;

/// Readiness polling and health edges.
pub mod health;

/// Reply correlation.
pub mod rpc;

/// Keyed connection registry.
pub mod registry;

/// Checksummed frame format and the framed stream transport.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

// Connection exports
pub use connection::{
    BroadcastReport, CloseInitiator, CloseReason, Connection, ConnectionConfig, ConnectionError,
    ConnectionHandler, ConnectionMetrics, ConnectionResult, ConnectionState, HandlerError,
    KeepaliveConfig, Role, StreamMetadata, broadcast, broadcast_message,
};

// Health exports
pub use health::{HealthError, HealthEvent, HealthHandler, HealthMonitor, HealthState};

// Correlation exports
pub use rpc::{CallError, CorrelationError, Correlator};

// Registry exports
pub use registry::ConnectionRegistry;

// Wire format exports
pub use wire::{
    FrameKind, FramedTransport, HEADER_SIZE, MAX_PAYLOAD_SIZE, WireError, encode_frame,
    try_decode_frame,
};
