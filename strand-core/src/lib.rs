//! # strand-core
//!
//! Shared abstractions for the strand node-to-node messaging layer.
//!
//! - **[`Transport`]**: the duplex stream primitive the connection engine
//!   drives (send, receive, header exchange, close)
//! - **[`Readiness`]**: raw link state polled by the health monitor
//! - **[`MessageCodec`]**: pluggable payload serialization
//! - **Identifiers**: [`ConnectionId`] and [`CorrelationId`]

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod readiness;
mod transport;
mod types;

pub use codec::{BoxedCodecError, CodecError, JsonCodec, MessageCodec};
pub use readiness::Readiness;
pub use transport::{
    CLOSED_BY_SERVER, CloseFrame, Incoming, PreparedMessage, Transport, TransportError,
    TransportResult,
};
pub use types::{ConnectionId, CorrelationId};
