//! Payload codec seam.
//!
//! The connection engine never looks inside application payloads. Transports
//! that need to turn typed messages into bytes do so through a
//! [`MessageCodec`], so deployments can swap JSON for protobuf, bincode or
//! anything else without touching the engine.
//!
//! ```rust
//! use strand_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Heartbeat {
//!     node: String,
//!     seq: u64,
//! }
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Heartbeat { node: "a".into(), seq: 3 }).unwrap();
//! let back: Heartbeat = codec.decode(&bytes).unwrap();
//! assert_eq!(back.seq, 3);
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Boxed error produced by a concrete serializer.
pub type BoxedCodecError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] BoxedCodecError),

    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] BoxedCodecError),
}

/// Pluggable message serialization format.
///
/// Codecs are shared between the receive and transmit loops of a connection,
/// which run on different tasks, hence the `Send + Sync` bounds.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable message to bytes.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Human-readable on the wire, which makes it the default for tests and
/// debugging sessions.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
