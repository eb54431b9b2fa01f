//! Duplex connection engine.
//!
//! A [`Connection`] wraps one [`strand_core::Transport`] and provides:
//! - connect-time header exchange and the connect/connected callbacks
//! - concurrent receive and transmit loops
//! - a bounded FIFO send queue plus a broadcast queue for prepared messages
//! - graceful (drain first) or immediate close, with a closed callback that
//!   runs exactly once
//! - optional read/write deadlines and ping/pong answering

mod broadcast;
mod config;
mod core;
mod error;
mod handler;
mod metrics;
mod queue;
mod state;

pub use broadcast::{BroadcastReport, broadcast, broadcast_message};
pub use config::{
    ConnectionConfig, DEFAULT_BROADCAST_QUEUE_CAPACITY, DEFAULT_SEND_QUEUE_CAPACITY,
    KeepaliveConfig,
};
pub use self::core::Connection;
pub use error::{ConnectionError, ConnectionResult, HandlerError};
pub use handler::ConnectionHandler;
pub use metrics::ConnectionMetrics;
pub use state::{CloseInitiator, CloseReason, ConnectionState, Role, StreamMetadata};
