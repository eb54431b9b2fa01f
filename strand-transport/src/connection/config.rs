//! Configuration structures for connection behavior.

use std::future::Future;
use std::time::Duration;

use strand_core::{TransportError, TransportResult};

/// Default capacity of the primary send queue.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the broadcast (prepared message) queue.
pub const DEFAULT_BROADCAST_QUEUE_CAPACITY: usize = 10;

/// Read and write deadlines for one connection.
///
/// `Duration::ZERO` disables the corresponding deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Upper bound on each message write, and on the close frame written
    /// during teardown.
    pub write_wait: Duration,

    /// How long the receive loop waits for the next inbound item. Also bounds
    /// the wait for the peer's header during the handshake.
    pub read_wait: Duration,

    /// Read deadline in effect right after a ping arrived.
    ///
    /// A peer that pings on an interval should ping again within this window.
    pub ping_wait: Duration,

    /// Upper bound on writing the pong that answers a ping.
    pub pong_wait: Duration,
}

impl KeepaliveConfig {
    /// No deadlines at all.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether every deadline is disabled.
    pub fn is_disabled(&self) -> bool {
        self.write_wait.is_zero()
            && self.read_wait.is_zero()
            && self.ping_wait.is_zero()
            && self.pong_wait.is_zero()
    }
}

/// Configuration for a duplex connection.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Capacity of the primary send queue. `send` blocks while it is full.
    pub send_queue_capacity: usize,

    /// Capacity of the queue holding prepared broadcast messages.
    pub broadcast_queue_capacity: usize,

    /// Read/write deadlines.
    pub keepalive: KeepaliveConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            broadcast_queue_capacity: DEFAULT_BROADCAST_QUEUE_CAPACITY,
            keepalive: KeepaliveConfig::disabled(),
        }
    }
}

impl ConnectionConfig {
    /// Set the primary send queue capacity (minimum 1).
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the broadcast queue capacity (minimum 1).
    pub fn with_broadcast_queue_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_queue_capacity = capacity.max(1);
        self
    }

    /// Replace the keep-alive deadlines.
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Create a configuration for low-latency local networking.
    pub fn local_network() -> Self {
        Self {
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            broadcast_queue_capacity: DEFAULT_BROADCAST_QUEUE_CAPACITY,
            keepalive: KeepaliveConfig {
                write_wait: Duration::from_secs(1),
                read_wait: Duration::from_secs(10),
                ping_wait: Duration::from_secs(10),
                pong_wait: Duration::from_secs(1),
            },
        }
    }

    /// Create a configuration for high-latency WAN networking.
    pub fn wan_network() -> Self {
        Self {
            send_queue_capacity: 1024,
            broadcast_queue_capacity: 64,
            keepalive: KeepaliveConfig {
                write_wait: Duration::from_secs(10),
                read_wait: Duration::from_secs(60),
                ping_wait: Duration::from_secs(60),
                pong_wait: Duration::from_secs(10),
            },
        }
    }
}

/// Run `operation` under `wait`, or unbounded when `wait` is zero.
pub(crate) async fn bounded<T, F>(wait: Duration, operation: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    if wait.is_zero() {
        return operation.await;
    }
    match tokio::time::timeout(wait, operation).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(wait)),
    }
}
