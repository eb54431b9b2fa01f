//! Per-connection counters.

use std::time::Duration;

use tokio::time::Instant;

/// Traffic counters and timestamps for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    /// Messages accepted into the primary send queue
    pub messages_queued: u64,

    /// Messages written to the transport (primary queue)
    pub messages_sent: u64,

    /// Prepared broadcast messages written to the transport
    pub prepared_sent: u64,

    /// Messages delivered to the receive callback
    pub messages_received: u64,

    /// Pings received from the peer
    pub pings_received: u64,

    /// Pongs written back
    pub pongs_sent: u64,

    /// Callback invocations that returned an error
    pub callback_errors: u64,

    /// When the connection object was created
    pub opened_at: Instant,

    /// When the handshake completed
    pub activated_at: Option<Instant>,

    /// When the connection reached `Closed`
    pub closed_at: Option<Instant>,
}

impl ConnectionMetrics {
    pub(crate) fn new_at(opened_at: Instant) -> Self {
        Self {
            messages_queued: 0,
            messages_sent: 0,
            prepared_sent: 0,
            messages_received: 0,
            pings_received: 0,
            pongs_sent: 0,
            callback_errors: 0,
            opened_at,
            activated_at: None,
            closed_at: None,
        }
    }

    pub(crate) fn record_queued(&mut self) {
        self.messages_queued += 1;
    }

    pub(crate) fn record_sent(&mut self, prepared: bool) {
        if prepared {
            self.prepared_sent += 1;
        } else {
            self.messages_sent += 1;
        }
    }

    pub(crate) fn record_received(&mut self) {
        self.messages_received += 1;
    }

    pub(crate) fn record_ping(&mut self, answered: bool) {
        self.pings_received += 1;
        if answered {
            self.pongs_sent += 1;
        }
    }

    pub(crate) fn record_callback_error(&mut self) {
        self.callback_errors += 1;
    }

    /// Time spent between handshake completion and close (or `now`).
    pub fn active_duration(&self, now: Instant) -> Duration {
        match self.activated_at {
            Some(start) => self.closed_at.unwrap_or(now).saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }
}
