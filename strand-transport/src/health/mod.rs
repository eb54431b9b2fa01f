//! Connection health monitoring.
//!
//! Collapses the raw readiness of a link into two edges, connected and
//! disconnected, and reports each edge once. See [`HealthMonitor`].

mod monitor;

pub use monitor::{HealthError, HealthHandler, HealthMonitor};

/// An edge in a link's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// The link became ready.
    Connected {
        /// `false` the first time, `true` after any earlier disconnect.
        reconnect: bool,
    },
    /// The link stopped being ready.
    Disconnected {
        /// `true` when caused by stopping the monitor, `false` when the link
        /// itself dropped.
        closed_by_user: bool,
    },
}

/// Edge detector behind [`HealthMonitor`].
///
/// Feed it readiness observations; it returns an event only when the
/// connected/disconnected bucket changes.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    connected: bool,
    ever_connected: bool,
    stopped: bool,
}

impl HealthState {
    /// Fresh detector: disconnected, never connected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one readiness observation.
    pub fn observe(&mut self, ready: bool) -> Option<HealthEvent> {
        if self.stopped || ready == self.connected {
            return None;
        }
        self.connected = ready;
        if ready {
            let reconnect = self.ever_connected;
            self.ever_connected = true;
            Some(HealthEvent::Connected { reconnect })
        } else {
            Some(HealthEvent::Disconnected {
                closed_by_user: false,
            })
        }
    }

    /// Stop observing. Yields a final user-initiated disconnect if currently
    /// connected; later observations are ignored.
    pub fn stop(&mut self) -> Option<HealthEvent> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        if self.connected {
            self.connected = false;
            Some(HealthEvent::Disconnected {
                closed_by_user: true,
            })
        } else {
            None
        }
    }

    /// Whether the last observation was ready.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether [`HealthState::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
