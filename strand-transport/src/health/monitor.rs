//! Background readiness polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use strand_core::Readiness;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{HealthEvent, HealthState};

/// Callbacks fired on health edges. Both default to no-ops.
pub trait HealthHandler: Send + Sync + 'static {
    /// The link became ready.
    fn on_connected(&self, _reconnect: bool) {}

    /// The link stopped being ready, or the monitor was stopped while it was.
    fn on_disconnected(&self, _closed_by_user: bool) {}
}

/// Errors from [`HealthMonitor::spawn`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    /// The poll interval must be positive.
    #[error("health poll interval must be positive, got {0:?}")]
    InvalidInterval(Duration),
}

/// Polls a [`Readiness`] source on an interval and reports edges to a
/// [`HealthHandler`].
///
/// The first poll happens immediately. Ticks missed while a callback runs
/// are delayed rather than bunched.
pub struct HealthMonitor {
    stop: CancellationToken,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Start polling `source` every `interval`.
    pub fn spawn<R, H>(source: R, handler: H, interval: Duration) -> Result<Self, HealthError>
    where
        R: Readiness,
        H: HealthHandler,
    {
        if interval.is_zero() {
            return Err(HealthError::InvalidInterval(interval));
        }

        let stop = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(poll_readiness(
            source,
            handler,
            interval,
            stop.clone(),
            connected.clone(),
        ));

        Ok(Self {
            stop,
            connected,
            task: Mutex::new(Some(task)),
        })
    }

    /// Whether the last poll saw the link ready.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether [`HealthMonitor::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stop polling and wait for the task to finish.
    ///
    /// If the link was connected, the handler sees one final
    /// `on_disconnected(true)`. Idempotent.
    pub async fn stop(&self) {
        self.stop.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn poll_readiness<R, H>(
    source: R,
    handler: H,
    interval: Duration,
    stop: CancellationToken,
    connected: Arc<AtomicBool>,
) where
    R: Readiness,
    H: HealthHandler,
{
    let mut state = HealthState::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                if let Some(event) = state.stop() {
                    dispatch(&handler, &connected, event);
                }
                break;
            }
            _ = ticker.tick() => {
                if let Some(event) = state.observe(source.is_ready()) {
                    dispatch(&handler, &connected, event);
                }
            }
        }
    }
    tracing::debug!("health monitor stopped");
}

fn dispatch<H: HealthHandler>(handler: &H, connected: &AtomicBool, event: HealthEvent) {
    tracing::debug!(?event, "health edge");
    match event {
        HealthEvent::Connected { reconnect } => {
            connected.store(true, Ordering::Release);
            handler.on_connected(reconnect);
        }
        HealthEvent::Disconnected { closed_by_user } => {
            connected.store(false, Ordering::Release);
            handler.on_disconnected(closed_by_user);
        }
    }
}
