//! Pairs asynchronous replies with the callers waiting for them.
//!
//! A caller allocates an id with a deadline, ships the id inside its request,
//! and waits on it. Whoever receives the reply (usually a receive callback on
//! another connection) delivers the value under the same id.
//!
//! # Lifecycle
//!
//! ```text
//! new_id(timeout) ──► pending ──set(value)──► resolved ──get──► value
//!                        │
//!                        ├── deadline passes ──► get/set: Timeout
//!                        └── cancel ──────────► get/set: Cancelled
//! ```
//!
//! `get` consumes the entry whatever the outcome. Entries nobody waits on
//! stay until [`Correlator::purge_expired`] (or the sweeper) removes them.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use strand_core::CorrelationId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{CallError, CorrelationError};

struct PendingReply<V> {
    deadline: Instant,
    cancelled: CancellationToken,
    sender: Mutex<Option<oneshot::Sender<V>>>,
    receiver: Mutex<Option<oneshot::Receiver<V>>>,
}

impl<V> PendingReply<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    fn is_awaited(&self) -> bool {
        self.receiver.lock().is_none()
    }
}

/// Removes the entry when the waiting `get` returns or is dropped.
struct ConsumeOnDrop<'a, V> {
    entries: &'a DashMap<CorrelationId, Arc<PendingReply<V>>>,
    id: &'a CorrelationId,
}

impl<V> Drop for ConsumeOnDrop<'_, V> {
    fn drop(&mut self) {
        self.entries.remove(self.id);
    }
}

/// Registry of pending replies keyed by [`CorrelationId`].
///
/// Safe to share between tasks; every operation takes `&self`.
pub struct Correlator<V> {
    entries: DashMap<CorrelationId, Arc<PendingReply<V>>>,
}

impl<V: Send + 'static> Default for Correlator<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + 'static> Correlator<V> {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Allocate a fresh id whose reply must arrive within `timeout`.
    pub fn new_id(&self, timeout: Duration) -> CorrelationId {
        let id = CorrelationId::generate();
        let (sender, receiver) = oneshot::channel();
        let entry = PendingReply {
            deadline: Instant::now() + timeout,
            cancelled: CancellationToken::new(),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        };
        self.entries.insert(id.clone(), Arc::new(entry));
        tracing::trace!(%id, ?timeout, "correlation id allocated");
        id
    }

    fn lookup(&self, id: &CorrelationId) -> Result<Arc<PendingReply<V>>, CorrelationError> {
        self.entries
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CorrelationError::NotFound { id: id.clone() })
    }

    /// Wait for the value delivered under `id`.
    ///
    /// Returns when the value arrives, the deadline passes, or the entry is
    /// cancelled, and removes the entry in every case. A value delivered
    /// before the deadline wins over a cancel or timeout observed at the same
    /// time. Call it at most once per id; a second concurrent call gets
    /// [`CorrelationError::NotFound`].
    pub async fn get(&self, id: &CorrelationId) -> Result<V, CorrelationError> {
        let entry = self.lookup(id)?;
        let Some(mut receiver) = entry.receiver.lock().take() else {
            return Err(CorrelationError::NotFound { id: id.clone() });
        };
        let _consume = ConsumeOnDrop {
            entries: &self.entries,
            id,
        };

        let failure = tokio::select! {
            biased;
            delivered = &mut receiver => match delivered {
                Ok(value) => return Ok(value),
                Err(_) => CorrelationError::Cancelled { id: id.clone() },
            },
            _ = entry.cancelled.cancelled() => CorrelationError::Cancelled { id: id.clone() },
            _ = tokio::time::sleep_until(entry.deadline) => CorrelationError::Timeout { id: id.clone() },
        };

        // Refuse late deliveries, but keep one that raced in just now.
        receiver.close();
        if let Ok(value) = receiver.try_recv() {
            return Ok(value);
        }
        tracing::debug!(%id, "reply not delivered: {}", failure);
        Err(failure)
    }

    /// Deliver `value` to the waiter on `id`. Never blocks.
    ///
    /// Fails if the id is unknown, expired, cancelled, or already resolved.
    /// At most one `set` per id succeeds.
    pub fn set(&self, id: &CorrelationId, value: V) -> Result<(), CorrelationError> {
        let entry = self.lookup(id)?;
        if entry.cancelled.is_cancelled() {
            return Err(CorrelationError::Cancelled { id: id.clone() });
        }
        if entry.is_expired(Instant::now()) {
            return Err(CorrelationError::Timeout { id: id.clone() });
        }

        let sender = entry
            .sender
            .lock()
            .take()
            .ok_or_else(|| CorrelationError::AlreadyResolved { id: id.clone() })?;

        // The waiter gave up between the checks above and now.
        sender.send(value).map_err(|_| {
            if entry.cancelled.is_cancelled() {
                CorrelationError::Cancelled { id: id.clone() }
            } else {
                CorrelationError::Timeout { id: id.clone() }
            }
        })
    }

    /// Abort the entry: a pending `get` returns
    /// [`CorrelationError::Cancelled`] and later `set` calls fail the same way.
    pub fn cancel(&self, id: &CorrelationId) -> Result<(), CorrelationError> {
        let entry = self.lookup(id)?;
        entry.cancelled.cancel();
        tracing::trace!(%id, "correlation cancelled");
        Ok(())
    }

    /// Allocate an id, hand it to `send`, and wait for the reply.
    ///
    /// If `send` fails the entry is discarded and the send error returned.
    pub async fn call<F, Fut, E>(&self, timeout: Duration, send: F) -> Result<V, CallError<E>>
    where
        F: FnOnce(CorrelationId) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let id = self.new_id(timeout);
        if let Err(err) = send(id.clone()).await {
            self.entries.remove(&id);
            return Err(CallError::Send(err));
        }
        self.get(&id).await.map_err(CallError::Reply)
    }

    /// Drop entries that expired or were cancelled and that nobody is
    /// waiting on. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.is_awaited() || !(entry.is_expired(now) || entry.cancelled.is_cancelled())
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "purged stale correlation entries");
        }
        removed
    }

    /// Number of entries (pending, resolved but not yet collected, or stale).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`Correlator::purge_expired`] every `period` until `stop` fires or
    /// the correlator is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let correlator: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(correlator) = correlator.upgrade() else { break };
                        correlator.purge_expired();
                    }
                }
            }
        })
    }
}
