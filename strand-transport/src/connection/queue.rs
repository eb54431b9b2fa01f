//! Bounded send queues and the pending-message counter.

use std::sync::atomic::{AtomicUsize, Ordering};

use strand_core::PreparedMessage;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::config::ConnectionConfig;

/// Counts messages accepted by `send` and not yet written.
///
/// Incremented before the enqueue, decremented after a successful write, so a
/// graceful close that observes zero knows nothing is in flight.
#[derive(Debug, Default)]
pub(crate) struct PendingCounter {
    count: AtomicUsize,
    drained: Notify,
}

impl PendingCounter {
    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until the count reaches zero or `stop` fires.
    pub(crate) async fn wait_drained(&self, stop: &CancellationToken) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a decrement in between is not missed.
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = stop.cancelled() => return,
            }
        }
    }
}

/// Item taken off the queues by the transmit loop.
pub(crate) enum Outgoing<M> {
    Message(M),
    Prepared(PreparedMessage),
}

pub(crate) struct SendQueues<M> {
    pub(crate) primary: mpsc::Sender<M>,
    pub(crate) broadcast: mpsc::Sender<PreparedMessage>,
}

pub(crate) struct QueueReceivers<M> {
    primary: mpsc::Receiver<M>,
    broadcast: mpsc::Receiver<PreparedMessage>,
}

impl<M> QueueReceivers<M> {
    /// Next item from either queue; `None` once both are closed and empty.
    ///
    /// Each queue is FIFO; there is no ordering between the two.
    pub(crate) async fn next(&mut self) -> Option<Outgoing<M>> {
        tokio::select! {
            Some(message) = self.primary.recv() => Some(Outgoing::Message(message)),
            Some(prepared) = self.broadcast.recv() => Some(Outgoing::Prepared(prepared)),
            else => None,
        }
    }
}

pub(crate) fn channels<M>(config: &ConnectionConfig) -> (SendQueues<M>, QueueReceivers<M>) {
    let (primary_tx, primary_rx) = mpsc::channel(config.send_queue_capacity.max(1));
    let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue_capacity.max(1));
    (
        SendQueues {
            primary: primary_tx,
            broadcast: broadcast_tx,
        },
        QueueReceivers {
            primary: primary_rx,
            broadcast: broadcast_rx,
        },
    )
}
