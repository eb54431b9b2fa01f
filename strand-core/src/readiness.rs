//! Readiness sources for the health monitor.
//!
//! A [`Readiness`] source answers one question: is the underlying link usable
//! right now? Anything finer grained (connecting, transient failure, shutting
//! down) collapses to "not ready".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Raw readiness state of a connection-like object.
pub trait Readiness: Send + Sync + 'static {
    /// `true` when the link can carry traffic.
    fn is_ready(&self) -> bool;
}

impl Readiness for AtomicBool {
    fn is_ready(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<R: Readiness + ?Sized> Readiness for Arc<R> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}
