//! Keyed registry of live connections with random and round-robin selection.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rand::Rng;
use tokio_util::sync::CancellationToken;

struct Registered<V> {
    value: V,
    token: CancellationToken,
}

/// Concurrent map from key to connection (or any cloneable handle).
///
/// Each registration comes with a [`CancellationToken`] for the background
/// work tied to that entry (a heartbeat, a lease). Replacing or removing the
/// entry cancels its token.
///
/// Keys are also kept in insertion order for [`ConnectionRegistry::random`]
/// and [`ConnectionRegistry::round_robin`].
pub struct ConnectionRegistry<K, V> {
    entries: DashMap<K, Registered<V>>,
    order: RwLock<Vec<K>>,
    cursor: AtomicUsize,
}

impl<K, V> Default for ConnectionRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConnectionRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Insert or replace the entry for `key`.
    ///
    /// A replaced entry's token is cancelled before the new entry becomes
    /// visible. Returns the new entry's token.
    pub fn register(&self, key: K, value: V) -> CancellationToken {
        let token = CancellationToken::new();
        let registered = Registered {
            value,
            token: token.clone(),
        };

        // Lock order: `order` first, then a shard. Holding `order` across
        // both updates keeps the index and the map in step.
        let mut order = self.order.write();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().token.cancel();
                occupied.insert(registered);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(registered);
                order.push(key);
            }
        }
        token
    }

    /// Remove `key`, cancelling its token.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut order = self.order.write();
        let removed = self.entries.remove(key);
        if removed.is_some() {
            order.retain(|k| k != key);
        }
        drop(order);
        removed.map(|(_, registered)| {
            registered.token.cancel();
            registered.value
        })
    }

    /// Value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.order.read().clone()
    }

    /// Values in key insertion order.
    pub fn values(&self) -> Vec<V> {
        self.keys().iter().filter_map(|key| self.get(key)).collect()
    }

    /// A uniformly random entry.
    pub fn random(&self) -> Option<(K, V)> {
        let key = {
            let order = self.order.read();
            if order.is_empty() {
                return None;
            }
            let index = rand::rng().random_range(0..order.len());
            order[index].clone()
        };
        self.get(&key).map(|value| (key, value))
    }

    /// The next entry in rotation.
    pub fn round_robin(&self) -> Option<(K, V)> {
        let key = {
            let order = self.order.read();
            if order.is_empty() {
                return None;
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % order.len();
            order[index].clone()
        };
        self.get(&key).map(|value| (key, value))
    }

    /// Whether `key` stays registered across `checks` probes spaced `interval`
    /// apart. Filters out entries that are flapping in and out.
    pub async fn contains_stable(&self, key: &K, interval: Duration, checks: usize) -> bool {
        for check in 0..checks.max(1) {
            if check > 0 {
                tokio::time::sleep(interval).await;
            }
            if !self.contains(key) {
                return false;
            }
        }
        true
    }
}
