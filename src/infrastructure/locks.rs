//! Async locks keyed by id.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = Arc<DashMap<K, Arc<Mutex<()>>>>;

/// One async mutex per key, created on first use and dropped again once no
/// task holds or waits on it.
pub struct KeyedLocks<K: Eq + Hash> {
    locks: LockMap<K>,
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Eq + Hash> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
        }
    }
}

impl<K: Eq + Hash + Ord + Clone> KeyedLocks<K> {
    /// Acquires the locks of every key in `keys`, in ascending key order.
    /// Tasks locking overlapping sets therefore cannot deadlock.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = K>) -> KeyedGuard<K> {
        let keys: BTreeSet<K> = keys.into_iter().collect();
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            // The map shard is released before awaiting.
            let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
            held.push((key, lock.lock_owned().await));
        }
        KeyedGuard {
            locks: self.locks.clone(),
            held,
        }
    }

    /// Number of keys with a live lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Releases its keys on drop, in reverse acquisition order.
pub struct KeyedGuard<K: Eq + Hash> {
    locks: LockMap<K>,
    held: Vec<(K, OwnedMutexGuard<()>)>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.held.pop() {
            drop(guard);
            // Clones are only taken under the shard lock, so a count of one
            // means nobody else holds or waits on this key.
            self.locks
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
