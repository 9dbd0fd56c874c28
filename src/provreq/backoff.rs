//! Bounded least-recently-used map of ProvisioningRequest uid to the delay before next retry.

use std::num::NonZeroUsize;

use lru::LruCache;

pub struct BackoffCache {
    /// None when the cache is configured with zero capacity and remembers nothing.
    delays: Option<LruCache<String, f64>>,
}

impl BackoffCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            delays: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn get(&mut self, uid: &str) -> Option<f64> {
        self.delays.as_mut()?.get(uid).copied()
    }

    /// Inserts or replaces the delay, evicting the least recently used entry when full.
    pub fn add(&mut self, uid: &str, delay: f64) {
        if let Some(delays) = self.delays.as_mut() {
            delays.put(uid.to_string(), delay);
        }
    }

    pub fn remove(&mut self, uid: &str) {
        if let Some(delays) = self.delays.as_mut() {
            delays.pop(uid);
        }
    }

    pub fn len(&self) -> usize {
        self.delays.as_ref().map(LruCache::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
