//! Bounded set of idempotency keys for outbound messages
//!
//! Eviction is by insertion order: when the cap is exceeded the oldest half
//! is dropped. Lookups do not refresh a key, so this is not an LRU.

use std::collections::{HashSet, VecDeque};

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            keys: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Returns false if the key was already present
    pub fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());

        if self.order.len() > self.capacity {
            let evict = self.order.len() / 2;
            for old in self.order.drain(..evict) {
                self.keys.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_insert() {
        let mut cache = DedupCache::new(10);
        assert!(cache.insert("bet-1"));
        assert!(!cache.insert("bet-1"));
        assert!(cache.contains("bet-1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overflow_evicts_oldest_half() {
        let capacity = 1000;
        let mut cache = DedupCache::new(capacity);
        for i in 0..=capacity {
            cache.insert(&format!("key-{i}"));
            assert!(cache.len() <= capacity);
        }
        assert!(cache.len() >= capacity / 2 - 1 && cache.len() <= capacity / 2 + 1);
        assert!(!cache.contains("key-0"));
        assert!(cache.contains(&format!("key-{capacity}")));
    }

    #[test]
    fn test_evicted_key_can_be_reinserted() {
        let mut cache = DedupCache::new(4);
        for key in ["a", "b", "c", "d", "e"] {
            cache.insert(key);
        }
        assert!(!cache.contains("a"));
        assert!(cache.insert("a"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = DedupCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(cache.is_empty());
    }
}
