//! Bounded, aging key-value store backing the packet pool and the
//! reception tracker.
//!
//! Entries are kept in first-insertion order. Inserting past capacity evicts
//! the oldest entry; [`AgingMap::cleanup_expired`] drops everything older
//! than the configured age. Re-inserting an existing key is a no-op and does
//! not refresh its age.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug)]
pub(crate) struct AgingMap<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: VecDeque<K>,
    capacity: usize,
    max_age: Duration,
}

impl<K: Copy + Eq + Hash, V> AgingMap<K, V> {
    pub(crate) fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            max_age,
        }
    }

    /// Returns false if `key` was already present
    pub(crate) fn insert(&mut self, key: K, value: V, now: Instant) -> bool {
        if self.entries.contains_key(&key) || self.capacity == 0 {
            return false;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.entries.insert(
            key,
            Slot {
                value,
                inserted_at: now,
            },
        );
        self.order.push_back(key);
        true
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop entries older than the configured age; returns how many
    pub(crate) fn cleanup_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(key) = self.order.front() {
            let expired = self
                .entries
                .get(key)
                .is_none_or(|slot| now.saturating_duration_since(slot.inserted_at) >= self.max_age);
            if !expired {
                break;
            }
            if let Some(key) = self.order.pop_front() {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
