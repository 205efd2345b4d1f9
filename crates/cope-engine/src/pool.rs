//! Packet pool
//!
//! Recently sent, overheard and decoded payloads, keyed by fingerprint. The
//! pool is the operand supply for decoding: a coded frame is recoverable when
//! all but one of its mixed packets are here.

use std::time::{Duration, Instant};

use bytes::Bytes;
use cope_core::Fingerprint;
use tracing::debug;

use crate::cache::AgingMap;

#[derive(Debug)]
pub struct PacketPool {
    packets: AgingMap<Fingerprint, Bytes>,
}

impl PacketPool {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            packets: AgingMap::new(capacity, max_age),
        }
    }

    /// Store a payload; returns false if the fingerprint is already pooled
    pub fn insert(&mut self, fingerprint: Fingerprint, payload: Bytes, now: Instant) -> bool {
        self.packets.insert(fingerprint, payload, now)
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<&Bytes> {
        self.packets.get(&fingerprint)
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.packets.contains(&fingerprint)
    }

    /// Clean up aged payloads
    ///
    /// Returns the number of payloads removed.
    pub fn cleanup_expired(&mut self, now: Instant) -> usize {
        let removed = self.packets.cleanup_expired(now);
        if removed > 0 {
            debug!(removed, remaining = self.packets.len(), "Cleaned up pooled packets");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let now = Instant::now();
        let mut pool = PacketPool::new(16, Duration::from_secs(1));
        let fp = Fingerprint::of(b"payload");
        assert!(pool.insert(fp, Bytes::from_static(b"payload"), now));
        assert!(!pool.insert(fp, Bytes::from_static(b"payload"), now));
        assert_eq!(pool.get(fp).unwrap(), &Bytes::from_static(b"payload"));
        assert!(pool.get(Fingerprint(0)).is_none());
    }

    #[test]
    fn test_aged_payloads_are_dropped() {
        let now = Instant::now();
        let mut pool = PacketPool::new(16, Duration::from_millis(10));
        pool.insert(Fingerprint(1), Bytes::from_static(b"x"), now);
        assert_eq!(pool.cleanup_expired(now + Duration::from_millis(20)), 1);
        assert!(pool.is_empty());
    }
}
