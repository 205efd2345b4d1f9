//! Reception tracker
//!
//! Records which neighbor radios are known to hold which packets, learned
//! from acknowledgments, reception reports and the frames neighbors
//! transmit. Knowledge only grows while an entry is live; the sole way a
//! pair is forgotten is aging or capacity eviction.
//!
//! Pairs are keyed by the link address the evidence arrived from. A neighbor
//! with several radios holds a packet if any of its links does; see
//! [`ReceptionTracker::neighbor_has`].

use std::time::{Duration, Instant};

use cope_core::{Fingerprint, LinkAddr};
use tracing::debug;

use crate::cache::AgingMap;
use crate::neighbor::Neighbor;

#[derive(Debug)]
pub struct ReceptionTracker {
    known: AgingMap<(Fingerprint, LinkAddr), ()>,
}

impl ReceptionTracker {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            known: AgingMap::new(capacity, max_age),
        }
    }

    /// Mark `link` as holding `fingerprint`
    pub fn mark(&mut self, fingerprint: Fingerprint, link: LinkAddr, now: Instant) {
        self.known.insert((fingerprint, link), (), now);
    }

    pub fn knows(&self, fingerprint: Fingerprint, link: LinkAddr) -> bool {
        self.known.contains(&(fingerprint, link))
    }

    /// True if any radio of `neighbor` is known to hold `fingerprint`
    pub fn neighbor_has(&self, fingerprint: Fingerprint, neighbor: &Neighbor) -> bool {
        neighbor.links().any(|link| self.knows(fingerprint, link))
    }

    /// Clean up aged knowledge
    ///
    /// Returns the number of pairs removed.
    pub fn cleanup_expired(&mut self, now: Instant) -> usize {
        let removed = self.known.cleanup_expired(now);
        if removed > 0 {
            debug!(removed, remaining = self.known.len(), "Cleaned up reception records");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use cope_core::AddressTriple;

    use super::*;

    #[test]
    fn test_mark_is_monotonic() {
        let now = Instant::now();
        let mut tracker = ReceptionTracker::new(64, Duration::from_secs(10));
        let fp = Fingerprint(42);
        let link = LinkAddr::from_index(3);

        assert!(!tracker.knows(fp, link));
        tracker.mark(fp, link, now);
        tracker.mark(fp, link, now);
        assert!(tracker.knows(fp, link));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_neighbor_has_checks_every_radio() {
        let now = Instant::now();
        let mut tracker = ReceptionTracker::new(64, Duration::from_secs(10));
        let mut neighbor = Neighbor::new(AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, 2),
            LinkAddr::from_index(1),
            1,
        ));
        neighbor.add_soft_triple(AddressTriple::new(
            Ipv4Addr::new(10, 0, 1, 2),
            LinkAddr::from_index(2),
            6,
        ));

        tracker.mark(Fingerprint(7), LinkAddr::from_index(2), now);
        assert!(tracker.neighbor_has(Fingerprint(7), &neighbor));
        assert!(!tracker.neighbor_has(Fingerprint(8), &neighbor));
    }
}
