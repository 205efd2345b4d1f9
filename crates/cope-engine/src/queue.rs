//! Output and retransmission queues
//!
//! A [`PacketQueue`] is a bounded FIFO of [`QueueEntry`] values that rejects
//! a second entry with the same fingerprint. Entries live in a slab so their
//! slot never moves while queued: neighbors keep [`EntryHandle`]s into the
//! output queue (their virtual queues) and those stay valid across any
//! push, pop or erase of *other* entries.
//!
//! A handle carries the fingerprint it was issued for. A slab slot can be
//! reused after its entry leaves, so every lookup checks the stored
//! fingerprint and a stale handle simply resolves to nothing.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use cope_core::{Fingerprint, InterfaceId, LinkAddr};
use slab::Slab;

use crate::error::QueueError;

/// Queue entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Data,
    Hello,
}

/// A packet handed down by the network layer for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub payload: Bytes,
    pub src_link: LinkAddr,
    pub dest_link: LinkAddr,
    pub src_net: Ipv4Addr,
    pub dest_net: Ipv4Addr,
    pub iface: InterfaceId,
}

/// One pending transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub payload: Bytes,
    pub src_link: LinkAddr,
    pub dest_link: LinkAddr,
    pub src_net: Ipv4Addr,
    pub dest_net: Ipv4Addr,
    pub fingerprint: Fingerprint,
    pub iface: InterfaceId,
    pub class: EntryClass,
    pub retries: u8,
}

impl QueueEntry {
    /// Wrap a network-layer packet, fingerprinting its payload
    pub fn data(packet: OutboundPacket) -> Self {
        Self {
            fingerprint: Fingerprint::of(&packet.payload),
            payload: packet.payload,
            src_link: packet.src_link,
            dest_link: packet.dest_link,
            src_net: packet.src_net,
            dest_net: packet.dest_net,
            iface: packet.iface,
            class: EntryClass::Data,
            retries: 0,
        }
    }

    /// A hello advertisement to broadcast on `iface`.
    ///
    /// Every interface advertises the same triples, so the interface index is
    /// folded into the fingerprint to keep per-interface hellos distinct.
    pub fn hello(iface: InterfaceId, src_link: LinkAddr, src_net: Ipv4Addr, body: Bytes) -> Self {
        let mut keyed = BytesMut::with_capacity(4 + body.len());
        keyed.put_u32(iface.0);
        keyed.put_slice(&body);
        Self {
            fingerprint: Fingerprint::of(&keyed),
            payload: body,
            src_link,
            dest_link: LinkAddr::BROADCAST,
            src_net,
            dest_net: Ipv4Addr::BROADCAST,
            iface,
            class: EntryClass::Hello,
            retries: 0,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest_link.is_broadcast()
    }

    pub fn is_hello(&self) -> bool {
        self.class == EntryClass::Hello
    }

    /// True once the entry has used up its retransmissions
    pub fn hit_max(&self, max_retries: u8) -> bool {
        self.retries >= max_retries
    }
}

/// Stable reference to an entry in a [`PacketQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    slot: usize,
    fingerprint: Fingerprint,
}

impl EntryHandle {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// Bounded FIFO with duplicate-fingerprint rejection
#[derive(Debug)]
pub struct PacketQueue {
    entries: Slab<QueueEntry>,
    order: VecDeque<usize>,
    by_fingerprint: HashMap<Fingerprint, usize>,
    capacity: usize,
}

impl PacketQueue {
    /// Default output queue bound
    pub const DEFAULT_CAPACITY: usize = 800;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Slab::new(),
            order: VecDeque::new(),
            by_fingerprint: HashMap::new(),
            capacity,
        }
    }

    pub fn push_back(&mut self, entry: QueueEntry) -> Result<EntryHandle, QueueError> {
        let handle = self.admit(entry)?;
        self.order.push_back(handle.slot);
        Ok(handle)
    }

    /// Insert ahead of everything else (blocked sends, retransmissions, hellos)
    pub fn push_front(&mut self, entry: QueueEntry) -> Result<EntryHandle, QueueError> {
        let handle = self.admit(entry)?;
        self.order.push_front(handle.slot);
        Ok(handle)
    }

    fn admit(&mut self, entry: QueueEntry) -> Result<EntryHandle, QueueError> {
        if self.by_fingerprint.contains_key(&entry.fingerprint) {
            return Err(QueueError::Duplicate(entry.fingerprint));
        }
        if self.order.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        let fingerprint = entry.fingerprint;
        let slot = self.entries.insert(entry);
        self.by_fingerprint.insert(fingerprint, slot);
        Ok(EntryHandle { slot, fingerprint })
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        let slot = self.order.pop_front()?;
        let entry = self.entries.try_remove(slot)?;
        self.by_fingerprint.remove(&entry.fingerprint);
        Some(entry)
    }

    pub fn front(&self) -> Option<(EntryHandle, &QueueEntry)> {
        let slot = *self.order.front()?;
        let entry = self.entries.get(slot)?;
        Some((
            EntryHandle {
                slot,
                fingerprint: entry.fingerprint,
            },
            entry,
        ))
    }

    /// Resolve a handle; stale handles yield `None`
    pub fn get(&self, handle: EntryHandle) -> Option<&QueueEntry> {
        self.entries
            .get(handle.slot)
            .filter(|e| e.fingerprint == handle.fingerprint)
    }

    pub fn handle_of(&self, fingerprint: Fingerprint) -> Option<EntryHandle> {
        self.by_fingerprint
            .get(&fingerprint)
            .map(|&slot| EntryHandle { slot, fingerprint })
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.by_fingerprint.contains_key(&fingerprint)
    }

    /// Remove the entry with `fingerprint`, wherever it sits
    pub fn erase(&mut self, fingerprint: Fingerprint) -> Option<QueueEntry> {
        let slot = self.by_fingerprint.remove(&fingerprint)?;
        if let Some(pos) = self.order.iter().position(|&s| s == slot) {
            self.order.remove(pos);
        }
        self.entries.try_remove(slot)
    }

    /// Entries in queue order
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.order.iter().filter_map(|&slot| self.entries.get(slot))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(payload: &'static [u8]) -> QueueEntry {
        QueueEntry::data(OutboundPacket {
            payload: Bytes::from_static(payload),
            src_link: LinkAddr::from_index(1),
            dest_link: LinkAddr::from_index(2),
            src_net: Ipv4Addr::new(10, 0, 0, 1),
            dest_net: Ipv4Addr::new(10, 0, 0, 2),
            iface: InterfaceId(0),
        })
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PacketQueue::new(8);
        queue.push_back(make_entry(b"a")).unwrap();
        queue.push_back(make_entry(b"b")).unwrap();
        queue.push_front(make_entry(b"c")).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| e.payload)
            .collect();
        assert_eq!(order, vec![&b"c"[..], &b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn test_duplicate_fingerprint_rejected() {
        let mut queue = PacketQueue::new(8);
        queue.push_back(make_entry(b"same")).unwrap();
        let before = queue.len();

        let err = queue.push_back(make_entry(b"same")).unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(_)));
        assert_eq!(queue.len(), before);

        assert!(queue.push_front(make_entry(b"same")).is_err());
        assert_eq!(queue.len(), before);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut queue = PacketQueue::new(2);
        queue.push_back(make_entry(b"a")).unwrap();
        queue.push_back(make_entry(b"b")).unwrap();
        assert!(queue.is_full());
        assert_eq!(
            queue.push_back(make_entry(b"c")),
            Err(QueueError::Full { capacity: 2 })
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_erase_keeps_other_handles_valid() {
        let mut queue = PacketQueue::new(8);
        let a = queue.push_back(make_entry(b"a")).unwrap();
        let b = queue.push_back(make_entry(b"b")).unwrap();
        let c = queue.push_back(make_entry(b"c")).unwrap();

        assert!(queue.erase(b.fingerprint()).is_some());
        assert!(queue.get(b).is_none());
        assert_eq!(queue.get(a).unwrap().payload, &b"a"[..]);
        assert_eq!(queue.get(c).unwrap().payload, &b"c"[..]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut queue = PacketQueue::new(8);
        let a = queue.push_back(make_entry(b"a")).unwrap();
        queue.pop_front();
        // slab hands the freed slot to the next insert
        let b = queue.push_back(make_entry(b"b")).unwrap();
        assert!(queue.get(a).is_none());
        assert!(queue.get(b).is_some());
    }

    #[test]
    fn test_front_and_handle_of() {
        let mut queue = PacketQueue::new(8);
        assert!(queue.front().is_none());
        let a = queue.push_back(make_entry(b"a")).unwrap();
        let (handle, entry) = queue.front().unwrap();
        assert_eq!(handle, a);
        assert_eq!(queue.handle_of(entry.fingerprint), Some(a));
    }

    #[test]
    fn test_hello_fingerprints_differ_per_interface() {
        let body = Bytes::from_static(&[0]);
        let a = QueueEntry::hello(InterfaceId(0), LinkAddr::from_index(1), Ipv4Addr::UNSPECIFIED, body.clone());
        let b = QueueEntry::hello(InterfaceId(1), LinkAddr::from_index(1), Ipv4Addr::UNSPECIFIED, body);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert!(a.is_broadcast() && a.is_hello());
    }

    #[test]
    fn test_hit_max() {
        let mut entry = make_entry(b"a");
        assert!(!entry.hit_max(3));
        entry.retries = 3;
        assert!(entry.hit_max(3));
    }
}
