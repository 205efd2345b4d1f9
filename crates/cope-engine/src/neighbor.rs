//! Neighbor table
//!
//! Each [`Neighbor`] is one forwarding peer, known by every
//! (network address, link address, channel) triple it has been seen with. A
//! peer with several radios, or one whose addresses are learned piecemeal
//! from hellos and data frames, may first appear as several records; the
//! state-merge in [`NeighborTable::resolve`] folds them together as overlaps
//! are discovered.
//!
//! Every neighbor owns a virtual queue: handles to the output-queue entries
//! destined to it, in queue order. The encoder looks at virtual-queue heads
//! to find coding partners without scanning the whole output queue. Merges
//! move virtual-queue contents so no pending delivery is lost.
//!
//! ## Hard and soft adds
//!
//! A hard add evicts any existing triple sharing a field with the new one
//! before appending it. A soft add only appends. Merges transplant the
//! absorbed record's triples softly so confirmed associations on the
//! surviving record are never evicted on the strength of the absorbed one.

use std::collections::{BTreeSet, VecDeque};
use std::net::Ipv4Addr;

use cope_core::{AddressTriple, Channel, Fingerprint, HelloMessage, LinkAddr};
use tracing::{debug, trace};

use crate::error::NeighborError;
use crate::queue::EntryHandle;

/// Position of a neighbor in table order
pub type NeighborIndex = usize;

/// One forwarding peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    triples: Vec<AddressTriple>,
    virtual_queue: VecDeque<EntryHandle>,
}

impl Neighbor {
    pub fn new(triple: AddressTriple) -> Self {
        Self {
            triples: vec![triple],
            virtual_queue: VecDeque::new(),
        }
    }

    pub fn triples(&self) -> &[AddressTriple] {
        &self.triples
    }

    pub fn links(&self) -> impl Iterator<Item = LinkAddr> + '_ {
        self.triples.iter().map(|t| t.link)
    }

    pub fn has_link(&self, link: &LinkAddr) -> bool {
        self.triples.iter().any(|t| t.link == *link)
    }

    /// Unspecified addresses never match
    pub fn has_net(&self, net: &Ipv4Addr) -> bool {
        !net.is_unspecified() && self.triples.iter().any(|t| t.net == *net)
    }

    /// Smallest link address; the neighbor's name in logs
    pub fn primary_link(&self) -> LinkAddr {
        self.links().min().unwrap_or(LinkAddr::BROADCAST)
    }

    pub fn channels(&self) -> BTreeSet<Channel> {
        self.triples.iter().map(|t| t.channel).collect()
    }

    /// Link address this neighbor uses on `channel`
    pub fn link_on_channel(&self, channel: Channel) -> Option<LinkAddr> {
        self.triples
            .iter()
            .find(|t| t.channel == channel)
            .map(|t| t.link)
    }

    /// Hard add: evict conflicting triples, then append
    pub fn add_triple(&mut self, triple: AddressTriple) {
        self.triples.retain(|t| !t.conflicts_with(&triple));
        self.triples.push(triple);
    }

    /// Soft add: append without eviction
    pub fn add_soft_triple(&mut self, triple: AddressTriple) {
        if !self.triples.contains(&triple) {
            self.triples.push(triple);
        }
    }

    pub fn queue_push_back(&mut self, handle: EntryHandle) -> Result<(), NeighborError> {
        if self.queue_contains(handle.fingerprint()) {
            return Err(NeighborError::DuplicateVirtualEntry(handle.fingerprint()));
        }
        self.virtual_queue.push_back(handle);
        Ok(())
    }

    pub fn queue_push_front(&mut self, handle: EntryHandle) -> Result<(), NeighborError> {
        if self.queue_contains(handle.fingerprint()) {
            return Err(NeighborError::DuplicateVirtualEntry(handle.fingerprint()));
        }
        self.virtual_queue.push_front(handle);
        Ok(())
    }

    pub fn queue_head(&self) -> Option<EntryHandle> {
        self.virtual_queue.front().copied()
    }

    pub fn queue_pop_front(&mut self) -> Option<EntryHandle> {
        self.virtual_queue.pop_front()
    }

    /// Remove the handle for `fingerprint`; false if absent
    pub fn queue_remove(&mut self, fingerprint: Fingerprint) -> bool {
        match self
            .virtual_queue
            .iter()
            .position(|h| h.fingerprint() == fingerprint)
        {
            Some(pos) => {
                self.virtual_queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn queue_contains(&self, fingerprint: Fingerprint) -> bool {
        self.virtual_queue
            .iter()
            .any(|h| h.fingerprint() == fingerprint)
    }

    pub fn virtual_queue(&self) -> impl Iterator<Item = &EntryHandle> {
        self.virtual_queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.virtual_queue.len()
    }

    /// Append `handles` after our own, skipping any we already hold
    fn absorb_queue(&mut self, handles: impl IntoIterator<Item = EntryHandle>) {
        for handle in handles {
            if !self.queue_contains(handle.fingerprint()) {
                self.virtual_queue.push_back(handle);
            }
        }
    }
}

/// All known neighbors, in discovery order
#[derive(Debug, Default)]
pub struct NeighborTable {
    neighbors: Vec<Neighbor>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.iter()
    }

    pub fn get(&self, index: NeighborIndex) -> Option<&Neighbor> {
        self.neighbors.get(index)
    }

    pub fn get_mut(&mut self, index: NeighborIndex) -> Option<&mut Neighbor> {
        self.neighbors.get_mut(index)
    }

    pub fn find_by_link(&self, link: &LinkAddr) -> Option<NeighborIndex> {
        self.neighbors.iter().position(|n| n.has_link(link))
    }

    pub fn find_by_net(&self, net: &Ipv4Addr) -> Option<NeighborIndex> {
        self.neighbors.iter().position(|n| n.has_net(net))
    }

    /// Neighbor whose virtual queue references `fingerprint`
    pub fn find_holding(&self, fingerprint: Fingerprint) -> Option<NeighborIndex> {
        self.neighbors
            .iter()
            .position(|n| n.queue_contains(fingerprint))
    }

    /// Neighbor reachable at `link`, creating an unresolved record if needed
    pub fn ensure_for_link(&mut self, link: LinkAddr, channel: Channel) -> NeighborIndex {
        if let Some(index) = self.find_by_link(&link) {
            return index;
        }
        debug!(%link, channel, "Creating placeholder neighbor");
        self.neighbors
            .push(Neighbor::new(AddressTriple::unresolved(link, channel)));
        self.neighbors.len() - 1
    }

    /// State-merge a freshly seen triple into the table.
    ///
    /// - only the network address is known: hard-add the triple to that record
    /// - only the link address is known: hard-add the triple to that record
    /// - both known, same record: nothing to do
    /// - both known, different records: fold the link-address record into the
    ///   network-address record and delete it
    /// - neither known: new record
    ///
    /// Returns the index of the record now holding the triple.
    pub fn resolve(&mut self, triple: AddressTriple) -> NeighborIndex {
        let by_net = self.find_by_net(&triple.net);
        let by_link = self.find_by_link(&triple.link);

        match (by_net, by_link) {
            (Some(n), None) | (None, Some(n)) => {
                self.neighbors[n].add_triple(triple);
                n
            }
            (Some(n), Some(l)) if n == l => n,
            (Some(n), Some(l)) => {
                self.neighbors[l].add_triple(triple);
                let absorbed = self.neighbors.remove(l);
                let n = if l < n { n - 1 } else { n };
                debug!(
                    into = %self.neighbors[n].primary_link(),
                    from = %absorbed.primary_link(),
                    moved = absorbed.queue_len(),
                    "Merging neighbor records"
                );
                let survivor = &mut self.neighbors[n];
                for t in absorbed.triples {
                    survivor.add_soft_triple(t);
                }
                survivor.absorb_queue(absorbed.virtual_queue);
                n
            }
            (None, None) => {
                trace!(%triple, "New neighbor");
                self.neighbors.push(Neighbor::new(triple));
                self.neighbors.len() - 1
            }
        }
    }

    /// Rebuild the record for a peer from its hello.
    ///
    /// Every record matching an advertised link or network address is
    /// removed after its virtual queue is carried over, and one record
    /// holding exactly the advertised triples takes their place at the end
    /// of the table. Returns its index, or `None` for an empty hello.
    pub fn learn_hello(&mut self, hello: &HelloMessage) -> Option<NeighborIndex> {
        let mut fresh: Option<Neighbor> = None;
        let mut carried: Vec<EntryHandle> = Vec::new();

        for triple in &hello.triples {
            while let Some(index) = self
                .find_by_link(&triple.link)
                .or_else(|| self.find_by_net(&triple.net))
            {
                let old = self.neighbors.remove(index);
                carried.extend(old.virtual_queue);
            }
            match fresh.as_mut() {
                Some(n) => n.add_soft_triple(*triple),
                None => fresh = Some(Neighbor::new(*triple)),
            }
        }

        let mut neighbor = fresh?;
        neighbor.absorb_queue(carried);
        trace!(
            neighbor = %neighbor.primary_link(),
            triples = neighbor.triples.len(),
            pending = neighbor.queue_len(),
            "Learned neighbor from hello"
        );
        self.neighbors.push(neighbor);
        Some(self.neighbors.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::queue::{OutboundPacket, PacketQueue, QueueEntry};
    use cope_core::InterfaceId;

    fn make_triple(n: u8, channel: Channel) -> AddressTriple {
        AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, n),
            LinkAddr::from_index(n as u32),
            channel,
        )
    }

    fn make_handle(queue: &mut PacketQueue, payload: &'static [u8]) -> EntryHandle {
        queue
            .push_back(QueueEntry::data(OutboundPacket {
                payload: Bytes::from_static(payload),
                src_link: LinkAddr::from_index(100),
                dest_link: LinkAddr::from_index(1),
                src_net: Ipv4Addr::new(10, 0, 0, 100),
                dest_net: Ipv4Addr::new(10, 0, 0, 1),
                iface: InterfaceId(0),
            }))
            .unwrap()
    }

    #[test]
    fn test_hard_add_evicts_conflicts() {
        let mut n = Neighbor::new(make_triple(1, 1));
        n.add_triple(AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, 1),
            LinkAddr::from_index(9),
            6,
        ));
        assert_eq!(n.triples().len(), 1);
        assert!(n.has_link(&LinkAddr::from_index(9)));
        assert!(!n.has_link(&LinkAddr::from_index(1)));
    }

    #[test]
    fn test_soft_add_keeps_existing() {
        let mut n = Neighbor::new(make_triple(1, 1));
        n.add_soft_triple(AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, 1),
            LinkAddr::from_index(9),
            6,
        ));
        assert_eq!(n.triples().len(), 2);
        assert_eq!(n.channels(), BTreeSet::from([1, 6]));
        assert_eq!(n.link_on_channel(6), Some(LinkAddr::from_index(9)));
        assert_eq!(n.primary_link(), LinkAddr::from_index(1));
    }

    #[test]
    fn test_unspecified_net_never_matches() {
        let mut table = NeighborTable::new();
        table.ensure_for_link(LinkAddr::from_index(5), 1);
        assert!(table.find_by_net(&Ipv4Addr::UNSPECIFIED).is_none());
        assert_eq!(table.find_by_link(&LinkAddr::from_index(5)), Some(0));
    }

    #[test]
    fn test_virtual_queue_rejects_duplicates() {
        let mut queue = PacketQueue::new(8);
        let h = make_handle(&mut queue, b"a");
        let mut n = Neighbor::new(make_triple(1, 1));
        n.queue_push_back(h).unwrap();
        assert_eq!(
            n.queue_push_front(h),
            Err(NeighborError::DuplicateVirtualEntry(h.fingerprint()))
        );
        assert!(n.queue_remove(h.fingerprint()));
        assert!(!n.queue_remove(h.fingerprint()));
    }

    #[test]
    fn test_resolve_new_and_same() {
        let mut table = NeighborTable::new();
        let a = table.resolve(make_triple(1, 1));
        assert_eq!(a, 0);
        assert_eq!(table.resolve(make_triple(1, 1)), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_link_only_hard_adds() {
        let mut table = NeighborTable::new();
        table.ensure_for_link(LinkAddr::from_index(1), 1);
        let idx = table.resolve(make_triple(1, 1));
        assert_eq!(idx, 0);
        assert_eq!(table.len(), 1);
        let n = table.get(idx).unwrap();
        assert_eq!(n.triples(), &[make_triple(1, 1)]);
        assert!(n.has_net(&Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_resolve_net_only_adds_link() {
        let mut table = NeighborTable::new();
        table.resolve(make_triple(1, 1));
        let second_radio = AddressTriple::new(Ipv4Addr::new(10, 0, 0, 1), LinkAddr::from_index(50), 6);
        let idx = table.resolve(second_radio);
        assert_eq!(idx, 0);
        assert!(table.get(0).unwrap().has_link(&LinkAddr::from_index(50)));
    }

    #[test]
    fn test_merge_preserves_virtual_queues() {
        let mut queue = PacketQueue::new(8);
        let h1 = make_handle(&mut queue, b"one");
        let h2 = make_handle(&mut queue, b"two");
        let h3 = make_handle(&mut queue, b"three");

        let mut table = NeighborTable::new();
        // record A known by network address, record B by link address
        let a = table.resolve(make_triple(1, 1));
        let b = table.ensure_for_link(LinkAddr::from_index(2), 6);
        table.get_mut(a).unwrap().queue_push_back(h1).unwrap();
        table.get_mut(b).unwrap().queue_push_back(h2).unwrap();
        table.get_mut(b).unwrap().queue_push_back(h3).unwrap();

        let merged = table.resolve(AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, 1),
            LinkAddr::from_index(2),
            6,
        ));

        assert_eq!(table.len(), 1);
        let n = table.get(merged).unwrap();
        let order: Vec<_> = n.virtual_queue().map(|h| h.fingerprint()).collect();
        assert_eq!(
            order,
            vec![h1.fingerprint(), h2.fingerprint(), h3.fingerprint()]
        );
        assert!(n.has_link(&LinkAddr::from_index(1)));
        assert!(n.has_link(&LinkAddr::from_index(2)));
    }

    #[test]
    fn test_merge_does_not_duplicate_shared_handles() {
        let mut queue = PacketQueue::new(8);
        let h = make_handle(&mut queue, b"shared");

        let mut table = NeighborTable::new();
        let a = table.resolve(make_triple(1, 1));
        let b = table.ensure_for_link(LinkAddr::from_index(2), 6);
        table.get_mut(a).unwrap().queue_push_back(h).unwrap();
        table.get_mut(b).unwrap().queue_push_back(h).unwrap();

        let merged = table.resolve(AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, 1),
            LinkAddr::from_index(2),
            6,
        ));
        assert_eq!(table.get(merged).unwrap().queue_len(), 1);
    }

    #[test]
    fn test_learn_hello_transplants_pending_entries() {
        let mut queue = PacketQueue::new(8);
        let h1 = make_handle(&mut queue, b"one");
        let h2 = make_handle(&mut queue, b"two");

        let mut table = NeighborTable::new();
        let placeholder = table.ensure_for_link(LinkAddr::from_index(1), 1);
        let other_radio = table.resolve(AddressTriple::new(
            Ipv4Addr::new(10, 0, 1, 1),
            LinkAddr::from_index(11),
            6,
        ));
        table.get_mut(placeholder).unwrap().queue_push_back(h1).unwrap();
        table.get_mut(other_radio).unwrap().queue_push_back(h2).unwrap();
        table.resolve(make_triple(7, 1));

        let hello = HelloMessage::new(vec![
            make_triple(1, 1),
            AddressTriple::new(Ipv4Addr::new(10, 0, 1, 1), LinkAddr::from_index(11), 6),
        ]);
        let idx = table.learn_hello(&hello).unwrap();

        assert_eq!(table.len(), 2);
        let n = table.get(idx).unwrap();
        assert_eq!(n.triples().len(), 2);
        let pending: Vec<_> = n.virtual_queue().map(|h| h.fingerprint()).collect();
        assert_eq!(pending, vec![h1.fingerprint(), h2.fingerprint()]);
        // unrelated neighbor untouched
        assert!(table.find_by_link(&LinkAddr::from_index(7)).is_some());
    }

    #[test]
    fn test_learn_empty_hello() {
        let mut table = NeighborTable::new();
        assert!(table.learn_hello(&HelloMessage::default()).is_none());
    }

    #[test]
    fn test_find_holding() {
        let mut queue = PacketQueue::new(8);
        let h = make_handle(&mut queue, b"x");
        let mut table = NeighborTable::new();
        table.resolve(make_triple(1, 1));
        let b = table.resolve(make_triple(2, 1));
        table.get_mut(b).unwrap().queue_push_back(h).unwrap();
        assert_eq!(table.find_holding(h.fingerprint()), Some(b));
        assert_eq!(table.find_holding(Fingerprint(0)), None);
    }
}
