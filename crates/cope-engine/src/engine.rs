//! The per-node coding engine
//!
//! [`CopeEngine`] owns all protocol state of one node: the output and
//! retransmission queues, the neighbor table, the packet pool, the reception
//! tracker and the pending piggyback feedback. It is a single-threaded
//! state machine. The host calls in on three kinds of events and the engine
//! calls back out through the [`Host`] it is handed:
//!
//! - [`CopeEngine::enqueue`]: the network layer has a packet to send
//! - [`CopeEngine::on_receive`]: a frame arrived on a local interface
//! - [`CopeEngine::on_timer`]: one of the engine's timers expired
//!
//! Each call runs to completion before the next is dispatched. Send
//! scheduling lives in `scheduler`, retransmission in `arq` and hello
//! handling in `discovery`.
//!
//! A fatal error (corrupt frame, broken invariant) halts the engine; every
//! later call returns [`EngineError::Halted`].

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use bytes::Bytes;
use cope_core::{
    AckBlock, AddressTriple, Channel, CodingHeader, Fingerprint, Frame, Host, InterfaceId,
    LinkAddr, LinkError, TimerHandle, TimerKind,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, trace, warn};

use crate::coding::{self, LocalInterface};
use crate::config::CopeConfig;
use crate::error::{DecodeError, EngineError};
use crate::neighbor::{Neighbor, NeighborIndex, NeighborTable};
use crate::pool::PacketPool;
use crate::queue::{OutboundPacket, PacketQueue, QueueEntry};
use crate::scheduler::SendScheduler;
use crate::tracker::ReceptionTracker;

/// Counters kept by an engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub enqueued: u64,
    pub enqueue_failures: u64,
    pub frames_sent: u64,
    pub coded_frames: u64,
    pub hellos_sent: u64,
    pub hellos_received: u64,
    pub link_errors: u64,
    pub delivered: u64,
    pub decoded: u64,
    pub overheard: u64,
    pub decode_failures: u64,
    pub malformed: u64,
    pub acks_received: u64,
    pub retransmissions: u64,
    pub retry_drops: u64,
    pub redundant_drops: u64,
}

/// A packet handed up to the network layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredPacket {
    pub fingerprint: Fingerprint,
    pub payload: Bytes,
    /// Link address of the transmitting neighbor
    pub from: LinkAddr,
    pub iface: InterfaceId,
    /// Recovered from a coded frame
    pub decoded: bool,
}

/// What became of a received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Our own transmission, or a frame for another of our radios
    Ignored,
    /// A hello updated the neighbor table
    Hello,
    /// Addressed to us (or broadcast): pass it up
    Delivered(DeliveredPacket),
    /// Addressed elsewhere; kept as a decoding operand
    Overheard(Fingerprint),
    /// Undecodable or malformed
    Dropped,
}

/// One node's coding engine
#[derive(Debug)]
pub struct CopeEngine {
    pub(crate) config: CopeConfig,
    pub(crate) interfaces: Vec<LocalInterface>,
    pub(crate) queue: PacketQueue,
    pub(crate) retransmit: PacketQueue,
    pub(crate) neighbors: NeighborTable,
    pub(crate) pool: PacketPool,
    pub(crate) tracker: ReceptionTracker,
    pub(crate) scheduler: SendScheduler,
    pub(crate) hello_timer: Option<TimerHandle>,
    pub(crate) rng: StdRng,
    reports: VecDeque<Fingerprint>,
    acks: Vec<AckBlock>,
    pub(crate) stats: EngineStats,
    halted: bool,
}

impl CopeEngine {
    pub fn new(config: CopeConfig, interfaces: Vec<LocalInterface>) -> Self {
        Self::with_rng(config, interfaces, StdRng::seed_from_u64(rand::random()))
    }

    /// Engine with reproducible hello jitter
    pub fn with_seed(config: CopeConfig, interfaces: Vec<LocalInterface>, seed: u64) -> Self {
        Self::with_rng(config, interfaces, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: CopeConfig, interfaces: Vec<LocalInterface>, rng: StdRng) -> Self {
        for warning in config.validate() {
            warn!(%warning, "Engine configuration warning");
        }
        Self {
            queue: PacketQueue::new(config.queue_capacity),
            retransmit: PacketQueue::new(config.retransmit_queue_capacity),
            neighbors: NeighborTable::new(),
            pool: PacketPool::new(config.pool_capacity, config.pool_max_age()),
            tracker: ReceptionTracker::new(config.tracker_capacity, config.tracker_max_age()),
            scheduler: SendScheduler::new(),
            hello_timer: None,
            rng,
            reports: VecDeque::new(),
            acks: Vec::new(),
            stats: EngineStats::default(),
            halted: false,
            config,
            interfaces,
        }
    }

    /// Arm the send re-arm and hello timers
    pub fn start<H: Host>(&mut self, host: &mut H) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.scheduler.rearm_try(host, self.config.try_send_interval());
        self.schedule_hello(host);
        debug!(interfaces = self.interfaces.len(), "Engine started");
        Ok(())
    }

    /// Queue a network-layer packet for transmission.
    ///
    /// A full queue or an already-queued fingerprint is reported as
    /// [`EngineError::Queue`]; the engine does not retry.
    #[instrument(skip(self, host, packet), fields(dest = %packet.dest_link, len = packet.payload.len()))]
    pub fn enqueue<H: Host>(
        &mut self,
        host: &mut H,
        packet: OutboundPacket,
    ) -> Result<Fingerprint, EngineError> {
        self.ensure_running()?;
        let result = self.enqueue_inner(host, packet);
        self.check_fatal(result)
    }

    fn enqueue_inner<H: Host>(
        &mut self,
        host: &mut H,
        packet: OutboundPacket,
    ) -> Result<Fingerprint, EngineError> {
        let channel = self
            .channel_of(packet.iface)
            .ok_or(LinkError::UnknownInterface(packet.iface))?;
        let entry = QueueEntry::data(packet);
        let fingerprint = entry.fingerprint;
        let dest = entry.dest_link;
        let payload = entry.payload.clone();
        let broadcast = entry.is_broadcast();

        let handle = match self.queue.push_back(entry) {
            Ok(handle) => handle,
            Err(e) => {
                self.stats.enqueue_failures += 1;
                warn!(fingerprint = %fingerprint, error = %e, "Enqueue rejected");
                return Err(e.into());
            }
        };
        if !broadcast {
            let index = self.neighbors.ensure_for_link(dest, channel);
            self.neighbor_mut(index)?.queue_push_back(handle)?;
        }
        self.pool.insert(fingerprint, payload, host.now());
        self.stats.enqueued += 1;
        trace!(fingerprint = %fingerprint, queued = self.queue.len(), "Enqueued");

        self.try_send(host)?;
        Ok(fingerprint)
    }

    /// Process a frame received on `iface` from link address `sender`
    #[instrument(skip(self, host, frame), fields(%iface, %sender, len = frame.len()))]
    pub fn on_receive<H: Host>(
        &mut self,
        host: &mut H,
        iface: InterfaceId,
        frame: Bytes,
        sender: LinkAddr,
    ) -> Result<ReceiveOutcome, EngineError> {
        self.ensure_running()?;
        let result = self.receive_inner(host, iface, frame, sender);
        self.check_fatal(result)
    }

    fn receive_inner<H: Host>(
        &mut self,
        host: &mut H,
        iface: InterfaceId,
        frame: Bytes,
        sender: LinkAddr,
    ) -> Result<ReceiveOutcome, EngineError> {
        if self.is_own_link(&sender) {
            return Ok(ReceiveOutcome::Ignored);
        }
        let channel = self
            .channel_of(iface)
            .ok_or(LinkError::UnknownInterface(iface))?;

        let outcome = match Frame::decode(frame)? {
            Frame::Hello(hello) => {
                self.stats.hellos_received += 1;
                self.neighbors.learn_hello(&hello);
                ReceiveOutcome::Hello
            }
            Frame::Data { header, payload } => {
                self.receive_data(host, iface, channel, header, payload, sender)?
            }
        };

        self.try_send(host)?;
        Ok(outcome)
    }

    fn receive_data<H: Host>(
        &mut self,
        host: &mut H,
        iface: InterfaceId,
        channel: Channel,
        header: CodingHeader,
        payload: Bytes,
        sender: LinkAddr,
    ) -> Result<ReceiveOutcome, EngineError> {
        let degree = header.degree();
        let Some((&first_hop, &first_fp)) = header.next_hops().iter().next() else {
            self.stats.malformed += 1;
            warn!("Data frame without next hops");
            return Ok(ReceiveOutcome::Dropped);
        };
        // Uncoded frame for one of our other radios; it is handled there
        if degree == 1 && self.is_own_link(&first_hop) && Some(first_hop) != self.link_of(iface) {
            return Ok(ReceiveOutcome::Ignored);
        }

        let now = host.now();
        let neighbor = self
            .neighbors
            .resolve(AddressTriple::new(header.sender, sender, channel));
        self.process_feedback(host, &header, sender, neighbor);

        let (fingerprint, payload, decoded) = if degree > 1 {
            match coding::decode(header.next_hops(), &payload, &self.pool) {
                Ok(d) => (d.fingerprint, d.payload, true),
                Err(DecodeError::NothingNew) => {
                    trace!(degree, "Coded frame holds nothing new");
                    return Ok(ReceiveOutcome::Dropped);
                }
                Err(e) => {
                    self.stats.decode_failures += 1;
                    warn!(degree, error = %e, "Dropping undecodable frame");
                    return Ok(ReceiveOutcome::Dropped);
                }
            }
        } else {
            (first_fp, payload, false)
        };

        let named = self.named_fingerprint(&header);
        let for_us = header.is_broadcast() || named == Some(fingerprint);
        if for_us && !header.is_broadcast() {
            self.push_ack(AckBlock::new(header.sender, fingerprint));
        }
        self.push_report(fingerprint);
        self.pool.insert(fingerprint, payload.clone(), now);
        self.tracker.mark(fingerprint, sender, now);
        if decoded {
            self.stats.decoded += 1;
        }

        if for_us {
            self.stats.delivered += 1;
            debug!(fingerprint = %fingerprint, decoded, "Delivering packet");
            let payload = if decoded {
                restore_ipv4_ttl(payload, self.config.decoded_ttl)
            } else {
                payload
            };
            Ok(ReceiveOutcome::Delivered(DeliveredPacket {
                fingerprint,
                payload,
                from: sender,
                iface,
                decoded,
            }))
        } else {
            self.stats.overheard += 1;
            trace!(fingerprint = %fingerprint, decoded, "Overheard packet");
            Ok(ReceiveOutcome::Overheard(fingerprint))
        }
    }

    /// Apply the piggybacked acks and reception reports of a received header
    fn process_feedback<H: Host>(
        &mut self,
        host: &H,
        header: &CodingHeader,
        sender: LinkAddr,
        neighbor: NeighborIndex,
    ) {
        let now = host.now();
        let own_nets = self.own_networks(host);

        // The transmitter holds every packet it mixed in
        for fp in header.next_hops().values() {
            self.tracker.mark(*fp, sender, now);
        }
        for ack in header.acks() {
            if own_nets.contains(&ack.origin) && self.retransmit.erase(ack.fingerprint).is_some() {
                self.stats.acks_received += 1;
                trace!(fingerprint = %ack.fingerprint, "Acknowledged");
            }
            self.tracker.mark(ack.fingerprint, sender, now);
        }
        for fp in header.reports() {
            self.tracker.mark(*fp, sender, now);
            let reported_by_dest = self
                .retransmit
                .handle_of(*fp)
                .and_then(|h| self.retransmit.get(h))
                .zip(self.neighbors.get(neighbor))
                .is_some_and(|(entry, n)| n.has_link(&entry.dest_link));
            if reported_by_dest {
                self.retransmit.erase(*fp);
                self.stats.acks_received += 1;
            }
        }
    }

    /// Dispatch an expired timer; stale handles are ignored
    #[instrument(skip(self, host))]
    pub fn on_timer<H: Host>(
        &mut self,
        host: &mut H,
        kind: TimerKind,
        handle: TimerHandle,
    ) -> Result<(), EngineError> {
        self.ensure_running()?;
        let result = match kind {
            TimerKind::TrySend if self.scheduler.take_try_timer(handle) => {
                let now = host.now();
                self.pool.cleanup_expired(now);
                self.tracker.cleanup_expired(now);
                self.try_send(host)
            }
            TimerKind::Retransmit if self.scheduler.take_retransmit_timer(handle) => {
                self.on_retransmit_timer(host)
            }
            TimerKind::Hello if self.hello_timer == Some(handle) => {
                self.hello_timer = None;
                self.on_hello_timer(host)
            }
            _ => {
                trace!("Stale timer");
                Ok(())
            }
        };
        self.check_fatal(result)
    }

    /// Oldest-first reports, newest-first acks, each capped at the neighbor count
    pub(crate) fn attach_feedback(&mut self, header: &mut CodingHeader) {
        let cap = self.neighbors.len().max(1);
        for _ in 0..cap {
            let Some(fp) = self.reports.pop_front() else {
                break;
            };
            header.add_report(fp);
        }
        for _ in 0..cap {
            let Some(ack) = self.acks.pop() else {
                break;
            };
            header.add_ack(ack);
        }
    }

    fn push_report(&mut self, fingerprint: Fingerprint) {
        if self.reports.contains(&fingerprint) {
            return;
        }
        if self.reports.len() >= self.config.queue_capacity {
            self.reports.pop_front();
        }
        self.reports.push_back(fingerprint);
    }

    fn push_ack(&mut self, ack: AckBlock) {
        if self.acks.contains(&ack) {
            return;
        }
        if self.acks.len() >= self.config.queue_capacity {
            self.acks.remove(0);
        }
        self.acks.push(ack);
    }

    /// Fingerprint the header assigns to any of our link addresses
    fn named_fingerprint(&self, header: &CodingHeader) -> Option<Fingerprint> {
        self.interfaces
            .iter()
            .find_map(|i| header.fingerprint_for(&i.link))
    }

    pub(crate) fn channel_of(&self, iface: InterfaceId) -> Option<Channel> {
        self.interface(iface).map(|i| i.channel)
    }

    pub(crate) fn link_of(&self, iface: InterfaceId) -> Option<LinkAddr> {
        self.interface(iface).map(|i| i.link)
    }

    fn interface(&self, iface: InterfaceId) -> Option<&LocalInterface> {
        self.interfaces.iter().find(|i| i.id == iface)
    }

    fn is_own_link(&self, link: &LinkAddr) -> bool {
        self.interfaces.iter().any(|i| i.link == *link)
    }

    fn own_networks<H: Host>(&self, host: &H) -> Vec<Ipv4Addr> {
        self.interfaces
            .iter()
            .filter_map(|i| host.local_network_address(i.id))
            .collect()
    }

    /// Smallest local network address; the sender field of outgoing headers
    pub(crate) fn primary_network<H: Host>(&self, host: &H) -> Ipv4Addr {
        self.own_networks(host)
            .into_iter()
            .min()
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub(crate) fn neighbor_mut(
        &mut self,
        index: NeighborIndex,
    ) -> Result<&mut Neighbor, EngineError> {
        self.neighbors
            .get_mut(index)
            .ok_or_else(|| EngineError::invariant(format!("no neighbor at index {index}")))
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.halted {
            return Err(EngineError::Halted);
        }
        Ok(())
    }

    fn check_fatal<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            error!(error = %e, "Fatal engine error; halting node");
            self.halted = true;
        }
        result
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn config(&self) -> &CopeConfig {
        &self.config
    }

    pub fn interfaces(&self) -> &[LocalInterface] {
        &self.interfaces
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn retransmit_queue(&self) -> &PacketQueue {
        &self.retransmit
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn tracker(&self) -> &ReceptionTracker {
        &self.tracker
    }

    /// Mutable tracker access for hosts that learn reception state out of band
    pub fn tracker_mut(&mut self) -> &mut ReceptionTracker {
        &mut self.tracker
    }

    pub fn pending_reports(&self) -> usize {
        self.reports.len()
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }
}

/// Rewrite the TTL of an IPv4 packet and fix its header checksum.
///
/// Anything that does not look like an IPv4 header is returned untouched.
pub fn restore_ipv4_ttl(packet: Bytes, ttl: u8) -> Bytes {
    const TTL: usize = 8;
    const CHECKSUM: usize = 10;

    let Some(&first) = packet.first() else {
        return packet;
    };
    let header_len = usize::from(first & 0x0f) * 4;
    if first >> 4 != 4 || header_len < 20 || packet.len() < header_len {
        return packet;
    }

    let mut bytes = packet.to_vec();
    bytes[TTL] = ttl;
    bytes[CHECKSUM] = 0;
    bytes[CHECKSUM + 1] = 0;
    let mut sum: u32 = bytes[..header_len]
        .chunks_exact(2)
        .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    let checksum = !(sum as u16);
    bytes[CHECKSUM..CHECKSUM + 2].copy_from_slice(&checksum.to_be_bytes());
    Bytes::from(bytes)
}
