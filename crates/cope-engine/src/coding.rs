//! XOR encoding and decoding
//!
//! ## Encoding
//!
//! Given the head of the output queue, destined to neighbor N0, the encoder
//! walks the neighbor table once, in table order, looking at the head of each
//! other neighbor's virtual queue. A candidate V for neighbor Ni is mixed in
//! when:
//!
//! 1. Ni is not known to hold V already
//! 2. every next hop already included is known to hold V
//! 3. Ni is known to hold every packet already included
//! 4. Ni shares a channel with everything included so far, and a local
//!    interface on that channel is sendable
//!
//! Conditions 2 and 3 guarantee every receiver can cancel all operands but its
//! own. The walk is greedy: a neighbor rejected early is not revisited even if
//! a later inclusion would have made it eligible.
//!
//! ## Decoding
//!
//! A frame of degree `n >= 2` is decodable when at least `n - 1` of its
//! packets are in the pool. The missing one is the XOR of the payload with
//! every pooled operand.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use cope_core::{Channel, CodingHeader, Fingerprint, InterfaceId, LinkAddr};
use tracing::{trace, warn};

use crate::error::{DecodeError, EngineError};
use crate::neighbor::{NeighborIndex, NeighborTable};
use crate::pool::PacketPool;
use crate::queue::{PacketQueue, QueueEntry};
use crate::tracker::ReceptionTracker;

/// XOR two payloads.
///
/// The shorter operand is zero-padded to the longer one's length, and trailing
/// zero bytes of the result are trimmed (at least one byte is kept).
/// Combining twice with the same operand restores the original unless the
/// original itself ended in zero bytes.
pub fn xor_combine(a: &[u8], b: &[u8]) -> Bytes {
    let len = a.len().max(b.len());
    let mut out: Vec<u8> = (0..len)
        .map(|i| a.get(i).copied().unwrap_or(0) ^ b.get(i).copied().unwrap_or(0))
        .collect();
    let kept = out.iter().rposition(|&byte| byte != 0).map_or(1, |pos| pos + 1);
    out.resize(kept, 0);
    Bytes::from(out)
}

/// A packet recovered from a coded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub fingerprint: Fingerprint,
    pub payload: Bytes,
}

/// Recover the one packet of a coded frame that is not in the pool.
///
/// Never mutates the pool.
pub fn decode(
    next_hops: &BTreeMap<LinkAddr, Fingerprint>,
    payload: &[u8],
    pool: &PacketPool,
) -> Result<Decoded, DecodeError> {
    if next_hops.len() < 2 {
        return Err(DecodeError::Degree(next_hops.len()));
    }

    let mut missing: Vec<Fingerprint> = Vec::new();
    let mut operands: Vec<&Bytes> = Vec::with_capacity(next_hops.len());
    for fp in next_hops.values() {
        match pool.get(*fp) {
            Some(known) => operands.push(known),
            None => missing.push(*fp),
        }
    }

    match missing.as_slice() {
        [] => Err(DecodeError::NothingNew),
        [fingerprint] => {
            let mut acc = Bytes::copy_from_slice(payload);
            for operand in operands {
                acc = xor_combine(&acc, operand);
            }
            Ok(Decoded {
                fingerprint: *fingerprint,
                payload: acc,
            })
        }
        _ => Err(DecodeError::Insufficient {
            missing: missing.len(),
        }),
    }
}

/// A local radio as seen by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInterface {
    pub id: InterfaceId,
    pub link: LinkAddr,
    pub channel: Channel,
}

/// Frame contents chosen by the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub payload: Bytes,
    pub iface: InterfaceId,
    pub dest: LinkAddr,
    /// Packets mixed in besides the head entry, in inclusion order
    pub partners: Vec<Fingerprint>,
}

impl Transmission {
    pub fn degree(&self) -> usize {
        self.partners.len() + 1
    }

    pub fn is_coded(&self) -> bool {
        !self.partners.is_empty()
    }
}

/// Result of an encode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The destination already holds the head entry; drop it
    Redundant,
    /// Send this transmission (degree 1 when no partner qualified)
    Send(Transmission),
}

/// A qualifying coding partner
struct Partner {
    entry: QueueEntry,
    channels: BTreeSet<Channel>,
    iface: InterfaceId,
    dest: LinkAddr,
}

/// Node state the encoder reads and updates
pub(crate) struct Encoder<'a> {
    pub queue: &'a mut PacketQueue,
    pub retransmit: &'a mut PacketQueue,
    pub neighbors: &'a mut NeighborTable,
    pub tracker: &'a ReceptionTracker,
    pub sendable: &'a BTreeSet<InterfaceId>,
    pub interfaces: &'a [LocalInterface],
    pub max_retries: u8,
    /// Bumped for every partner retired at the retry limit
    pub retry_drops: &'a mut u64,
}

impl Encoder<'_> {
    /// Encode `head`, already popped from the output queue and from the
    /// virtual queue of `head_neighbor`.
    ///
    /// Partners are removed from the output queue and their neighbors'
    /// virtual queues, added to `header`, and mirrored into the
    /// retransmission queue unless they have used up their retries.
    pub(crate) fn encode(
        &mut self,
        head: &QueueEntry,
        head_neighbor: NeighborIndex,
        header: &mut CodingHeader,
    ) -> Result<EncodeOutcome, EngineError> {
        let n0 = self
            .neighbors
            .get(head_neighbor)
            .ok_or_else(|| EngineError::invariant("encode head has no neighbor"))?;
        if self.tracker.neighbor_has(head.fingerprint, n0) {
            return Ok(EncodeOutcome::Redundant);
        }

        let mut included: Vec<NeighborIndex> = vec![head_neighbor];
        let mut fingerprints: Vec<Fingerprint> = vec![head.fingerprint];
        let mut channels = n0.channels();
        let mut tx = Transmission {
            payload: head.payload.clone(),
            iface: head.iface,
            dest: head.dest_link,
            partners: Vec::new(),
        };

        for index in 0..self.neighbors.len() {
            if included.contains(&index) {
                continue;
            }
            let Some(candidate) = self.candidate(index, &included, &fingerprints, &channels)? else {
                continue;
            };
            let Partner {
                entry,
                channels: common,
                iface,
                dest,
            } = candidate;
            if !header.add_next_hop(entry.dest_link, entry.fingerprint) {
                warn!(link = %entry.dest_link, "Next hop already in header; skipping partner");
                continue;
            }

            tx.payload = xor_combine(&tx.payload, &entry.payload);
            tx.iface = iface;
            tx.dest = dest;
            tx.partners.push(entry.fingerprint);
            channels = common;
            included.push(index);
            fingerprints.push(entry.fingerprint);

            self.queue.erase(entry.fingerprint);
            if let Some(neighbor) = self.neighbors.get_mut(index) {
                neighbor.queue_pop_front();
            }
            if entry.hit_max(self.max_retries) {
                *self.retry_drops += 1;
            } else {
                let fp = entry.fingerprint;
                if let Err(e) = self.retransmit.push_back(entry) {
                    warn!(fingerprint = %fp, error = %e, "Partner not tracked for retransmission");
                }
            }
            trace!(degree = tx.degree(), partner = %fingerprints[fingerprints.len() - 1], "Mixed in partner");
        }

        Ok(EncodeOutcome::Send(tx))
    }

    /// Check neighbor `index`'s virtual-queue head against the coding rules
    fn candidate(
        &self,
        index: NeighborIndex,
        included: &[NeighborIndex],
        fingerprints: &[Fingerprint],
        channels: &BTreeSet<Channel>,
    ) -> Result<Option<Partner>, EngineError> {
        let Some(neighbor) = self.neighbors.get(index) else {
            return Ok(None);
        };
        let Some(handle) = neighbor.queue_head() else {
            return Ok(None);
        };
        let entry = self.queue.get(handle).ok_or_else(|| {
            EngineError::invariant(format!(
                "virtual queue of {} references missing entry {}",
                neighbor.primary_link(),
                handle.fingerprint()
            ))
        })?;
        if entry.is_broadcast() {
            return Err(EngineError::invariant(format!(
                "broadcast entry {} in a virtual queue",
                entry.fingerprint
            )));
        }

        if self.tracker.neighbor_has(entry.fingerprint, neighbor) {
            return Ok(None);
        }
        let covered = included.iter().all(|&i| {
            self.neighbors
                .get(i)
                .is_some_and(|n| self.tracker.neighbor_has(entry.fingerprint, n))
        });
        if !covered {
            return Ok(None);
        }
        if !fingerprints
            .iter()
            .all(|fp| self.tracker.neighbor_has(*fp, neighbor))
        {
            return Ok(None);
        }

        let common: BTreeSet<Channel> = channels
            .intersection(&neighbor.channels())
            .copied()
            .collect();
        for channel in &common {
            let usable = self
                .interfaces
                .iter()
                .find(|i| i.channel == *channel && self.sendable.contains(&i.id));
            if let (Some(local), Some(dest)) = (usable, neighbor.link_on_channel(*channel)) {
                return Ok(Some(Partner {
                    entry: entry.clone(),
                    channels: common.clone(),
                    iface: local.id,
                    dest,
                }));
            }
        }
        Ok(None)
    }
}
