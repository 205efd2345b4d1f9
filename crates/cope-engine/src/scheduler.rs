//! Send scheduling
//!
//! A send attempt runs whenever the queue or the neighbor state changes and
//! on a periodic re-arm timer. It snapshots which interfaces can take a
//! frame, and if the output queue is non-empty and some interface is
//! sendable it transmits the head entry (possibly coded with partners),
//! moving Idle -> Sending -> Idle. Hello entries skip the encoder and wait
//! for their own interface.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use cope_core::{
    CodingHeader, Frame, FrameType, Host, InterfaceId, LinkAddr, TimerHandle, TimerKind, Timers,
};
use tracing::{debug, trace, warn};

use crate::coding::{EncodeOutcome, Encoder, LocalInterface, Transmission};
use crate::engine::CopeEngine;
use crate::error::EngineError;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending,
}

/// What a single transmit step achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendStep {
    Sent,
    /// Head entry dropped without transmitting
    Discarded,
    /// Head entry waits for its interface
    Blocked,
}

/// Scheduler bookkeeping: state, sendable snapshot and timer handles
#[derive(Debug, Default)]
pub struct SendScheduler {
    state: SendState,
    sendable: BTreeSet<InterfaceId>,
    try_timer: Option<TimerHandle>,
    retransmit_timer: Option<TimerHandle>,
}

impl SendScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn sendable(&self) -> &BTreeSet<InterfaceId> {
        &self.sendable
    }

    fn refresh<H: Host>(&mut self, host: &H, interfaces: &[LocalInterface]) {
        self.sendable = interfaces
            .iter()
            .filter(|i| host.is_sendable(i.id))
            .map(|i| i.id)
            .collect();
    }

    /// Replace any pending re-arm with a fresh one
    pub(crate) fn rearm_try<T: Timers>(&mut self, timers: &mut T, interval: Duration) {
        if let Some(old) = self.try_timer.take() {
            timers.cancel(old);
        }
        self.try_timer = Some(timers.schedule_after(interval, TimerKind::TrySend));
    }

    pub(crate) fn take_try_timer(&mut self, handle: TimerHandle) -> bool {
        if self.try_timer == Some(handle) {
            self.try_timer = None;
            return true;
        }
        false
    }

    pub(crate) fn arm_retransmit<T: Timers>(&mut self, timers: &mut T, interval: Duration) {
        if self.retransmit_timer.is_none() {
            self.retransmit_timer = Some(timers.schedule_after(interval, TimerKind::Retransmit));
        }
    }

    pub(crate) fn take_retransmit_timer(&mut self, handle: TimerHandle) -> bool {
        if self.retransmit_timer == Some(handle) {
            self.retransmit_timer = None;
            return true;
        }
        false
    }

    pub fn retransmit_pending(&self) -> bool {
        self.retransmit_timer.is_some()
    }
}

impl CopeEngine {
    /// Transmit from the output queue if any interface can take a frame.
    ///
    /// Sends up to `send_burst` frames, then re-arms the periodic attempt.
    pub fn try_send<H: Host>(&mut self, host: &mut H) -> Result<(), EngineError> {
        if self.scheduler.state == SendState::Sending {
            self.scheduler
                .rearm_try(host, self.config.try_send_interval());
            return Ok(());
        }

        for _ in 0..self.config.send_burst {
            self.scheduler.refresh(host, &self.interfaces);
            if self.queue.is_empty() || self.scheduler.sendable.is_empty() {
                break;
            }
            self.scheduler.state = SendState::Sending;
            let step = self.transmit_head(host);
            self.finish_send(host);
            if step? == SendStep::Blocked {
                break;
            }
        }

        self.scheduler
            .rearm_try(host, self.config.try_send_interval());
        Ok(())
    }

    fn finish_send<H: Host>(&mut self, host: &mut H) {
        if !self.retransmit.is_empty() {
            self.scheduler
                .arm_retransmit(host, self.config.retransmit_interval());
        }
        self.scheduler.state = SendState::Idle;
    }

    /// Pop the head entry, encode it, and hand the frame to the link
    fn transmit_head<H: Host>(&mut self, host: &mut H) -> Result<SendStep, EngineError> {
        let Some((_, head)) = self.queue.front() else {
            return Ok(SendStep::Blocked);
        };
        let head = head.clone();

        if head.is_hello() {
            if !self.scheduler.sendable.contains(&head.iface) {
                return Ok(SendStep::Blocked);
            }
            self.queue.pop_front();
            let mut frame = BytesMut::with_capacity(1 + head.payload.len());
            frame.put_u8(FrameType::Hello as u8);
            frame.put_slice(&head.payload);
            self.link_send(host, head.iface, frame.freeze(), LinkAddr::BROADCAST);
            self.stats.hellos_sent += 1;
            return Ok(SendStep::Sent);
        }

        let mut header = CodingHeader::new(self.primary_network(host));
        header.add_next_hop(head.dest_link, head.fingerprint);

        let neighbor = if head.is_broadcast() {
            None
        } else {
            let index = self.neighbors.find_holding(head.fingerprint).ok_or_else(|| {
                EngineError::invariant(format!(
                    "queued entry {} is in no virtual queue",
                    head.fingerprint
                ))
            })?;
            self.neighbor_mut(index)?.queue_remove(head.fingerprint);
            Some(index)
        };
        self.queue.pop_front();

        let outcome = match neighbor {
            Some(index) => Encoder {
                queue: &mut self.queue,
                retransmit: &mut self.retransmit,
                neighbors: &mut self.neighbors,
                tracker: &self.tracker,
                sendable: &self.scheduler.sendable,
                interfaces: &self.interfaces,
                max_retries: self.config.max_retries,
                retry_drops: &mut self.stats.retry_drops,
            }
            .encode(&head, index, &mut header)?,
            None => EncodeOutcome::Send(Transmission {
                payload: head.payload.clone(),
                iface: head.iface,
                dest: head.dest_link,
                partners: Vec::new(),
            }),
        };

        let tx = match outcome {
            EncodeOutcome::Redundant => {
                self.stats.redundant_drops += 1;
                debug!(fingerprint = %head.fingerprint, "Destination already holds packet; dropped");
                return Ok(SendStep::Discarded);
            }
            EncodeOutcome::Send(tx) => tx,
        };

        if !tx.is_coded() && !self.scheduler.sendable.contains(&tx.iface) {
            // Put the entry back exactly where it was
            let handle = self.queue.push_front(head).map_err(|e| {
                EngineError::invariant(format!("requeue of blocked head failed: {e}"))
            })?;
            if let Some(index) = neighbor {
                self.neighbor_mut(index)?.queue_push_front(handle)?;
            }
            trace!(iface = %tx.iface, "Head entry blocked on its interface");
            return Ok(SendStep::Blocked);
        }

        if neighbor.is_some() {
            if head.hit_max(self.config.max_retries) {
                self.stats.retry_drops += 1;
                debug!(fingerprint = %head.fingerprint, "Final attempt; not tracked for retransmission");
            } else {
                let fingerprint = head.fingerprint;
                if let Err(e) = self.retransmit.push_back(head) {
                    warn!(fingerprint = %fingerprint, error = %e, "Entry not tracked for retransmission");
                }
            }
        }

        self.attach_feedback(&mut header);
        let degree = header.degree();
        let frame = Frame::Data {
            header,
            payload: tx.payload,
        }
        .encode()?;
        self.link_send(host, tx.iface, frame, tx.dest);
        self.stats.frames_sent += 1;
        if degree > 1 {
            self.stats.coded_frames += 1;
            debug!(degree, iface = %tx.iface, "Sent coded frame");
        }
        Ok(SendStep::Sent)
    }

    fn link_send<H: Host>(
        &mut self,
        host: &mut H,
        iface: InterfaceId,
        frame: bytes::Bytes,
        dest: LinkAddr,
    ) {
        let depth = host.pending_depth(iface);
        if let Err(e) = host.send(iface, frame, dest) {
            self.stats.link_errors += 1;
            warn!(%iface, %dest, depth, error = %e, "Link send failed");
        }
    }
}
