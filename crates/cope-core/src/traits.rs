//! Collaborator traits
//!
//! The coding engine never touches a radio, an IP stack or an event loop
//! directly. The host environment supplies them through these traits:
//!
//! - [`Link`]: frame transmission and per-interface backpressure
//! - [`AddressResolution`]: this node's own network address per interface
//! - [`Timers`]: one-shot timers delivered back to the engine by kind
//! - [`Clock`]: monotonic time for aging caches
//!
//! [`Host`] bundles all four so an engine is generic over a single parameter.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::{InterfaceId, LinkAddr};
use crate::error::LinkError;

/// Downward transmit path of one node
pub trait Link {
    /// Hand a fully built frame to `iface` for transmission to `dest`.
    ///
    /// Must not be called while `is_sendable(iface)` is false.
    fn send(&mut self, iface: InterfaceId, frame: Bytes, dest: LinkAddr) -> Result<(), LinkError>;

    /// True if the interface's downstream queue can take another frame
    fn is_sendable(&self, iface: InterfaceId) -> bool;

    /// Number of frames waiting in the interface's downstream queue
    fn pending_depth(&self, iface: InterfaceId) -> usize;
}

/// Lookup of this node's own addresses
pub trait AddressResolution {
    /// Network address bound to `iface`, or `None` if unconfigured
    fn local_network_address(&self, iface: InterfaceId) -> Option<Ipv4Addr>;
}

/// The three timers the engine arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Retransmission queue expiry
    Retransmit,
    /// Periodic re-arm of the send attempt
    TrySend,
    /// Neighbor advertisement
    Hello,
}

/// Opaque identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerHandle(pub u64);

/// One-shot timer service
///
/// When a timer expires the host calls back into the engine with the kind and
/// handle it was scheduled under.
pub trait Timers {
    fn schedule_after(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle;

    /// Cancel a pending timer; unknown or already-fired handles are ignored
    fn cancel(&mut self, handle: TimerHandle);
}

/// Monotonic time source
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Everything an engine needs from its environment
pub trait Host: Link + AddressResolution + Timers + Clock {}

impl<T: Link + AddressResolution + Timers + Clock> Host for T {}
