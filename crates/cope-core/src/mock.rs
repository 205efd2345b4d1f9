//! In-memory host for tests
//!
//! [`MockHost`] implements every collaborator trait: it records transmitted
//! frames instead of putting them on air, lets tests toggle per-interface
//! sendability, and keeps a manual clock that only moves when told to.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cope_core::{InterfaceId, MockHost};
//!
//! let mut host = MockHost::new().with_interface(InterfaceId(0), "10.0.0.1".parse()?);
//! let due = host.advance(Duration::from_millis(25));
//! for (handle, kind) in due {
//!     engine.on_timer(&mut host, kind, handle)?;
//! }
//! let frames = host.take_sent();
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::address::{InterfaceId, LinkAddr};
use crate::error::{LinkError, WireError};
use crate::timer::TimerQueue;
use crate::traits::{AddressResolution, Clock, Link, TimerHandle, TimerKind, Timers};
use crate::wire::Frame;

/// A frame captured by [`MockHost`]
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub iface: InterfaceId,
    pub dest: LinkAddr,
    pub bytes: Bytes,
}

impl SentFrame {
    pub fn decode(&self) -> Result<Frame, WireError> {
        Frame::decode(self.bytes.clone())
    }
}

#[derive(Debug, Clone)]
struct MockInterface {
    net: Ipv4Addr,
    sendable: bool,
    depth: usize,
}

/// Test double for a node's environment
#[derive(Debug)]
pub struct MockHost {
    interfaces: HashMap<InterfaceId, MockInterface>,
    sent: Vec<SentFrame>,
    timers: TimerQueue,
    now: Instant,
    fail_sends: bool,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            interfaces: HashMap::new(),
            sent: Vec::new(),
            timers: TimerQueue::new(),
            now: Instant::now(),
            fail_sends: false,
        }
    }

    /// Add a sendable interface bound to `net`
    pub fn with_interface(mut self, iface: InterfaceId, net: Ipv4Addr) -> Self {
        self.interfaces.insert(
            iface,
            MockInterface {
                net,
                sendable: true,
                depth: 0,
            },
        );
        self
    }

    pub fn set_sendable(&mut self, iface: InterfaceId, sendable: bool) {
        if let Some(i) = self.interfaces.get_mut(&iface) {
            i.sendable = sendable;
        }
    }

    /// Make every subsequent `send` fail
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// Frames sent so far, oldest first
    pub fn sent(&self) -> &[SentFrame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Move the clock forward and return every timer that came due, in order
    pub fn advance(&mut self, by: Duration) -> Vec<(TimerHandle, TimerKind)> {
        self.now += by;
        let mut due = Vec::new();
        while let Some(fired) = self.timers.pop_due(self.now) {
            due.push(fired);
        }
        due
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for MockHost {
    fn send(&mut self, iface: InterfaceId, frame: Bytes, dest: LinkAddr) -> Result<(), LinkError> {
        let state = self
            .interfaces
            .get(&iface)
            .ok_or(LinkError::UnknownInterface(iface))?;
        if !state.sendable {
            return Err(LinkError::NotSendable(iface));
        }
        if self.fail_sends {
            return Err(LinkError::SendFailed("mock failure".to_string()));
        }
        self.sent.push(SentFrame {
            iface,
            dest,
            bytes: frame,
        });
        Ok(())
    }

    fn is_sendable(&self, iface: InterfaceId) -> bool {
        self.interfaces.get(&iface).is_some_and(|i| i.sendable)
    }

    fn pending_depth(&self, iface: InterfaceId) -> usize {
        self.interfaces.get(&iface).map_or(0, |i| i.depth)
    }
}

impl AddressResolution for MockHost {
    fn local_network_address(&self, iface: InterfaceId) -> Option<Ipv4Addr> {
        self.interfaces.get(&iface).map(|i| i.net)
    }
}

impl Timers for MockHost {
    fn schedule_after(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.timers.schedule_after(self.now, delay, kind)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }
}

impl Clock for MockHost {
    fn now(&self) -> Instant {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_respects_sendability() {
        let iface = InterfaceId(0);
        let mut host = MockHost::new().with_interface(iface, Ipv4Addr::new(10, 0, 0, 1));
        assert!(host.send(iface, Bytes::from_static(b"x"), LinkAddr::BROADCAST).is_ok());

        host.set_sendable(iface, false);
        assert_eq!(
            host.send(iface, Bytes::from_static(b"x"), LinkAddr::BROADCAST),
            Err(LinkError::NotSendable(iface))
        );
        assert_eq!(host.sent().len(), 1);
    }

    #[test]
    fn test_advance_returns_due_timers() {
        let mut host = MockHost::new();
        let handle = host.schedule_after(Duration::from_millis(10), TimerKind::Hello);
        assert!(host.advance(Duration::from_millis(5)).is_empty());
        assert_eq!(host.advance(Duration::from_millis(5)), vec![(handle, TimerKind::Hello)]);
    }
}
