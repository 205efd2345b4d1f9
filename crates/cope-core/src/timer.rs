//! Deterministic timer queue
//!
//! Hosts that drive the engine from their own event loop (the tokio runtime,
//! the discrete-event simulator, the test mocks) keep scheduled timers here
//! and fire them in deadline order. Timers with equal deadlines fire in the
//! order they were scheduled.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::traits::{TimerHandle, TimerKind};

/// Pending timers ordered by deadline
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    pending: BTreeMap<(Instant, u64), TimerKind>,
    deadlines: HashMap<u64, Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` to fire at `deadline`
    pub fn schedule_at(&mut self, deadline: Instant, kind: TimerKind) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert((deadline, id), kind);
        self.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.schedule_at(now + delay, kind)
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(deadline) = self.deadlines.remove(&handle.0) {
            self.pending.remove(&(deadline, handle.0));
        }
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, TimerKind)> {
        let (&(deadline, id), _) = self.pending.iter().next()?;
        if deadline > now {
            return None;
        }
        let kind = self.pending.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((TimerHandle(id), kind))
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        let late = timers.schedule_after(now, Duration::from_millis(20), TimerKind::Hello);
        let early = timers.schedule_after(now, Duration::from_millis(5), TimerKind::Retransmit);

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(5)));
        assert!(timers.pop_due(now).is_none());

        let later = now + Duration::from_millis(30);
        assert_eq!(timers.pop_due(later), Some((early, TimerKind::Retransmit)));
        assert_eq!(timers.pop_due(later), Some((late, TimerKind::Hello)));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_removes_timer() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        let handle = timers.schedule_after(now, Duration::from_millis(1), TimerKind::TrySend);
        assert!(timers.is_pending(handle));
        timers.cancel(handle);
        assert!(!timers.is_pending(handle));
        assert!(timers.pop_due(now + Duration::from_secs(1)).is_none());
        // cancelling twice is harmless
        timers.cancel(handle);
    }

    #[test]
    fn test_equal_deadlines_fire_in_schedule_order() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        let a = timers.schedule_at(now, TimerKind::TrySend);
        let b = timers.schedule_at(now, TimerKind::Hello);
        assert_eq!(timers.pop_due(now).map(|(h, _)| h), Some(a));
        assert_eq!(timers.pop_due(now).map(|(h, _)| h), Some(b));
    }
}
