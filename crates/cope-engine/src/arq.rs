//! Retransmission
//!
//! Every unicast entry that goes on air, alone or as a coding partner, is
//! copied into the retransmission queue until it reaches the retry limit.
//! Acks and reception reports erase entries as they arrive. Each expiry of
//! the retransmission timer takes the oldest entry and, unless its
//! destination is by now known to hold it, puts it back at the front of the
//! output queue and of its neighbor's virtual queue.

use cope_core::Host;
use tracing::{debug, trace};

use crate::engine::CopeEngine;
use crate::error::EngineError;

impl CopeEngine {
    pub(crate) fn on_retransmit_timer<H: Host>(&mut self, host: &mut H) -> Result<(), EngineError> {
        let Some(mut entry) = self.retransmit.pop_front() else {
            return Ok(());
        };
        let fingerprint = entry.fingerprint;

        let delivered = self
            .neighbors
            .find_by_link(&entry.dest_link)
            .and_then(|i| self.neighbors.get(i))
            .is_some_and(|n| self.tracker.neighbor_has(fingerprint, n));

        if delivered {
            trace!(fingerprint = %fingerprint, "Destination holds packet; not retransmitting");
        } else if entry.hit_max(self.config.max_retries) {
            self.stats.retry_drops += 1;
            debug!(fingerprint = %fingerprint, retries = entry.retries, "Retry limit reached; dropping");
        } else {
            entry.retries += 1;
            let retries = entry.retries;
            let dest = entry.dest_link;
            let channel = self.channel_of(entry.iface).unwrap_or_default();
            match self.queue.push_front(entry) {
                Ok(handle) => {
                    let index = self.neighbors.ensure_for_link(dest, channel);
                    self.neighbor_mut(index)?.queue_push_front(handle)?;
                    self.stats.retransmissions += 1;
                    debug!(fingerprint = %fingerprint, retries, "Retransmitting");
                }
                Err(e) => {
                    debug!(fingerprint = %fingerprint, error = %e, "Retransmission not queued");
                }
            }
        }

        if !self.retransmit.is_empty() {
            self.scheduler
                .arm_retransmit(host, self.config.retransmit_interval());
        }
        self.try_send(host)
    }
}
