//! Engine configuration
//!
//! All intervals are stored in milliseconds so configs read naturally as
//! JSON; accessor methods return [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for one node's coding engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopeConfig {
    /// Maximum entries in the output queue
    pub queue_capacity: usize,
    /// Maximum entries awaiting acknowledgment
    pub retransmit_queue_capacity: usize,
    /// Retransmissions before an unacknowledged entry is dropped
    pub max_retries: u8,
    /// Retransmission timer period
    pub retransmit_interval_ms: u64,
    /// Periodic send re-arm
    pub try_send_interval_ms: u64,
    /// Base hello period
    pub hello_interval_ms: u64,
    /// Upper bound of the random delay added to each hello period
    pub hello_jitter_ms: u64,
    /// Frames transmitted per send attempt
    pub send_burst: usize,
    /// Packet pool bound (entries)
    pub pool_capacity: usize,
    /// Packet pool entries older than this are evicted
    pub pool_max_age_ms: u64,
    /// Reception tracker bound (fingerprint/neighbor pairs)
    pub tracker_capacity: usize,
    /// Reception tracker entries older than this are evicted
    pub tracker_max_age_ms: u64,
    /// IPv4 TTL written into packets recovered by decoding
    pub decoded_ttl: u8,
}

impl Default for CopeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 800,
            retransmit_queue_capacity: 800,
            max_retries: 3,
            retransmit_interval_ms: 25,
            try_send_interval_ms: 10,
            hello_interval_ms: 1_000,
            hello_jitter_ms: 500,
            send_burst: 1,
            pool_capacity: 4_096,
            pool_max_age_ms: 10_000,
            tracker_capacity: 16_384,
            tracker_max_age_ms: 10_000,
            decoded_ttl: 64,
        }
    }
}

impl CopeConfig {
    /// Short timers and small caches for interactive traffic
    pub fn low_latency() -> Self {
        Self {
            queue_capacity: 200,
            retransmit_queue_capacity: 200,
            retransmit_interval_ms: 10,
            try_send_interval_ms: 2,
            send_burst: 4,
            pool_capacity: 1_024,
            pool_max_age_ms: 2_000,
            tracker_capacity: 4_096,
            tracker_max_age_ms: 2_000,
            ..Self::default()
        }
    }

    /// Larger caches for nodes with many neighbors and long-lived flows
    pub fn dense_mesh() -> Self {
        Self {
            queue_capacity: 2_000,
            retransmit_queue_capacity: 2_000,
            retransmit_interval_ms: 50,
            hello_interval_ms: 2_000,
            hello_jitter_ms: 1_000,
            pool_capacity: 16_384,
            pool_max_age_ms: 30_000,
            tracker_capacity: 65_536,
            tracker_max_age_ms: 30_000,
            ..Self::default()
        }
    }

    /// Small, fast config for unit and integration tests
    pub fn testing() -> Self {
        Self {
            queue_capacity: 16,
            retransmit_queue_capacity: 16,
            hello_jitter_ms: 0,
            pool_capacity: 256,
            tracker_capacity: 1_024,
            ..Self::default()
        }
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms)
    }

    pub fn try_send_interval(&self) -> Duration {
        Duration::from_millis(self.try_send_interval_ms)
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    pub fn pool_max_age(&self) -> Duration {
        Duration::from_millis(self.pool_max_age_ms)
    }

    pub fn tracker_max_age(&self) -> Duration {
        Duration::from_millis(self.tracker_max_age_ms)
    }

    /// Validate the configuration
    ///
    /// Returns a list of warnings if the configuration has potential issues.
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.queue_capacity == 0 {
            warnings.push(ConfigWarning::ZeroQueueCapacity);
        }
        if self.retransmit_queue_capacity == 0 && self.max_retries > 0 {
            warnings.push(ConfigWarning::RetriesWithoutRetransmitQueue);
        }
        if self.try_send_interval_ms == 0 || self.retransmit_interval_ms == 0 {
            warnings.push(ConfigWarning::ZeroTimerInterval);
        }
        if self.send_burst == 0 {
            warnings.push(ConfigWarning::ZeroSendBurst);
        }
        // Operands must outlive at least one retransmission round
        if self.pool_max_age_ms < self.retransmit_interval_ms * u64::from(self.max_retries) {
            warnings.push(ConfigWarning::PoolAgesBeforeRetries);
        }
        if self.pool_capacity < self.queue_capacity {
            warnings.push(ConfigWarning::PoolSmallerThanQueue);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Output queue cannot hold anything
    ZeroQueueCapacity,
    /// Retries configured but nothing can wait for an ack
    RetriesWithoutRetransmitQueue,
    /// A periodic timer would spin
    ZeroTimerInterval,
    /// Send attempts would never transmit
    ZeroSendBurst,
    /// Pool entries expire before the last retransmission
    PoolAgesBeforeRetries,
    /// Pool cannot hold every queued packet
    PoolSmallerThanQueue,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroQueueCapacity => write!(f, "queue_capacity is zero"),
            ConfigWarning::RetriesWithoutRetransmitQueue => {
                write!(f, "max_retries > 0 but retransmit_queue_capacity is zero")
            }
            ConfigWarning::ZeroTimerInterval => write!(f, "a timer interval is zero"),
            ConfigWarning::ZeroSendBurst => write!(f, "send_burst is zero"),
            ConfigWarning::PoolAgesBeforeRetries => {
                write!(f, "pool_max_age is shorter than the retransmission window")
            }
            ConfigWarning::PoolSmallerThanQueue => {
                write!(f, "pool_capacity is smaller than queue_capacity")
            }
        }
    }
}
