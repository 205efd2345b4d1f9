//! Error types for the coding engine

use cope_core::{Fingerprint, LinkError, WireError};
use thiserror::Error;

/// Errors from the output and retransmission queues
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue full (max: {capacity})")]
    Full { capacity: usize },

    #[error("Fingerprint {0} already queued")]
    Duplicate(Fingerprint),
}

/// Reasons a coded frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Insufficient operands: {missing} fingerprints missing from pool")]
    Insufficient { missing: usize },

    #[error("Nothing to decode: every fingerprint is already in the pool")]
    NothingNew,

    #[error("Encode degree {0} is not decodable")]
    Degree(usize),
}

/// Errors from neighbor-table bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NeighborError {
    #[error("Entry {0} already in virtual queue")]
    DuplicateVirtualEntry(Fingerprint),
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Neighbor error: {0}")]
    Neighbor(#[from] NeighborError),

    #[error("Protocol invariant violated: {0}")]
    Invariant(String),

    #[error("Engine halted after a fatal error")]
    Halted,
}

impl EngineError {
    /// Fatal errors mean this node's state can no longer be trusted.
    ///
    /// Capacity, decode and link errors are environmental and leave the
    /// engine usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Wire(_)
                | EngineError::Neighbor(_)
                | EngineError::Invariant(_)
                | EngineError::Halted
        )
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        EngineError::Invariant(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!EngineError::from(QueueError::Full { capacity: 1 }).is_fatal());
        assert!(!EngineError::from(DecodeError::Insufficient { missing: 2 }).is_fatal());
        assert!(
            EngineError::from(WireError::Truncated {
                needed: 4,
                available: 2
            })
            .is_fatal()
        );
        assert!(EngineError::invariant("missing neighbor").is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = QueueError::Full { capacity: 800 };
        assert_eq!(err.to_string(), "Queue full (max: 800)");
    }
}
