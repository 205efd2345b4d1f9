//! Error types shared across the COPE crates

use thiserror::Error;

use crate::address::InterfaceId;

/// Errors raised while encoding or decoding frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Trailing bytes after {kind}: {count}")]
    TrailingBytes { kind: &'static str, count: usize },

    #[error("Too many {kind} entries: {count} (max: {max})")]
    TooManyEntries {
        kind: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Duplicate next hop in coding header")]
    DuplicateNextHop,
}

/// Errors reported by the link layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Interface {0} is not sendable")]
    NotSendable(InterfaceId),

    #[error("Unknown interface: {0}")]
    UnknownInterface(InterfaceId),

    #[error("Link send failed: {0}")]
    SendFailed(String),
}

/// A link address string that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid link address: {0}")]
pub struct AddressParseError(pub String);
