//! Content fingerprints
//!
//! A [`Fingerprint`] names a packet by its bytes. It is computed once when a
//! packet is enqueued or first seen and then travels in headers, ack blocks
//! and reception reports. Two packets with the same fingerprint are the same
//! logical packet; 32-bit collisions are accepted as negligible.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 32-bit content-derived packet identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u32);

impl Fingerprint {
    /// Encoded length in bytes
    pub const LEN: usize = 4;

    /// Fingerprint a packet payload (first four bytes of its BLAKE3 digest)
    pub fn of(payload: &[u8]) -> Self {
        let digest = blake3::hash(payload);
        let b = digest.as_bytes();
        Self(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl From<u32> for Fingerprint {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
