//! Addressing primitives
//!
//! A node is reachable through one or more radios. Each radio has a
//! network address, a 6-byte link address and a channel number; the three
//! together form an [`AddressTriple`].

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressParseError;

/// Wireless channel number
pub type Channel = u16;

/// A 6-byte link-layer address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkAddr(pub [u8; 6]);

impl LinkAddr {
    /// Encoded length in bytes
    pub const LEN: usize = 6;

    /// The link-layer broadcast address
    pub const BROADCAST: LinkAddr = LinkAddr([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Build a locally-administered address from a small integer.
    ///
    /// Used by the simulator and tests to hand out unique addresses.
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        Self([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddr({self})")
    }
}

impl FromStr for LinkAddr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.split(':').collect();
        let bytes = hex::decode(&digits).map_err(|_| AddressParseError(s.to_string()))?;
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self(octets))
    }
}

/// Index of a local radio interface on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// One (network address, link address, channel) identity of a peer radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressTriple {
    pub net: Ipv4Addr,
    pub link: LinkAddr,
    pub channel: Channel,
}

impl AddressTriple {
    /// Encoded length in a hello message
    pub const ENCODED_LEN: usize = 4 + LinkAddr::LEN + 2;

    pub fn new(net: Ipv4Addr, link: LinkAddr, channel: Channel) -> Self {
        Self { net, link, channel }
    }

    /// A triple whose network address has not been learned yet
    pub fn unresolved(link: LinkAddr, channel: Channel) -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, link, channel)
    }

    /// True if any single field coincides with `other`.
    ///
    /// Two triples in conflict cannot both describe live radios of the same
    /// neighbor, so a hard add evicts the older one.
    pub fn conflicts_with(&self, other: &AddressTriple) -> bool {
        self.net == other.net || self.link == other.link || self.channel == other.channel
    }
}

impl fmt::Display for AddressTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, ch{})", self.net, self.link, self.channel)
    }
}
