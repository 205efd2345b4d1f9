//! Core types for the COPE simulation
//!
//! Nodes are named by capital letters (A-Z). Each node gets one radio whose
//! link address, network address and channel are derived from its index, and
//! application traffic is carried in a minimal IPv4 header so relays can read
//! the final destination and decoders can reset the TTL.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use cope_core::{Channel, LinkAddr};
use serde::{Deserialize, Serialize};

/// Identifier for a simulated node (A-Z)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub char);

impl NodeId {
    pub fn new(c: char) -> Option<Self> {
        if c.is_ascii_uppercase() {
            Some(Self(c))
        } else {
            None
        }
    }

    /// Node at position `index` (A = 0)
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index)
            .ok()
            .and_then(|i| b'A'.checked_add(i))
            .map(char::from)
            .and_then(Self::new)
    }

    pub fn index(&self) -> usize {
        usize::from(self.0 as u8 - b'A')
    }

    pub fn link(&self) -> LinkAddr {
        LinkAddr::from_index(self.index() as u32 + 1)
    }

    pub fn net(&self) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, self.index() as u8 + 1)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Radio parameters of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub channel: Channel,
}

/// A stream of packets from `source` to `destination`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub source: NodeId,
    pub destination: NodeId,
}

/// Application packet: 20-byte IPv4 header plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPacket {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub sequence: u32,
    pub body_len: usize,
}

impl SimPacket {
    pub const HEADER_LEN: usize = 20;
    pub const INITIAL_TTL: u8 = 64;

    /// Serialize with a valid header checksum; the body is `sequence`-derived
    /// filler so every packet of a flow fingerprints differently
    pub fn to_bytes(&self) -> Bytes {
        let total = Self::HEADER_LEN + self.body_len;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(0x45);
        buf.put_u8(0);
        buf.put_u16(total as u16);
        buf.put_u32(self.sequence);
        buf.put_u8(Self::INITIAL_TTL);
        buf.put_u8(17);
        buf.put_u16(0);
        buf.put_slice(&self.source.octets());
        buf.put_slice(&self.destination.octets());
        for i in 0..self.body_len {
            buf.put_u8((self.sequence as usize + i) as u8 | 0x80);
        }
        let packet = buf.freeze();
        cope_engine::restore_ipv4_ttl(packet, Self::INITIAL_TTL)
    }

    /// Destination address of a packet built by [`SimPacket::to_bytes`]
    pub fn destination_of(payload: &[u8]) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = payload.get(16..20)?.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    pub fn source_of(payload: &[u8]) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = payload.get(12..16)?.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_addresses() {
        let a = NodeId::from_index(0).unwrap();
        assert_eq!(a, NodeId('A'));
        assert_eq!(a.index(), 0);
        assert_eq!(a.net(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(a.link(), LinkAddr::from_index(1));
        assert!(NodeId::from_index(26).is_none());
        assert!(NodeId::new('a').is_none());
    }

    #[test]
    fn test_packet_header_fields() {
        let packet = SimPacket {
            source: NodeId('A').net(),
            destination: NodeId('C').net(),
            sequence: 7,
            body_len: 32,
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 52);
        assert_eq!(bytes[8], SimPacket::INITIAL_TTL);
        assert_eq!(SimPacket::destination_of(&bytes), Some(NodeId('C').net()));
        assert_eq!(SimPacket::source_of(&bytes), Some(NodeId('A').net()));
        assert_eq!(SimPacket::destination_of(&bytes[..10]), None);
    }

    #[test]
    fn test_sequences_give_distinct_payloads() {
        let make = |sequence| {
            SimPacket {
                source: NodeId('A').net(),
                destination: NodeId('B').net(),
                sequence,
                body_len: 8,
            }
            .to_bytes()
        };
        assert_ne!(make(1), make(2));
    }
}
