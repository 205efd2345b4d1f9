//! Wire format for COPE frames
//!
//! Every frame starts with a one-byte type discriminator followed by the
//! variant body. All integers are big-endian.
//!
//! ## Data frames
//!
//! ```text
//! u8   type = 0
//! [4]  sender network address
//! u16  N (encode degree)      N x ([6] next-hop link address, u32 fingerprint)
//! u16  M (reception reports)  M x u32 fingerprint
//! u16  K (ack blocks)         K x ([4] origin network address, u32 fingerprint)
//! ...  payload (plain, or the XOR of N packets)
//! ```
//!
//! The next-hop pairs are written in link-address order.
//!
//! ## Hello frames
//!
//! ```text
//! u8   type = 1
//! u8   count                  count x ([4] net, [6] link, u16 channel)
//! ```

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::address::{AddressTriple, LinkAddr};
use crate::error::WireError;
use crate::fingerprint::Fingerprint;

/// Frame type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    Hello = 1,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Hello),
            other => Err(WireError::UnknownFrameType(other)),
        }
    }
}

/// Acknowledgment that `fingerprint`, sent by `origin`, was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckBlock {
    pub origin: Ipv4Addr,
    pub fingerprint: Fingerprint,
}

impl AckBlock {
    pub const ENCODED_LEN: usize = 4 + Fingerprint::LEN;

    pub fn new(origin: Ipv4Addr, fingerprint: Fingerprint) -> Self {
        Self {
            origin,
            fingerprint,
        }
    }
}

/// Per-transmission coding metadata
///
/// The next-hop map holds one entry per packet mixed into the payload, so its
/// size is the encode degree (1 for an uncoded transmission). Reception
/// reports and ack blocks are piggybacked on whatever data frame goes out
/// next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingHeader {
    /// Network address of the transmitting node
    pub sender: Ipv4Addr,
    next_hops: BTreeMap<LinkAddr, Fingerprint>,
    reports: Vec<Fingerprint>,
    acks: Vec<AckBlock>,
}

impl CodingHeader {
    /// Fixed part: sender address plus the three counts
    const FIXED_LEN: usize = 4 + 2 + 2 + 2;
    const NEXT_HOP_LEN: usize = LinkAddr::LEN + Fingerprint::LEN;

    pub fn new(sender: Ipv4Addr) -> Self {
        Self {
            sender,
            next_hops: BTreeMap::new(),
            reports: Vec::new(),
            acks: Vec::new(),
        }
    }

    /// Record that `link` should decode `fingerprint` from this frame.
    ///
    /// Returns false if `link` is already named.
    pub fn add_next_hop(&mut self, link: LinkAddr, fingerprint: Fingerprint) -> bool {
        if self.next_hops.contains_key(&link) {
            return false;
        }
        self.next_hops.insert(link, fingerprint);
        true
    }

    /// Add a reception report; duplicates are ignored
    pub fn add_report(&mut self, fingerprint: Fingerprint) -> bool {
        if self.reports.contains(&fingerprint) {
            return false;
        }
        self.reports.push(fingerprint);
        true
    }

    /// Add an ack block; duplicates are ignored
    pub fn add_ack(&mut self, ack: AckBlock) -> bool {
        if self.acks.contains(&ack) {
            return false;
        }
        self.acks.push(ack);
        true
    }

    /// Number of packets XOR-ed into the payload
    pub fn degree(&self) -> usize {
        self.next_hops.len()
    }

    /// Fingerprint addressed to `link`, if it is a named next hop
    pub fn fingerprint_for(&self, link: &LinkAddr) -> Option<Fingerprint> {
        self.next_hops.get(link).copied()
    }

    pub fn next_hops(&self) -> &BTreeMap<LinkAddr, Fingerprint> {
        &self.next_hops
    }

    pub fn reports(&self) -> &[Fingerprint] {
        &self.reports
    }

    pub fn acks(&self) -> &[AckBlock] {
        &self.acks
    }

    pub fn is_broadcast(&self) -> bool {
        self.next_hops.contains_key(&LinkAddr::BROADCAST)
    }

    /// Serialized size in bytes
    pub fn encoded_len(&self) -> usize {
        Self::FIXED_LEN
            + self.next_hops.len() * Self::NEXT_HOP_LEN
            + self.reports.len() * Fingerprint::LEN
            + self.acks.len() * AckBlock::ENCODED_LEN
    }

    /// Write the header into `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let degree = count_u16("next-hop", self.next_hops.len())?;
        let reports = count_u16("report", self.reports.len())?;
        let acks = count_u16("ack", self.acks.len())?;

        buf.reserve(self.encoded_len());
        buf.put_slice(&self.sender.octets());
        buf.put_u16(degree);
        for (link, fp) in &self.next_hops {
            buf.put_slice(&link.octets());
            buf.put_u32(fp.0);
        }
        buf.put_u16(reports);
        for fp in &self.reports {
            buf.put_u32(fp.0);
        }
        buf.put_u16(acks);
        for ack in &self.acks {
            buf.put_slice(&ack.origin.octets());
            buf.put_u32(ack.fingerprint.0);
        }
        Ok(())
    }

    /// Read a header from the front of `buf`, advancing past it.
    ///
    /// Every count is checked against the remaining length before the entries
    /// it announces are read.
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let start = buf.remaining();
        let mut reader = Reader { buf, start };

        reader.need(4)?;
        let sender = reader.ipv4();
        let mut header = CodingHeader::new(sender);

        reader.need(2)?;
        let degree = reader.buf.get_u16() as usize;
        reader.need(degree * Self::NEXT_HOP_LEN)?;
        for _ in 0..degree {
            let link = reader.link();
            let fp = Fingerprint(reader.buf.get_u32());
            if !header.add_next_hop(link, fp) {
                return Err(WireError::DuplicateNextHop);
            }
        }

        reader.need(2)?;
        let reports = reader.buf.get_u16() as usize;
        reader.need(reports * Fingerprint::LEN)?;
        for _ in 0..reports {
            header.reports.push(Fingerprint(reader.buf.get_u32()));
        }

        reader.need(2)?;
        let acks = reader.buf.get_u16() as usize;
        reader.need(acks * AckBlock::ENCODED_LEN)?;
        for _ in 0..acks {
            let origin = reader.ipv4();
            let fp = Fingerprint(reader.buf.get_u32());
            header.acks.push(AckBlock::new(origin, fp));
        }

        Ok(header)
    }
}

/// Neighbor advertisement listing every local address triple of a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HelloMessage {
    pub triples: Vec<AddressTriple>,
}

impl HelloMessage {
    /// A hello carries at most this many triples (one-byte count)
    pub const MAX_TRIPLES: usize = u8::MAX as usize;

    pub fn new(triples: Vec<AddressTriple>) -> Self {
        Self { triples }
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.triples.len() * AddressTriple::ENCODED_LEN
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.triples.len() > Self::MAX_TRIPLES {
            return Err(WireError::TooManyEntries {
                kind: "hello triple",
                count: self.triples.len(),
                max: Self::MAX_TRIPLES,
            });
        }
        buf.reserve(self.encoded_len());
        buf.put_u8(self.triples.len() as u8);
        for t in &self.triples {
            buf.put_slice(&t.net.octets());
            buf.put_slice(&t.link.octets());
            buf.put_u16(t.channel);
        }
        Ok(())
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let start = buf.remaining();
        let mut reader = Reader { buf, start };

        reader.need(1)?;
        let count = reader.buf.get_u8() as usize;
        reader.need(count * AddressTriple::ENCODED_LEN)?;
        let mut triples = Vec::with_capacity(count);
        for _ in 0..count {
            let net = reader.ipv4();
            let link = reader.link();
            let channel = reader.buf.get_u16();
            triples.push(AddressTriple::new(net, link, channel));
        }
        if reader.buf.has_remaining() {
            return Err(WireError::TrailingBytes {
                kind: "hello",
                count: reader.buf.remaining(),
            });
        }
        Ok(Self { triples })
    }
}

/// A complete frame as handed to or received from the link layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data { header: CodingHeader, payload: Bytes },
    Hello(HelloMessage),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data { .. } => FrameType::Data,
            Frame::Hello(_) => FrameType::Hello,
        }
    }

    /// Serialize the frame, type byte first
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.frame_type() as u8);
        match self {
            Frame::Data { header, payload } => {
                header.encode(&mut buf)?;
                buf.put_slice(payload);
            }
            Frame::Hello(hello) => hello.encode(&mut buf)?,
        }
        Ok(buf.freeze())
    }

    /// Parse a frame. The payload of a data frame shares `data`'s storage.
    pub fn decode(data: Bytes) -> Result<Self, WireError> {
        let mut buf = data;
        if !buf.has_remaining() {
            return Err(WireError::Truncated {
                needed: 1,
                available: 0,
            });
        }
        match FrameType::try_from(buf.get_u8())? {
            FrameType::Data => {
                let header = CodingHeader::decode(&mut buf)?;
                Ok(Frame::Data {
                    header,
                    payload: buf,
                })
            }
            FrameType::Hello => Ok(Frame::Hello(HelloMessage::decode(&mut buf)?)),
        }
    }
}

fn count_u16(kind: &'static str, count: usize) -> Result<u16, WireError> {
    u16::try_from(count).map_err(|_| WireError::TooManyEntries {
        kind,
        count,
        max: u16::MAX as usize,
    })
}

/// Bounds-checked cursor over a frame body
struct Reader<'a> {
    buf: &'a mut Bytes,
    start: usize,
}

impl Reader<'_> {
    fn need(&self, n: usize) -> Result<(), WireError> {
        if self.buf.remaining() < n {
            let consumed = self.start - self.buf.remaining();
            return Err(WireError::Truncated {
                needed: consumed + n,
                available: self.start,
            });
        }
        Ok(())
    }

    fn ipv4(&mut self) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        self.buf.copy_to_slice(&mut octets);
        Ipv4Addr::from(octets)
    }

    fn link(&mut self) -> LinkAddr {
        let mut octets = [0u8; 6];
        self.buf.copy_to_slice(&mut octets);
        LinkAddr(octets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> CodingHeader {
        let mut header = CodingHeader::new(Ipv4Addr::new(10, 0, 0, 1));
        header.add_next_hop(LinkAddr::from_index(2), Fingerprint(0xaaaa_0001));
        header.add_next_hop(LinkAddr::from_index(3), Fingerprint(0xbbbb_0002));
        header.add_report(Fingerprint(7));
        header.add_ack(AckBlock::new(Ipv4Addr::new(10, 0, 0, 4), Fingerprint(9)));
        header
    }

    #[test]
    fn test_header_layout_is_bit_exact() {
        let mut header = CodingHeader::new(Ipv4Addr::new(10, 0, 0, 1));
        header.add_next_hop(LinkAddr::new([1, 2, 3, 4, 5, 6]), Fingerprint(0x0102_0304));
        header.add_report(Fingerprint(0x0a0b_0c0d));

        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();

        let expected: Vec<u8> = vec![
            10, 0, 0, 1, // sender
            0, 1, // degree
            1, 2, 3, 4, 5, 6, 1, 2, 3, 4, // next hop
            0, 1, // reports
            0x0a, 0x0b, 0x0c, 0x0d, // report
            0, 0, // acks
        ];
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(header.encoded_len(), expected.len());
    }

    #[test]
    fn test_next_hops_written_in_link_order() {
        let mut header = CodingHeader::new(Ipv4Addr::LOCALHOST);
        header.add_next_hop(LinkAddr::new([9, 0, 0, 0, 0, 0]), Fingerprint(1));
        header.add_next_hop(LinkAddr::new([1, 0, 0, 0, 0, 0]), Fingerprint(2));

        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        // first pair starts after sender(4) + degree(2)
        assert_eq!(buf[6], 1);
        assert_eq!(buf[6 + 10], 9);
    }

    #[test]
    fn test_data_frame_roundtrip() {
        let frame = Frame::Data {
            header: make_header(),
            payload: Bytes::from_static(b"coded payload"),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], FrameType::Data as u8);
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_hello_frame_layout() {
        let hello = HelloMessage::new(vec![AddressTriple::new(
            Ipv4Addr::new(10, 0, 0, 1),
            LinkAddr::new([0xa, 0xb, 0xc, 0xd, 0xe, 0xf]),
            6,
        )]);
        let bytes = Frame::Hello(hello.clone()).encode().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[1, 1, 10, 0, 0, 1, 0xa, 0xb, 0xc, 0xd, 0xe, 0xf, 0, 6]
        );
        assert_eq!(Frame::decode(bytes).unwrap(), Frame::Hello(hello));
    }

    #[test]
    fn test_truncated_header_reports_lengths() {
        let frame = Frame::Data {
            header: make_header(),
            payload: Bytes::new(),
        };
        let bytes = frame.encode().unwrap();
        let cut = bytes.slice(..bytes.len() - 3);
        match Frame::decode(cut) {
            Err(WireError::Truncated { needed, available }) => assert!(needed > available),
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_count_past_end_is_rejected() {
        // degree claims 5 next hops but none follow
        let bytes = Bytes::from_static(&[0, 10, 0, 0, 1, 0, 5]);
        assert!(matches!(
            Frame::decode(bytes),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_frame_type() {
        assert_eq!(
            Frame::decode(Bytes::from_static(&[7, 0])),
            Err(WireError::UnknownFrameType(7))
        );
    }

    #[test]
    fn test_hello_trailing_bytes_rejected() {
        let bytes = Bytes::from_static(&[1, 0, 0xff]);
        assert!(matches!(
            Frame::decode(bytes),
            Err(WireError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn test_duplicate_next_hop_rejected_on_decode() {
        let mut raw = vec![0u8, 10, 0, 0, 1, 0, 2];
        for fp in [1u8, 2] {
            raw.extend_from_slice(&[1, 1, 1, 1, 1, 1, 0, 0, 0, fp]);
        }
        raw.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            Frame::decode(Bytes::from(raw)),
            Err(WireError::DuplicateNextHop)
        );
    }

    #[test]
    fn test_header_dedupes_reports_and_acks() {
        let mut header = CodingHeader::new(Ipv4Addr::LOCALHOST);
        assert!(header.add_report(Fingerprint(1)));
        assert!(!header.add_report(Fingerprint(1)));
        let ack = AckBlock::new(Ipv4Addr::LOCALHOST, Fingerprint(1));
        assert!(header.add_ack(ack));
        assert!(!header.add_ack(ack));
        assert!(header.add_next_hop(LinkAddr::BROADCAST, Fingerprint(2)));
        assert!(header.is_broadcast());
    }
}
