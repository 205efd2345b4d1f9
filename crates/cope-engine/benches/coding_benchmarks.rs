//! Coding engine performance benchmarks
//!
//! Benchmarks for the hot paths of a forwarding node:
//! - XOR combination of payloads
//! - Decoding a coded frame against the packet pool
//! - Output queue push, lookup and erase
//! - Wire codec for coding headers
//!
//! Run with: cargo bench -p cope-engine

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use cope_core::{AckBlock, CodingHeader, Fingerprint, InterfaceId, LinkAddr};
use cope_engine::{OutboundPacket, PacketPool, PacketQueue, QueueEntry, decode, xor_combine};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

// ============================================================================
// Fixtures
// ============================================================================

fn payload(seed: u8, len: usize) -> Bytes {
    (0..len).map(|i| seed.wrapping_add(i as u8) | 1).collect()
}

fn entry(seed: u32) -> QueueEntry {
    QueueEntry::data(OutboundPacket {
        payload: Bytes::from(seed.to_be_bytes().repeat(64)),
        src_link: LinkAddr::from_index(1),
        dest_link: LinkAddr::from_index(2 + seed % 8),
        src_net: Ipv4Addr::new(10, 0, 0, 1),
        dest_net: Ipv4Addr::new(10, 0, 0, 2),
        iface: InterfaceId(0),
    })
}

// ============================================================================
// XOR
// ============================================================================

fn bench_xor(c: &mut Criterion) {
    let mut group = c.benchmark_group("xor");
    let a = payload(3, 1500);
    let b = payload(7, 1500);
    let short = payload(11, 64);

    group.bench_function("combine_1500_bytes", |bench| {
        bench.iter(|| xor_combine(black_box(&a), black_box(&b)))
    });
    group.bench_function("combine_unequal_lengths", |bench| {
        bench.iter(|| xor_combine(black_box(&a), black_box(&short)))
    });
    group.finish();
}

// ============================================================================
// Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let now = Instant::now();

    for degree in [2usize, 4, 8] {
        let packets: Vec<Bytes> = (0..degree).map(|i| payload(i as u8, 1200)).collect();
        let mut pool = PacketPool::new(1024, Duration::from_secs(60));
        let mut next_hops = BTreeMap::new();
        let mut coded = packets[0].clone();
        for (i, p) in packets.iter().enumerate() {
            let fp = Fingerprint::of(p);
            next_hops.insert(LinkAddr::from_index(i as u32 + 1), fp);
            if i > 0 {
                pool.insert(fp, p.clone(), now);
                coded = xor_combine(&coded, p);
            }
        }

        group.bench_function(format!("recover_degree_{degree}"), |bench| {
            bench.iter(|| decode(black_box(&next_hops), black_box(&coded), &pool))
        });
    }
    group.finish();
}

// ============================================================================
// Queue
// ============================================================================

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let entries: Vec<QueueEntry> = (0..512).map(entry).collect();

    group.bench_function("fill_and_drain_512", |bench| {
        bench.iter(|| {
            let mut queue = PacketQueue::new(512);
            for e in &entries {
                let _ = queue.push_back(e.clone());
            }
            while queue.pop_front().is_some() {}
        })
    });

    let mut full = PacketQueue::new(512);
    for e in &entries {
        let _ = full.push_back(e.clone());
    }
    let probe = entries[400].fingerprint;
    group.bench_function("contains_512", |bench| {
        bench.iter(|| full.contains(black_box(probe)))
    });
    group.bench_function("erase_and_reinsert", |bench| {
        bench.iter(|| {
            if let Some(e) = full.erase(probe) {
                let _ = full.push_back(e);
            }
        })
    });
    group.finish();
}

// ============================================================================
// Wire codec
// ============================================================================

fn bench_header_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");
    let mut header = CodingHeader::new(Ipv4Addr::new(10, 0, 0, 1));
    for i in 0..4u32 {
        header.add_next_hop(LinkAddr::from_index(i + 2), Fingerprint(i));
        header.add_report(Fingerprint(100 + i));
        header.add_ack(AckBlock::new(Ipv4Addr::new(10, 0, 0, 9), Fingerprint(200 + i)));
    }

    group.bench_function("encode_degree_4", |bench| {
        bench.iter(|| {
            let mut buf = BytesMut::with_capacity(header.encoded_len());
            header.encode(&mut buf).map(|_| buf.len())
        })
    });

    let mut buf = BytesMut::new();
    if header.encode(&mut buf).is_ok() {
        let encoded = buf.freeze();
        group.bench_function("decode_degree_4", |bench| {
            bench.iter(|| CodingHeader::decode(&mut encoded.clone()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_xor,
    bench_decode,
    bench_queue,
    bench_header_codec
);
criterion_main!(benches);
