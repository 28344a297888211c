//! Criterion benchmarks for the telegram codec and the stream reassembler.
//!
//! Run with:
//! ```bash
//! cargo bench --package brewlink-core --bench codec_bench
//! ```

use brewlink_core::protocol::crc::crc16;
use brewlink_core::{decode_frame, encode_frame, FrameReassembler, Message, Packet};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ── Packet fixtures ───────────────────────────────────────────────────────────

fn make_ack() -> Packet {
    Packet::acknowledgement(true, 0x42, 0x41, 7)
}

fn make_status_command() -> Packet {
    Packet::data(0x42, 0x41, 0, Message::new(0x01, 0), vec![]).expect("valid packet")
}

fn make_product_request() -> Packet {
    Packet::request(0x42, 0x41, 3, Message::new(0x10, 0x0102), vec![0x2A; 32])
        .expect("valid packet")
}

/// Worst case for stuffing: every payload byte is reserved.
fn make_reserved_payload() -> Packet {
    Packet::data(0x41, 0x42, 9, Message::new(0x02, 0), vec![0x01; 240]).expect("valid packet")
}

fn fixtures() -> Vec<(&'static str, Packet)> {
    vec![
        ("Ack", make_ack()),
        ("StatusCommand", make_status_command()),
        ("Request(32)", make_product_request()),
        ("ReservedPayload(240)", make_reserved_payload()),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for (name, packet) in fixtures() {
        group.bench_with_input(BenchmarkId::new("packet", name), &packet, |b, packet| {
            b.iter(|| encode_frame(black_box(packet)).expect("encode must succeed"))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame");
    for (name, packet) in fixtures() {
        let frame = encode_frame(&packet).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("packet", name), &frame, |b, frame| {
            b.iter(|| decode_frame(black_box(frame)).expect("decode must succeed"))
        });
    }
    group.finish();
}

fn bench_crc(c: &mut Criterion) {
    let data = vec![0x5Au8; 256];
    c.bench_function("crc16_256_bytes", |b| b.iter(|| crc16(black_box(&data))));
}

/// Feeds a burst of frames to the reassembler in uneven chunks.
fn bench_reassembler(c: &mut Criterion) {
    let mut stream = Vec::new();
    for (_, packet) in fixtures() {
        stream.extend(encode_frame(&packet).expect("encode must succeed for benchmark setup"));
    }

    c.bench_function("reassembler_push_chunks_of_7", |b| {
        b.iter(|| {
            let mut reassembler = FrameReassembler::new(1024);
            let mut frames = 0;
            for chunk in black_box(&stream).chunks(7) {
                frames += reassembler.push(chunk).len();
            }
            frames
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_crc, bench_reassembler);
criterion_main!(benches);
