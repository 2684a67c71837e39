//! Codec benchmarks for parlor-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parlor_protocol::{codec, MessagePayload, ServerFrame};

fn sample_frame(body_len: usize) -> ServerFrame {
    ServerFrame::NewMessage(MessagePayload {
        sender: "alice".into(),
        recipient: None,
        message: "x".repeat(body_len),
        timestamp: "2024-01-01 12:00:00".into(),
    })
}

fn bench_encode_json(c: &mut Criterion) {
    let frame = sample_frame(64);

    let mut group = c.benchmark_group("encode_json");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("new_message_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&frame)))
    });
    group.finish();
}

fn bench_encode_msgpack(c: &mut Criterion) {
    let frame = sample_frame(64);

    let mut group = c.benchmark_group("encode_msgpack");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("new_message_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = sample_frame(256);

    c.bench_function("json_roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode_json(black_box(&frame)).unwrap();
            codec::decode_json::<ServerFrame>(black_box(&encoded)).unwrap()
        })
    });

    c.bench_function("msgpack_roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode::<ServerFrame>(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode_json, bench_encode_msgpack, bench_roundtrip);
criterion_main!(benches);
