//! Codec benchmarks for tapline-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tapline_protocol::{codec, Encoding, ServerMessage, TapEvent};

fn tap() -> ServerMessage {
    ServerMessage::Tap(TapEvent {
        from: "me".into(),
        to: "gf".into(),
        x: 0.5,
        y: 0.2,
        ts: 1_700_000_000_000,
    })
}

fn bench_encode_tap(c: &mut Criterion) {
    let message = tap();

    let mut group = c.benchmark_group("encode_tap");
    group.bench_function("json", |b| {
        b.iter(|| codec::encode(black_box(&message), Encoding::Json))
    });
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::encode(black_box(&message), Encoding::MessagePack))
    });
    group.finish();
}

fn bench_decode_hello(c: &mut Criterion) {
    let json = br#"{"type":"hello","who":"me"}"#.to_vec();

    c.bench_function("decode_hello_json", |b| {
        b.iter(|| codec::decode(black_box(&json), Encoding::Json))
    });
}

criterion_group!(benches, bench_encode_tap, bench_decode_hello);
criterion_main!(benches);
