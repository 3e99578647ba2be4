//! Codec benchmarks for pagefeed-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pagefeed_protocol::{codec, Encoding, QueryResult, ServerMessage};
use serde_json::json;

fn page_result(size: usize) -> ServerMessage {
    ServerMessage::page_query_result(
        QueryResult::new("/blog/post/", json!({"data": {"body": "x".repeat(size)}})),
        "emitPageData",
    )
}

fn bench_encode_json(c: &mut Criterion) {
    let msg = page_result(1024);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("json_1KB", |b| {
        b.iter(|| codec::encode(black_box(&msg), Encoding::Json))
    });
    group.bench_function("msgpack_1KB", |b| {
        b.iter(|| codec::encode(black_box(&msg), Encoding::MessagePack))
    });
    group.finish();
}

fn bench_decode_event(c: &mut Criterion) {
    let raw = br#"{"event":"getDataForPath","data":"/blog/post/"}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("event_json", |b| {
        b.iter(|| codec::decode_event(black_box(raw), Encoding::Json))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_json, bench_decode_event);
criterion_main!(benches);
