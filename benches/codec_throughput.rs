//! Envelope codec throughput benchmark.
//!
//! Measures encode/decode latency across payload sizes, below and above the
//! compression threshold, using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nodeflow::envelope::{Envelope, EnvelopeCodec, Payload};

const THRESHOLD: usize = 64 * 1024;

fn envelope(size: usize) -> Envelope {
    let bytes: Vec<u8> = (0..size).map(|i| (i % 64) as u8 + b' ').collect();
    Envelope::new("nodeA", Payload::new("text/plain", bytes))
}

fn bench_encode(c: &mut Criterion) {
    let codec = EnvelopeCodec::new(THRESHOLD);
    let payload_sizes: &[usize] = &[64, 4096, 65536, 262_144];

    let mut group = c.benchmark_group("encode");
    for &size in payload_sizes {
        let env = envelope(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &env, |b, e| {
            b.iter(|| codec.encode(black_box(e)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = EnvelopeCodec::new(THRESHOLD);
    let payload_sizes: &[usize] = &[64, 4096, 65536, 262_144];

    let mut group = c.benchmark_group("decode");
    for &size in payload_sizes {
        // Pre-encode; sizes above the threshold arrive compressed
        let wire = codec.encode(&envelope(size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| codec.decode(black_box(w)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
