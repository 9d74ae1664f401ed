//! Part codec, compression and digest benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rowsync_bench::{container, generate_rows};
use rowsync_codec::{content_hash, ContentEncoding, SerializationFormat};
use rowsync_core::ContainerSet;

/// Benchmark encoding a batch part.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_part");

    for count in [10, 100, 1_000].iter() {
        let part = container(&generate_rows(*count, 64));
        group.throughput(Throughput::Elements(*count as u64));
        for format in SerializationFormat::ALL {
            group.bench_with_input(BenchmarkId::new(format.key(), count), &part, |b, part| {
                b.iter(|| {
                    black_box(format.encode(black_box(part)).unwrap());
                });
            });
        }
    }

    group.finish();
}

/// Benchmark decoding a batch part.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_part");

    for count in [10, 100, 1_000].iter() {
        let part = container(&generate_rows(*count, 64));
        group.throughput(Throughput::Elements(*count as u64));
        for format in SerializationFormat::ALL {
            let bytes = format.encode(&part).unwrap();
            group.bench_with_input(BenchmarkId::new(format.key(), count), &bytes, |b, bytes| {
                b.iter(|| {
                    let decoded: ContainerSet = format.decode(black_box(bytes)).unwrap();
                    black_box(decoded);
                });
            });
        }
    }

    group.finish();
}

/// Benchmark compressing a response body.
fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");

    let body = SerializationFormat::Json
        .encode(&container(&generate_rows(1_000, 64)))
        .unwrap();
    group.throughput(Throughput::Bytes(body.len() as u64));
    for encoding in [ContentEncoding::Gzip, ContentEncoding::Deflate] {
        group.bench_with_input(
            BenchmarkId::new("compress", encoding.name()),
            &body,
            |b, body| {
                b.iter(|| black_box(encoding.compress(black_box(body)).unwrap()));
            },
        );
        let compressed = encoding.compress(&body).unwrap();
        group.bench_with_input(
            BenchmarkId::new("decompress", encoding.name()),
            &compressed,
            |b, compressed| {
                b.iter(|| black_box(encoding.decompress(black_box(compressed)).unwrap()));
            },
        );
    }

    group.finish();
}

/// Benchmark hashing a body.
fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        let body = rowsync_bench::random_data(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| black_box(content_hash(black_box(body))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_compress,
    bench_hash,
);
criterion_main!(benches);
