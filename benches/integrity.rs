//! Checksum, chunking and diff throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use replivault::checksum::ChecksumEngine;
use replivault::chunk::Chunker;
use replivault::crypto::{VaultKey, XorCipher};
use replivault::diff::{BinaryDiffAnalyzer, DiffConfig};
use replivault::replica::Pipeline;
use std::sync::Arc;

const SIZES: [usize; 3] = [1024, 64 * 1024, 1024 * 1024];

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// Copy of `data` with a byte flipped every `stride` bytes
fn damaged(data: &[u8], stride: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    for i in (0..out.len()).step_by(stride) {
        out[i] ^= 0xff;
    }
    out
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    let engine = ChecksumEngine::default();

    for size in SIZES {
        let data = sample(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(engine.checksum(black_box(data))))
        });
    }
    group.finish();
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_split_reassemble");
    let chunker = Chunker::with_size(16 * 1024).unwrap();

    for size in SIZES {
        let data = sample(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let chunks = chunker.split(data);
                black_box(chunker.reassemble(&chunks, None).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("replica_pipeline");
    let pipeline = Pipeline::new(
        Arc::new(XorCipher::new(VaultKey::generate())),
        1024,
        ChecksumEngine::default(),
    );

    for size in SIZES {
        let data = sample(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let processed = pipeline.process(data, true, true).unwrap();
                black_box(
                    pipeline
                        .reverse(&processed.data, processed.compressed, processed.encrypted)
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_diff");
    let analyzer = BinaryDiffAnalyzer::new(DiffConfig::default());

    for size in SIZES {
        let original = sample(size);
        let sparse = damaged(&original, 4096);
        let truncated = original[..size / 2].to_vec();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("sparse", size), &sparse, |b, candidate| {
            b.iter(|| black_box(analyzer.diff(&original, candidate)))
        });
        group.bench_with_input(BenchmarkId::new("truncated", size), &truncated, |b, candidate| {
            b.iter(|| black_box(analyzer.diff(&original, candidate)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_checksum, bench_chunking, bench_pipeline, bench_diff);
criterion_main!(benches);
