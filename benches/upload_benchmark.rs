//! Upload benchmarks
//!
//! Measures the streaming copy on its own and a full upload through the
//! filesystem for a range of body sizes.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::stream;
use hyper::header::HeaderMap;
use spool_uploadr::upload::{
    RequestMeta, SizeLimiter, StreamCopier, UploadError, Uploader, UploaderConfig,
};
use tokio::runtime::Runtime;

const CHUNK_SIZE: usize = 16 * 1024;
const SIZES: [usize; 4] = [1024, 64 * 1024, 1024 * 1024, 8 * 1024 * 1024];

fn chunks(size: usize) -> Vec<Result<Bytes, UploadError>> {
    let data = Bytes::from(vec![0x5au8; size]);
    (0..size)
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(size))))
        .collect()
}

fn benchmark_stream_copy(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("stream_copy");

    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let copier = StreamCopier::new();
            b.to_async(&rt).iter(|| async {
                let mut limiter = SizeLimiter::new(Some(size as u64));
                let mut sink = tokio::io::sink();
                let copied = copier
                    .copy(stream::iter(chunks(size)), &mut sink, &mut limiter)
                    .await
                    .unwrap();
                black_box(copied)
            });
        });
    }

    group.finish();
}

fn benchmark_full_upload(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let root = tempfile::tempdir().unwrap();
    let uploader = Uploader::new(
        UploaderConfig::new(root.path().join("upload")).temp_dir(root.path().join("tmp")),
    );
    let meta = RequestMeta::new(HeaderMap::new(), "");

    let mut group = c.benchmark_group("full_upload");
    group.sample_size(20);

    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let result = uploader
                    .upload(&meta, stream::iter(chunks(size)))
                    .await
                    .unwrap();
                std::fs::remove_file(&result.path).unwrap();
                black_box(result.size)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_stream_copy, benchmark_full_upload);
criterion_main!(benches);
