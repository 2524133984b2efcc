//! Throughput Benchmarks
//!
//! Benchmarks for measuring:
//! - Raw pipe throughput between two threads
//! - Streaming read channel throughput
//! - Cached path resolution
//!
//! Run with: cargo bench --bench throughput -p sluice-daemon

use std::io::Write;
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use sluice_core::{CacheConfig, VirtualPath};
use sluice_daemon::{
    BoundedPipe, FileChannel, Generator, PathResolver, PipeReadChannel, TreeDirectory,
    VirtualFileSystem,
};

const PAYLOAD: usize = 8 * 1024 * 1024;

/// Benchmark one producer and one consumer across pipe capacities
fn bench_pipe(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    for capacity in [4 * 1024, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            &capacity,
            |b, &capacity| {
                let chunk = vec![0xA5u8; 32 * 1024];
                b.iter(|| {
                    let pipe = BoundedPipe::new(capacity);
                    let mut writer = pipe.writer();
                    let chunk = chunk.clone();
                    let producer = thread::spawn(move || {
                        for _ in 0..PAYLOAD / chunk.len() {
                            writer.write_all(&chunk).unwrap();
                        }
                    });

                    let mut buf = vec![0u8; 32 * 1024];
                    let mut total = 0;
                    while let Some(n) = pipe.read(&mut buf).unwrap() {
                        total += n;
                    }
                    producer.join().unwrap();
                    black_box(total)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark a streaming read channel fed by a worker thread
fn bench_read_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_channel");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));

    group.bench_function("stream_8mb", |b| {
        b.iter(|| {
            let mut channel = PipeReadChannel::spawn("bench", 1024 * 1024, |w| {
                let chunk = [0x5Au8; 64 * 1024];
                for _ in 0..PAYLOAD / chunk.len() {
                    w.write_all(&chunk)?;
                }
                Ok(())
            })
            .unwrap();

            let mut buf = vec![0u8; 64 * 1024];
            let mut total = 0;
            while let Some(n) = channel.read(&mut buf).unwrap() {
                total += n;
            }
            channel.close().unwrap();
            black_box(total)
        })
    });

    group.finish();
}

/// Benchmark cached resolution of a nested path
fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    let root = TreeDirectory::new("");
    let mut dir = root.add_directory("a");
    for name in ["b", "c", "d"] {
        dir = dir.add_directory(name);
    }
    let generator: Generator = Arc::new(|w: &mut dyn Write| w.write_all(b"leaf"));
    dir.add_generated("leaf", Some(4), generator);

    let fs = VirtualFileSystem::new("bench", root, &CacheConfig::default());
    let path = VirtualPath::parse("/a/b/c/d/leaf").unwrap();

    group.bench_function("cached_depth_5", |b| {
        b.iter(|| black_box(fs.resolve(black_box(&path)).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_pipe, bench_read_channel, bench_resolution);
criterion_main!(benches);
