//! Benchmarks for xdb lookups across the three loader modes.
//!
//! Run with: cargo bench

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ipxdb::{Maker, SearchMode, Searcher};
use tempfile::TempDir;

/// Build an xdb with `count` contiguous /24 ranges under 10.0.0.0.
fn generate_xdb(dir: &TempDir, count: u32) -> PathBuf {
    let mut content = String::new();
    for i in 0..count {
        let start = 0x0A00_0000u32 + i * 256;
        let end = start + 255;
        writeln!(
            content,
            "{}.{}.{}.{}|{}.{}.{}.{}|region-{}",
            start >> 24,
            (start >> 16) & 0xFF,
            (start >> 8) & 0xFF,
            start & 0xFF,
            end >> 24,
            (end >> 16) & 0xFF,
            (end >> 8) & 0xFF,
            end & 0xFF,
            i % 64
        )
        .unwrap();
    }

    let src = dir.path().join("bench_ranges.txt");
    fs::write(&src, content).unwrap();
    let dst = dir.path().join("bench.xdb");

    let mut maker = Maker::new(&src, &dst).unwrap();
    maker.init().unwrap();
    maker.start().unwrap();
    maker.finish().unwrap();
    dst
}

/// Query IPs spread across the covered ranges plus some misses.
fn generate_queries(count: u32) -> Vec<u32> {
    (0..1000u32)
        .map(|i| match i % 10 {
            9 => 0x7F00_0001 + i, // miss
            _ => 0x0A00_0000 + (i * 7919) % (count * 256),
        })
        .collect()
}

fn bench_search_modes(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let xdb = generate_xdb(&dir, 4096);
    let queries = generate_queries(4096);

    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(queries.len() as u64));

    for mode in [SearchMode::File, SearchMode::Vector, SearchMode::Memory] {
        let searcher = Searcher::open(&xdb, mode).unwrap();
        group.bench_function(mode.as_str(), |b| {
            b.iter(|| {
                for &ip in &queries {
                    black_box(searcher.search(black_box(ip)).unwrap());
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_search_modes);
criterion_main!(benches);
