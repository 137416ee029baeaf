//! Micro-benchmarks for ConcordKV core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use concordkv::{Db, DbConfig};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Open a database with a large write buffer so all data stays in the
/// memtable (no background flushes).
fn open_memtable_only(dir: &std::path::Path) -> Db {
    Db::open(
        dir,
        DbConfig {
            memtable_size: 256 * 1024 * 1024,
            background_thread_count: 1,
            ..DbConfig::default()
        },
    )
    .expect("open")
}

/// Open a database with a small write buffer so flushes happen quickly
/// during sustained-write benchmarks.
fn open_small_buffer(dir: &std::path::Path) -> Db {
    Db::open(
        dir,
        DbConfig {
            memtable_size: 64 * 1024,
            background_thread_count: 2,
            ..DbConfig::default()
        },
    )
    .expect("open")
}

/// Pre-populate a database with `count` sequential keys and close it, so
/// SSTables exist on disk.
fn prepopulate(dir: &std::path::Path, count: u64) {
    let db = open_small_buffer(dir);
    for i in 0..count {
        db.put(&make_key(i), VALUE_128B).unwrap();
    }
    db.close().unwrap();
}

// ================================================================================================
// Write benchmarks
// ================================================================================================

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("memtable_only_128b", |b| {
        let tmp = TempDir::new().unwrap();
        let db = open_memtable_only(tmp.path());
        let mut i = 0u64;
        b.iter(|| {
            db.put(black_box(&make_key(i)), black_box(VALUE_128B)).unwrap();
            i += 1;
        });
        db.close().unwrap();
    });

    group.bench_function("with_flushes_128b", |b| {
        let tmp = TempDir::new().unwrap();
        let db = open_small_buffer(tmp.path());
        let mut i = 0u64;
        b.iter(|| {
            db.put(black_box(&make_key(i)), black_box(VALUE_128B)).unwrap();
            i += 1;
        });
        db.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Read benchmarks
// ================================================================================================

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("memtable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let db = open_memtable_only(tmp.path());
        for i in 0..10_000 {
            db.put(&make_key(i), VALUE_128B).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % 10_000);
            black_box(db.get(black_box(&key)).unwrap());
            i += 1;
        });
        db.close().unwrap();
    });

    group.bench_function("sstable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        prepopulate(tmp.path(), 10_000);
        let db = open_small_buffer(tmp.path());
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % 10_000);
            black_box(db.get(black_box(&key)).unwrap());
            i += 1;
        });
        db.close().unwrap();
    });

    group.bench_function("bloom_filtered_miss", |b| {
        let tmp = TempDir::new().unwrap();
        prepopulate(tmp.path(), 10_000);
        let db = open_small_buffer(tmp.path());
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(1_000_000 + i);
            black_box(db.get(black_box(&key)).unwrap());
            i += 1;
        });
        db.close().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get);
criterion_main!(benches);
