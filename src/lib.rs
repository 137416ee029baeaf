//! # ConcordKV
//!
//! A persistent, ordered key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** with leveled compaction.
//! Designed for fast writes and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Db                              │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │  Active     │  │  Immutable   │  │  SSTables     │   │
//! │  │  Memtable   │  │  Memtables   │  │  level 0..N   │   │
//! │  │  + WAL      │  │              │  │  (on disk)    │   │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬────────┘   │
//! │        │   rotate        │   flush         │            │
//! │        └─────────►       └────────►        │            │
//! │                                            │            │
//! │  ┌─────────────────────────────────────────┘            │
//! │  │  Compaction scheduler (priority queue + workers)     │
//! │  └──────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────┐   │
//! │  │           Manifest (live files + next id)        │   │
//! │  └──────────────────────────────────────────────────┘   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The `Db` facade — open, get, put, delete, batch, flush, compact |
//! | [`memtable`] | In-memory write buffer, rotation, backpressure, sequence allocation |
//! | [`wal`] | CRC-protected write-ahead log segments for crash recovery |
//! | [`sstable`] | Immutable on-disk tables: blocks, index, bloom, footer, block cache |
//! | [`bloom`] | Bloom filter variants and hash families |
//! | [`manifest`] | Durable registry of live files, updated by atomic rename |
//! | [`level`] | Per-level file metadata, compaction triggers, victim selection |
//! | [`compaction`] | Priority scheduler, worker pool, flush and merge execution |
//! | [`batch`] | Batch writer with sorting, deduplication, atomic commit |
//! | [`encoding`] | Deterministic little-endian wire encoding |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL segment
//!   before being acknowledged; recovery replays the log and tolerates torn
//!   tail writes.
//! - **Leveled compaction** — level 0 flushes on file count, deeper levels
//!   on geometric byte budgets; merges keep the newest version per key and
//!   drop tombstones at the bottom level.
//! - **Bloom-gated lookups** — each SSTable carries a bloom filter with a
//!   configurable variant and hash family.
//! - **Block-level CRC32 integrity** — every block, WAL record, and the
//!   manifest are checksummed; any bit flip surfaces as corruption.
//! - **Backpressure** — writers block when the immutable queue saturates,
//!   bounding memory at `(max_immutable_count + 1) · memtable_size`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use concordkv::{Db, DbConfig};
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! // Write
//! db.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! db.delete(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod batch;
pub mod bloom;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod level;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use batch::{BatchConfig, BatchStatus, WriteBatch};
pub use bloom::{BloomFilter, BloomVariant, HashFamily};
pub use compaction::{SchedulerStatsSnapshot, TaskPriority};
pub use engine::{BatchResult, Db, DbConfig, DbError, DbStats, ErrorKind};
pub use sstable::Compression;
