//! # LSM Storage Engine
//!
//! The facade tying every component together: configuration-driven open and
//! recovery, the point read/write surface, batch commits, forced flush and
//! compaction, stats aggregation, and graceful shutdown.
//!
//! ## Design Overview
//!
//! Data lives in four layers, queried newest-first:
//!
//! 1. **Active memtable** — the in-memory write buffer.
//! 2. **Immutable memtables** — frozen buffers awaiting flush.
//! 3. **Level-0 SSTables** — overlapping ranges, searched newest → oldest.
//! 4. **Levels 1..N** — disjoint ranges, binary-searched to at most one
//!    file per level.
//!
//! Writes append to the WAL first, then land in the active memtable. When
//! the memtable crosses [`DbConfig::memtable_size`] it rotates into the
//! immutable queue and the compaction scheduler takes over: level-0 flushes
//! and level-N merges run on background workers.
//!
//! ## Lock hierarchy
//!
//! `write gate → memtable manager → level manager`, always acquired in that
//! order. The write gate serializes mutators (single writer) and gives
//! readers a consistent snapshot of the memtable stack; a batch commit
//! holds it across the whole apply step, which is what makes batches atomic
//! for concurrent readers. SSTables are immutable, so file reads need no
//! lock at all.
//!
//! ## Recovery
//!
//! [`Db::open`] loads the manifest, sweeps orphan and footer-less `.sst`
//! files, opens every live table, replays the WAL into a fresh memtable
//! using the recorded sequence numbers, immediately flushes the replayed
//! state and truncates the WAL (so a second crash cannot double-apply),
//! and finally starts the scheduler.
//!
//! ## Guarantees
//!
//! - A successful write is visible to every read that starts after it
//!   returns, and durable per the configured sync mode.
//! - Sequence numbers are strictly monotonic across the process lifetime.
//! - A tombstone shadows older values until a bottom-level merge drops it.
//! - Batch commits are all-or-nothing for concurrent readers.

pub mod utils;

#[cfg(test)]
mod tests;

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{info, warn};

use crate::batch::{BatchError, WriteBatch};
use crate::bloom::{BloomError, BloomVariant, HashFamily};
use crate::compaction::{
    CompactionCtx, CompactionError, Scheduler, SchedulerStats, SchedulerStatsSnapshot, TaskKind,
    TaskOutcome, TaskPriority, flush::run_flush, merge::run_merge,
};
use crate::level::{LevelConfig, LevelError, LevelManager, SstFile, find_in_level, sst_filename};
use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{MemtableError, MemtableGetResult, manager::MemtableManager};
use crate::sstable::{BlockCache, Compression, SstError, builder::BuildOptions};
use crate::wal::{self, Wal, WalError, WalRecord};
use utils::{Entry, EntryKind};

/// Sub-directory of the data directory holding WAL segments.
const WAL_DIR: &str = "wal";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Kind classification of a [`DbError`], used where errors are reported as
/// data (e.g. [`BatchResult::first_error_kind`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller contract violated.
    InvalidParam,
    /// Operation requires an open engine, or the engine is poisoned.
    InvalidState,
    /// Key not present (carried by lookup results, not by `DbError`).
    NotFound,
    /// Checksum mismatch, truncated footer, manifest CRC failure.
    Corruption,
    /// Underlying filesystem failure.
    Io,
    /// A decoded length exceeded the allocation safety caps.
    OutOfMemory,
    /// Batch operation-count limit exceeded.
    BatchFull,
    /// Batch memory limit exceeded.
    BatchTooLarge,
    /// A bounded wait elapsed.
    Timeout,
    /// On-disk format version unrecognized.
    UnsupportedFormat,
    /// Write attempted on a frozen memtable or a closed engine.
    ReadOnly,
    /// Internal invariant violation.
    Internal,
}

/// Errors surfaced by the [`Db`] facade. Lower layers return typed errors;
/// the facade preserves the kind and attaches operation context.
#[derive(Debug, Error)]
pub enum DbError {
    /// Caller contract violated (empty key, out-of-range level, bad config).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Operation requires an open, healthy engine.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Checksum mismatch, truncated footer, or manifest corruption.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A decoded length field exceeded the allocation safety caps.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Batch operation-count limit exceeded.
    #[error("batch is full")]
    BatchFull,

    /// Batch memory limit exceeded.
    #[error("batch memory limit exceeded")]
    BatchTooLarge,

    /// A bounded wait elapsed before completion.
    #[error("operation timed out")]
    Timeout,

    /// On-disk format version unrecognized.
    #[error("unsupported format version {0}")]
    UnsupportedFormat(u32),

    /// Write attempted on a frozen memtable or a closed engine.
    #[error("target is read-only")]
    ReadOnly,

    /// Internal invariant violation (poisoned lock, impossible state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// The kind classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParam(_) => ErrorKind::InvalidParam,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Corruption(_) => ErrorKind::Corruption,
            Self::Io(_) => ErrorKind::Io,
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::BatchFull => ErrorKind::BatchFull,
            Self::BatchTooLarge => ErrorKind::BatchTooLarge,
            Self::Timeout => ErrorKind::Timeout,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::ReadOnly => ErrorKind::ReadOnly,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<MemtableError> for DbError {
    fn from(e: MemtableError) -> Self {
        match e {
            MemtableError::ReadOnly => Self::ReadOnly,
            MemtableError::InvalidParam(msg) => Self::InvalidParam(msg),
            MemtableError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<WalError> for DbError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => Self::Io(io),
            WalError::RecordTooLarge(n) => Self::InvalidParam(format!("record too large: {n} bytes")),
            WalError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<SstError> for DbError {
    fn from(e: SstError) -> Self {
        match e {
            SstError::Io(io) => Self::Io(io),
            SstError::Corruption(msg) => Self::Corruption(msg),
            SstError::UnsupportedFormat(v) => Self::UnsupportedFormat(v),
            SstError::InvalidParam(msg) => Self::InvalidParam(msg),
            SstError::Bloom(BloomError::InvalidParam(msg)) => Self::InvalidParam(msg),
            SstError::Bloom(BloomError::Encoding(e)) => Self::Corruption(e.to_string()),
            SstError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<ManifestError> for DbError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::Io(io) => Self::Io(io),
            ManifestError::Corruption(msg) => Self::Corruption(msg),
            ManifestError::Encoding(e) => Self::Corruption(e.to_string()),
            ManifestError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<LevelError> for DbError {
    fn from(e: LevelError) -> Self {
        match e {
            LevelError::InvalidLevel(l) => Self::InvalidParam(format!("invalid level {l}")),
            LevelError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<BatchError> for DbError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Full(_) => Self::BatchFull,
            BatchError::TooLarge(_) => Self::BatchTooLarge,
            BatchError::InvalidParam(msg) => Self::InvalidParam(msg),
        }
    }
}

impl From<CompactionError> for DbError {
    fn from(e: CompactionError) -> Self {
        match e {
            CompactionError::Memtable(e) => e.into(),
            CompactionError::Sst(e) => e.into(),
            CompactionError::Manifest(e) => e.into(),
            CompactionError::Level(e) => e.into(),
            CompactionError::Wal(e) => e.into(),
            CompactionError::Io(io) => Self::Io(io),
            CompactionError::Timeout => Self::Timeout,
            CompactionError::Cancelled => Self::InvalidState("task cancelled by shutdown".into()),
            CompactionError::InvalidState(msg) => Self::InvalidState(msg),
            CompactionError::Internal(msg) => Self::Internal(msg),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance. Passed to [`Db::open`] alongside
/// the data directory.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Freeze threshold for the active memtable, in bytes.
    pub memtable_size: usize,

    /// Capacity of the immutable queue; writers block when it is full.
    pub max_immutable_count: usize,

    /// Write every mutation to the WAL before the memtable.
    pub enable_wal: bool,

    /// Fsync the WAL on every append (otherwise on segment rotation).
    pub sync_writes: bool,

    /// WAL segment rotation threshold, in bytes.
    pub wal_size_limit: u64,

    /// File-count compaction trigger for level 0.
    pub level0_file_limit: usize,

    /// Byte budget of level 1 (higher levels scale geometrically).
    pub level_base_bytes: u64,

    /// Geometric multiplier between level byte budgets.
    pub level_size_multiplier: u64,

    /// Explicit per-level byte budgets overriding the geometric progression.
    pub max_level_bytes: Vec<u64>,

    /// Number of levels.
    pub max_levels: usize,

    /// Compaction worker threads.
    pub background_thread_count: usize,

    /// Block compression. Only [`Compression::None`] is accepted.
    pub compression: Compression,

    /// Build SSTables with bloom filters.
    pub enable_bloom_filter: bool,

    /// Bloom sizing: bits per key.
    pub bloom_filter_bits_per_key: u32,

    /// Bloom layout variant.
    pub bloom_variant: BloomVariant,

    /// Bloom hash family.
    pub bloom_hash_family: HashFamily,

    /// SSTable data block size, in bytes.
    pub block_size: usize,

    /// Target size of each compaction output file.
    pub sstable_target_size: u64,

    /// Run flushes and merges on background workers.
    pub enable_background_compaction: bool,

    /// Shared block cache capacity in blocks; 0 disables the cache.
    pub block_cache_capacity: usize,

    /// Bound on waits for flush/compaction completion.
    pub task_timeout: Duration,

    /// Grace period granted to workers during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            memtable_size: 4 * 1024 * 1024,
            max_immutable_count: 4,
            enable_wal: true,
            sync_writes: false,
            wal_size_limit: 64 * 1024 * 1024,
            level0_file_limit: 4,
            level_base_bytes: 64 * 1024 * 1024,
            level_size_multiplier: 10,
            max_level_bytes: Vec::new(),
            max_levels: 7,
            background_thread_count: 4,
            compression: Compression::None,
            enable_bloom_filter: true,
            bloom_filter_bits_per_key: 10,
            bloom_variant: BloomVariant::Standard,
            bloom_hash_family: HashFamily::XxHash64,
            block_size: 4 * 1024,
            sstable_target_size: 64 * 1024 * 1024,
            enable_background_compaction: true,
            block_cache_capacity: 1024,
            task_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    fn validate(&self) -> Result<(), DbError> {
        if self.memtable_size == 0 {
            return Err(DbError::InvalidParam("memtable_size must be > 0".into()));
        }
        if self.max_immutable_count == 0 {
            return Err(DbError::InvalidParam(
                "max_immutable_count must be > 0".into(),
            ));
        }
        if self.max_levels < 2 {
            return Err(DbError::InvalidParam("max_levels must be >= 2".into()));
        }
        if self.compression != Compression::None {
            return Err(DbError::InvalidParam(
                "only Compression::None is supported by this build".into(),
            ));
        }
        if self.enable_bloom_filter && self.bloom_filter_bits_per_key == 0 {
            return Err(DbError::InvalidParam(
                "bloom_filter_bits_per_key must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            block_size: self.block_size,
            compression: self.compression,
            enable_bloom_filter: self.enable_bloom_filter,
            bloom_bits_per_key: self.bloom_filter_bits_per_key,
            bloom_variant: self.bloom_variant,
            bloom_hash_family: self.bloom_hash_family,
        }
    }

    fn level_config(&self) -> LevelConfig {
        LevelConfig {
            max_levels: self.max_levels,
            level0_file_limit: self.level0_file_limit,
            level_base_bytes: self.level_base_bytes,
            level_size_multiplier: self.level_size_multiplier,
            max_level_bytes: self.max_level_bytes.clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DbCounters {
    writes: AtomicU64,
    reads: AtomicU64,
    deletes: AtomicU64,
    batch_commits: AtomicU64,
    recovery_count: AtomicU64,
}

/// Point-in-time engine statistics returned by [`Db::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
    /// Successful single-key puts.
    pub writes: u64,
    /// Point lookups served.
    pub reads: u64,
    /// Successful single-key deletes.
    pub deletes: u64,
    /// Successful batch commits.
    pub batch_commits: u64,
    /// Block cache hits.
    pub cache_hits: u64,
    /// Block cache misses.
    pub cache_misses: u64,
    /// WAL records replayed by the most recent open.
    pub recovery_count: u64,
    /// Immutable memtables awaiting flush.
    pub immutable_count: usize,
    /// Live SSTables across all levels.
    pub sstable_count: usize,
    /// Background scheduler counters.
    pub scheduler: SchedulerStatsSnapshot,
}

// ------------------------------------------------------------------------------------------------
// BatchResult
// ------------------------------------------------------------------------------------------------

/// Outcome of a batch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// Operations applied.
    pub committed: usize,

    /// Operations not applied.
    pub failed: usize,

    /// Kind of the first failure, if any.
    pub first_error_kind: Option<ErrorKind>,

    /// Index (in the final, post-dedup sequence) of the first failure.
    pub first_error_index: Option<usize>,

    /// Wall-clock duration of the commit, in microseconds.
    pub commit_time_us: u64,

    /// WAL records appended.
    pub wal_writes: u64,
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

struct DbInner {
    config: DbConfig,
    data_dir: PathBuf,

    /// Facade lock: mutators take it exclusively, readers shared. Guards
    /// active-memtable transitions and WAL appends.
    write_gate: RwLock<()>,

    wal: Option<Arc<Wal>>,
    memtables: Arc<MemtableManager>,
    levels: Arc<LevelManager>,
    manifest: Arc<Manifest>,
    cache: Option<Arc<BlockCache>>,
    scheduler: Option<Scheduler>,

    counters: DbCounters,
    sched_stats: Arc<SchedulerStats>,

    /// Set on manifest failure: the engine refuses further writes.
    fatal: Arc<AtomicBool>,

    /// Set once by `close`.
    closed: AtomicBool,

    /// Shared with the scheduler for cooperative cancellation.
    shutdown: Arc<AtomicBool>,
}

/// The storage engine handle. Cheap to clone; all clones share state.
pub struct Db {
    inner: Arc<DbInner>,
}

impl Clone for Db {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Db {
    /// Opens (or creates) an engine rooted at `data_dir`.
    ///
    /// Runs full recovery: manifest load, orphan sweep, table open, WAL
    /// replay + immediate flush + WAL truncation, then starts the
    /// background scheduler.
    pub fn open(data_dir: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let data_dir = data_dir.as_ref().to_path_buf();
        let wal_dir = data_dir.join(WAL_DIR);
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&wal_dir)?;

        let manifest = Arc::new(Manifest::open(&data_dir)?);
        let cache = (config.block_cache_capacity > 0)
            .then(|| Arc::new(BlockCache::new(config.block_cache_capacity)));
        let levels = Arc::new(LevelManager::new(config.level_config()));
        let memtables = Arc::new(MemtableManager::new(
            config.memtable_size,
            config.max_immutable_count,
        ));

        // Open every live table; sweep everything else with an .sst suffix
        // (orphans from crashes, footer-less partial outputs).
        let live = manifest.files()?;
        for entry in &live {
            let path = data_dir.join(sst_filename(entry.level, entry.file_id));
            let file = SstFile::open(entry.level, entry.file_id, path, cache.clone())?;
            levels.add(Arc::new(file))?;
        }
        sweep_orphans(&data_dir, &live.iter().map(|e| (e.level, e.file_id)).collect::<Vec<_>>())?;

        let mut max_seq = manifest.max_seq()?;
        let counters = DbCounters::default();

        // WAL replay: rebuild the memtable with the recorded sequences,
        // flush it immediately, and drop the replayed segments.
        if config.enable_wal {
            let outcome = wal::replay(&wal_dir)?;
            if outcome.truncated {
                warn!("WAL replay stopped at a torn or corrupt record");
            }
            max_seq = max_seq.max(outcome.max_seq);
            counters
                .recovery_count
                .store(outcome.records_replayed, Ordering::Relaxed);

            if !outcome.entries.is_empty() {
                memtables.reset_next_seq(max_seq);
                for entry in outcome.entries {
                    memtables.apply(entry)?;
                }
            }
        }
        memtables.reset_next_seq(max_seq.max(memtables.last_seq()));

        let fatal = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let sched_stats = Arc::new(SchedulerStats::default());

        let recovery_ctx = CompactionCtx {
            data_dir: data_dir.clone(),
            manifest: Arc::clone(&manifest),
            levels: Arc::clone(&levels),
            memtables: Arc::clone(&memtables),
            wal: None,
            cache: cache.clone(),
            build_options: config.build_options(),
            target_file_size: config.sstable_target_size,
            max_immutable_count: config.max_immutable_count,
            stats: Arc::clone(&sched_stats),
            fatal: Arc::clone(&fatal),
            shutdown: Arc::clone(&shutdown),
        };

        if config.enable_wal {
            while let Some(frozen) = memtables.try_rotate_active()? {
                run_flush(&recovery_ctx, frozen).map_err(DbError::from)?;
            }
            wal::purge(&wal_dir)?;
        }

        let wal = if config.enable_wal {
            Some(Arc::new(Wal::open(
                &wal_dir,
                config.wal_size_limit,
                config.sync_writes,
            )?))
        } else {
            None
        };

        let scheduler = if config.enable_background_compaction {
            let ctx = CompactionCtx {
                wal: wal.clone(),
                ..recovery_ctx
            };
            Some(Scheduler::start(ctx, config.background_thread_count))
        } else {
            None
        };

        info!(
            path = %data_dir.display(),
            live_tables = levels.total_file_count()?,
            next_seq = memtables.last_seq() + 1,
            "engine opened"
        );

        let db = Self {
            inner: Arc::new(DbInner {
                config,
                data_dir,
                write_gate: RwLock::new(()),
                wal,
                memtables,
                levels,
                manifest,
                cache,
                scheduler,
                counters,
                sched_stats,
                fatal,
                closed: AtomicBool::new(false),
                shutdown,
            }),
        };

        // Recovery may have left level 0 over its trigger.
        if let Some(scheduler) = &db.inner.scheduler {
            scheduler.trigger_check();
        }
        Ok(db)
    }

    /// Inserts a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.write_one(EntryKind::Put, key, value)?;
        self.inner.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Deletes a key by writing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        self.write_one(EntryKind::Delete, key, &[])?;
        self.inner.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_one(&self, kind: EntryKind, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let inner = &self.inner;
        inner.check_writable()?;
        if key.is_empty() {
            return Err(DbError::InvalidParam("key is empty".into()));
        }

        let _gate = inner
            .write_gate
            .write()
            .map_err(|_| DbError::Internal("write gate poisoned".into()))?;

        let seq = inner.memtables.allocate_seq();
        let entry = match kind {
            EntryKind::Put => Entry::put(key.to_vec(), value.to_vec(), seq),
            EntryKind::Delete => Entry::tombstone(key.to_vec(), seq),
        };

        if let Some(wal) = &inner.wal {
            wal.append(&WalRecord::from_entry(&entry))?;
        }
        inner.memtables.apply(entry)?;

        if inner.memtables.should_rotate()? {
            inner.rotate_active()?;
        }
        Ok(())
    }

    /// Looks up a key. Returns `Ok(None)` when the key was never written or
    /// its newest entry is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let inner = &self.inner;
        if key.is_empty() {
            return Err(DbError::InvalidParam("key is empty".into()));
        }
        if inner.closed.load(Ordering::Acquire) {
            return Err(DbError::InvalidState("engine is closed".into()));
        }
        inner.counters.reads.fetch_add(1, Ordering::Relaxed);

        // Snapshot the memtable stack and the level lists under the read
        // gate, then traverse without holding any lock.
        let (active, immutables, level_files) = {
            let _gate = inner
                .write_gate
                .read()
                .map_err(|_| DbError::Internal("write gate poisoned".into()))?;
            let (active, immutables) = inner.memtables.snapshot()?;
            (active, immutables, inner.levels.snapshot()?)
        };

        match active.get(key)? {
            MemtableGetResult::Found(value) => return Ok(Some(value)),
            MemtableGetResult::Tombstone => return Ok(None),
            MemtableGetResult::NotFound => {}
        }
        for memtable in &immutables {
            match memtable.get(key)? {
                MemtableGetResult::Found(value) => return Ok(Some(value)),
                MemtableGetResult::Tombstone => return Ok(None),
                MemtableGetResult::NotFound => {}
            }
        }

        for (level, files) in level_files.iter().enumerate() {
            if level == 0 {
                // Overlapping ranges: newest file first, first hit wins.
                for file in files {
                    if let Some(entry) = file.table.get(key)? {
                        return Ok(resolve(entry));
                    }
                }
            } else if let Some(file) = find_in_level(files, key)
                && let Some(entry) = file.table.get(key)?
            {
                return Ok(resolve(entry));
            }
        }
        Ok(None)
    }

    /// Commits a batch atomically. See [`WriteBatch`] for accumulation and
    /// dedup semantics; an empty batch is a successful no-op.
    pub fn write_batch(&self, batch: &mut WriteBatch) -> Result<BatchResult, DbError> {
        let inner = &self.inner;
        inner.check_writable()?;
        let started = Instant::now();

        let ops = batch.prepared_ops();
        if ops.is_empty() {
            return Ok(BatchResult {
                committed: 0,
                failed: 0,
                first_error_kind: None,
                first_error_index: None,
                commit_time_us: started.elapsed().as_micros() as u64,
                wal_writes: 0,
            });
        }

        let atomic = batch.config().atomic_commit;
        let sync_wal = batch.config().sync_wal;
        let total = ops.len();

        let gate = if atomic {
            Some(
                inner
                    .write_gate
                    .write()
                    .map_err(|_| DbError::Internal("write gate poisoned".into()))?,
            )
        } else {
            None
        };

        let first_seq = inner.memtables.allocate_seq_block(total as u64);
        let entries: Vec<Entry> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| match op.kind {
                EntryKind::Put => Entry::put(op.key.clone(), op.value.clone(), first_seq + i as u64),
                EntryKind::Delete => Entry::tombstone(op.key.clone(), first_seq + i as u64),
            })
            .collect();

        // WAL first: one record per final operation, a single fsync at the
        // end when the batch asks for it.
        let mut wal_writes = 0u64;
        if let Some(wal) = &inner.wal {
            let records: Vec<WalRecord> = entries.iter().map(WalRecord::from_entry).collect();
            if let Err(e) = wal.append_all(&records, sync_wal) {
                let db_err: DbError = e.into();
                return Ok(BatchResult {
                    committed: 0,
                    failed: total,
                    first_error_kind: Some(db_err.kind()),
                    first_error_index: Some(0),
                    commit_time_us: started.elapsed().as_micros() as u64,
                    wal_writes: 0,
                });
            }
            wal_writes = total as u64;
        }

        let mut committed = 0usize;
        let mut failure: Option<(usize, ErrorKind)> = None;
        for (i, entry) in entries.into_iter().enumerate() {
            let per_op_gate = if atomic {
                None
            } else {
                Some(
                    inner
                        .write_gate
                        .write()
                        .map_err(|_| DbError::Internal("write gate poisoned".into()))?,
                )
            };
            match inner.memtables.apply(entry) {
                Ok(()) => committed += 1,
                Err(e) => {
                    let db_err: DbError = e.into();
                    failure = Some((i, db_err.kind()));
                    break;
                }
            }
            if inner.memtables.should_rotate()? {
                inner.rotate_active()?;
            }
            drop(per_op_gate);
        }
        drop(gate);

        if failure.is_none() {
            batch.clear();
            inner
                .counters
                .batch_commits
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Some(scheduler) = &inner.scheduler {
            scheduler.trigger_check();
        }

        Ok(BatchResult {
            committed,
            failed: total - committed,
            first_error_kind: failure.map(|(_, kind)| kind),
            first_error_index: failure.map(|(i, _)| i),
            commit_time_us: started.elapsed().as_micros() as u64,
            wal_writes,
        })
    }

    /// Forces the active memtable through rotation and flush, returning
    /// once every immutable memtable has been persisted.
    pub fn flush(&self) -> Result<(), DbError> {
        let inner = &self.inner;
        inner.check_writable()?;

        {
            let _gate = inner
                .write_gate
                .write()
                .map_err(|_| DbError::Internal("write gate poisoned".into()))?;
            inner.rotate_active()?;
        }

        match &inner.scheduler {
            Some(scheduler) => {
                scheduler.trigger_check();
                if !inner
                    .memtables
                    .wait_until_drained(inner.config.task_timeout)?
                {
                    return Err(DbError::Timeout);
                }
            }
            None => inner.flush_all_inline()?,
        }
        Ok(())
    }

    /// Runs compaction.
    ///
    /// `Some(level)` merges that level into the next one regardless of its
    /// trigger. `None` sweeps every populated level top-down once — after a
    /// sweep, level 0 is empty and every key sits one level deeper.
    pub fn compact(&self, level: Option<usize>) -> Result<(), DbError> {
        let inner = &self.inner;
        inner.check_writable()?;

        match level {
            Some(level) => {
                if level + 1 >= inner.config.max_levels {
                    return Err(DbError::InvalidParam(format!(
                        "cannot compact level {level}: no deeper level"
                    )));
                }
                inner.compact_level(level)
            }
            None => {
                for level in 0..inner.config.max_levels - 1 {
                    if inner.levels.file_count(level)? > 0 {
                        inner.compact_level(level)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns a snapshot of the engine counters.
    pub fn stats(&self) -> Result<DbStats, DbError> {
        let inner = &self.inner;
        Ok(DbStats {
            writes: inner.counters.writes.load(Ordering::Relaxed),
            reads: inner.counters.reads.load(Ordering::Relaxed),
            deletes: inner.counters.deletes.load(Ordering::Relaxed),
            batch_commits: inner.counters.batch_commits.load(Ordering::Relaxed),
            cache_hits: inner.cache.as_ref().map_or(0, |c| c.hits()),
            cache_misses: inner.cache.as_ref().map_or(0, |c| c.misses()),
            recovery_count: inner.counters.recovery_count.load(Ordering::Relaxed),
            immutable_count: inner.memtables.immutable_count()?,
            sstable_count: inner.levels.total_file_count()?,
            scheduler: inner.sched_stats.snapshot(),
        })
    }

    /// Gracefully shuts the engine down: stops the scheduler, flushes every
    /// memtable, truncates the WAL, and fsyncs the directories. Subsequent
    /// operations fail with `InvalidState`.
    pub fn close(&self) -> Result<(), DbError> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(scheduler) = &inner.scheduler {
            scheduler.shutdown(inner.config.shutdown_grace);
        }

        if !inner.fatal.load(Ordering::Acquire) {
            inner.flush_all_inline()?;
            if let Some(wal) = &inner.wal {
                wal.truncate_all()?;
            }
        }

        for dir in [&inner.data_dir, &inner.data_dir.join(WAL_DIR)] {
            if let Ok(handle) = fs::File::open(dir) {
                handle.sync_all()?;
            }
        }

        info!(path = %inner.data_dir.display(), "engine closed");
        Ok(())
    }
}

impl DbInner {
    fn check_writable(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::InvalidState("engine is closed".into()));
        }
        if self.fatal.load(Ordering::Acquire) {
            return Err(DbError::InvalidState(
                "engine is read-only after a manifest failure".into(),
            ));
        }
        Ok(())
    }

    fn compaction_ctx(&self) -> CompactionCtx {
        CompactionCtx {
            data_dir: self.data_dir.clone(),
            manifest: Arc::clone(&self.manifest),
            levels: Arc::clone(&self.levels),
            memtables: Arc::clone(&self.memtables),
            wal: self.wal.clone(),
            cache: self.cache.clone(),
            build_options: self.config.build_options(),
            target_file_size: self.config.sstable_target_size,
            max_immutable_count: self.config.max_immutable_count,
            stats: Arc::clone(&self.sched_stats),
            fatal: Arc::clone(&self.fatal),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Rotates the active memtable, blocking on backpressure when the
    /// scheduler will drain the queue, or flushing inline when there is no
    /// scheduler to wait for.
    fn rotate_active(&self) -> Result<(), DbError> {
        match &self.scheduler {
            Some(scheduler) => {
                self.memtables.rotate_active()?;
                scheduler.trigger_check();
            }
            None => loop {
                match self.memtables.try_rotate_active()? {
                    Some(_) => break,
                    None => {
                        if self.memtables.immutable_count()? == 0 {
                            break; // active was empty, nothing to rotate
                        }
                        self.flush_oldest_inline()?;
                    }
                }
            },
        }
        Ok(())
    }

    fn flush_oldest_inline(&self) -> Result<(), DbError> {
        let ctx = self.compaction_ctx();
        if let Some(oldest) = self.memtables.oldest_immutable()? {
            run_flush(&ctx, oldest)?;
        }
        Ok(())
    }

    fn flush_all_inline(&self) -> Result<(), DbError> {
        let ctx = self.compaction_ctx();
        while let Some(oldest) = self.memtables.oldest_immutable()? {
            run_flush(&ctx, oldest)?;
        }
        if let Some(frozen) = self.memtables.try_rotate_active()? {
            run_flush(&ctx, frozen)?;
        }
        while let Some(oldest) = self.memtables.oldest_immutable()? {
            run_flush(&ctx, oldest)?;
        }
        Ok(())
    }

    /// Merges `level` into the next one, through the scheduler when it is
    /// running (so the in-flight tagging applies), inline otherwise.
    fn compact_level(&self, level: usize) -> Result<(), DbError> {
        match &self.scheduler {
            Some(scheduler) => {
                let Some(selection) = self.levels.select_victim(level)? else {
                    return Ok(());
                };
                match scheduler
                    .try_submit(TaskKind::LevelN { selection }, TaskPriority::High)
                    .map_err(DbError::from)?
                {
                    Some(handle) => match handle.wait(self.config.task_timeout) {
                        Ok(TaskOutcome::Completed) => Ok(()),
                        Ok(TaskOutcome::Failed(msg)) => Err(DbError::Internal(msg)),
                        Ok(TaskOutcome::Cancelled) => {
                            Err(DbError::InvalidState("compaction cancelled".into()))
                        }
                        Err(e) => Err(e.into()),
                    },
                    // Inputs already claimed: an equivalent merge is in
                    // flight; treat the request as satisfied.
                    None => Ok(()),
                }
            }
            None => {
                let ctx = self.compaction_ctx();
                let Some(selection) = self.levels.select_victim(level)? else {
                    return Ok(());
                };
                run_merge(&ctx, &selection)?;
                Ok(())
            }
        }
    }
}

/// Turns a found entry into the public lookup result: tombstones read as
/// absent.
fn resolve(entry: Entry) -> Option<Vec<u8>> {
    match entry.kind {
        EntryKind::Delete => None,
        EntryKind::Put => Some(entry.value.unwrap_or_default()),
    }
}

/// Deletes every `.sst` file that is not in the live set — leftovers from
/// crashes mid-build and outputs of unrecorded compactions.
fn sweep_orphans(data_dir: &Path, live: &[(u8, u32)]) -> Result<(), DbError> {
    for dir_entry in fs::read_dir(data_dir)? {
        let path = dir_entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("sst") {
            continue;
        }
        let known = parse_sst_filename(&path).is_some_and(|id| live.contains(&id));
        if !known {
            warn!(path = %path.display(), "sweeping orphan SSTable");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Parses `level-{L}-{id:06}.sst` into `(level, file_id)`.
fn parse_sst_filename(path: &Path) -> Option<(u8, u32)> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("level-")?.strip_suffix(".sst")?;
    let (level, id) = rest.split_once('-')?;
    Some((level.parse().ok()?, id.parse().ok()?))
}
