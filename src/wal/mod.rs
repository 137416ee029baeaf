//! Write-Ahead Logging (WAL) Module
//!
//! Durable, append-only record log consulted for crash recovery. Every
//! mutation accepted by the engine is appended here **before** the memtable
//! is modified.
//!
//! ## Design Overview
//!
//! The log is a sequence of segment files named `wal-{seq:06}.log`. The
//! active segment receives appends; when it grows past the configured size
//! limit it is sealed (fsync'ed) and a fresh segment with the next id is
//! opened. Sealed segments are deleted once every record they contain has
//! been flushed into a persisted SSTable.
//!
//! # On-disk layout
//!
//! Each segment is a raw concatenation of records:
//!
//! ```text
//! [MAGIC 2B][LENGTH 4B][KIND 1B][SEQUENCE 8B][KEY_LEN 4B][VALUE_LEN 4B][KEY][VALUE][CRC32 4B]
//! ```
//!
//! - `LENGTH` counts the bytes from `KIND` through the end of `VALUE`.
//! - `CRC32` is computed over everything from `MAGIC` through `VALUE`.
//!
//! # Write modes
//!
//! - **Buffered** — records land in OS buffers; fsync happens on segment
//!   rotation and explicit [`Wal::sync`].
//! - **Sync** — every append is followed by an fsync.
//!
//! # Replay
//!
//! [`replay`] enumerates segments in id order and yields records until the
//! log ends or the first CRC/framing failure. A failure truncates the log at
//! that point (tolerating a torn tail write) rather than failing recovery.
//!
//! # Concurrency model
//!
//! All segment state lives behind a single `Mutex`; the engine serializes
//! appends under its write gate, so the mutex is uncontended in practice but
//! keeps rotation and pruning safe against the background flusher.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::engine::utils::{Entry, EntryKind};
use crc32fast::Hasher as Crc32;
use std::ffi::OsStr;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Per-record magic bytes.
const RECORD_MAGIC: [u8; 2] = *b"CW";

/// Fixed bytes of a record before the key: magic(2) + length(4).
const RECORD_PREFIX_SIZE: usize = 6;

/// Fixed payload bytes before the key: kind(1) + sequence(8) + key_len(4) + value_len(4).
const PAYLOAD_HEADER_SIZE: usize = 17;

/// Upper bound on a single record's payload (guards replay against
/// allocation bombs from corrupted length fields).
const MAX_RECORD_PAYLOAD: u32 = 512 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record exceeds the payload size bound.
    #[error("record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// One WAL record: a single mutation with its assigned sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    /// Put or delete.
    pub kind: EntryKind,

    /// Sequence number assigned by the memtable manager.
    pub sequence: u64,

    /// Binary key.
    pub key: Vec<u8>,

    /// Value payload; empty for tombstones.
    pub value: Vec<u8>,
}

impl WalRecord {
    /// Builds a record from an [`Entry`].
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            kind: entry.kind,
            sequence: entry.seq,
            key: entry.key.clone(),
            value: entry.value.clone().unwrap_or_default(),
        }
    }

    /// Converts this record back into an [`Entry`] during replay.
    pub fn into_entry(self) -> Entry {
        match self.kind {
            EntryKind::Put => Entry::put(self.key, self.value, self.sequence),
            EntryKind::Delete => Entry::tombstone(self.key, self.sequence),
        }
    }

    /// Serialize into the on-disk record framing.
    fn encode(&self) -> Result<Vec<u8>, WalError> {
        let payload_len = PAYLOAD_HEADER_SIZE + self.key.len() + self.value.len();
        let length = u32::try_from(payload_len).map_err(|_| WalError::RecordTooLarge(payload_len))?;
        if length > MAX_RECORD_PAYLOAD {
            return Err(WalError::RecordTooLarge(payload_len));
        }

        let mut buf = Vec::with_capacity(RECORD_PREFIX_SIZE + payload_len + 4);
        buf.extend_from_slice(&RECORD_MAGIC);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
        Ok(buf)
    }
}

// ------------------------------------------------------------------------------------------------
// Segment bookkeeping
// ------------------------------------------------------------------------------------------------

/// The segment currently receiving appends.
struct ActiveSegment {
    file: File,
    path: PathBuf,
    id: u64,
    len: u64,
    max_seq: u64,
}

/// A rotated-out segment awaiting flush coverage.
#[derive(Debug, Clone)]
struct SealedSegment {
    path: PathBuf,
    id: u64,
    max_seq: u64,
}

struct WalInner {
    dir: PathBuf,
    active: ActiveSegment,
    sealed: Vec<SealedSegment>,
    size_limit: u64,
    sync_writes: bool,
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

/// The engine's write-ahead log: one active segment plus sealed segments
/// awaiting flush coverage.
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Opens the WAL rooted at `dir`, starting a fresh active segment with
    /// an id one past the highest existing segment.
    ///
    /// Existing segments are **not** read here — recovery goes through
    /// [`replay`] first, flushes the result, and then calls
    /// [`Wal::truncate_all`].
    pub fn open(dir: impl AsRef<Path>, size_limit: u64, sync_writes: bool) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let next_id = list_segments(&dir)?
            .last()
            .map(|(id, _)| id + 1)
            .unwrap_or(1);

        let active = open_segment(&dir, next_id)?;
        info!(path = %active.path.display(), id = next_id, "WAL opened");

        Ok(Self {
            inner: Mutex::new(WalInner {
                dir,
                active,
                sealed: Vec::new(),
                size_limit,
                sync_writes,
            }),
        })
    }

    /// Appends a single record, rotating the active segment afterwards if it
    /// crossed the size limit.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        self.append_all(std::slice::from_ref(record), false)
    }

    /// Appends a run of records under one lock acquisition.
    ///
    /// When `force_sync` is set, the segment is fsync'ed once after the last
    /// record regardless of the configured write mode (batch `sync_wal`).
    pub fn append_all(&self, records: &[WalRecord], force_sync: bool) -> Result<(), WalError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut guard = self.lock()?;

        for record in records {
            let bytes = record.encode()?;
            guard.active.file.write_all(&bytes)?;
            guard.active.len += bytes.len() as u64;
            guard.active.max_seq = guard.active.max_seq.max(record.sequence);
            trace!(
                seq = record.sequence,
                len = bytes.len(),
                segment = guard.active.id,
                "WAL record appended"
            );
        }

        if guard.sync_writes || force_sync {
            guard.active.file.sync_data()?;
        }

        if guard.active.len >= guard.size_limit {
            Self::rotate_locked(&mut guard)?;
        }

        Ok(())
    }

    /// Fsyncs the active segment.
    pub fn sync(&self) -> Result<(), WalError> {
        let guard = self.lock()?;
        guard.active.file.sync_data()?;
        Ok(())
    }

    /// Deletes every sealed segment whose records are all covered by
    /// persisted SSTables (`max_seq <= durable_seq`).
    pub fn prune_flushed(&self, durable_seq: u64) -> Result<(), WalError> {
        let mut guard = self.lock()?;

        let mut kept = Vec::new();
        for segment in guard.sealed.drain(..) {
            if segment.max_seq <= durable_seq {
                debug!(
                    path = %segment.path.display(),
                    max_seq = segment.max_seq,
                    durable_seq,
                    "WAL segment fully flushed, deleting"
                );
                fs::remove_file(&segment.path)?;
            } else {
                kept.push(segment);
            }
        }
        guard.sealed = kept;
        Ok(())
    }

    /// Deletes **all** segments (sealed and active) and starts a fresh
    /// active segment. Called after recovery has flushed the replayed state,
    /// and on clean shutdown after the final flush.
    pub fn truncate_all(&self) -> Result<(), WalError> {
        let mut guard = self.lock()?;

        let next_id = guard.active.id + 1;
        for segment in guard.sealed.drain(..) {
            fs::remove_file(&segment.path)?;
        }
        fs::remove_file(&guard.active.path)?;

        guard.active = open_segment(&guard.dir, next_id)?;
        info!(id = next_id, "WAL truncated");
        Ok(())
    }

    /// Current size of the active segment in bytes.
    pub fn active_len(&self) -> Result<u64, WalError> {
        Ok(self.lock()?.active.len)
    }

    /// Number of sealed segments awaiting flush coverage.
    pub fn sealed_count(&self) -> Result<usize, WalError> {
        Ok(self.lock()?.sealed.len())
    }

    fn rotate_locked(guard: &mut WalInner) -> Result<(), WalError> {
        guard.active.file.sync_all()?;

        let next_id = guard.active.id + 1;
        let new_active = open_segment(&guard.dir, next_id)?;
        let old = std::mem::replace(&mut guard.active, new_active);

        info!(sealed = old.id, active = next_id, len = old.len, "WAL segment rotated");
        guard.sealed.push(SealedSegment {
            path: old.path,
            id: old.id,
            max_seq: old.max_seq,
        });
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WalInner>, WalError> {
        self.inner
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Ok(guard) = self.inner.lock()
            && let Err(e) = guard.active.file.sync_all()
        {
            warn!(path = %guard.active.path.display(), error = %e, "WAL sync failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Replay
// ------------------------------------------------------------------------------------------------

/// Outcome of replaying a WAL directory.
#[derive(Debug)]
pub struct ReplayOutcome {
    /// Replayed mutations in append order, with their recorded sequences.
    pub entries: Vec<Entry>,

    /// Highest sequence number observed.
    pub max_seq: u64,

    /// Number of records successfully replayed.
    pub records_replayed: u64,

    /// True when replay stopped early at a torn or corrupt record.
    pub truncated: bool,
}

/// Replays every segment under `dir` in id order.
///
/// The first CRC or framing failure ends the replay (the log is logically
/// truncated there); everything before it is returned. A missing directory
/// yields an empty outcome.
pub fn replay(dir: impl AsRef<Path>) -> Result<ReplayOutcome, WalError> {
    let dir = dir.as_ref();
    let mut outcome = ReplayOutcome {
        entries: Vec::new(),
        max_seq: 0,
        records_replayed: 0,
        truncated: false,
    };

    if !dir.exists() {
        return Ok(outcome);
    }

    for (id, path) in list_segments(dir)? {
        debug!(path = %path.display(), id, "WAL replay: reading segment");
        let data = fs::read(&path)?;
        let mut offset = 0usize;

        while offset < data.len() {
            match decode_record(&data[offset..]) {
                Ok(Some((record, consumed))) => {
                    offset += consumed;
                    outcome.max_seq = outcome.max_seq.max(record.sequence);
                    outcome.records_replayed += 1;
                    outcome.entries.push(record.into_entry());
                }
                Ok(None) | Err(_) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        "WAL replay truncated at torn or corrupt record"
                    );
                    outcome.truncated = true;
                    return Ok(outcome);
                }
            }
        }
    }

    Ok(outcome)
}

/// Decodes one record from the front of `buf`.
///
/// Returns `Ok(None)` for a torn tail (not enough bytes for a whole record)
/// and `Err` for framing or checksum violations. Both end the replay.
fn decode_record(buf: &[u8]) -> Result<Option<(WalRecord, usize)>, WalError> {
    if buf.len() < RECORD_PREFIX_SIZE {
        return Ok(None);
    }
    if buf[0..2] != RECORD_MAGIC {
        return Err(WalError::Internal("bad record magic".into()));
    }

    let length = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
    if length > MAX_RECORD_PAYLOAD || (length as usize) < PAYLOAD_HEADER_SIZE {
        return Err(WalError::RecordTooLarge(length as usize));
    }

    let total = RECORD_PREFIX_SIZE + length as usize + 4;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[RECORD_PREFIX_SIZE..RECORD_PREFIX_SIZE + length as usize];
    let stored_crc = u32::from_le_bytes([
        buf[total - 4],
        buf[total - 3],
        buf[total - 2],
        buf[total - 1],
    ]);

    let mut hasher = Crc32::new();
    hasher.update(&buf[..total - 4]);
    if hasher.finalize() != stored_crc {
        return Err(WalError::Internal("record checksum mismatch".into()));
    }

    let kind = EntryKind::from_u8(payload[0])
        .map_err(|e| WalError::Internal(format!("bad record kind: {e}")))?;
    let sequence = u64::from_le_bytes([
        payload[1], payload[2], payload[3], payload[4], payload[5], payload[6], payload[7],
        payload[8],
    ]);
    let key_len = u32::from_le_bytes([payload[9], payload[10], payload[11], payload[12]]) as usize;
    let value_len =
        u32::from_le_bytes([payload[13], payload[14], payload[15], payload[16]]) as usize;

    if PAYLOAD_HEADER_SIZE + key_len + value_len != length as usize {
        return Err(WalError::Internal("record length fields disagree".into()));
    }

    let key = payload[PAYLOAD_HEADER_SIZE..PAYLOAD_HEADER_SIZE + key_len].to_vec();
    let value =
        payload[PAYLOAD_HEADER_SIZE + key_len..PAYLOAD_HEADER_SIZE + key_len + value_len].to_vec();

    Ok(Some((
        WalRecord {
            kind,
            sequence,
            key,
            value,
        },
        total,
    )))
}

/// Deletes every WAL segment under `dir`. Called after recovery has flushed
/// the replayed state so a second crash cannot double-apply.
pub fn purge(dir: impl AsRef<Path>) -> Result<(), WalError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }
    for (_, path) in list_segments(dir)? {
        fs::remove_file(&path)?;
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Segment discovery
// ------------------------------------------------------------------------------------------------

/// Lists `wal-{seq:06}.log` files under `dir`, sorted by id ascending.
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let mut segments = Vec::new();
    for dir_entry in fs::read_dir(dir)? {
        let path = dir_entry?.path();
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

/// Parses the segment id from a `wal-{seq:06}.log` filename.
fn parse_segment_id(path: &Path) -> Option<u64> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.strip_prefix("wal-")
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse::<u64>().ok())
}

fn open_segment(dir: &Path, id: u64) -> Result<ActiveSegment, WalError> {
    let path = dir.join(format!("wal-{id:06}.log"));
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(&path)?;
    let len = file.metadata()?.len();
    Ok(ActiveSegment {
        file,
        path,
        id,
        len,
        max_seq: 0,
    })
}
