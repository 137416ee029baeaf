//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - Keys are unique within a memtable: a second put or delete to the same
//!   key replaces the prior entry and advances its sequence number.
//! - Deletes are represented via tombstones, not physical removal.
//! - Byte footprint and entry count are maintained on every mutation and
//!   readable in O(1).
//! - A memtable transitions `Active → Immutable` exactly once. After
//!   freezing, mutations fail with [`MemtableError::ReadOnly`]; reads
//!   continue to succeed.
//! - A memtable is dropped only after its contents are durably flushed to an
//!   SSTable or its backing WAL segments are confirmed intact.
//!
//! ## Flush Semantics
//!
//! - [`Memtable::iter_for_flush`] returns a *logical snapshot*: every key's
//!   current entry (put or tombstone) in ascending key order — exactly the
//!   order the SSTable builder requires.
//! - Flush iteration does **not** mutate or clear in-memory state.
//!
//! ## Concurrency
//!
//! The ordered map lives behind an `RwLock`: one writer, many concurrent
//! readers. Size counters are atomics so accounting queries never take the
//! lock.

pub mod manager;

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::engine::utils::{Entry, EntryKind};
use thiserror::Error;
use tracing::trace;

/// Fixed per-entry bookkeeping overhead added to key/value bytes when
/// accounting the memtable footprint.
const ENTRY_OVERHEAD: usize = std::mem::size_of::<MemEntry>() + std::mem::size_of::<Vec<u8>>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Write attempted on a frozen (immutable) memtable.
    #[error("memtable is read-only")]
    ReadOnly,

    /// Caller contract violated (empty key).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Data structures
// ------------------------------------------------------------------------------------------------

/// The current entry for one key.
#[derive(Debug, Clone, PartialEq)]
struct MemEntry {
    /// The stored value. `None` indicates a tombstone.
    value: Option<Vec<u8>>,

    /// Put or delete.
    kind: EntryKind,

    /// Sequence number of the most recent mutation to this key.
    seq: u64,
}

/// Result of a point lookup against a single memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableGetResult {
    /// Value found for the key.
    Found(Vec<u8>),

    /// Key was deleted; the tombstone terminates the layered search.
    Tombstone,

    /// Key not present in this memtable (search continues to older layers).
    NotFound,
}

/// Inner state protected by the `RwLock`.
struct MemtableInner {
    /// Ordered map of keys to their most recent entry.
    tree: BTreeMap<Vec<u8>, MemEntry>,

    /// Lowest sequence number held (0 when empty).
    min_seq: u64,

    /// Highest sequence number held (0 when empty).
    max_seq: u64,
}

/// The in-memory ordered write buffer.
///
/// One memtable is Active at a time; rotation freezes it into an Immutable
/// awaiting flush. Ownership and rotation live in
/// [`manager::MemtableManager`].
pub struct Memtable {
    inner: RwLock<MemtableInner>,

    /// Set once on freeze; checked before every mutation.
    frozen: AtomicBool,

    /// Accumulated footprint: key + value bytes plus per-entry overhead.
    byte_size: AtomicUsize,

    /// Number of distinct keys.
    entry_count: AtomicUsize,

    /// Mirror of `inner.max_seq` for lock-free accounting reads.
    max_seq: AtomicU64,
}

impl Memtable {
    /// Creates an empty, active memtable.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemtableInner {
                tree: BTreeMap::new(),
                min_seq: 0,
                max_seq: 0,
            }),
            frozen: AtomicBool::new(false),
            byte_size: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
            max_seq: AtomicU64::new(0),
        }
    }

    /// Applies a mutation (put or tombstone) with its assigned sequence.
    ///
    /// A repeated key replaces the prior entry; the footprint accounting is
    /// adjusted by the size delta.
    pub fn apply(&self, entry: Entry) -> Result<(), MemtableError> {
        if entry.key.is_empty() {
            return Err(MemtableError::InvalidParam("key is empty".into()));
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(MemtableError::ReadOnly);
        }

        let new_size = ENTRY_OVERHEAD + entry.key.len() + entry.value_len();
        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;

        let seq = entry.seq;
        let key_len = entry.key.len();
        let previous = guard.tree.insert(
            entry.key,
            MemEntry {
                value: entry.value,
                kind: entry.kind,
                seq,
            },
        );

        match previous {
            Some(old) => {
                let old_size = ENTRY_OVERHEAD + key_len + old.value.as_ref().map_or(0, Vec::len);
                self.byte_size.fetch_add(new_size, Ordering::Relaxed);
                self.byte_size.fetch_sub(old_size, Ordering::Relaxed);
            }
            None => {
                self.byte_size.fetch_add(new_size, Ordering::Relaxed);
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        if guard.min_seq == 0 || seq < guard.min_seq {
            guard.min_seq = seq;
        }
        if seq > guard.max_seq {
            guard.max_seq = seq;
            self.max_seq.store(seq, Ordering::Relaxed);
        }

        trace!(seq, "memtable entry applied");
        Ok(())
    }

    /// Looks up the most recent entry for `key` in this memtable.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;

        match guard.tree.get(key) {
            None => Ok(MemtableGetResult::NotFound),
            Some(entry) => match entry.kind {
                EntryKind::Delete => Ok(MemtableGetResult::Tombstone),
                EntryKind::Put => Ok(MemtableGetResult::Found(
                    entry.value.clone().unwrap_or_default(),
                )),
            },
        }
    }

    /// Freezes the memtable: all further mutations fail with `ReadOnly`.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Returns `true` once the memtable has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Accumulated byte footprint. O(1).
    pub fn byte_size(&self) -> usize {
        self.byte_size.load(Ordering::Relaxed)
    }

    /// Number of distinct keys. O(1).
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Returns `true` when no entries have been applied.
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Highest sequence number held (0 when empty). O(1).
    pub fn max_seq(&self) -> u64 {
        self.max_seq.load(Ordering::Relaxed)
    }

    /// `(min_seq, max_seq)` of the held entries, or `None` when empty.
    pub fn seq_range(&self) -> Result<Option<(u64, u64)>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;
        if guard.tree.is_empty() {
            Ok(None)
        } else {
            Ok(Some((guard.min_seq, guard.max_seq)))
        }
    }

    /// Returns a snapshot of every entry in ascending key order, ready to be
    /// streamed into the SSTable builder.
    pub fn iter_for_flush(&self) -> Result<Vec<Entry>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("rwlock poisoned".into()))?;

        let mut entries = Vec::with_capacity(guard.tree.len());
        for (key, entry) in guard.tree.iter() {
            entries.push(Entry {
                key: key.clone(),
                value: entry.value.clone(),
                kind: entry.kind,
                seq: entry.seq,
            });
        }
        Ok(entries)
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}
