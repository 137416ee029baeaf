//! Batch writer — groups mutations and commits them atomically.
//!
//! A [`WriteBatch`] accumulates a bounded sequence of puts and deletes.
//! Commit optionally stable-sorts the operations by key and collapses
//! same-key operations to the latest one, then hands the final sequence to
//! the engine, which allocates a contiguous block of sequence numbers,
//! appends every record to the WAL, and applies the mutations to the active
//! memtable under its write lock — concurrent readers observe either none
//! or all of the batch.
//!
//! An empty commit is a successful no-op.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::engine::utils::EntryKind;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned when filling a [`WriteBatch`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The operation-count limit was reached.
    #[error("batch is full ({0} operations)")]
    Full(usize),

    /// The memory limit was reached.
    #[error("batch memory limit exceeded ({0} bytes)")]
    TooLarge(usize),

    /// Caller contract violated (empty key).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Knobs controlling batch accumulation and commit behaviour.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of buffered operations.
    pub max_batch_size: usize,

    /// Maximum buffered key+value bytes.
    pub max_batch_memory: usize,

    /// Stable-sort the operations by key before commit.
    pub enable_sorting: bool,

    /// Collapse same-key operations to the latest one (applied after the
    /// sort; put-after-delete keeps the put, delete-after-put the delete).
    pub enable_deduplication: bool,

    /// Fsync the WAL once after the batch's last record.
    pub sync_wal: bool,

    /// Hold the engine write lock across the whole apply step so readers
    /// see all or nothing. Disabling allows prefix visibility.
    pub atomic_commit: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_batch_memory: 4 * 1024 * 1024,
            enable_sorting: true,
            enable_deduplication: true,
            sync_wal: false,
            atomic_commit: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Batch contents
// ------------------------------------------------------------------------------------------------

/// One buffered operation.
#[derive(Debug, Clone)]
pub(crate) struct BatchOp {
    pub(crate) kind: EntryKind,
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
}

/// Buffer state reported by [`WriteBatch::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStatus {
    /// Pending operation count; reflects deduplication when it is enabled.
    pub entry_count: usize,

    /// Buffered key+value bytes.
    pub memory_bytes: usize,
}

/// Accumulates mutations for one atomic commit.
#[derive(Debug)]
pub struct WriteBatch {
    config: BatchConfig,
    ops: Vec<BatchOp>,
    memory_bytes: usize,
}

impl WriteBatch {
    /// Creates an empty batch with the given configuration.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            ops: Vec::new(),
            memory_bytes: 0,
        }
    }

    /// Buffers a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), BatchError> {
        self.push(EntryKind::Put, key, value)
    }

    /// Buffers a delete.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), BatchError> {
        self.push(EntryKind::Delete, key, &[])
    }

    fn push(&mut self, kind: EntryKind, key: &[u8], value: &[u8]) -> Result<(), BatchError> {
        if key.is_empty() {
            return Err(BatchError::InvalidParam("key is empty".into()));
        }
        if self.ops.len() >= self.config.max_batch_size {
            return Err(BatchError::Full(self.config.max_batch_size));
        }
        let op_bytes = key.len() + value.len();
        if self.memory_bytes + op_bytes > self.config.max_batch_memory {
            return Err(BatchError::TooLarge(self.config.max_batch_memory));
        }

        self.ops.push(BatchOp {
            kind,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.memory_bytes += op_bytes;
        Ok(())
    }

    /// Reports the pending entry count and memory footprint. With
    /// deduplication enabled the count is the number of distinct keys.
    pub fn status(&self) -> BatchStatus {
        let entry_count = if self.config.enable_deduplication {
            let mut distinct = HashMap::with_capacity(self.ops.len());
            for op in &self.ops {
                distinct.insert(op.key.as_slice(), ());
            }
            distinct.len()
        } else {
            self.ops.len()
        };
        BatchStatus {
            entry_count,
            memory_bytes: self.memory_bytes,
        }
    }

    /// Discards the pending buffer.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.memory_bytes = 0;
    }

    /// Returns `true` when no operations are buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The batch configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Produces the final operation sequence for commit: optional stable
    /// sort by key, then optional last-op-wins deduplication. Leaves the
    /// buffer untouched (the engine clears it after a successful commit).
    pub(crate) fn prepared_ops(&self) -> Vec<BatchOp> {
        let mut ops = self.ops.clone();
        if self.config.enable_sorting {
            ops.sort_by(|a, b| a.key.cmp(&b.key));
        }
        if self.config.enable_deduplication {
            // Keep the latest operation per key, preserving the position of
            // the key's first occurrence so sorted batches stay sorted.
            let mut latest: HashMap<Vec<u8>, usize> = HashMap::with_capacity(ops.len());
            let mut kept: Vec<Option<BatchOp>> = Vec::with_capacity(ops.len());
            for op in ops {
                match latest.get(&op.key) {
                    Some(&slot) => kept[slot] = Some(op),
                    None => {
                        latest.insert(op.key.clone(), kept.len());
                        kept.push(Some(op));
                    }
                }
            }
            ops = kept.into_iter().flatten().collect();
        }
        ops
    }
}
