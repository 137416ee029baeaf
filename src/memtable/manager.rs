//! Memtable manager — rotation, backpressure, and sequence allocation.
//!
//! Owns one Active [`Memtable`] and an ordered queue of Immutables (oldest
//! first), bounded by `max_immutable_count`. When the Active crosses the
//! size threshold it is frozen and swapped for a fresh one; if the immutable
//! queue is already at capacity, rotation blocks on a condition variable
//! until the flusher drains a memtable (write backpressure).
//!
//! Sequence numbers are allocated here from a single strictly monotonic
//! atomic counter covering the whole process lifetime. On recovery the
//! counter is reset to `max(persisted seq) + 1`.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use super::{Memtable, MemtableError, MemtableGetResult};
use tracing::{debug, info, warn};

struct ManagerInner {
    /// The memtable currently accepting writes.
    active: Arc<Memtable>,

    /// Frozen memtables awaiting flush; front = oldest, back = newest.
    immutables: VecDeque<Arc<Memtable>>,
}

/// Owner of the memtable stack.
pub struct MemtableManager {
    inner: Mutex<ManagerInner>,

    /// Signalled whenever the flusher drains an immutable.
    drained: Condvar,

    /// Next sequence number to hand out.
    next_seq: AtomicU64,

    /// Freeze threshold for the active memtable, in bytes.
    memtable_max_size: usize,

    /// Capacity of the immutable queue.
    max_immutable_count: usize,
}

impl MemtableManager {
    /// Creates a manager with an empty active memtable. Sequence allocation
    /// starts at 1.
    pub fn new(memtable_max_size: usize, max_immutable_count: usize) -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                active: Arc::new(Memtable::new()),
                immutables: VecDeque::new(),
            }),
            drained: Condvar::new(),
            next_seq: AtomicU64::new(1),
            memtable_max_size,
            max_immutable_count,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Sequence allocation
    // --------------------------------------------------------------------------------------------

    /// Allocates one sequence number.
    pub fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocates a contiguous block of `count` sequence numbers, returning
    /// the first. Used by the batch writer.
    pub fn allocate_seq_block(&self, count: u64) -> u64 {
        self.next_seq.fetch_add(count, Ordering::SeqCst)
    }

    /// Highest sequence number handed out so far.
    pub fn last_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Resets the counter during recovery so future sequences continue past
    /// the persisted maximum. Must be called before any writes.
    pub fn reset_next_seq(&self, max_persisted: u64) {
        self.next_seq
            .store(max_persisted.saturating_add(1), Ordering::SeqCst);
        info!(next_seq = max_persisted + 1, "sequence counter restored");
    }

    // --------------------------------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------------------------------

    /// Applies a mutation to the active memtable.
    pub fn apply(&self, entry: crate::engine::utils::Entry) -> Result<(), MemtableError> {
        let active = {
            let guard = self.lock()?;
            Arc::clone(&guard.active)
        };
        active.apply(entry)
    }

    /// Returns `true` when the active memtable has crossed the freeze
    /// threshold and should be rotated.
    pub fn should_rotate(&self) -> Result<bool, MemtableError> {
        let guard = self.lock()?;
        Ok(guard.active.byte_size() >= self.memtable_max_size)
    }

    /// Freezes the active memtable and swaps in a fresh one, **blocking**
    /// while the immutable queue is at capacity (backpressure).
    ///
    /// Returns the frozen memtable, or `None` when the active was empty and
    /// nothing was rotated.
    pub fn rotate_active(&self) -> Result<Option<Arc<Memtable>>, MemtableError> {
        let mut guard = self.lock()?;

        if guard.active.is_empty() {
            return Ok(None);
        }

        while guard.immutables.len() >= self.max_immutable_count {
            warn!(
                immutables = guard.immutables.len(),
                "immutable queue saturated, write path blocked awaiting flush"
            );
            guard = self
                .drained
                .wait(guard)
                .map_err(|_| MemtableError::Internal("mutex poisoned".into()))?;
        }

        Ok(Some(Self::swap_locked(&mut guard)))
    }

    /// Non-blocking rotation: returns `Ok(None)` without rotating when the
    /// immutable queue is full. Used when background compaction is disabled
    /// and the caller flushes inline instead of waiting.
    pub fn try_rotate_active(&self) -> Result<Option<Arc<Memtable>>, MemtableError> {
        let mut guard = self.lock()?;
        if guard.active.is_empty() || guard.immutables.len() >= self.max_immutable_count {
            return Ok(None);
        }
        Ok(Some(Self::swap_locked(&mut guard)))
    }

    fn swap_locked(guard: &mut ManagerInner) -> Arc<Memtable> {
        let fresh = Arc::new(Memtable::new());
        let old = std::mem::replace(&mut guard.active, fresh);
        old.freeze();
        guard.immutables.push_back(Arc::clone(&old));
        debug!(
            frozen_bytes = old.byte_size(),
            immutables = guard.immutables.len(),
            "active memtable rotated"
        );
        old
    }

    // --------------------------------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------------------------------

    /// Looks up `key` in the active memtable, then the immutables newest to
    /// oldest. The first entry found wins (including tombstones).
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        let (active, immutables) = self.snapshot()?;

        match active.get(key)? {
            MemtableGetResult::NotFound => {}
            hit => return Ok(hit),
        }
        for memtable in &immutables {
            match memtable.get(key)? {
                MemtableGetResult::NotFound => {}
                hit => return Ok(hit),
            }
        }
        Ok(MemtableGetResult::NotFound)
    }

    /// Returns the active memtable and the immutables ordered newest first.
    pub fn snapshot(&self) -> Result<(Arc<Memtable>, Vec<Arc<Memtable>>), MemtableError> {
        let guard = self.lock()?;
        let immutables = guard.immutables.iter().rev().cloned().collect();
        Ok((Arc::clone(&guard.active), immutables))
    }

    // --------------------------------------------------------------------------------------------
    // Flusher interface
    // --------------------------------------------------------------------------------------------

    /// The oldest immutable awaiting flush, if any. The flusher reads from
    /// this memtable while building its SSTable; readers keep seeing it
    /// until [`MemtableManager::pop_if_oldest`] removes it.
    pub fn oldest_immutable(&self) -> Result<Option<Arc<Memtable>>, MemtableError> {
        let guard = self.lock()?;
        Ok(guard.immutables.front().cloned())
    }

    /// Removes `flushed` from the queue front after its SSTable is live,
    /// waking one blocked writer. Returns `false` if the front has changed
    /// (the flush raced a concurrent drain and must not double-pop).
    pub fn pop_if_oldest(&self, flushed: &Arc<Memtable>) -> Result<bool, MemtableError> {
        let mut guard = self.lock()?;
        let matches = guard
            .immutables
            .front()
            .is_some_and(|front| Arc::ptr_eq(front, flushed));
        if matches {
            guard.immutables.pop_front();
            // Both blocked writers and drain-waiters sleep on this condvar.
            self.drained.notify_all();
        }
        Ok(matches)
    }

    /// Number of immutables awaiting flush.
    pub fn immutable_count(&self) -> Result<usize, MemtableError> {
        Ok(self.lock()?.immutables.len())
    }

    /// Blocks until the immutable queue is empty or `timeout` elapses.
    /// Returns `true` when the queue drained in time.
    pub fn wait_until_drained(&self, timeout: std::time::Duration) -> Result<bool, MemtableError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.lock()?;
        while !guard.immutables.is_empty() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (g, _) = self
                .drained
                .wait_timeout(guard, deadline - now)
                .map_err(|_| MemtableError::Internal("mutex poisoned".into()))?;
            guard = g;
        }
        Ok(true)
    }

    /// Lowest sequence number still held in memory (active or immutable),
    /// or `None` when every entry has been flushed.
    ///
    /// WAL segments whose `max_seq` is below this bound are fully covered by
    /// persisted SSTables and may be deleted.
    pub fn min_unflushed_seq(&self) -> Result<Option<u64>, MemtableError> {
        let guard = self.lock()?;
        let mut min: Option<u64> = None;

        let mut consider = |memtable: &Arc<Memtable>| -> Result<(), MemtableError> {
            if let Some((lo, _)) = memtable.seq_range()? {
                min = Some(min.map_or(lo, |m: u64| m.min(lo)));
            }
            Ok(())
        };

        consider(&guard.active)?;
        for memtable in &guard.immutables {
            consider(memtable)?;
        }
        Ok(min)
    }

    /// Combined footprint of the active and immutable memtables.
    pub fn total_bytes(&self) -> Result<usize, MemtableError> {
        let guard = self.lock()?;
        let mut total = guard.active.byte_size();
        for memtable in &guard.immutables {
            total += memtable.byte_size();
        }
        Ok(total)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ManagerInner>, MemtableError> {
        self.inner
            .lock()
            .map_err(|_| MemtableError::Internal("mutex poisoned".into()))
    }
}
