//! Shared block cache.
//!
//! One cache is shared across all open SSTables, keyed by `(file_id,
//! block_offset)`. Eviction is least-recently-used, tracked with a logical
//! access clock; capacity is counted in blocks. Hit and miss counters feed
//! the engine's stats surface.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

/// Identifies one data block across all open tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    file_id: u64,
    block_offset: u64,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<CacheKey, CachedBlock>,
    capacity: usize,
    clock: u64,
}

#[derive(Debug)]
struct CachedBlock {
    payload: Arc<Vec<u8>>,
    last_used: u64,
}

/// LRU cache of decoded-block payloads shared by every table reader.
#[derive(Debug)]
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    /// Creates a cache holding at most `capacity` blocks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                capacity: capacity.max(1),
                clock: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetches a block payload, counting a hit or miss.
    pub fn get(&self, file_id: u64, block_offset: u64) -> Option<Arc<Vec<u8>>> {
        let key = CacheKey {
            file_id,
            block_offset,
        };
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => return None,
        };
        guard.clock += 1;
        let clock = guard.clock;
        match guard.map.get_mut(&key) {
            Some(block) => {
                block.last_used = clock;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&block.payload))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts a block payload, evicting the least-recently-used block when
    /// at capacity.
    pub fn insert(&self, file_id: u64, block_offset: u64, payload: Vec<u8>) {
        let key = CacheKey {
            file_id,
            block_offset,
        };
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        guard.clock += 1;
        let clock = guard.clock;

        if guard.map.len() >= guard.capacity && !guard.map.contains_key(&key) {
            if let Some(victim) = guard
                .map
                .iter()
                .min_by_key(|(_, block)| block.last_used)
                .map(|(k, _)| *k)
            {
                guard.map.remove(&victim);
            }
        }

        guard.map.insert(
            key,
            CachedBlock {
                payload: Arc::new(payload),
                last_used: clock,
            },
        );
    }

    /// Drops every cached block belonging to `file_id`. Called when a table
    /// is unlinked after compaction.
    pub fn evict_file(&self, file_id: u64) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.map.retain(|key, _| key.file_id != file_id);
        }
    }

    /// Number of cache hits served so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses recorded so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Blocks currently resident.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.map.len()).unwrap_or(0)
    }

    /// Returns `true` when no blocks are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
