//! Level manager — per-level SSTable metadata and compaction policy.
//!
//! Tracks the live SSTables of every level, decides when a level needs
//! compaction, and selects victims:
//!
//! - **Level 0** holds files with overlapping key ranges, ordered by file id
//!   (creation order). It triggers on file count.
//! - **Levels ≥ 1** hold files with pairwise disjoint key ranges, kept
//!   sorted by smallest key so point lookups binary-search to at most one
//!   file per level. They trigger on total bytes against a geometric budget
//!   (`base · multiplier^level`).
//!
//! Victim selection: level 0 compacts *all* of its files plus every level-1
//! file overlapping their combined range; a level L ≥ 1 compacts its file
//! with the smallest file id (oldest creation) plus the overlapping files
//! of level L+1.
//!
//! ## Ownership
//!
//! Files are shared as `Arc<SstFile>`: readers and in-flight compactions
//! hold references while the manager lists them. After compaction removes a
//! file it is marked obsolete; the file is physically unlinked only when the
//! last reference drops.

#[cfg(test)]
mod tests;

use std::{
    fs,
    path::PathBuf,
    sync::{Arc, RwLock, atomic::AtomicBool, atomic::Ordering},
};

use crate::manifest::ManifestFileEntry;
use crate::sstable::{BlockCache, SstError, Table, TableMeta};
use thiserror::Error;
use tracing::{debug, info, warn};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by level-manager operations.
#[derive(Debug, Error)]
pub enum LevelError {
    /// Level index outside the configured range.
    #[error("invalid level {0}")]
    InvalidLevel(usize),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// SstFile — a live, refcounted table handle
// ------------------------------------------------------------------------------------------------

/// One live SSTable: metadata plus the opened reader.
///
/// Obsolete files (replaced by compaction) are marked and unlinked from the
/// filesystem when the last `Arc` drops.
pub struct SstFile {
    /// Level this file belongs to.
    pub level: u8,

    /// Globally unique file id.
    pub file_id: u32,

    /// Filesystem path.
    pub path: PathBuf,

    /// File size in bytes.
    pub size: u64,

    /// Smallest key.
    pub min_key: Vec<u8>,

    /// Largest key.
    pub max_key: Vec<u8>,

    /// Lowest sequence number.
    pub min_seq: u64,

    /// Highest sequence number.
    pub max_seq: u64,

    /// The opened reader.
    pub table: Table,

    delete_on_drop: AtomicBool,
    cache: Option<Arc<BlockCache>>,
}

impl SstFile {
    /// Opens an existing table file and captures its metadata.
    pub fn open(
        level: u8,
        file_id: u32,
        path: PathBuf,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self, SstError> {
        let table = Table::open(&path, file_id as u64, cache.clone())?;
        Ok(Self {
            level,
            file_id,
            size: table.file_size(),
            min_key: table.min_key().to_vec(),
            max_key: table.max_key().to_vec(),
            min_seq: table.min_seq(),
            max_seq: table.max_seq(),
            table,
            path,
            delete_on_drop: AtomicBool::new(false),
            cache,
        })
    }

    /// Opens a freshly built table described by `meta`.
    pub fn from_meta(
        level: u8,
        file_id: u32,
        meta: &TableMeta,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self, SstError> {
        let table = Table::open(&meta.path, file_id as u64, cache.clone())?;
        Ok(Self {
            level,
            file_id,
            size: meta.size,
            min_key: meta.min_key.clone(),
            max_key: meta.max_key.clone(),
            min_seq: meta.min_seq,
            max_seq: meta.max_seq,
            table,
            path: meta.path.clone(),
            delete_on_drop: AtomicBool::new(false),
            cache,
        })
    }

    /// Marks the file for unlinking when the last reference drops.
    pub fn mark_obsolete(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }

    /// `true` when this file's key range intersects `[min, max]`.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        self.min_key.as_slice() <= max && self.max_key.as_slice() >= min
    }

    /// The manifest entry describing this file.
    pub fn manifest_entry(&self) -> ManifestFileEntry {
        ManifestFileEntry {
            level: self.level,
            file_id: self.file_id,
            size: self.size,
            min_key: self.min_key.clone(),
            max_key: self.max_key.clone(),
            min_seq: self.min_seq,
            max_seq: self.max_seq,
        }
    }
}

impl Drop for SstFile {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::Acquire) {
            if let Some(cache) = &self.cache {
                cache.evict_file(self.file_id as u64);
            }
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to unlink obsolete SSTable");
            } else {
                debug!(path = %self.path.display(), "obsolete SSTable unlinked");
            }
        }
    }
}

/// Formats the canonical filename for a table file.
pub fn sst_filename(level: u8, file_id: u32) -> String {
    format!("level-{level}-{file_id:06}.sst")
}

// ------------------------------------------------------------------------------------------------
// Compaction selection
// ------------------------------------------------------------------------------------------------

/// Inputs of one compaction, chosen by [`LevelManager::select_victim`].
pub struct CompactionSelection {
    /// Level the source files come from.
    pub source_level: usize,

    /// Level the merged output lands in.
    pub target_level: usize,

    /// Source files from `source_level`.
    pub inputs: Vec<Arc<SstFile>>,

    /// Files in `target_level` whose ranges overlap the inputs.
    pub overlaps: Vec<Arc<SstFile>>,
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Sizing policy for the level tree.
#[derive(Debug, Clone)]
pub struct LevelConfig {
    /// Number of levels (level indices `0..max_levels`).
    pub max_levels: usize,

    /// File-count trigger for level 0.
    pub level0_file_limit: usize,

    /// Byte budget of level 1.
    pub level_base_bytes: u64,

    /// Geometric multiplier applied per level above 1.
    pub level_size_multiplier: u64,

    /// Explicit per-level byte budgets; entries override the geometric
    /// progression for their index.
    pub max_level_bytes: Vec<u64>,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            max_levels: 7,
            level0_file_limit: 4,
            level_base_bytes: 64 * 1024 * 1024,
            level_size_multiplier: 10,
            max_level_bytes: Vec::new(),
        }
    }
}

impl LevelConfig {
    /// Byte budget for `level` (levels ≥ 1).
    fn level_max_bytes(&self, level: usize) -> u64 {
        if let Some(&explicit) = self.max_level_bytes.get(level) {
            return explicit;
        }
        let exponent = level.saturating_sub(1) as u32;
        self.level_base_bytes
            .saturating_mul(self.level_size_multiplier.saturating_pow(exponent))
    }
}

// ------------------------------------------------------------------------------------------------
// LevelManager
// ------------------------------------------------------------------------------------------------

/// Tracks the live SSTables of every level behind a reader-writer lock.
pub struct LevelManager {
    levels: RwLock<Vec<Vec<Arc<SstFile>>>>,
    config: LevelConfig,
}

impl LevelManager {
    /// Creates an empty level tree.
    pub fn new(config: LevelConfig) -> Self {
        let levels = (0..config.max_levels.max(1)).map(|_| Vec::new()).collect();
        Self {
            levels: RwLock::new(levels),
            config,
        }
    }

    /// Number of configured levels.
    pub fn max_levels(&self) -> usize {
        self.config.max_levels.max(1)
    }

    /// Registers a file at its level.
    pub fn add(&self, file: Arc<SstFile>) -> Result<(), LevelError> {
        let level = file.level as usize;
        let mut guard = self.write()?;
        if level >= guard.len() {
            return Err(LevelError::InvalidLevel(level));
        }
        guard[level].push(file);
        Self::sort_level(&mut guard[level], level);
        Ok(())
    }

    /// Atomically installs compaction outputs and removes their inputs.
    ///
    /// Returns the removed handles so the caller can mark them obsolete
    /// after the manifest update is durable.
    pub fn install(
        &self,
        added: Vec<Arc<SstFile>>,
        removed: &[(u8, u32)],
    ) -> Result<Vec<Arc<SstFile>>, LevelError> {
        let mut guard = self.write()?;
        let mut dropped = Vec::new();

        for level_files in guard.iter_mut() {
            level_files.retain(|file| {
                if removed.contains(&(file.level, file.file_id)) {
                    dropped.push(Arc::clone(file));
                    false
                } else {
                    true
                }
            });
        }

        for file in added {
            let level = file.level as usize;
            if level >= guard.len() {
                return Err(LevelError::InvalidLevel(level));
            }
            guard[level].push(file);
        }
        for (level, files) in guard.iter_mut().enumerate() {
            Self::sort_level(files, level);
        }

        info!(
            removed = dropped.len(),
            "level manager installed compaction result"
        );
        Ok(dropped)
    }

    /// Number of files at `level`.
    pub fn file_count(&self, level: usize) -> Result<usize, LevelError> {
        let guard = self.read()?;
        guard
            .get(level)
            .map(Vec::len)
            .ok_or(LevelError::InvalidLevel(level))
    }

    /// Total bytes at `level`.
    pub fn total_bytes(&self, level: usize) -> Result<u64, LevelError> {
        let guard = self.read()?;
        guard
            .get(level)
            .map(|files| files.iter().map(|f| f.size).sum())
            .ok_or(LevelError::InvalidLevel(level))
    }

    /// Whether `level` currently exceeds its compaction trigger.
    ///
    /// The bottom level never triggers — there is no deeper level to merge
    /// into.
    pub fn needs_compaction(&self, level: usize) -> Result<bool, LevelError> {
        Ok(self.compaction_score(level)? >= 1.0)
    }

    /// How far `level` is above its trigger: `< 1.0` means no compaction
    /// needed, `>= 2.0` means badly over budget.
    pub fn compaction_score(&self, level: usize) -> Result<f64, LevelError> {
        let guard = self.read()?;
        let files = guard.get(level).ok_or(LevelError::InvalidLevel(level))?;

        if level + 1 >= self.max_levels() {
            return Ok(0.0);
        }
        if level == 0 {
            return Ok(files.len() as f64 / self.config.level0_file_limit.max(1) as f64);
        }
        let total: u64 = files.iter().map(|f| f.size).sum();
        Ok(total as f64 / self.config.level_max_bytes(level).max(1) as f64)
    }

    /// Chooses the compaction inputs for `level`, or `None` when the level
    /// is empty.
    pub fn select_victim(&self, level: usize) -> Result<Option<CompactionSelection>, LevelError> {
        let guard = self.read()?;
        let files = guard.get(level).ok_or(LevelError::InvalidLevel(level))?;
        if files.is_empty() || level + 1 >= self.max_levels() {
            return Ok(None);
        }

        let inputs: Vec<Arc<SstFile>> = if level == 0 {
            files.clone()
        } else {
            // Oldest file id first — deterministic, documented policy.
            let victim = files
                .iter()
                .min_by_key(|f| f.file_id)
                .cloned()
                .ok_or_else(|| LevelError::Internal("empty level after check".into()))?;
            vec![victim]
        };

        let min = inputs
            .iter()
            .map(|f| f.min_key.as_slice())
            .min()
            .unwrap_or_default()
            .to_vec();
        let max = inputs
            .iter()
            .map(|f| f.max_key.as_slice())
            .max()
            .unwrap_or_default()
            .to_vec();

        let target_level = level + 1;
        let overlaps: Vec<Arc<SstFile>> = guard[target_level]
            .iter()
            .filter(|f| f.overlaps(&min, &max))
            .cloned()
            .collect();

        Ok(Some(CompactionSelection {
            source_level: level,
            target_level,
            inputs,
            overlaps,
        }))
    }

    /// A consistent snapshot of every level's file list for a reader.
    ///
    /// Level 0 comes back ordered newest-first (descending file id) so the
    /// read path can stop at the first hit; higher levels stay sorted by
    /// smallest key.
    pub fn snapshot(&self) -> Result<Vec<Vec<Arc<SstFile>>>, LevelError> {
        let guard = self.read()?;
        let mut snapshot: Vec<Vec<Arc<SstFile>>> = guard.clone();
        if let Some(level0) = snapshot.first_mut() {
            level0.reverse();
        }
        Ok(snapshot)
    }

    /// Total number of live files.
    pub fn total_file_count(&self) -> Result<usize, LevelError> {
        Ok(self.read()?.iter().map(Vec::len).sum())
    }

    fn sort_level(files: &mut [Arc<SstFile>], level: usize) {
        if level == 0 {
            files.sort_by_key(|f| f.file_id);
        } else {
            files.sort_by(|a, b| a.min_key.cmp(&b.min_key));
        }
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, Vec<Vec<Arc<SstFile>>>>, LevelError> {
        self.levels
            .read()
            .map_err(|_| LevelError::Internal("rwlock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Vec<Arc<SstFile>>>>, LevelError> {
        self.levels
            .write()
            .map_err(|_| LevelError::Internal("rwlock poisoned".into()))
    }
}

/// Binary search for the single file at a level ≥ 1 whose range may contain
/// `key`. The slice must be sorted by `min_key` with disjoint ranges.
pub fn find_in_level<'a>(files: &'a [Arc<SstFile>], key: &[u8]) -> Option<&'a Arc<SstFile>> {
    let idx = match files.binary_search_by(|f| f.min_key.as_slice().cmp(key)) {
        Ok(i) => i,
        Err(0) => return None,
        Err(i) => i - 1,
    };
    let candidate = &files[idx];
    (key <= candidate.max_key.as_slice()).then_some(candidate)
}
