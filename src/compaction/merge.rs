//! Level-N merge — k-way merge of SSTables into the next level.
//!
//! A min-heap over per-file iterators yields entries in `(key ascending,
//! sequence descending)` order, so for every key the first entry surfaced
//! is the newest version; the rest are shadowed and dropped. Tombstones are
//! preserved unless the merge targets the bottom level, where nothing older
//! can exist to resurrect the key.
//!
//! Outputs roll over to a new file whenever the current one crosses the
//! target file size. On any failure the partial outputs are unlinked and
//! the inputs stay live — the next trigger retries.

use std::collections::BinaryHeap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{error, info};

use crate::engine::utils::Entry;
use crate::level::{CompactionSelection, SstFile, sst_filename};
use crate::manifest::ManifestFileEntry;
use crate::sstable::{SstError, TableBuilder, TableMeta};

use super::{CompactionCtx, CompactionError};

/// How many merged entries pass between cooperative shutdown checks.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

// ------------------------------------------------------------------------------------------------
// MergeIterator
// ------------------------------------------------------------------------------------------------

struct HeapItem {
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert the key ordering so the smallest
        // key pops first, then the highest sequence, then the earliest
        // source stream.
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then(self.entry.seq.cmp(&other.entry.seq))
            .then(other.source.cmp(&self.source))
    }
}

/// Heap-based k-way merge over sorted entry streams.
///
/// Yields entries in `(key ascending, sequence descending)` order. The
/// first error from any input stream ends the iteration.
pub struct MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, SstError>>,
{
    sources: Vec<I>,
    heap: BinaryHeap<HeapItem>,
    pending_error: Option<SstError>,
    failed: bool,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, SstError>>,
{
    /// Builds the merge from one iterator per input file.
    pub fn new(mut sources: Vec<I>) -> Result<Self, SstError> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some(first) = iter.next() {
                heap.push(HeapItem {
                    entry: first?,
                    source,
                });
            }
        }
        Ok(Self {
            sources,
            heap,
            pending_error: None,
            failed: false,
        })
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, SstError>>,
{
    type Item = Result<Entry, SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let item = self.heap.pop()?;
        if let Some(next) = self.sources[item.source].next() {
            match next {
                Ok(entry) => self.heap.push(HeapItem {
                    entry,
                    source: item.source,
                }),
                // Surface the already-popped entry first; the error ends
                // the merge on the following call.
                Err(e) => self.pending_error = Some(e),
            }
        }
        Some(Ok(item.entry))
    }
}

// ------------------------------------------------------------------------------------------------
// Merge execution
// ------------------------------------------------------------------------------------------------

/// Merges the selected inputs into the target level.
pub(crate) fn run_merge(
    ctx: &CompactionCtx,
    selection: &CompactionSelection,
) -> Result<(), CompactionError> {
    let all_inputs: Vec<&Arc<SstFile>> = selection
        .inputs
        .iter()
        .chain(selection.overlaps.iter())
        .collect();
    if all_inputs.is_empty() {
        return Ok(());
    }

    let target_level = selection.target_level as u8;
    let bottom = selection.target_level + 1 >= ctx.levels.max_levels();
    let input_bytes: u64 = all_inputs.iter().map(|f| f.size).sum();
    let estimated_entries: u64 = all_inputs.iter().map(|f| f.table.entry_count()).sum();

    info!(
        source_level = selection.source_level,
        target_level = selection.target_level,
        inputs = all_inputs.len(),
        bottom,
        "level merge started"
    );

    let iters: Vec<_> = all_inputs.iter().map(|f| f.table.iter()).collect();
    let merged = MergeIterator::new(iters)?;

    let mut outputs = MergeOutputs::new(ctx, target_level, estimated_entries as usize);
    let result = write_outputs(ctx, merged, &mut outputs, bottom);

    if let Err(e) = result {
        outputs.discard();
        return Err(e);
    }
    let built = match outputs.finish() {
        Ok(built) => built,
        Err(e) => {
            outputs.discard();
            return Err(e);
        }
    };

    // Open the new files, make them durable in the manifest, then swap the
    // level lists and mark the inputs for unlink-on-last-drop.
    let removed_ids: Vec<(u8, u32)> = all_inputs.iter().map(|f| (f.level, f.file_id)).collect();
    let mut added_files = Vec::with_capacity(built.len());
    let mut added_entries: Vec<ManifestFileEntry> = Vec::with_capacity(built.len());
    for (file_id, meta) in &built {
        let file = Arc::new(SstFile::from_meta(
            target_level,
            *file_id,
            meta,
            ctx.cache.clone(),
        )?);
        added_entries.push(file.manifest_entry());
        added_files.push(file);
    }

    if let Err(e) = ctx.manifest.apply(&added_entries, &removed_ids) {
        ctx.fatal.store(true, Ordering::Release);
        error!(error = %e, "manifest update failed during merge; engine is read-only");
        for (_, meta) in &built {
            let _ = fs::remove_file(&meta.path);
        }
        return Err(e.into());
    }

    let dropped = ctx.levels.install(added_files, &removed_ids)?;
    for file in dropped {
        file.mark_obsolete();
    }

    ctx.stats.merge_count.fetch_add(1, Ordering::Relaxed);
    ctx.stats
        .bytes_compacted
        .fetch_add(input_bytes, Ordering::Relaxed);
    info!(
        target_level = selection.target_level,
        outputs = built.len(),
        input_bytes,
        "level merge complete"
    );
    Ok(())
}

/// Streams the merged entries into rolling output files.
fn write_outputs<I>(
    ctx: &CompactionCtx,
    merged: MergeIterator<I>,
    outputs: &mut MergeOutputs<'_>,
    bottom: bool,
) -> Result<(), CompactionError>
where
    I: Iterator<Item = Result<Entry, SstError>>,
{
    let mut last_key: Option<Vec<u8>> = None;
    let mut processed: u64 = 0;

    for item in merged {
        let entry = item?;

        processed += 1;
        if processed % CANCEL_CHECK_INTERVAL == 0 && ctx.shutdown.load(Ordering::Acquire) {
            return Err(CompactionError::Cancelled);
        }

        // The first occurrence of a key carries the highest sequence; every
        // later one is shadowed.
        if last_key.as_deref() == Some(entry.key.as_slice()) {
            continue;
        }
        last_key = Some(entry.key.clone());

        // At the bottom level a tombstone has nothing left to shadow.
        if entry.is_tombstone() && bottom {
            continue;
        }

        outputs.append(&entry)?;
    }
    Ok(())
}

/// Rolling output files for one merge.
struct MergeOutputs<'a> {
    ctx: &'a CompactionCtx,
    level: u8,
    expected_entries: usize,
    current: Option<(u32, TableBuilder)>,
    built: Vec<(u32, TableMeta)>,
}

impl<'a> MergeOutputs<'a> {
    fn new(ctx: &'a CompactionCtx, level: u8, expected_entries: usize) -> Self {
        Self {
            ctx,
            level,
            expected_entries,
            current: None,
            built: Vec::new(),
        }
    }

    fn append(&mut self, entry: &Entry) -> Result<(), CompactionError> {
        if self.current.is_none() {
            let file_id = self.ctx.manifest.allocate_file_id()?;
            let path = self.ctx.data_dir.join(sst_filename(self.level, file_id));
            let builder = TableBuilder::new(
                &path,
                self.expected_entries.max(1),
                self.ctx.build_options.clone(),
            )?;
            self.current = Some((file_id, builder));
        }

        let roll = {
            let (_, builder) = self
                .current
                .as_mut()
                .ok_or_else(|| CompactionError::Internal("missing output builder".into()))?;
            builder.put(&entry.key, entry.value.as_deref(), entry.seq, entry.kind)?;
            builder.written_bytes() >= self.ctx.target_file_size
        };

        if roll {
            self.seal_current()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<(u32, TableMeta)>, CompactionError> {
        self.seal_current()?;
        Ok(std::mem::take(&mut self.built))
    }

    /// Finalizes the in-progress output, unlinking it when finalize fails.
    fn seal_current(&mut self) -> Result<(), CompactionError> {
        if let Some((file_id, builder)) = self.current.take() {
            let path = builder.path().to_path_buf();
            match builder.finalize() {
                Ok(meta) => self.built.push((file_id, meta)),
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Unlinks every output written so far after a failure.
    fn discard(&mut self) {
        if let Some((file_id, builder)) = self.current.take() {
            let path = builder.path().to_path_buf();
            drop(builder);
            let _ = fs::remove_file(&path);
            let _ = file_id;
        }
        for (_, meta) in self.built.drain(..) {
            let _ = fs::remove_file(&meta.path);
        }
    }
}
