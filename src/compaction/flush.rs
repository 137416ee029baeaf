//! Level-0 flush — materializes one immutable memtable as an SSTable.
//!
//! The flusher reads the memtable without removing it from the manager, so
//! concurrent readers keep seeing its entries throughout the build. Only
//! after the new file is durable in the manifest and registered at level 0
//! is the memtable popped and the covered WAL segments pruned. A failed
//! flush therefore leaves the immutable queue untouched and the next
//! trigger retries.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{error, info};

use crate::level::{SstFile, sst_filename};
use crate::memtable::Memtable;
use crate::sstable::TableBuilder;

use super::{CompactionCtx, CompactionError};

/// Flushes `memtable` into a new level-0 SSTable.
pub(crate) fn run_flush(
    ctx: &CompactionCtx,
    memtable: Arc<Memtable>,
) -> Result<(), CompactionError> {
    // A stale task (its memtable already drained by an earlier flush) is a
    // no-op, not a duplicate file.
    let still_queued = ctx
        .memtables
        .oldest_immutable()?
        .is_some_and(|front| Arc::ptr_eq(&front, &memtable));
    if !still_queued {
        return Ok(());
    }

    let entries = memtable.iter_for_flush()?;
    if entries.is_empty() {
        // Nothing to persist; just drain the queue slot.
        ctx.memtables.pop_if_oldest(&memtable)?;
        return Ok(());
    }

    let file_id = ctx.manifest.allocate_file_id()?;
    let path = ctx.data_dir.join(sst_filename(0, file_id));

    let mut builder = TableBuilder::new(&path, entries.len(), ctx.build_options.clone())?;
    for entry in &entries {
        builder.put(&entry.key, entry.value.as_deref(), entry.seq, entry.kind)?;
    }
    let meta = builder.finalize()?;

    let file = Arc::new(SstFile::from_meta(0, file_id, &meta, ctx.cache.clone())?);

    // Manifest first: the file must be durable in the live set before it
    // becomes visible to readers. A manifest failure is fatal to the engine.
    if let Err(e) = ctx.manifest.apply(&[file.manifest_entry()], &[]) {
        ctx.fatal.store(true, Ordering::Release);
        error!(error = %e, "manifest update failed during flush; engine is read-only");
        let _ = fs::remove_file(&path);
        return Err(e.into());
    }

    ctx.levels.add(Arc::clone(&file))?;
    ctx.memtables.pop_if_oldest(&memtable)?;

    // WAL segments fully below the lowest unflushed sequence are covered by
    // persisted SSTables and can go.
    if let Some(wal) = &ctx.wal {
        let durable_seq = match ctx.memtables.min_unflushed_seq()? {
            Some(lowest) => lowest.saturating_sub(1),
            None => ctx.memtables.last_seq(),
        };
        wal.prune_flushed(durable_seq)?;
    }

    ctx.stats.flush_count.fetch_add(1, Ordering::Relaxed);
    info!(
        file_id,
        entries = meta.entry_count,
        bytes = meta.size,
        "memtable flushed to level 0"
    );
    Ok(())
}
