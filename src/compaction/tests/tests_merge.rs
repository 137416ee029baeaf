#[cfg(test)]
mod tests {
    use crate::compaction::merge::{MergeIterator, run_merge};
    use crate::compaction::{CompactionCtx, SchedulerStats};
    use crate::engine::utils::Entry;
    use crate::level::{LevelConfig, LevelManager, SstFile, sst_filename};
    use crate::manifest::Manifest;
    use crate::memtable::manager::MemtableManager;
    use crate::sstable::{SstError, TableBuilder, builder::BuildOptions};
    use std::path::Path;
    use std::sync::{
        Arc,
        atomic::AtomicBool,
    };
    use tempfile::TempDir;

    fn test_ctx(dir: &Path, max_levels: usize) -> CompactionCtx {
        CompactionCtx {
            data_dir: dir.to_path_buf(),
            manifest: Arc::new(Manifest::open(dir).unwrap()),
            levels: Arc::new(LevelManager::new(LevelConfig {
                max_levels,
                level0_file_limit: 4,
                level_base_bytes: 1024 * 1024,
                level_size_multiplier: 10,
                max_level_bytes: Vec::new(),
            })),
            memtables: Arc::new(MemtableManager::new(1024 * 1024, 4)),
            wal: None,
            cache: None,
            build_options: BuildOptions::default(),
            target_file_size: 64 * 1024 * 1024,
            max_immutable_count: 4,
            stats: Arc::new(SchedulerStats::default()),
            fatal: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers a level file built from explicit entries.
    fn install_file(ctx: &CompactionCtx, level: u8, entries: &[Entry]) -> Arc<SstFile> {
        let file_id = ctx.manifest.allocate_file_id().unwrap();
        let path = ctx.data_dir.join(sst_filename(level, file_id));
        let mut builder = TableBuilder::new(&path, entries.len(), BuildOptions::default()).unwrap();
        for entry in entries {
            builder
                .put(&entry.key, entry.value.as_deref(), entry.seq, entry.kind)
                .unwrap();
        }
        let meta = builder.finalize().unwrap();
        let file = Arc::new(SstFile::from_meta(level, file_id, &meta, None).unwrap());
        ctx.manifest.apply(&[file.manifest_entry()], &[]).unwrap();
        ctx.levels.add(Arc::clone(&file)).unwrap();
        file
    }

    fn put(key: &str, value: &str, seq: u64) -> Entry {
        Entry::put(key.as_bytes().to_vec(), value.as_bytes().to_vec(), seq)
    }

    fn tombstone(key: &str, seq: u64) -> Entry {
        Entry::tombstone(key.as_bytes().to_vec(), seq)
    }

    // ================================================================
    // MergeIterator
    // ================================================================

    #[test]
    fn test_merge_iterator_global_order() {
        let a = vec![Ok::<_, SstError>(put("a", "1", 1)), Ok(put("c", "3", 3))];
        let b = vec![Ok::<_, SstError>(put("b", "2", 2)), Ok(put("d", "4", 4))];

        let merged: Vec<Entry> = MergeIterator::new(vec![a.into_iter(), b.into_iter()])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let keys: Vec<&[u8]> = merged.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c", b"d"]);
    }

    #[test]
    fn test_merge_iterator_newest_version_first_per_key() {
        let newer = vec![Ok::<_, SstError>(put("k", "new", 9))];
        let older = vec![Ok::<_, SstError>(put("k", "old", 2))];

        let merged: Vec<Entry> = MergeIterator::new(vec![older.into_iter(), newer.into_iter()])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].seq, 9);
        assert_eq!(merged[0].value.as_deref(), Some(b"new".as_slice()));
        assert_eq!(merged[1].seq, 2);
    }

    #[test]
    fn test_merge_iterator_stops_at_source_error() {
        let bad = vec![
            Ok::<_, SstError>(put("a", "1", 1)),
            Err(SstError::Corruption("boom".into())),
        ];
        let good = vec![Ok::<_, SstError>(put("z", "9", 9))];

        let mut merged = MergeIterator::new(vec![bad.into_iter(), good.into_iter()]).unwrap();
        assert!(merged.next().unwrap().is_ok());
        assert!(merged.next().unwrap().is_err());
        assert!(merged.next().is_none());
    }

    // ================================================================
    // run_merge
    // ================================================================

    #[test]
    fn test_merge_keeps_newest_version() {
        let tmp = TempDir::new().unwrap();
        let ctx = test_ctx(tmp.path(), 4);

        install_file(&ctx, 0, &[put("apple", "old", 1), put("pear", "keep", 2)]);
        install_file(&ctx, 0, &[put("apple", "new", 5)]);

        let selection = ctx.levels.select_victim(0).unwrap().unwrap();
        run_merge(&ctx, &selection).unwrap();

        assert_eq!(ctx.levels.file_count(0).unwrap(), 0);
        assert_eq!(ctx.levels.file_count(1).unwrap(), 1);

        let snapshot = ctx.levels.snapshot().unwrap();
        let merged = &snapshot[1][0];
        let entry = merged.table.get(b"apple").unwrap().unwrap();
        assert_eq!(entry.value.as_deref(), Some(b"new".as_slice()));
        assert_eq!(entry.seq, 5);
        assert!(merged.table.get(b"pear").unwrap().is_some());
    }

    #[test]
    fn test_merge_preserves_tombstones_above_bottom() {
        let tmp = TempDir::new().unwrap();
        // Four levels: merging 0 → 1 is far from the bottom.
        let ctx = test_ctx(tmp.path(), 4);

        install_file(&ctx, 0, &[put("doomed", "value", 1)]);
        install_file(&ctx, 0, &[tombstone("doomed", 7)]);

        let selection = ctx.levels.select_victim(0).unwrap().unwrap();
        run_merge(&ctx, &selection).unwrap();

        let snapshot = ctx.levels.snapshot().unwrap();
        let merged = &snapshot[1][0];
        let entry = merged.table.get(b"doomed").unwrap().unwrap();
        assert!(entry.is_tombstone());
        assert_eq!(entry.seq, 7);
    }

    #[test]
    fn test_merge_drops_tombstones_at_bottom_level() {
        let tmp = TempDir::new().unwrap();
        // Two levels: merging 0 → 1 reaches the bottom.
        let ctx = test_ctx(tmp.path(), 2);

        install_file(&ctx, 0, &[put("doomed", "value", 1), put("live", "v", 2)]);
        install_file(&ctx, 0, &[tombstone("doomed", 7)]);

        let selection = ctx.levels.select_victim(0).unwrap().unwrap();
        run_merge(&ctx, &selection).unwrap();

        let snapshot = ctx.levels.snapshot().unwrap();
        let merged = &snapshot[1][0];
        assert!(merged.table.get(b"doomed").unwrap().is_none());
        assert!(merged.table.get(b"live").unwrap().is_some());
    }

    #[test]
    fn test_merge_pulls_in_overlapping_target_files() {
        let tmp = TempDir::new().unwrap();
        let ctx = test_ctx(tmp.path(), 4);

        install_file(&ctx, 1, &[put("b", "from-l1", 1), put("m", "keep-l1", 2)]);
        install_file(&ctx, 0, &[put("b", "from-l0", 9)]);

        let selection = ctx.levels.select_victim(0).unwrap().unwrap();
        assert_eq!(selection.overlaps.len(), 1);
        run_merge(&ctx, &selection).unwrap();

        // One merged level-1 file replaces both inputs.
        assert_eq!(ctx.levels.file_count(0).unwrap(), 0);
        assert_eq!(ctx.levels.file_count(1).unwrap(), 1);

        let snapshot = ctx.levels.snapshot().unwrap();
        let merged = &snapshot[1][0];
        assert_eq!(
            merged.table.get(b"b").unwrap().unwrap().value.as_deref(),
            Some(b"from-l0".as_slice())
        );
        assert_eq!(
            merged.table.get(b"m").unwrap().unwrap().value.as_deref(),
            Some(b"keep-l1".as_slice())
        );
    }

    #[test]
    fn test_merge_updates_manifest_and_unlinks_inputs() {
        let tmp = TempDir::new().unwrap();
        let ctx = test_ctx(tmp.path(), 4);

        let input_a = install_file(&ctx, 0, &[put("a", "1", 1)]);
        let input_b = install_file(&ctx, 0, &[put("b", "2", 2)]);
        let path_a = input_a.path.clone();
        let path_b = input_b.path.clone();
        drop((input_a, input_b));

        let selection = ctx.levels.select_victim(0).unwrap().unwrap();
        run_merge(&ctx, &selection).unwrap();

        // Manifest reflects only the merged output.
        let files = ctx.manifest.files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].level, 1);

        // Input files are gone once the last reference drops.
        assert!(!path_a.exists());
        assert!(!path_b.exists());

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.merge_count, 1);
        assert!(stats.bytes_compacted > 0);
    }

    #[test]
    fn test_merge_rolls_outputs_at_target_size() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = test_ctx(tmp.path(), 4);
        ctx.target_file_size = 2 * 1024; // tiny target → several outputs

        let entries: Vec<Entry> = (0..500u32)
            .map(|i| put(&format!("roll-{i:05}"), &format!("value-{i}"), i as u64 + 1))
            .collect();
        install_file(&ctx, 0, &entries);
        install_file(&ctx, 0, &[put("zz-last", "v", 1_000)]);

        let selection = ctx.levels.select_victim(0).unwrap().unwrap();
        run_merge(&ctx, &selection).unwrap();

        assert!(ctx.levels.file_count(1).unwrap() > 1);

        // Level-1 outputs must carry pairwise disjoint key ranges.
        let snapshot = ctx.levels.snapshot().unwrap();
        let files = &snapshot[1];
        for pair in files.windows(2) {
            assert!(pair[0].max_key < pair[1].min_key);
        }

        // Every key survives the split.
        for i in (0..500u32).step_by(37) {
            let key = format!("roll-{i:05}");
            let found = files.iter().any(|f| {
                f.table.get(key.as_bytes()).unwrap().is_some()
            });
            assert!(found, "{key} lost in rolled outputs");
        }
    }
}
