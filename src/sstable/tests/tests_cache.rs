#[cfg(test)]
mod tests {
    use crate::engine::utils::EntryKind;
    use crate::sstable::{BlockCache, Table, TableBuilder, builder::BuildOptions};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = BlockCache::new(8);
        assert!(cache.get(1, 0).is_none());
        assert_eq!(cache.misses(), 1);

        cache.insert(1, 0, vec![1, 2, 3]);
        let hit = cache.get(1, 0).unwrap();
        assert_eq!(*hit, vec![1, 2, 3]);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_keys_distinguish_files_and_offsets() {
        let cache = BlockCache::new(8);
        cache.insert(1, 0, vec![1]);
        cache.insert(2, 0, vec![2]);
        cache.insert(1, 64, vec![3]);

        assert_eq!(*cache.get(1, 0).unwrap(), vec![1]);
        assert_eq!(*cache.get(2, 0).unwrap(), vec![2]);
        assert_eq!(*cache.get(1, 64).unwrap(), vec![3]);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = BlockCache::new(2);
        cache.insert(1, 0, vec![1]);
        cache.insert(1, 1, vec![2]);

        // Touch the first block so the second becomes the LRU victim.
        cache.get(1, 0);
        cache.insert(1, 2, vec![3]);

        assert!(cache.get(1, 0).is_some());
        assert!(cache.get(1, 1).is_none());
        assert!(cache.get(1, 2).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_evict_file_drops_only_that_file() {
        let cache = BlockCache::new(8);
        cache.insert(1, 0, vec![1]);
        cache.insert(2, 0, vec![2]);
        cache.evict_file(1);

        assert!(cache.get(1, 0).is_none());
        assert!(cache.get(2, 0).is_some());
    }

    #[test]
    fn test_table_reads_populate_shared_cache() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("level-0-000001.sst");

        let mut builder = TableBuilder::new(&path, 10, BuildOptions::default()).unwrap();
        for i in 0..10u32 {
            builder
                .put(
                    format!("cached-{i:03}").as_bytes(),
                    Some(b"v"),
                    i as u64 + 1,
                    EntryKind::Put,
                )
                .unwrap();
        }
        builder.finalize().unwrap();

        let cache = Arc::new(BlockCache::new(16));
        let table = Table::open(&path, 1, Some(Arc::clone(&cache))).unwrap();

        table.get(b"cached-000").unwrap().unwrap();
        let misses_after_first = cache.misses();
        assert!(misses_after_first >= 1);

        // The same block serves the second lookup from the cache.
        table.get(b"cached-001").unwrap().unwrap();
        assert!(cache.hits() >= 1);
        assert_eq!(cache.misses(), misses_after_first);
    }
}
