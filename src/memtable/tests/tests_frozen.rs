#[cfg(test)]
mod tests {
    use crate::engine::utils::Entry;
    use crate::memtable::{Memtable, MemtableError, MemtableGetResult};

    #[test]
    fn test_freeze_rejects_writes() {
        let memtable = Memtable::new();
        memtable
            .apply(Entry::put(b"key".to_vec(), b"value".to_vec(), 1))
            .unwrap();

        memtable.freeze();
        assert!(memtable.is_frozen());

        match memtable.apply(Entry::put(b"other".to_vec(), b"v".to_vec(), 2)) {
            Err(MemtableError::ReadOnly) => {}
            other => panic!("expected ReadOnly, got {other:?}"),
        }
    }

    #[test]
    fn test_reads_survive_freeze() {
        let memtable = Memtable::new();
        memtable
            .apply(Entry::put(b"key".to_vec(), b"value".to_vec(), 1))
            .unwrap();
        memtable.apply(Entry::tombstone(b"gone".to_vec(), 2)).unwrap();

        memtable.freeze();

        assert_eq!(
            memtable.get(b"key").unwrap(),
            MemtableGetResult::Found(b"value".to_vec())
        );
        assert_eq!(memtable.get(b"gone").unwrap(), MemtableGetResult::Tombstone);
        assert_eq!(memtable.entry_count(), 2);
    }

    #[test]
    fn test_flush_iteration_after_freeze() {
        let memtable = Memtable::new();
        for i in 0..10u32 {
            memtable
                .apply(Entry::put(
                    format!("key-{i:02}").into_bytes(),
                    format!("value-{i}").into_bytes(),
                    i as u64 + 1,
                ))
                .unwrap();
        }
        memtable.freeze();

        let entries = memtable.iter_for_flush().unwrap();
        assert_eq!(entries.len(), 10);
        assert!(entries.windows(2).all(|w| w[0].key < w[1].key));
    }
}
