#[cfg(test)]
mod tests {
    use crate::engine::utils::EntryKind;
    use crate::wal::{self, Wal, WalRecord};
    use tempfile::TempDir;

    fn record(i: u64) -> WalRecord {
        WalRecord {
            kind: EntryKind::Put,
            sequence: i,
            key: format!("rotation-key-{i:04}").into_bytes(),
            value: vec![0xAB; 64],
        }
    }

    #[test]
    fn test_rotation_at_size_limit() {
        let tmp = TempDir::new().unwrap();
        // Every record is ~108 bytes; a 100-byte limit rotates after each append.
        let wal = Wal::open(tmp.path(), 100, false).unwrap();

        for i in 1..=4u64 {
            wal.append(&record(i)).unwrap();
        }
        assert_eq!(wal.sealed_count().unwrap(), 4);

        drop(wal);
        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.records_replayed, 4);
        assert_eq!(outcome.max_seq, 4);
    }

    #[test]
    fn test_prune_flushed_deletes_covered_segments() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 100, false).unwrap();

        for i in 1..=4u64 {
            wal.append(&record(i)).unwrap();
        }
        let sealed_before = wal.sealed_count().unwrap();
        assert_eq!(sealed_before, 4);

        // Records up to sequence 2 are durable elsewhere.
        wal.prune_flushed(2).unwrap();
        let sealed_after = wal.sealed_count().unwrap();
        assert_eq!(sealed_after, 2);

        // Sequences above the durable bound must survive.
        drop(wal);
        let outcome = wal::replay(tmp.path()).unwrap();
        assert!(outcome.entries.iter().any(|e| e.seq == 3));
        assert!(outcome.entries.iter().any(|e| e.seq == 4));
    }

    #[test]
    fn test_prune_everything_when_all_flushed() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 100, false).unwrap();
        for i in 1..=4u64 {
            wal.append(&record(i)).unwrap();
        }
        wal.prune_flushed(u64::MAX).unwrap();
        assert_eq!(wal.sealed_count().unwrap(), 0);
    }

    #[test]
    fn test_truncate_all_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 100, false).unwrap();
        for i in 1..=4u64 {
            wal.append(&record(i)).unwrap();
        }
        wal.truncate_all().unwrap();
        assert_eq!(wal.sealed_count().unwrap(), 0);
        assert_eq!(wal.active_len().unwrap(), 0);

        // New appends after truncation replay alone.
        wal.append(&record(99)).unwrap();
        drop(wal);
        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.records_replayed, 1);
        assert_eq!(outcome.max_seq, 99);
    }

    #[test]
    fn test_reopen_continues_segment_numbering() {
        let tmp = TempDir::new().unwrap();
        {
            let wal = Wal::open(tmp.path(), 64 * 1024, false).unwrap();
            wal.append(&record(1)).unwrap();
        }
        {
            // A fresh Wal starts a new segment past the existing one; the
            // old segment remains replayable.
            let wal = Wal::open(tmp.path(), 64 * 1024, false).unwrap();
            wal.append(&record(2)).unwrap();
        }
        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.records_replayed, 2);
    }
}
