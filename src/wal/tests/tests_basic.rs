#[cfg(test)]
mod tests {
    use crate::engine::utils::EntryKind;
    use crate::wal::{self, Wal, WalRecord};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn put_record(key: &str, value: &str, seq: u64) -> WalRecord {
        WalRecord {
            kind: EntryKind::Put,
            sequence: seq,
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_append_and_replay_roundtrip() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        let wal = Wal::open(tmp.path(), 64 * 1024 * 1024, false).unwrap();
        wal.append(&put_record("alpha", "1", 1)).unwrap();
        wal.append(&put_record("beta", "2", 2)).unwrap();
        wal.append(&WalRecord {
            kind: EntryKind::Delete,
            sequence: 3,
            key: b"alpha".to_vec(),
            value: Vec::new(),
        })
        .unwrap();
        wal.sync().unwrap();
        drop(wal);

        let outcome = wal::replay(tmp.path()).unwrap();
        assert!(!outcome.truncated);
        assert_eq!(outcome.records_replayed, 3);
        assert_eq!(outcome.max_seq, 3);
        assert_eq!(outcome.entries.len(), 3);

        assert_eq!(outcome.entries[0].key, b"alpha");
        assert_eq!(outcome.entries[0].value.as_deref(), Some(b"1".as_slice()));
        assert_eq!(outcome.entries[2].kind, EntryKind::Delete);
        assert_eq!(outcome.entries[2].value, None);
        assert_eq!(outcome.entries[2].seq, 3);
    }

    #[test]
    fn test_replay_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.records_replayed, 0);
        assert!(outcome.entries.is_empty());
        assert!(!outcome.truncated);
    }

    #[test]
    fn test_replay_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let outcome = wal::replay(tmp.path().join("nope")).unwrap();
        assert_eq!(outcome.records_replayed, 0);
    }

    #[test]
    fn test_append_all_preserves_order() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 64 * 1024 * 1024, false).unwrap();

        let records: Vec<WalRecord> = (1..=10u64)
            .map(|i| put_record(&format!("k{i:02}"), &format!("v{i}"), i))
            .collect();
        wal.append_all(&records, true).unwrap();
        drop(wal);

        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.records_replayed, 10);
        for (i, entry) in outcome.entries.iter().enumerate() {
            assert_eq!(entry.seq, i as u64 + 1);
        }
    }

    #[test]
    fn test_empty_value_and_binary_keys() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 64 * 1024 * 1024, true).unwrap();
        wal.append(&WalRecord {
            kind: EntryKind::Put,
            sequence: 7,
            key: vec![0x00, 0xFF, 0x7F],
            value: Vec::new(),
        })
        .unwrap();
        drop(wal);

        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].key, vec![0x00, 0xFF, 0x7F]);
        assert_eq!(outcome.entries[0].value.as_deref(), Some(&[][..]));
    }

    #[test]
    fn test_purge_removes_all_segments() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 16, false).unwrap(); // tiny limit → many segments
        for i in 1..=5u64 {
            wal.append(&put_record(&format!("key-{i}"), "value", i)).unwrap();
        }
        drop(wal);

        wal::purge(tmp.path()).unwrap();
        let outcome = wal::replay(tmp.path()).unwrap();
        assert_eq!(outcome.records_replayed, 0);
    }
}
