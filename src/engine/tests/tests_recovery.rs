#[cfg(test)]
mod tests {
    use crate::engine::{Db, DbConfig};
    use tempfile::TempDir;

    /// Recovery tests simulate a crash by dropping the handle without
    /// `close()`: the memtable contents survive only in the WAL.
    fn crash_config() -> DbConfig {
        DbConfig {
            enable_background_compaction: false,
            sync_writes: true,
            ..DbConfig::default()
        }
    }

    #[test]
    fn test_wal_recovery_after_crash() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            for i in 0..10u32 {
                db.put(
                    format!("wal_key_{i}").as_bytes(),
                    format!("wal_value_{i}").as_bytes(),
                )
                .unwrap();
            }
            db.delete(b"wal_key_5").unwrap();
            db.delete(b"wal_key_7").unwrap();
            // No close — crash.
        }

        let db = Db::open(tmp.path(), crash_config()).unwrap();
        assert_eq!(db.get(b"wal_key_5").unwrap(), None);
        assert_eq!(db.get(b"wal_key_7").unwrap(), None);
        for i in [0u32, 1, 2, 3, 4, 6, 8, 9] {
            assert_eq!(
                db.get(format!("wal_key_{i}").as_bytes()).unwrap(),
                Some(format!("wal_value_{i}").into_bytes()),
                "wal_key_{i} lost in recovery"
            );
        }
        assert_eq!(db.stats().unwrap().recovery_count, 12);
        db.close().unwrap();
    }

    #[test]
    fn test_clean_shutdown_reopens_without_replay() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            db.put(b"durable", b"value").unwrap();
            db.close().unwrap();
        }

        let db = Db::open(tmp.path(), crash_config()).unwrap();
        // close() flushed and truncated the WAL: nothing to replay.
        assert_eq!(db.stats().unwrap().recovery_count, 0);
        assert_eq!(db.get(b"durable").unwrap(), Some(b"value".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_recovery_is_idempotent_across_repeated_crashes() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            db.put(b"stable", b"state").unwrap();
            db.delete(b"ghost").unwrap();
        }

        // Crash again immediately after each recovery; the state must not
        // drift.
        for _ in 0..3 {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            assert_eq!(db.get(b"stable").unwrap(), Some(b"state".to_vec()));
            assert_eq!(db.get(b"ghost").unwrap(), None);
            // No close — crash again.
            drop(db);
        }

        let db = Db::open(tmp.path(), crash_config()).unwrap();
        assert_eq!(db.get(b"stable").unwrap(), Some(b"state".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_sequences_continue_after_recovery() {
        let tmp = TempDir::new().unwrap();
        let pre_crash_seq;
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            for i in 0..20u32 {
                db.put(format!("seq-{i}").as_bytes(), b"v").unwrap();
            }
            pre_crash_seq = db.inner.memtables.last_seq();
        }

        let db = Db::open(tmp.path(), crash_config()).unwrap();
        db.put(b"post-crash", b"v").unwrap();
        assert!(
            db.inner.memtables.last_seq() > pre_crash_seq,
            "sequence counter regressed across recovery"
        );
        db.close().unwrap();
    }

    #[test]
    fn test_newer_write_wins_after_recovery() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            db.put(b"versioned", b"old").unwrap();
            db.flush().unwrap(); // old version persisted to level 0
            db.put(b"versioned", b"new").unwrap(); // newer version only in WAL
        }

        let db = Db::open(tmp.path(), crash_config()).unwrap();
        assert_eq!(db.get(b"versioned").unwrap(), Some(b"new".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_recovered_state_survives_clean_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            db.put(b"carried", b"forward").unwrap();
        }
        {
            // Recovery flushes the replayed WAL into an SSTable.
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            assert!(db.stats().unwrap().sstable_count >= 1);
            db.close().unwrap();
        }
        let db = Db::open(tmp.path(), crash_config()).unwrap();
        assert_eq!(db.get(b"carried").unwrap(), Some(b"forward".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_partial_sstable_swept_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), crash_config()).unwrap();
            db.put(b"real", b"data").unwrap();
            db.close().unwrap();
        }

        // A crash mid-build leaves a footer-less file; recovery must sweep
        // it rather than trust it.
        let orphan = tmp.path().join("level-0-999999.sst");
        std::fs::write(&orphan, b"partial write, no footer").unwrap();

        let db = Db::open(tmp.path(), crash_config()).unwrap();
        assert!(!orphan.exists(), "footer-less orphan was not swept");
        assert_eq!(db.get(b"real").unwrap(), Some(b"data".to_vec()));
        db.close().unwrap();
    }
}
