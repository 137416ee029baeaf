#[cfg(test)]
mod tests {
    use crate::manifest::{Manifest, ManifestError, ManifestFileEntry};
    use std::fs;
    use tempfile::TempDir;

    fn entry(level: u8, file_id: u32) -> ManifestFileEntry {
        ManifestFileEntry {
            level,
            file_id,
            size: 1024 * file_id as u64,
            min_key: format!("min-{file_id:03}").into_bytes(),
            max_key: format!("max-{file_id:03}").into_bytes(),
            min_seq: file_id as u64 * 10,
            max_seq: file_id as u64 * 10 + 9,
        }
    }

    #[test]
    fn test_fresh_manifest_initializes() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::open(tmp.path()).unwrap();
        assert!(manifest.files().unwrap().is_empty());
        assert_eq!(manifest.max_seq().unwrap(), 0);
        assert!(tmp.path().join("MANIFEST").exists());
    }

    #[test]
    fn test_file_id_allocation_is_monotonic() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::open(tmp.path()).unwrap();
        let a = manifest.allocate_file_id().unwrap();
        let b = manifest.allocate_file_id().unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_apply_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let manifest = Manifest::open(tmp.path()).unwrap();
            let id = manifest.allocate_file_id().unwrap();
            manifest.apply(&[entry(0, id)], &[]).unwrap();
            let id2 = manifest.allocate_file_id().unwrap();
            manifest.apply(&[entry(1, id2)], &[]).unwrap();
        }

        let manifest = Manifest::open(tmp.path()).unwrap();
        let files = manifest.files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].level, 0);
        assert_eq!(files[1].level, 1);
        // The allocator continues past the persisted ids.
        let next = manifest.allocate_file_id().unwrap();
        assert!(next > files[1].file_id);
    }

    #[test]
    fn test_apply_removes_files_atomically() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::open(tmp.path()).unwrap();
        manifest
            .apply(&[entry(0, 1), entry(0, 2), entry(0, 3)], &[])
            .unwrap();

        // A compaction installs one level-1 file and retires the inputs.
        manifest
            .apply(&[entry(1, 4)], &[(0, 1), (0, 2), (0, 3)])
            .unwrap();

        let files = manifest.files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, 4);
        assert_eq!(files[0].level, 1);
    }

    #[test]
    fn test_max_seq_spans_all_files() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::open(tmp.path()).unwrap();
        manifest.apply(&[entry(0, 1), entry(0, 5)], &[]).unwrap();
        assert_eq!(manifest.max_seq().unwrap(), 59);
    }

    #[test]
    fn test_corrupt_manifest_refused() {
        let tmp = TempDir::new().unwrap();
        {
            let manifest = Manifest::open(tmp.path()).unwrap();
            manifest.apply(&[entry(0, 1)], &[]).unwrap();
        }

        let path = tmp.path().join("MANIFEST");
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        match Manifest::open(tmp.path()) {
            Err(ManifestError::Corruption(_)) => {}
            other => panic!("expected Corruption, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::open(tmp.path()).unwrap();
        manifest.apply(&[entry(0, 1)], &[]).unwrap();
        assert!(!tmp.path().join("MANIFEST.tmp").exists());
    }
}
