//! # Manifest Component
//!
//! The manifest is the durable record of the current set of live SSTables
//! per level and the next file id to allocate. Compaction and flush update
//! it atomically whenever files are installed or removed; recovery reads it
//! to learn which files are live (everything else in the data directory is
//! an orphan and gets swept).
//!
//! ## On-disk format
//!
//! A single binary file `MANIFEST`:
//!
//! ```text
//! [MAGIC 4B][VERSION u32][NEXT_FILE_ID u32][ENTRY_COUNT u32]
//! [level u8][file_id u32][size u64][min_key][max_key][min_seq u64][max_seq u64] × N
//! [CRC32 4B]
//! ```
//!
//! where keys are length-prefixed byte strings and the CRC covers every
//! preceding byte.
//!
//! ## Durability
//!
//! Updates write `MANIFEST.tmp`, fsync it, atomically rename it over
//! `MANIFEST`, and fsync the directory. A crash at any point leaves either
//! the old or the new manifest, never a torn one. A manifest whose CRC fails
//! on open is a fatal corruption — the engine refuses to start rather than
//! guess at the live file set.
//!
//! ## Thread safety
//!
//! All state sits behind a `Mutex`, which also serializes writers — there is
//! never more than one `MANIFEST.tmp` in flight.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info};

const MANIFEST_MAGIC: [u8; 4] = *b"CKVM";
const MANIFEST_VERSION: u32 = 1;
const MANIFEST_FILENAME: &str = "MANIFEST";
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Checksum, magic, or version failure — the manifest cannot be trusted.
    #[error("manifest corruption: {0}")]
    Corruption(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Data structures
// ------------------------------------------------------------------------------------------------

/// Metadata for one live SSTable.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestFileEntry {
    /// Level the file belongs to.
    pub level: u8,

    /// Globally unique, monotonically allocated file id.
    pub file_id: u32,

    /// File size in bytes.
    pub size: u64,

    /// Smallest key in the file.
    pub min_key: Vec<u8>,

    /// Largest key in the file.
    pub max_key: Vec<u8>,

    /// Lowest sequence number in the file.
    pub min_seq: u64,

    /// Highest sequence number in the file.
    pub max_seq: u64,
}

impl Encode for ManifestFileEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.level.encode_to(buf)?;
        self.file_id.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.min_seq.encode_to(buf)?;
        self.max_seq.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ManifestFileEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (level, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (file_id, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (min_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                level,
                file_id,
                size,
                min_key,
                max_key,
                min_seq,
                max_seq,
            },
            off,
        ))
    }
}

struct ManifestData {
    next_file_id: u32,
    files: Vec<ManifestFileEntry>,
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// Durable registry of live SSTables and the file-id allocator.
pub struct Manifest {
    dir: PathBuf,
    data: Mutex<ManifestData>,
}

impl Manifest {
    /// Opens the manifest under `dir`, creating a fresh one when absent.
    ///
    /// A present-but-corrupt manifest is a hard error: the live file set is
    /// the engine's source of truth and must not be guessed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let path = dir.join(MANIFEST_FILENAME);
        let data = if path.exists() {
            let data = Self::read_file(&path)?;
            info!(
                path = %path.display(),
                files = data.files.len(),
                next_file_id = data.next_file_id,
                "manifest loaded"
            );
            data
        } else {
            ManifestData {
                next_file_id: 1,
                files: Vec::new(),
            }
        };

        let manifest = Self {
            dir,
            data: Mutex::new(data),
        };
        if !path.exists() {
            let guard = manifest.lock()?;
            manifest.persist_locked(&guard)?;
            info!(path = %path.display(), "fresh manifest initialized");
        }
        Ok(manifest)
    }

    /// Returns the live file entries.
    pub fn files(&self) -> Result<Vec<ManifestFileEntry>, ManifestError> {
        Ok(self.lock()?.files.clone())
    }

    /// Highest sequence number across all live files (0 when empty).
    pub fn max_seq(&self) -> Result<u64, ManifestError> {
        Ok(self
            .lock()?
            .files
            .iter()
            .map(|f| f.max_seq)
            .max()
            .unwrap_or(0))
    }

    /// Allocates the next file id. The increment becomes durable with the
    /// next [`Manifest::apply`]; a crash in between only strands an orphan
    /// file, which recovery sweeps.
    pub fn allocate_file_id(&self) -> Result<u32, ManifestError> {
        let mut guard = self.lock()?;
        let id = guard.next_file_id;
        guard.next_file_id += 1;
        Ok(id)
    }

    /// Atomically records installed and removed files.
    ///
    /// The new manifest is fully durable (file + directory fsync) before
    /// this returns. On failure the in-memory state is rolled back so a
    /// retry observes the pre-apply manifest.
    pub fn apply(
        &self,
        added: &[ManifestFileEntry],
        removed: &[(u8, u32)],
    ) -> Result<(), ManifestError> {
        let mut guard = self.lock()?;

        let previous = guard.files.clone();
        guard
            .files
            .retain(|f| !removed.contains(&(f.level, f.file_id)));
        guard.files.extend_from_slice(added);
        guard.files.sort_by_key(|f| (f.level, f.file_id));

        if let Err(e) = self.persist_locked(&guard) {
            guard.files = previous;
            return Err(e);
        }

        debug!(
            added = added.len(),
            removed = removed.len(),
            live = guard.files.len(),
            "manifest updated"
        );
        Ok(())
    }

    /// Serializes and durably replaces `MANIFEST` via tmp + rename.
    fn persist_locked(&self, data: &ManifestData) -> Result<(), ManifestError> {
        let mut buf = Vec::new();
        MANIFEST_MAGIC
            .encode_to(&mut buf)
            .and_then(|()| MANIFEST_VERSION.encode_to(&mut buf))
            .and_then(|()| data.next_file_id.encode_to(&mut buf))
            .and_then(|()| encoding::encode_vec(&data.files, &mut buf))?;

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        let tmp_path = self.dir.join(MANIFEST_TMP_FILENAME);
        let final_path = self.dir.join(MANIFEST_FILENAME);

        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &final_path)?;
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn read_file(path: &Path) -> Result<ManifestData, ManifestError> {
        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;

        if buf.len() < 4 {
            return Err(ManifestError::Corruption("manifest too small".into()));
        }
        let (body, crc_bytes) = buf.split_at(buf.len() - 4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(ManifestError::Corruption("manifest checksum mismatch".into()));
        }

        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&body[off..])?;
        off += n;
        if magic != MANIFEST_MAGIC {
            return Err(ManifestError::Corruption("bad manifest magic".into()));
        }
        let (version, n) = u32::decode_from(&body[off..])?;
        off += n;
        if version != MANIFEST_VERSION {
            return Err(ManifestError::Corruption(format!(
                "unsupported manifest version {version}"
            )));
        }
        let (next_file_id, n) = u32::decode_from(&body[off..])?;
        off += n;
        let (files, _) = encoding::decode_vec::<ManifestFileEntry>(&body[off..])?;

        Ok(ManifestData {
            next_file_id,
            files,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data
            .lock()
            .map_err(|_| ManifestError::Internal("mutex poisoned".into()))
    }
}
