//! Sorted String Table (SSTable) Module
//!
//! Implements the immutable on-disk sorted run: a sequence of checksummed
//! data blocks followed by one index block, one bloom block, and a
//! fixed-size footer.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA BLOCK]...[DATA BLOCK][INDEX BLOCK][BLOOM BLOCK][FOOTER 84B]
//! ```
//!
//! Every block starts with a 24-byte header:
//!
//! ```text
//! [MAGIC 4B][BLOCK_TYPE 1B][COMPRESSION 1B][RESERVED 2B]
//! [ENTRY_COUNT 4B][UNCOMPRESSED_SIZE 4B][COMPRESSED_SIZE 4B][CRC32 4B]
//! ```
//!
//! and the CRC covers the payload that follows. A **data block** payload is
//! a run of entry records `{key_len u32, value_len u32, sequence u64,
//! kind u8, key, value}` sorted ascending by key, one entry per key. An
//! **index block** payload is one record per data block: `{key_len u32,
//! offset u64, size u32, sequence u64, key}` keyed by the smallest key of
//! the referenced block. The **bloom block** payload is the serialized
//! [`BloomFilter`](crate::bloom::BloomFilter). The **footer** is always the
//! last 84 bytes and locates the index and bloom blocks, the min/max key
//! bytes, the sequence range, and the format version; its magic sits in the
//! file's final four bytes.
//!
//! # Failure semantics
//!
//! A file without a valid footer (bad magic, short file, CRC mismatch) is
//! treated as nonexistent by [`Table::open`] — recovery sweeps such files.
//! A checksum mismatch on a data block fails reads of that block only, with
//! [`SstError::Corruption`]. An unknown footer version fails `open` with
//! [`SstError::UnsupportedFormat`].
//!
//! # Concurrency model
//!
//! Tables are immutable after [`builder::TableBuilder::finalize`], so reads
//! are lock-free: the whole file is memory-mapped and block slices are
//! bounds-checked before use. Multiple readers and compaction inputs share
//! a table through `Arc` with no further coordination.

pub mod builder;
pub mod cache;

#[cfg(test)]
mod tests;

pub use builder::{TableBuilder, TableMeta};
pub use cache::BlockCache;

use std::{fs::File, io, path::Path, sync::Arc};

use crate::bloom::{self, BloomFilter};
use crate::encoding::EncodingError;
use crate::engine::utils::{Entry, EntryKind};
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

// ------------------------------------------------------------------------------------------------
// Format constants
// ------------------------------------------------------------------------------------------------

/// Magic bytes opening every block header.
pub(crate) const BLOCK_MAGIC: [u8; 4] = *b"CKVB";

/// Magic bytes closing the footer (the last four bytes of the file).
pub(crate) const TABLE_MAGIC: [u8; 4] = *b"CKVT";

/// Current footer format version.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Encoded block header size in bytes.
pub(crate) const BLOCK_HEADER_SIZE: usize = 24;

/// Encoded footer size in bytes.
pub(crate) const FOOTER_SIZE: usize = 84;

/// Fixed bytes of a data-block entry record before the key:
/// key_len(4) + value_len(4) + sequence(8) + kind(1).
pub(crate) const ENTRY_PREFIX_SIZE: usize = 17;

/// Fixed bytes of an index record before the key:
/// key_len(4) + offset(8) + size(4) + sequence(8).
pub(crate) const INDEX_PREFIX_SIZE: usize = 24;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (build, open, read).
#[derive(Debug, Error)]
pub enum SstError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Checksum mismatch, truncated footer, or malformed block.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Footer carries a format version this build does not understand.
    #[error("unsupported format version {0}")]
    UnsupportedFormat(u32),

    /// Caller contract violated (out-of-order keys, empty table).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Bloom filter construction failure.
    #[error("bloom error: {0}")]
    Bloom(#[from] bloom::BloomError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EncodingError> for SstError {
    fn from(e: EncodingError) -> Self {
        // A decode failure on a CRC-valid block means the writer and reader
        // disagree about the format — surfaced as corruption.
        SstError::Corruption(e.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Block typing
// ------------------------------------------------------------------------------------------------

/// Block type discriminant carried in every block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BlockType {
    Data = 1,
    Index = 2,
    Bloom = 3,
    Footer = 4,
}

impl BlockType {
    fn from_u8(value: u8) -> Result<Self, SstError> {
        match value {
            1 => Ok(Self::Data),
            2 => Ok(Self::Index),
            3 => Ok(Self::Bloom),
            4 => Ok(Self::Footer),
            other => Err(SstError::Corruption(format!("unknown block type {other}"))),
        }
    }
}

/// Block compression discriminant.
///
/// Only `None` is wired; the other identifiers are reserved in the format
/// and rejected at configuration validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    /// No compression.
    #[default]
    None = 0,
    /// Reserved.
    Snappy = 1,
    /// Reserved.
    Lz4 = 2,
    /// Reserved.
    Zstd = 3,
}

impl Compression {
    fn from_u8(value: u8) -> Result<Self, SstError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Snappy),
            2 => Ok(Self::Lz4),
            3 => Ok(Self::Zstd),
            other => Err(SstError::Corruption(format!("unknown compression {other}"))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block header
// ------------------------------------------------------------------------------------------------

/// Header preceding every block payload.
#[derive(Debug)]
pub(crate) struct BlockHeader {
    pub(crate) block_type: BlockType,
    pub(crate) compression: Compression,
    pub(crate) entry_count: u32,
    pub(crate) uncompressed_size: u32,
    pub(crate) compressed_size: u32,
    pub(crate) crc32: u32,
}

impl BlockHeader {
    pub(crate) fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&BLOCK_MAGIC);
        buf[4] = self.block_type as u8;
        buf[5] = self.compression as u8;
        // bytes 6..8 reserved, zero
        buf[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, SstError> {
        if buf.len() < BLOCK_HEADER_SIZE {
            return Err(SstError::Corruption("short block header".into()));
        }
        if buf[0..4] != BLOCK_MAGIC {
            return Err(SstError::Corruption("bad block magic".into()));
        }
        Ok(Self {
            block_type: BlockType::from_u8(buf[4])?,
            compression: Compression::from_u8(buf[5])?,
            entry_count: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            uncompressed_size: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            compressed_size: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            crc32: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Index records
// ------------------------------------------------------------------------------------------------

/// One index record: locates a data block by its smallest key.
#[derive(Debug, Clone)]
pub(crate) struct IndexRecord {
    /// Smallest key of the referenced data block.
    pub(crate) key: Vec<u8>,

    /// File offset of the data block (header included).
    pub(crate) offset: u64,

    /// On-disk size of the data block, header included.
    pub(crate) size: u32,

    /// Highest sequence number within the block.
    pub(crate) max_seq: u64,
}

impl IndexRecord {
    pub(crate) fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.max_seq.to_le_bytes());
        buf.extend_from_slice(&self.key);
    }

    /// Decodes one record from the front of `buf`, returning bytes consumed.
    fn decode(buf: &[u8]) -> Result<(Self, usize), SstError> {
        if buf.len() < INDEX_PREFIX_SIZE {
            return Err(SstError::Corruption("short index record".into()));
        }
        let key_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let offset = u64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        let size = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let max_seq = u64::from_le_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]);
        let total = INDEX_PREFIX_SIZE + key_len;
        if buf.len() < total {
            return Err(SstError::Corruption("index record key truncated".into()));
        }
        let key = buf[INDEX_PREFIX_SIZE..total].to_vec();
        Ok((
            Self {
                key,
                offset,
                size,
                max_seq,
            },
            total,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Fixed-size trailer locating every other structure in the file.
#[derive(Debug, Clone)]
pub(crate) struct Footer {
    pub(crate) index_offset: u64,
    pub(crate) index_size: u32,
    pub(crate) bloom_offset: u64,
    pub(crate) bloom_size: u32,
    pub(crate) min_key_offset: u64,
    pub(crate) min_key_len: u32,
    pub(crate) max_key_offset: u64,
    pub(crate) max_key_len: u32,
    pub(crate) min_seq: u64,
    pub(crate) max_seq: u64,
    pub(crate) total_entry_count: u64,
    pub(crate) format_version: u32,
}

impl Footer {
    pub(crate) fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.index_size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.bloom_offset.to_le_bytes());
        buf[20..24].copy_from_slice(&self.bloom_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.min_key_offset.to_le_bytes());
        buf[32..36].copy_from_slice(&self.min_key_len.to_le_bytes());
        buf[36..44].copy_from_slice(&self.max_key_offset.to_le_bytes());
        buf[44..48].copy_from_slice(&self.max_key_len.to_le_bytes());
        buf[48..56].copy_from_slice(&self.min_seq.to_le_bytes());
        buf[56..64].copy_from_slice(&self.max_seq.to_le_bytes());
        buf[64..72].copy_from_slice(&self.total_entry_count.to_le_bytes());
        buf[72..76].copy_from_slice(&self.format_version.to_le_bytes());

        let mut hasher = Crc32::new();
        hasher.update(&buf[0..76]);
        let crc = hasher.finalize();
        buf[76..80].copy_from_slice(&crc.to_le_bytes());
        buf[80..84].copy_from_slice(&TABLE_MAGIC);
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, SstError> {
        if buf.len() < FOOTER_SIZE {
            return Err(SstError::Corruption("short footer".into()));
        }
        if buf[80..84] != TABLE_MAGIC {
            return Err(SstError::Corruption("bad footer magic".into()));
        }

        let stored_crc = u32::from_le_bytes([buf[76], buf[77], buf[78], buf[79]]);
        let mut hasher = Crc32::new();
        hasher.update(&buf[0..76]);
        if hasher.finalize() != stored_crc {
            return Err(SstError::Corruption("footer checksum mismatch".into()));
        }

        let format_version = u32::from_le_bytes([buf[72], buf[73], buf[74], buf[75]]);
        if format_version != FORMAT_VERSION {
            return Err(SstError::UnsupportedFormat(format_version));
        }

        Ok(Self {
            index_offset: u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default()),
            index_size: u32::from_le_bytes(buf[8..12].try_into().unwrap_or_default()),
            bloom_offset: u64::from_le_bytes(buf[12..20].try_into().unwrap_or_default()),
            bloom_size: u32::from_le_bytes(buf[20..24].try_into().unwrap_or_default()),
            min_key_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap_or_default()),
            min_key_len: u32::from_le_bytes(buf[32..36].try_into().unwrap_or_default()),
            max_key_offset: u64::from_le_bytes(buf[36..44].try_into().unwrap_or_default()),
            max_key_len: u32::from_le_bytes(buf[44..48].try_into().unwrap_or_default()),
            min_seq: u64::from_le_bytes(buf[48..56].try_into().unwrap_or_default()),
            max_seq: u64::from_le_bytes(buf[56..64].try_into().unwrap_or_default()),
            total_entry_count: u64::from_le_bytes(buf[64..72].try_into().unwrap_or_default()),
            format_version,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Table — immutable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable SSTable reader.
#[derive(Debug)]
pub struct Table {
    /// Memory-mapped file contents.
    mmap: Mmap,

    /// Identifier used to key the shared block cache.
    file_id: u64,

    /// Optional shared block cache.
    cache: Option<Arc<BlockCache>>,

    footer: Footer,

    /// In-memory index, one record per data block, sorted by smallest key.
    index: Vec<IndexRecord>,

    /// In-memory bloom filter; `None` when the table was built without one.
    bloom: Option<BloomFilter>,

    min_key: Vec<u8>,
    max_key: Vec<u8>,
}

impl Table {
    /// Opens an SSTable, verifies the footer, and loads the index and bloom
    /// blocks into memory.
    ///
    /// # Errors
    ///
    /// - [`SstError::Corruption`] — missing/short footer, bad magic, CRC
    ///   mismatch on footer, index, or bloom block. Recovery treats such a
    ///   file as nonexistent.
    /// - [`SstError::UnsupportedFormat`] — unknown footer version.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe in practice: the
    /// file is never written after `finalize`, the map is read-only, and all
    /// block boundaries are verified before slicing.
    pub fn open(
        path: impl AsRef<Path>,
        file_id: u64,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self, SstError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_SIZE {
            return Err(SstError::Corruption("file too small for footer".into()));
        }
        let footer = Footer::decode(&mmap[mmap.len() - FOOTER_SIZE..])?;

        let (index_payload, index_count) = read_block_at(
            &mmap,
            footer.index_offset,
            footer.index_size,
            BlockType::Index,
        )?;
        let mut index = Vec::new();
        let mut cursor = 0usize;
        while cursor < index_payload.len() {
            let (record, consumed) = IndexRecord::decode(&index_payload[cursor..])?;
            cursor += consumed;
            index.push(record);
        }
        if index.len() as u32 != index_count {
            return Err(SstError::Corruption(format!(
                "index record count mismatch: header says {index_count}, decoded {}",
                index.len()
            )));
        }

        let bloom = if footer.bloom_size > 0 {
            let (payload, _) = read_block_at(
                &mmap,
                footer.bloom_offset,
                footer.bloom_size,
                BlockType::Bloom,
            )?;
            Some(bloom::from_payload(&payload)?)
        } else {
            None
        };

        let min_key = slice_at(&mmap, footer.min_key_offset, footer.min_key_len)?.to_vec();
        let max_key = slice_at(&mmap, footer.max_key_offset, footer.max_key_len)?.to_vec();

        debug!(
            path = %path.display(),
            blocks = index.len(),
            entries = footer.total_entry_count,
            "SSTable opened"
        );

        Ok(Self {
            mmap,
            file_id,
            cache,
            footer,
            index,
            bloom,
            min_key,
            max_key,
        })
    }

    /// Smallest key stored in this table.
    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    /// Largest key stored in this table.
    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    /// Lowest sequence number stored in this table.
    pub fn min_seq(&self) -> u64 {
        self.footer.min_seq
    }

    /// Highest sequence number stored in this table.
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    /// Total number of entries across all data blocks.
    pub fn entry_count(&self) -> u64 {
        self.footer.total_entry_count
    }

    /// On-disk file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Consults the bloom filter. Returns `true` when the key might be
    /// present (or the table carries no filter), `false` only when the key
    /// is definitely absent.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        match &self.bloom {
            Some(filter) => filter.may_contain(key),
            None => true,
        }
    }

    /// Point lookup: returns the entry for `key` stored in this table, or
    /// `None` when the table holds no information about the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, SstError> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        if self.index.is_empty()
            || key < self.min_key.as_slice()
            || key > self.max_key.as_slice()
        {
            return Ok(None);
        }

        let block_idx = match self
            .index
            .binary_search_by(|record| record.key.as_slice().cmp(key))
        {
            Ok(i) => i,
            Err(0) => return Ok(None),
            Err(i) => i - 1,
        };

        let record = &self.index[block_idx];
        let entries = self.read_data_block(record)?;
        match entries.binary_search_by(|entry| entry.key.as_slice().cmp(key)) {
            Ok(i) => Ok(Some(entries[i].clone())),
            Err(_) => Ok(None),
        }
    }

    /// Streaming iterator over every entry in key order, block by block.
    /// Used by the compaction merge.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            table: self,
            block_idx: 0,
            entries: Vec::new(),
            entry_idx: 0,
            failed: false,
        }
    }

    /// Reads and decodes a data block, consulting the shared block cache.
    fn read_data_block(&self, record: &IndexRecord) -> Result<Vec<Entry>, SstError> {
        if let Some(cache) = &self.cache {
            if let Some(payload) = cache.get(self.file_id, record.offset) {
                return decode_entries(&payload, None);
            }
            let (payload, count) =
                read_block_at(&self.mmap, record.offset, record.size, BlockType::Data)?;
            let entries = decode_entries(&payload, Some(count))?;
            cache.insert(self.file_id, record.offset, payload);
            return Ok(entries);
        }

        let (payload, count) =
            read_block_at(&self.mmap, record.offset, record.size, BlockType::Data)?;
        decode_entries(&payload, Some(count))
    }
}

/// Iterator over all entries of a [`Table`] in ascending key order.
pub struct TableIter<'a> {
    table: &'a Table,
    block_idx: usize,
    entries: Vec<Entry>,
    entry_idx: usize,
    failed: bool,
}

impl Iterator for TableIter<'_> {
    type Item = Result<Entry, SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.entry_idx < self.entries.len() {
                let entry = self.entries[self.entry_idx].clone();
                self.entry_idx += 1;
                return Some(Ok(entry));
            }
            if self.block_idx >= self.table.index.len() {
                return None;
            }
            let record = &self.table.index[self.block_idx];
            self.block_idx += 1;
            match self.table.read_data_block(record) {
                Ok(entries) => {
                    self.entries = entries;
                    self.entry_idx = 0;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block decoding helpers
// ------------------------------------------------------------------------------------------------

/// Reads the block at `offset` (header + payload), verifies its header and
/// payload CRC, and returns the payload bytes with the header's record
/// count.
pub(crate) fn read_block_at(
    mmap: &Mmap,
    offset: u64,
    size: u32,
    expected: BlockType,
) -> Result<(Vec<u8>, u32), SstError> {
    let start = usize::try_from(offset)
        .map_err(|_| SstError::Corruption("block offset exceeds addressable range".into()))?;
    let size = size as usize;

    if size < BLOCK_HEADER_SIZE || start.checked_add(size).is_none_or(|end| end > mmap.len()) {
        return Err(SstError::Corruption("block out of range".into()));
    }

    let header = BlockHeader::decode(&mmap[start..start + BLOCK_HEADER_SIZE])?;
    if header.block_type != expected {
        return Err(SstError::Corruption(format!(
            "expected {:?} block, found {:?}",
            expected, header.block_type
        )));
    }
    if header.compression != Compression::None {
        return Err(SstError::Corruption(
            "compressed blocks are not supported by this build".into(),
        ));
    }
    if BLOCK_HEADER_SIZE + header.compressed_size as usize != size
        || header.compressed_size != header.uncompressed_size
    {
        return Err(SstError::Corruption("block size fields disagree".into()));
    }

    let payload = &mmap[start + BLOCK_HEADER_SIZE..start + size];
    let mut hasher = Crc32::new();
    hasher.update(payload);
    if hasher.finalize() != header.crc32 {
        return Err(SstError::Corruption("block checksum mismatch".into()));
    }

    Ok((payload.to_vec(), header.entry_count))
}

/// Decodes the entry records of a data block payload.
///
/// When `expected_count` is given, a record-count mismatch is corruption.
pub(crate) fn decode_entries(
    payload: &[u8],
    expected_count: Option<u32>,
) -> Result<Vec<Entry>, SstError> {
    let mut entries = Vec::new();
    let mut cursor = 0usize;

    while cursor < payload.len() {
        let buf = &payload[cursor..];
        if buf.len() < ENTRY_PREFIX_SIZE {
            return Err(SstError::Corruption("entry record truncated".into()));
        }
        let key_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let value_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let seq = u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        let kind = EntryKind::from_u8(buf[16])
            .map_err(|e| SstError::Corruption(format!("bad entry kind: {e}")))?;

        let total = ENTRY_PREFIX_SIZE + key_len + value_len;
        if buf.len() < total {
            return Err(SstError::Corruption("entry payload truncated".into()));
        }

        let key = buf[ENTRY_PREFIX_SIZE..ENTRY_PREFIX_SIZE + key_len].to_vec();
        let value = match kind {
            EntryKind::Put => {
                Some(buf[ENTRY_PREFIX_SIZE + key_len..ENTRY_PREFIX_SIZE + key_len + value_len].to_vec())
            }
            EntryKind::Delete => None,
        };

        entries.push(Entry {
            key,
            value,
            kind,
            seq,
        });
        cursor += total;
    }

    if let Some(expected) = expected_count
        && entries.len() as u32 != expected
    {
        return Err(SstError::Corruption(format!(
            "block entry count mismatch: header says {expected}, decoded {}",
            entries.len()
        )));
    }

    Ok(entries)
}

/// Bounds-checked slice of the mmap.
fn slice_at(mmap: &Mmap, offset: u64, len: u32) -> Result<&[u8], SstError> {
    let start = usize::try_from(offset)
        .map_err(|_| SstError::Corruption("offset exceeds addressable range".into()))?;
    let len = len as usize;
    if start.checked_add(len).is_none_or(|end| end > mmap.len()) {
        return Err(SstError::Corruption("key slice out of range".into()));
    }
    Ok(&mmap[start..start + len])
}
