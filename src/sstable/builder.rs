//! SSTable writer — builds a complete table file from a sorted entry stream.
//!
//! [`TableBuilder`] accepts entries via [`TableBuilder::put`] in strictly
//! ascending key order (the callers — memtable flush and the compaction
//! merge — guarantee this; out-of-order keys are rejected) and emits data
//! blocks as the configured block size fills up. [`TableBuilder::finalize`]
//! writes the index block, the bloom block, and the footer, then fsyncs.
//!
//! The file is written in place under its final name. A crash before
//! `finalize` completes leaves a file without a valid footer, which
//! [`Table::open`](super::Table::open) rejects and recovery deletes — no
//! temp-file rename is needed for atomicity.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use tracing::debug;

use crate::bloom::{BloomFilter, BloomVariant, HashFamily};
use crate::encoding;
use crate::engine::utils::EntryKind;

use super::{
    BLOCK_HEADER_SIZE, BlockHeader, BlockType, Compression, ENTRY_PREFIX_SIZE, Footer,
    FORMAT_VERSION, IndexRecord, SstError,
};

// ------------------------------------------------------------------------------------------------
// Options & output metadata
// ------------------------------------------------------------------------------------------------

/// Knobs controlling table construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Target data block size; a block is closed when adding the next entry
    /// would exceed it.
    pub block_size: usize,

    /// Compression identifier written into block headers. Only
    /// [`Compression::None`] is accepted.
    pub compression: Compression,

    /// When `false`, no bloom block is written (footer records size 0).
    pub enable_bloom_filter: bool,

    /// Bloom sizing: bits allocated per expected key.
    pub bloom_bits_per_key: u32,

    /// Bloom layout variant.
    pub bloom_variant: BloomVariant,

    /// Bloom hash family.
    pub bloom_hash_family: HashFamily,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            compression: Compression::None,
            enable_bloom_filter: true,
            bloom_bits_per_key: 10,
            bloom_variant: BloomVariant::Standard,
            bloom_hash_family: HashFamily::XxHash64,
        }
    }
}

/// Metadata describing a finalized table, consumed by the level manager and
/// the manifest.
#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Path of the finalized file.
    pub path: PathBuf,

    /// Total file size in bytes.
    pub size: u64,

    /// Smallest key.
    pub min_key: Vec<u8>,

    /// Largest key.
    pub max_key: Vec<u8>,

    /// Lowest sequence number.
    pub min_seq: u64,

    /// Highest sequence number.
    pub max_seq: u64,

    /// Total entry count.
    pub entry_count: u64,
}

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Streams sorted entries into a new SSTable file.
pub struct TableBuilder {
    writer: BufWriter<File>,
    path: PathBuf,
    options: BuildOptions,

    /// Bytes written so far; blocks record their own offsets from this.
    file_offset: u64,

    /// Payload buffer of the data block under construction.
    current_block: Vec<u8>,
    block_first_key: Option<Vec<u8>>,
    block_entry_count: u32,
    block_max_seq: u64,

    /// In-payload offset of the key bytes of the latest entry.
    last_key_payload_offset: usize,
    last_key_len: u32,

    index: Vec<IndexRecord>,
    bloom: Option<BloomFilter>,

    last_key: Option<Vec<u8>>,
    entry_count: u64,
    min_seq: u64,
    max_seq: u64,

    /// `(file_offset, len)` of the smallest key's bytes, fixed at the first
    /// block flush.
    min_key_loc: Option<(u64, u32)>,

    /// `(file_offset, len)` of the largest key's bytes, updated at every
    /// block flush.
    max_key_loc: (u64, u32),
}

impl TableBuilder {
    /// Creates a builder writing to `path`.
    ///
    /// `expected_entries` sizes the bloom filter; passing the exact count is
    /// best but an estimate only affects the false-positive rate.
    pub fn new(
        path: impl AsRef<Path>,
        expected_entries: usize,
        options: BuildOptions,
    ) -> Result<Self, SstError> {
        if options.compression != Compression::None {
            return Err(SstError::InvalidParam(
                "compressed blocks are not supported by this build".into(),
            ));
        }
        if options.block_size < ENTRY_PREFIX_SIZE + 1 {
            return Err(SstError::InvalidParam(format!(
                "block_size {} too small",
                options.block_size
            )));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let bloom = if options.enable_bloom_filter {
            Some(BloomFilter::with_bits_per_key(
                expected_entries.max(1),
                options.bloom_bits_per_key,
                options.bloom_variant,
                options.bloom_hash_family,
            )?)
        } else {
            None
        };

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            options,
            file_offset: 0,
            current_block: Vec::new(),
            block_first_key: None,
            block_entry_count: 0,
            block_max_seq: 0,
            last_key_payload_offset: 0,
            last_key_len: 0,
            index: Vec::new(),
            bloom,
            last_key: None,
            entry_count: 0,
            min_seq: u64::MAX,
            max_seq: 0,
            min_key_loc: None,
            max_key_loc: (0, 0),
        })
    }

    /// Appends one entry. Keys must arrive in strictly ascending order.
    pub fn put(
        &mut self,
        key: &[u8],
        value: Option<&[u8]>,
        seq: u64,
        kind: EntryKind,
    ) -> Result<(), SstError> {
        if key.is_empty() {
            return Err(SstError::InvalidParam("key is empty".into()));
        }
        if let Some(last) = &self.last_key
            && key <= last.as_slice()
        {
            return Err(SstError::InvalidParam(
                "keys must be supplied in strictly ascending order".into(),
            ));
        }

        let value_len = value.map_or(0, <[u8]>::len);
        let encoded_len = ENTRY_PREFIX_SIZE + key.len() + value_len;

        // Close the current block if this entry would overflow it.
        if !self.current_block.is_empty()
            && self.current_block.len() + encoded_len > self.options.block_size
        {
            self.flush_data_block()?;
        }

        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.to_vec());
        }
        if let Some(bloom) = &mut self.bloom {
            bloom.insert(key);
        }

        self.last_key_payload_offset = self.current_block.len() + ENTRY_PREFIX_SIZE;
        self.last_key_len = key.len() as u32;

        self.current_block
            .extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.current_block
            .extend_from_slice(&(value_len as u32).to_le_bytes());
        self.current_block.extend_from_slice(&seq.to_le_bytes());
        self.current_block.push(kind as u8);
        self.current_block.extend_from_slice(key);
        if let Some(value) = value {
            self.current_block.extend_from_slice(value);
        }

        self.block_entry_count += 1;
        self.block_max_seq = self.block_max_seq.max(seq);
        self.entry_count += 1;
        self.min_seq = self.min_seq.min(seq);
        self.max_seq = self.max_seq.max(seq);
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Flushes the trailing data block, writes the index, bloom, and footer
    /// blocks, and fsyncs the file. The table is immutable afterwards.
    pub fn finalize(mut self) -> Result<TableMeta, SstError> {
        if self.entry_count == 0 {
            return Err(SstError::InvalidParam(
                "cannot finalize a table with no entries".into(),
            ));
        }
        if !self.current_block.is_empty() {
            self.flush_data_block()?;
        }

        // Index block.
        let mut index_payload = Vec::new();
        for record in &self.index {
            record.encode_to(&mut index_payload);
        }
        let index_count = self.index.len() as u32;
        let (index_offset, index_size) =
            self.write_block(BlockType::Index, index_count, &index_payload)?;

        // Bloom block (omitted when the filter is disabled).
        let (bloom_offset, bloom_size) = match self.bloom.take() {
            Some(bloom) => {
                let payload = encoding::encode_to_vec(&bloom)
                    .map_err(|e| SstError::Internal(e.to_string()))?;
                self.write_block(BlockType::Bloom, 1, &payload)?
            }
            None => (0, 0),
        };

        let (min_key_offset, min_key_len) = self
            .min_key_loc
            .ok_or_else(|| SstError::Internal("no data block was flushed".into()))?;
        let (max_key_offset, max_key_len) = self.max_key_loc;

        let footer = Footer {
            index_offset,
            index_size,
            bloom_offset,
            bloom_size,
            min_key_offset,
            min_key_len,
            max_key_offset,
            max_key_len,
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            total_entry_count: self.entry_count,
            format_version: FORMAT_VERSION,
        };
        let footer_bytes = footer.encode();
        self.writer.write_all(&footer_bytes)?;
        self.file_offset += footer_bytes.len() as u64;

        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| SstError::Internal(format!("buffered writer flush failed: {e}")))?;
        file.sync_all()?;

        // The index is sorted by block-first keys; entry order makes the
        // first block's first key the table minimum.
        let min_key = self
            .index
            .first()
            .map(|r| r.key.clone())
            .unwrap_or_default();
        let max_key = self.last_key.clone().unwrap_or_default();

        debug!(
            path = %self.path.display(),
            entries = self.entry_count,
            blocks = self.index.len(),
            size = self.file_offset,
            "SSTable finalized"
        );

        Ok(TableMeta {
            path: self.path,
            size: self.file_offset,
            min_key,
            max_key,
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            entry_count: self.entry_count,
        })
    }

    /// Absolute path of the file being built.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to disk so far (flushed blocks only). Used by the
    /// compaction merge to roll outputs at the target file size.
    pub fn written_bytes(&self) -> u64 {
        self.file_offset
    }

    /// Number of entries accepted so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Closes the current data block: writes it with header + CRC and
    /// records an index entry for it.
    fn flush_data_block(&mut self) -> Result<(), SstError> {
        let payload = std::mem::take(&mut self.current_block);
        let first_key = self
            .block_first_key
            .take()
            .ok_or_else(|| SstError::Internal("flushing a block with no first key".into()))?;
        let entry_count = self.block_entry_count;
        let max_seq = self.block_max_seq;
        self.block_entry_count = 0;
        self.block_max_seq = 0;

        let (offset, size) = self.write_block(BlockType::Data, entry_count, &payload)?;

        // Key byte locations for the footer: the first entry of the first
        // block is the table minimum; the last entry of the latest block is
        // the running maximum.
        let payload_start = offset + BLOCK_HEADER_SIZE as u64;
        if self.min_key_loc.is_none() {
            self.min_key_loc = Some((payload_start + ENTRY_PREFIX_SIZE as u64, first_key.len() as u32));
        }
        self.max_key_loc = (
            payload_start + self.last_key_payload_offset as u64,
            self.last_key_len,
        );

        self.index.push(IndexRecord {
            key: first_key,
            offset,
            size,
            max_seq,
        });
        Ok(())
    }

    /// Writes `[header][payload]` at the current offset; returns the block's
    /// file offset and on-disk size.
    fn write_block(
        &mut self,
        block_type: BlockType,
        entry_count: u32,
        payload: &[u8],
    ) -> Result<(u64, u32), SstError> {
        let mut hasher = Crc32::new();
        hasher.update(payload);
        let crc32 = hasher.finalize();

        let len = u32::try_from(payload.len())
            .map_err(|_| SstError::InvalidParam("block payload exceeds 4 GiB".into()))?;
        let header = BlockHeader {
            block_type,
            compression: self.options.compression,
            entry_count,
            uncompressed_size: len,
            compressed_size: len,
            crc32,
        };

        let offset = self.file_offset;
        self.writer.write_all(&header.encode())?;
        self.writer.write_all(payload)?;
        let size = (BLOCK_HEADER_SIZE + payload.len()) as u32;
        self.file_offset += size as u64;
        Ok((offset, size))
    }
}
