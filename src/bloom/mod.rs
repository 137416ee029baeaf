//! Bloom Filter Module
//!
//! A space-efficient probabilistic membership structure embedded in every
//! SSTable. A bloom filter can say with certainty that a key is **not** in
//! the set (no false negatives), but may occasionally report that a key
//! **is** present when it isn't. The false-positive rate is configured per
//! ten thousand lookups (e.g. `100` = 1%).
//!
//! ## Variants
//!
//! - [`BloomVariant::Standard`] — one flat bit array, `k` probe positions
//!   derived by double hashing over the whole array.
//! - [`BloomVariant::Blocked`] — the first digest selects a cache-line-sized
//!   (64 B) sub-block; all `k` probes land inside it. Better cache behaviour,
//!   slightly worse false-positive rate.
//! - [`BloomVariant::RegisterBlocked`] — same idea with a register-sized
//!   (8 B) sub-block.
//! - [`BloomVariant::Counting`] — 8-bit saturating counters instead of bits,
//!   supporting [`BloomFilter::remove`]. Not used by immutable SSTables.
//!
//! ## Parameters
//!
//! From expected entries `n` and target false-positive probability `p`:
//!
//! ```text
//! m = ceil(-n·ln(p) / ln(2)²)        bits
//! k = clamp(round((m/n)·ln(2)), 1, 16) hash functions
//! ```
//!
//! ## On-disk layout
//!
//! The filter serializes into the SSTable bloom block payload as:
//!
//! ```text
//! [variant u8][hash_family u8][bit_count u64][hash_count u32][block_size u32][bit array]
//! ```

#[cfg(test)]
mod tests;

pub mod hash;

pub use hash::HashFamily;

use crate::encoding::{self, Decode, Encode, EncodingError};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Seed feeding the first digest of the double-hashing scheme.
const SEED_A: u64 = 0x5155_9EC7_0A8D_27F1;

/// Seed feeding the second digest.
const SEED_B: u64 = 0xB492_B66F_BE98_F273;

/// Upper bound on the number of probe positions.
const MAX_HASH_COUNT: u32 = 16;

/// Sub-block size of the blocked variant, in bytes (one cache line).
const CACHE_LINE_BYTES: u32 = 64;

/// Sub-block size of the register-blocked variant, in bytes.
const REGISTER_BYTES: u32 = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by bloom filter construction and decoding.
#[derive(Debug, Error)]
pub enum BloomError {
    /// Invalid construction parameter (zero entries, out-of-range rate).
    #[error("invalid bloom parameter: {0}")]
    InvalidParam(String),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

// ------------------------------------------------------------------------------------------------
// Variant selector
// ------------------------------------------------------------------------------------------------

/// Identifies the bloom filter layout.
///
/// The discriminant is persisted in the bloom block, so the numeric values
/// are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BloomVariant {
    /// Single flat bit array.
    Standard = 0,
    /// Cache-line-sized sub-blocks (64 B).
    Blocked = 1,
    /// Register-sized sub-blocks (8 B).
    RegisterBlocked = 2,
    /// 8-bit saturating counters; supports deletion.
    Counting = 3,
}

impl BloomVariant {
    /// Decode a persisted variant discriminant.
    pub fn from_u8(value: u8) -> Result<Self, EncodingError> {
        match value {
            0 => Ok(Self::Standard),
            1 => Ok(Self::Blocked),
            2 => Ok(Self::RegisterBlocked),
            3 => Ok(Self::Counting),
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "BloomVariant",
            }),
        }
    }

    /// Sub-block size in bytes, or 0 for unblocked variants.
    fn block_bytes(&self) -> u32 {
        match self {
            Self::Blocked => CACHE_LINE_BYTES,
            Self::RegisterBlocked => REGISTER_BYTES,
            Self::Standard | Self::Counting => 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Parameter calculator
// ------------------------------------------------------------------------------------------------

/// Computes `(bit_count, hash_count)` for `expected_entries` keys and a
/// target false-positive rate expressed per 10,000 (e.g. `100` = 1%).
///
/// `bit_count` is at least 64; `hash_count` is clamped to `1..=16`.
pub fn optimal_params(expected_entries: usize, fpr_per_10k: u32) -> Result<(u64, u32), BloomError> {
    if expected_entries == 0 {
        return Err(BloomError::InvalidParam("expected_entries must be > 0".into()));
    }
    if fpr_per_10k == 0 || fpr_per_10k >= 10_000 {
        return Err(BloomError::InvalidParam(format!(
            "fpr_per_10k must be in 1..10000, got {fpr_per_10k}"
        )));
    }

    let n = expected_entries as f64;
    let p = fpr_per_10k as f64 / 10_000.0;

    let m = (-n * p.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
    let m = m.max(64);

    let k = ((m as f64 / n) * std::f64::consts::LN_2).round() as u32;
    let k = k.clamp(1, MAX_HASH_COUNT);

    Ok((m, k))
}

// ------------------------------------------------------------------------------------------------
// BloomFilter
// ------------------------------------------------------------------------------------------------

/// A bloom filter with a selectable layout variant and hash family.
///
/// Probe positions come from double hashing: two independent digests
/// `h1`, `h2` are combined as `h1 + i·h2` for `i` in `0..k`.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    variant: BloomVariant,
    family: HashFamily,

    /// Number of bits (Standard/Blocked/RegisterBlocked) or counters (Counting).
    bit_count: u64,

    /// Number of probe positions per key.
    hash_count: u32,

    /// Sub-block size in bytes; 0 for unblocked variants.
    block_size: u32,

    /// Bit array, or one byte per counter for the counting variant.
    data: Vec<u8>,
}

impl BloomFilter {
    /// Builds an empty filter sized for `expected_entries` keys at the given
    /// false-positive rate (per 10,000).
    pub fn new(
        expected_entries: usize,
        fpr_per_10k: u32,
        variant: BloomVariant,
        family: HashFamily,
    ) -> Result<Self, BloomError> {
        let (bit_count, hash_count) = optimal_params(expected_entries, fpr_per_10k)?;
        Self::from_params(bit_count, hash_count, variant, family)
    }

    /// Builds an empty filter from a bits-per-key budget instead of a target
    /// false-positive rate (the configuration surface most callers expose).
    pub fn with_bits_per_key(
        expected_entries: usize,
        bits_per_key: u32,
        variant: BloomVariant,
        family: HashFamily,
    ) -> Result<Self, BloomError> {
        if expected_entries == 0 || bits_per_key == 0 {
            return Err(BloomError::InvalidParam(
                "expected_entries and bits_per_key must be > 0".into(),
            ));
        }
        let bit_count = (expected_entries as u64 * bits_per_key as u64).max(64);
        let hash_count = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        let hash_count = hash_count.clamp(1, MAX_HASH_COUNT);
        Self::from_params(bit_count, hash_count, variant, family)
    }

    fn from_params(
        mut bit_count: u64,
        hash_count: u32,
        variant: BloomVariant,
        family: HashFamily,
    ) -> Result<Self, BloomError> {
        let block_size = variant.block_bytes();
        if block_size > 0 {
            // Round up to whole sub-blocks so block selection never truncates.
            let block_bits = block_size as u64 * 8;
            bit_count = bit_count.div_ceil(block_bits) * block_bits;
        }

        let data_len = match variant {
            BloomVariant::Counting => bit_count as usize,
            _ => bit_count.div_ceil(8) as usize,
        };

        Ok(Self {
            variant,
            family,
            bit_count,
            hash_count,
            block_size,
            data: vec![0u8; data_len],
        })
    }

    /// Number of bits (or counters) in the filter.
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Number of probe positions per key.
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// The layout variant of this filter.
    pub fn variant(&self) -> BloomVariant {
        self.variant
    }

    /// The hash family this filter was built with.
    pub fn family(&self) -> HashFamily {
        self.family
    }

    /// Serialized payload size in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + 1 + 8 + 4 + 4 + 4 + self.data.len()
    }

    /// Inserts a key.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = self.digests(key);
        for i in 0..self.hash_count {
            let pos = self.probe_position(h1, h2, i);
            match self.variant {
                BloomVariant::Counting => {
                    let counter = &mut self.data[pos as usize];
                    *counter = counter.saturating_add(1);
                }
                _ => self.set_bit(pos),
            }
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not**.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = self.digests(key);
        for i in 0..self.hash_count {
            let pos = self.probe_position(h1, h2, i);
            let hit = match self.variant {
                BloomVariant::Counting => self.data[pos as usize] > 0,
                _ => self.get_bit(pos),
            };
            if !hit {
                return false;
            }
        }
        true
    }

    /// Removes a previously inserted key.
    ///
    /// Only meaningful for [`BloomVariant::Counting`]; returns `false`
    /// (and changes nothing) for all other variants.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        if self.variant != BloomVariant::Counting {
            return false;
        }
        let (h1, h2) = self.digests(key);
        // Refuse to underflow counters for keys that were never inserted.
        for i in 0..self.hash_count {
            let pos = self.probe_position(h1, h2, i);
            if self.data[pos as usize] == 0 {
                return false;
            }
        }
        for i in 0..self.hash_count {
            let pos = self.probe_position(h1, h2, i);
            let counter = &mut self.data[pos as usize];
            if *counter < u8::MAX {
                *counter -= 1;
            }
        }
        true
    }

    /// The two digests feeding double hashing.
    #[inline]
    fn digests(&self, key: &[u8]) -> (u64, u64) {
        let h1 = self.family.hash(key, SEED_A);
        let h2 = self.family.hash(key, SEED_B) | 1; // odd stride, never degenerate
        (h1, h2)
    }

    /// Maps `(h1, h2, i)` to a bit (or counter) index.
    #[inline]
    fn probe_position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        if self.block_size == 0 {
            return combined % self.bit_count;
        }
        // Blocked variants: h1 picks the sub-block, probes stay inside it.
        let block_bits = self.block_size as u64 * 8;
        let block_count = self.bit_count / block_bits;
        let block = h1 % block_count;
        block * block_bits + combined % block_bits
    }

    #[inline]
    fn set_bit(&mut self, idx: u64) {
        self.data[(idx / 8) as usize] |= 1 << (idx % 8);
    }

    #[inline]
    fn get_bit(&self, idx: u64) -> bool {
        self.data[(idx / 8) as usize] & (1 << (idx % 8)) != 0
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding
// ------------------------------------------------------------------------------------------------

impl Encode for BloomFilter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.variant as u8).encode_to(buf)?;
        (self.family as u8).encode_to(buf)?;
        self.bit_count.encode_to(buf)?;
        self.hash_count.encode_to(buf)?;
        self.block_size.encode_to(buf)?;
        self.data.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BloomFilter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (variant_raw, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (family_raw, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (bit_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (hash_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (block_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (data, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;

        let variant = BloomVariant::from_u8(variant_raw)?;
        let family = HashFamily::from_u8(family_raw)?;

        if bit_count == 0 || hash_count == 0 || hash_count > MAX_HASH_COUNT {
            return Err(EncodingError::Custom(format!(
                "implausible bloom parameters: bits={bit_count} hashes={hash_count}"
            )));
        }
        let expected_len = match variant {
            BloomVariant::Counting => bit_count as usize,
            _ => bit_count.div_ceil(8) as usize,
        };
        if data.len() != expected_len {
            return Err(EncodingError::Custom(format!(
                "bloom bit array length {} does not match bit_count {bit_count}",
                data.len()
            )));
        }

        Ok((
            Self {
                variant,
                family,
                bit_count,
                hash_count,
                block_size,
                data,
            },
            off,
        ))
    }
}

/// Decode a bloom filter from a serialized block payload.
pub fn from_payload(payload: &[u8]) -> Result<BloomFilter, BloomError> {
    let (filter, _) = encoding::decode_from_slice::<BloomFilter>(payload)?;
    Ok(filter)
}
