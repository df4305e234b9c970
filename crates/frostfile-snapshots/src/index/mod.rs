//! Minimal-Perfect-Hash Index
//!
//! A `RecSplitIndex` maps the segment's key set (block hashes, block
//! numbers or transaction hashes) onto the dense ordinal space
//! `[0, key_count)` and pairs it with a monotone ordinal→offset table.
//!
//! ## Index File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Fixed header                                                │
//! │ - base data id (8 bytes, LE)                                │
//! │ - key count (8 bytes, LE)                                   │
//! │ - bucket count (2 bytes, LE)                                │
//! │ - leaf size (1 byte)                                        │
//! │ - bucket seed (8 bytes, LE)                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Per bucket: size (4 bytes, LE) + preorder seed tree         │
//! │ - size ≤ leaf size: one leaf seed (8 bytes)                 │
//! │ - else: split seed (8 bytes), left subtree, right subtree   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Slot→ordinal table                                          │
//! │ - bytes per record (1 byte), key_count records (LE)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Elias–Fano ordinal→offset table                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lookup
//!
//! A key hashes into a bucket, descends that bucket's seed tree (split left
//! iff `hash(seed, key) % size < ⌈size/2⌉`) to a leaf, and lands on a slot.
//! The slot→ordinal table then yields the key's insertion ordinal, the
//! value shared with the by-ordinal access path.
//!
//! The hash is perfect but not injective over foreign keys: any 256-bit
//! input resolves to *some* ordinal. Callers MUST re-validate the record
//! they fetch against the key; `lookup` itself never errors.

mod builder;
pub(crate) mod elias_fano;

pub use builder::IndexBuilder;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use alloy_primitives::keccak256;
use bytes::Buf;
use frostfile_core::{Error, Result};
use memmap2::Mmap;
use tracing::trace;

use elias_fano::EliasFano;

/// Largest key subset resolved by a single leaf seed.
pub const MAX_LEAF_SIZE: u8 = 16;

/// Read-only view over one `.idx` file.
pub struct RecSplitIndex {
    path: PathBuf,
    mmap: Mmap,
    base_data_id: u64,
    key_count: u64,
    bucket_count: u16,
    leaf_size: u8,
    bucket_seed: u64,
    buckets: Vec<Bucket>,
    seeds: Vec<u64>,
    records_off: usize,
    bytes_per_record: usize,
    offsets: EliasFano,
    mtime: SystemTime,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    size: u32,
    /// Ordinal space consumed by preceding buckets.
    cumulative: u64,
    /// First seed of this bucket's preorder tree.
    seeds_start: usize,
}

impl RecSplitIndex {
    /// Map the file read-only and parse all sections.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mtime = file.metadata()?.modified()?;
        // Safety: read-only mapping of an immutable index file.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut cur: &[u8] = &mmap[..];
        let base_data_id = take_u64(&mut cur, "base data id")?;
        let key_count = take_u64(&mut cur, "key count")?;
        if cur.len() < 3 {
            return Err(Error::CorruptIndex("truncated bucket parameters".to_string()));
        }
        let bucket_count = cur.get_u16_le();
        let leaf_size = cur.get_u8();
        if bucket_count == 0 {
            return Err(Error::CorruptIndex("bucket count must be positive".to_string()));
        }
        if leaf_size == 0 || leaf_size > MAX_LEAF_SIZE {
            return Err(Error::CorruptIndex(format!(
                "leaf size {leaf_size} outside 1..={MAX_LEAF_SIZE}"
            )));
        }
        let bucket_seed = take_u64(&mut cur, "bucket seed")?;

        let mut buckets = Vec::with_capacity(bucket_count as usize);
        let mut seeds = Vec::new();
        let mut cumulative = 0u64;
        for _ in 0..bucket_count {
            if cur.len() < 4 {
                return Err(Error::CorruptIndex("truncated bucket size".to_string()));
            }
            let size = cur.get_u32_le();
            let seeds_start = seeds.len();
            let tree_len = seed_tree_len(u64::from(size), u64::from(leaf_size));
            for _ in 0..tree_len {
                seeds.push(take_u64(&mut cur, "bucket seed tree")?);
            }
            buckets.push(Bucket {
                size,
                cumulative,
                seeds_start,
            });
            cumulative += u64::from(size);
        }
        if cumulative != key_count {
            return Err(Error::CorruptIndex(format!(
                "bucket sizes sum to {cumulative}, expected {key_count} keys"
            )));
        }

        if cur.is_empty() {
            return Err(Error::CorruptIndex("truncated record table width".to_string()));
        }
        let bytes_per_record = cur.get_u8() as usize;
        if !(1..=8).contains(&bytes_per_record) {
            return Err(Error::CorruptIndex(format!(
                "record width {bytes_per_record} outside 1..=8"
            )));
        }
        let records_len = key_count as usize * bytes_per_record;
        if cur.len() < records_len {
            return Err(Error::CorruptIndex("truncated slot record table".to_string()));
        }
        let records_off = mmap.len() - cur.len();
        cur.advance(records_len);

        let (offsets, end) = EliasFano::parse(&mmap, mmap.len() - cur.len(), key_count)?;
        if end != mmap.len() {
            return Err(Error::CorruptIndex(format!(
                "{} trailing bytes after offset table",
                mmap.len() - end
            )));
        }

        trace!(
            path = %path.display(),
            key_count,
            bucket_count,
            leaf_size,
            "index opened"
        );

        Ok(Self {
            path,
            mmap,
            base_data_id,
            key_count,
            bucket_count,
            leaf_size,
            bucket_seed,
            buckets,
            seeds,
            records_off,
            bytes_per_record,
            offsets,
            mtime,
        })
    }

    /// Ordinal for `key`, in `[0, key_count)`.
    ///
    /// Arbitrary but deterministic for keys outside the construction set;
    /// the caller MUST re-validate the fetched record.
    pub fn lookup(&self, key: &[u8]) -> u64 {
        if self.key_count == 0 {
            return 0;
        }
        let bucket_no = seeded_hash(self.bucket_seed, key) % u64::from(self.bucket_count);
        let bucket = self.buckets[bucket_no as usize];
        if bucket.size == 0 {
            return 0;
        }

        let leaf = u64::from(self.leaf_size);
        let mut size = u64::from(bucket.size);
        let mut local = 0u64;
        let mut at = bucket.seeds_start;
        while size > leaf {
            let left = size.div_ceil(2);
            if seeded_hash(self.seeds[at], key) % size < left {
                at += 1;
                size = left;
            } else {
                at += 1 + seed_tree_len(left, leaf);
                local += left;
                size -= left;
            }
        }
        let slot = bucket.cumulative + local + seeded_hash(self.seeds[at], key) % size;
        self.record(slot)
    }

    /// Byte offset of the word holding ordinal `ordinal`.
    pub fn ordinal_lookup(&self, ordinal: u64) -> Result<u64> {
        self.offsets.get(&self.mmap, ordinal)
    }

    /// Ordinal value corresponding to ordinal 0 (first block number or
    /// first transaction id).
    pub fn base_data_id(&self) -> u64 {
        self.base_data_id
    }

    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File mtime captured at open.
    pub fn last_write_time(&self) -> SystemTime {
        self.mtime
    }

    fn record(&self, slot: u64) -> u64 {
        let start = self.records_off + slot as usize * self.bytes_per_record;
        let mut buf = [0u8; 8];
        buf[..self.bytes_per_record]
            .copy_from_slice(&self.mmap[start..start + self.bytes_per_record]);
        u64::from_le_bytes(buf)
    }
}

/// Number of seeds a preorder tree over `n` keys serialises to.
pub(crate) fn seed_tree_len(n: u64, leaf: u64) -> usize {
    if n == 0 {
        0
    } else if n <= leaf {
        1
    } else {
        let left = n.div_ceil(2);
        1 + seed_tree_len(left, leaf) + seed_tree_len(n - left, leaf)
    }
}

/// Keyed 64-bit hash: first eight bytes of `keccak256(seed_le ‖ key)`.
pub(crate) fn seeded_hash(seed: u64, key: &[u8]) -> u64 {
    let mut preimage = Vec::with_capacity(8 + key.len());
    preimage.extend_from_slice(&seed.to_le_bytes());
    preimage.extend_from_slice(key);
    let digest = keccak256(&preimage);
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word)
}

fn take_u64(cur: &mut &[u8], what: &str) -> Result<u64> {
    if cur.len() < 8 {
        return Err(Error::CorruptIndex(format!("truncated {what}")));
    }
    Ok(cur.get_u64_le())
}
