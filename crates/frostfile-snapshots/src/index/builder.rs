//! Index Builder
//!
//! Constructs `.idx` files in the exact format
//! [`RecSplitIndex`](super::RecSplitIndex) reads.
//! Construction is brute force: bucket a key set, then search seeds so that
//! every split sends exactly `⌈size/2⌉` keys left and every leaf permutes
//! its keys collision-free. Fixture-scale key sets keep the search cheap;
//! the production index pipeline is a separate concern.

use std::collections::HashSet;
use std::path::Path;

use bytes::{BufMut, BytesMut};
use frostfile_core::{Error, Result};

use super::{elias_fano, seeded_hash, MAX_LEAF_SIZE};

/// Default bucketing salt.
const BUCKET_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Give up a seed search after this many attempts; with honest inputs and
/// leaf sizes within [`MAX_LEAF_SIZE`] this is unreachable.
const SEED_LIMIT: u64 = 10_000_000;

/// Builds one index file over a declared key set.
pub struct IndexBuilder {
    base_data_id: u64,
    leaf_size: u8,
    bucket_count: Option<u16>,
    keys: Vec<(Vec<u8>, u64)>,
}

impl IndexBuilder {
    pub fn new(base_data_id: u64, leaf_size: u8) -> Self {
        Self {
            base_data_id,
            leaf_size,
            bucket_count: None,
            keys: Vec::new(),
        }
    }

    /// Override the computed bucket count.
    pub fn with_bucket_count(mut self, bucket_count: u16) -> Self {
        self.bucket_count = Some(bucket_count);
        self
    }

    /// Declare a key and the value its ordinal resolves to (a word offset,
    /// or a block number for the transactions-to-block index). Values must
    /// arrive non-decreasing in insertion order.
    pub fn add_key(&mut self, key: &[u8], value: u64) {
        self.keys.push((key.to_vec(), value));
    }

    /// Search seeds, assemble the file and write it to disk.
    pub fn build(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.leaf_size == 0 || self.leaf_size > MAX_LEAF_SIZE {
            return Err(Error::Build(format!(
                "leaf size {} outside 1..={MAX_LEAF_SIZE}",
                self.leaf_size
            )));
        }
        let n = self.keys.len();
        let mut distinct = HashSet::with_capacity(n);
        for (key, _) in &self.keys {
            if !distinct.insert(key.as_slice()) {
                return Err(Error::Build("duplicate key in construction set".to_string()));
            }
        }

        let bucket_count = self
            .bucket_count
            .unwrap_or_else(|| ((n as u64 / 16) + 1).min(u64::from(u16::MAX)) as u16);

        // Bucket assignment, preserving insertion order inside each bucket.
        let mut bucket_keys: Vec<Vec<usize>> = vec![Vec::new(); bucket_count as usize];
        for (i, (key, _)) in self.keys.iter().enumerate() {
            let b = seeded_hash(BUCKET_SEED, key) % u64::from(bucket_count);
            bucket_keys[b as usize].push(i);
        }

        // Seed search per bucket; slot_of[i] is key i's final MPH slot.
        let mut seeds = BytesMut::new();
        let mut bucket_section = BytesMut::new();
        let mut slot_of = vec![0usize; n];
        let mut cumulative = 0usize;
        for members in &bucket_keys {
            bucket_section.put_u32_le(members.len() as u32);
            self.assign(members, cumulative, &mut seeds, &mut slot_of)?;
            bucket_section.put_slice(&seeds);
            seeds.clear();
            cumulative += members.len();
        }

        let bytes_per_record = if n <= 1 {
            1
        } else {
            (64 - (n as u64 - 1).leading_zeros()).div_ceil(8) as usize
        };
        let mut records = vec![0u8; n * bytes_per_record];
        for (ordinal, &slot) in slot_of.iter().enumerate() {
            let start = slot * bytes_per_record;
            records[start..start + bytes_per_record]
                .copy_from_slice(&(ordinal as u64).to_le_bytes()[..bytes_per_record]);
        }

        let values: Vec<u64> = self.keys.iter().map(|(_, v)| *v).collect();
        let universe = values.last().map_or(1, |last| last + 1);

        let mut out = BytesMut::new();
        out.put_u64_le(self.base_data_id);
        out.put_u64_le(n as u64);
        out.put_u16_le(bucket_count);
        out.put_u8(self.leaf_size);
        out.put_u64_le(BUCKET_SEED);
        out.put_slice(&bucket_section);
        out.put_u8(bytes_per_record as u8);
        out.put_slice(&records);
        elias_fano::encode(&values, universe, &mut out)?;

        std::fs::write(path.as_ref(), &out)?;
        Ok(())
    }

    /// Recursively pick seeds for one key subset, appending them in
    /// preorder and recording each key's slot relative to `base_slot`.
    fn assign(
        &self,
        members: &[usize],
        base_slot: usize,
        seeds: &mut BytesMut,
        slot_of: &mut [usize],
    ) -> Result<()> {
        let size = members.len() as u64;
        if size == 0 {
            return Ok(());
        }
        if size <= u64::from(self.leaf_size) {
            'seed: for seed in 1..=SEED_LIMIT {
                let mut taken = vec![false; members.len()];
                let mut positions = Vec::with_capacity(members.len());
                for &i in members {
                    let p = (seeded_hash(seed, &self.keys[i].0) % size) as usize;
                    if taken[p] {
                        continue 'seed;
                    }
                    taken[p] = true;
                    positions.push(p);
                }
                seeds.put_u64_le(seed);
                for (&i, &p) in members.iter().zip(&positions) {
                    slot_of[i] = base_slot + p;
                }
                return Ok(());
            }
            return Err(Error::Build("leaf seed search exhausted".to_string()));
        }

        let left_size = size.div_ceil(2);
        for seed in 1..=SEED_LIMIT {
            let (mut left, mut right) = (Vec::new(), Vec::new());
            for &i in members {
                if seeded_hash(seed, &self.keys[i].0) % size < left_size {
                    left.push(i);
                } else {
                    right.push(i);
                }
            }
            if left.len() as u64 == left_size {
                seeds.put_u64_le(seed);
                self.assign(&left, base_slot, seeds, slot_of)?;
                self.assign(&right, base_slot + left.len(), seeds, slot_of)?;
                return Ok(());
            }
        }
        Err(Error::Build("split seed search exhausted".to_string()))
    }
}
