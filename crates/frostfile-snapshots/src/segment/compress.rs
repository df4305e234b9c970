//! Segment Writer
//!
//! `SegmentWriter` produces segment files in the exact format the
//! [`Decompressor`](super::Decompressor) reads. It exists for fixture
//! construction: the production pipeline that chooses pattern dictionaries
//! is a separate concern, but the test suite needs byte-exact segments, and
//! this writer doubles as the format's conformance vector.
//!
//! Code assignment is uniform-depth canonical Huffman (fixed-width codes).
//! That is a legal canonical instance; a reader must not be able to tell it
//! from an optimally skewed one.

use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use frostfile_core::{Error, Result};

use super::{canonical_codes, BitWriter, POSITION_PAYLOAD_LEN};

/// Builds one segment file word by word.
pub struct SegmentWriter {
    path: PathBuf,
    patterns: Vec<Vec<u8>>,
    words: Vec<Word>,
}

struct Word {
    data: Vec<u8>,
    /// `(output position, pattern id)`, ascending and non-overlapping.
    placements: Vec<(usize, usize)>,
}

impl SegmentWriter {
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            patterns: Vec::new(),
            words: Vec::new(),
        }
    }

    /// Register a dictionary pattern; returns its id for placements.
    pub fn add_pattern(&mut self, pattern: Vec<u8>) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    /// Append a word stored entirely as literals.
    pub fn add_word(&mut self, word: &[u8]) {
        self.words.push(Word {
            data: word.to_vec(),
            placements: Vec::new(),
        });
    }

    /// Append a word with explicit pattern placements; the gaps become
    /// literal runs.
    pub fn add_word_with_patterns(
        &mut self,
        word: &[u8],
        placements: &[(usize, usize)],
    ) -> Result<()> {
        let mut cursor = 0usize;
        for &(at, pattern_id) in placements {
            let pattern = self
                .patterns
                .get(pattern_id)
                .ok_or_else(|| Error::Build(format!("unknown pattern id {pattern_id}")))?;
            if at < cursor {
                return Err(Error::Build(format!(
                    "pattern placement at {at} overlaps or precedes previous end {cursor}"
                )));
            }
            let end = at + pattern.len();
            if end > word.len() || word[at..end] != pattern[..] {
                return Err(Error::Build(format!(
                    "pattern {pattern_id} does not match word bytes at {at}"
                )));
            }
            cursor = end;
        }
        self.words.push(Word {
            data: word.to_vec(),
            placements: placements.to_vec(),
        });
        Ok(())
    }

    /// Assign codes, assemble the file and write it to disk.
    pub fn finish(self) -> Result<()> {
        let word_count = self.words.len() as u64;
        let empty_word_count = self.words.iter().filter(|w| w.data.is_empty()).count() as u64;

        // Every position value the stream will need, in a stable order.
        let mut position_values: Vec<u64> = Vec::new();
        let mut note = |v: u64| {
            if !position_values.contains(&v) {
                position_values.push(v);
            }
        };
        for word in &self.words {
            note(word.data.len() as u64 + 1);
            if !word.data.is_empty() {
                let mut cursor = 0usize;
                for &(at, pattern_id) in &word.placements {
                    note((at - cursor) as u64 + 1);
                    cursor = at + self.patterns[pattern_id].len();
                }
                note(0);
            }
        }
        position_values.sort_unstable();

        let position_codes = uniform_codes(position_values.len())?;
        let pattern_codes = uniform_codes(self.patterns.len())?;
        let position_symbol = |v: u64| -> Result<(u64, u64)> {
            let i = position_values
                .binary_search(&v)
                .map_err(|_| Error::Build(format!("position value {v} missing from table")))?;
            Ok(position_codes[i])
        };

        let mut stream = BitWriter::default();
        for word in &self.words {
            let (code, depth) = position_symbol(word.data.len() as u64 + 1)?;
            stream.write_bits(code, depth);
            if word.data.is_empty() {
                stream.align();
                continue;
            }
            let mut cursor = 0usize;
            for &(at, pattern_id) in &word.placements {
                let (code, depth) = position_symbol((at - cursor) as u64 + 1)?;
                stream.write_bits(code, depth);
                let (code, depth) = pattern_codes[pattern_id];
                stream.write_bits(code, depth);
                cursor = at + self.patterns[pattern_id].len();
            }
            let (code, depth) = position_symbol(0)?;
            stream.write_bits(code, depth);
            stream.align();
            // Literal bytes for the uncovered gaps, in ascending order.
            let mut prev_end = 0usize;
            for &(at, pattern_id) in &word.placements {
                stream.push_bytes(&word.data[prev_end..at]);
                prev_end = at + self.patterns[pattern_id].len();
            }
            stream.push_bytes(&word.data[prev_end..]);
        }

        let mut pattern_dict = BytesMut::new();
        for (pattern, &(_, depth)) in self.patterns.iter().zip(&pattern_codes) {
            pattern_dict.put_u64_le(depth);
            pattern_dict.put_u64_le(pattern.len() as u64);
            pattern_dict.put_slice(pattern);
        }
        let mut position_dict = BytesMut::new();
        for (&value, &(_, depth)) in position_values.iter().zip(&position_codes) {
            position_dict.put_u64_le(depth);
            position_dict.put_u64_le(POSITION_PAYLOAD_LEN);
            position_dict.put_u64_le(value);
        }

        let mut out = BytesMut::new();
        out.put_u64_le(word_count);
        out.put_u64_le(empty_word_count);
        out.put_u64_le(pattern_dict.len() as u64);
        out.put_slice(&pattern_dict);
        out.put_u64_le(position_dict.len() as u64);
        out.put_slice(&position_dict);
        out.put_slice(&stream.into_bytes());

        std::fs::write(&self.path, &out)?;
        Ok(())
    }
}

/// Fixed-width canonical codes for `n` symbols.
fn uniform_codes(n: usize) -> Result<Vec<(u64, u64)>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let width = if n <= 1 {
        1
    } else {
        u64::from(64 - (n as u64 - 1).leading_zeros())
    };
    let depths = vec![width; n];
    canonical_codes(&depths)
}
