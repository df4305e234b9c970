//! Elias–Fano Monotone List Codec
//!
//! The index's ordinal→offset table is a non-decreasing sequence of file
//! offsets, which Elias–Fano stores in close to the information-theoretic
//! minimum: each value is split into `low_bits` low bits (packed LSB-first)
//! and a high part written in unary into a bit vector, where the `i`-th
//! value contributes a set bit at position `(value >> low_bits) + i`.
//!
//! Reads are `select` on the upper bit vector; a skip table with one entry
//! per [`SELECT_STEP`] ones keeps the scan short. `low_bits` is
//! `floor(log2(max(1, universe / n)))` and is recomputed from the stored
//! universe, never stored itself.

use bytes::{Buf, BufMut, BytesMut};
use frostfile_core::{Error, Result};

/// One select-table entry per this many set bits.
const SELECT_STEP: u64 = 64;

fn low_bits_for(n: u64, universe: u64) -> u32 {
    if n == 0 {
        return 0;
    }
    let quotient = std::cmp::max(1, universe / n);
    63 - quotient.leading_zeros()
}

/// Encode `values` (non-decreasing, all below `universe`) into `out`.
pub(crate) fn encode(values: &[u64], universe: u64, out: &mut BytesMut) -> Result<()> {
    let n = values.len() as u64;
    let low_bits = low_bits_for(n, universe);
    let low_mask = if low_bits == 0 { 0 } else { (1u64 << low_bits) - 1 };

    let low_len = (n * u64::from(low_bits)).div_ceil(8);
    let mut low = vec![0u8; low_len as usize];
    let mut upper = Vec::<u64>::new();
    let mut prev = 0u64;
    for (i, &value) in values.iter().enumerate() {
        if value >= universe || value < prev {
            return Err(Error::Build(format!(
                "value {value} at {i} breaks the monotone list below universe {universe}"
            )));
        }
        prev = value;

        if low_bits > 0 {
            let bit = i as u64 * u64::from(low_bits);
            let (byte, shift) = ((bit / 8) as usize, (bit % 8) as u32);
            // Up to 63 + 7 significant bits, so assemble in a u128 window.
            let chunk = u128::from(value & low_mask) << shift;
            for (k, b) in chunk.to_le_bytes().iter().enumerate() {
                if let Some(slot) = low.get_mut(byte + k) {
                    *slot |= *b;
                }
            }
        }

        let pos = (value >> low_bits) + i as u64;
        let word = (pos / 64) as usize;
        if upper.len() <= word {
            upper.resize(word + 1, 0);
        }
        upper[word] |= 1u64 << (pos % 64);
    }

    out.put_u64_le(universe);
    out.put_u64_le(low_len);
    out.put_slice(&low);
    out.put_u64_le(upper.len() as u64);
    for word in upper {
        out.put_u64_le(word);
    }
    Ok(())
}

/// Parsed view over an encoded list; resolves values on demand from the
/// backing buffer (the index file's mapping).
#[derive(Debug)]
pub(crate) struct EliasFano {
    n: u64,
    low_bits: u32,
    low_off: usize,
    low_len: usize,
    upper_off: usize,
    upper_words: usize,
    /// Bit position of every `SELECT_STEP`-th set bit in the upper vector.
    select: Vec<u64>,
}

impl EliasFano {
    /// Parse the block at `offset`; returns the view and the end offset.
    pub(crate) fn parse(data: &[u8], offset: usize, n: u64) -> Result<(Self, usize)> {
        let mut cur = data
            .get(offset..)
            .ok_or_else(|| Error::CorruptIndex("offset table out of bounds".to_string()))?;

        let universe = take_u64(&mut cur, "offset table universe")?;
        let low_bits = low_bits_for(n, universe);
        let low_len = take_u64(&mut cur, "offset table low length")? as usize;
        if low_len as u64 != (n * u64::from(low_bits)).div_ceil(8) {
            return Err(Error::CorruptIndex(format!(
                "offset table low length {low_len} inconsistent with {n} keys"
            )));
        }
        if cur.len() < low_len {
            return Err(Error::CorruptIndex("truncated offset table low bits".to_string()));
        }
        cur.advance(low_len);
        let upper_words = take_u64(&mut cur, "offset table upper length")? as usize;
        let upper_bytes = upper_words
            .checked_mul(8)
            .ok_or_else(|| Error::CorruptIndex("offset table upper length overflow".to_string()))?;
        if cur.len() < upper_bytes {
            return Err(Error::CorruptIndex("truncated offset table upper bits".to_string()));
        }

        let low_off = offset + 16;
        let upper_off = low_off + low_len + 8;
        let ef = Self {
            n,
            low_bits,
            low_off,
            low_len,
            upper_off,
            upper_words,
            select: build_select(data, upper_off, upper_words, n)?,
        };
        Ok((ef, upper_off + upper_bytes))
    }

    /// Value at index `i`; `OutOfRange` past the end of the list.
    pub(crate) fn get(&self, data: &[u8], i: u64) -> Result<u64> {
        if i >= self.n {
            return Err(Error::OutOfRange {
                ordinal: i,
                key_count: self.n,
            });
        }
        let pos = self.select_one(data, i)?;
        let upper = pos - i;
        Ok((upper << self.low_bits) | self.low(data, i))
    }

    /// Bit position of the `i`-th set bit in the upper vector.
    fn select_one(&self, data: &[u8], i: u64) -> Result<u64> {
        let start_bit = self.select[(i / SELECT_STEP) as usize];
        let mut skip = i - (i / SELECT_STEP) * SELECT_STEP;
        let mut word_idx = (start_bit / 64) as usize;
        let mut word = self.upper_word(data, word_idx)? & (!0u64 << (start_bit % 64));
        loop {
            let ones = u64::from(word.count_ones());
            if ones > skip {
                let mut w = word;
                for _ in 0..skip {
                    w &= w - 1;
                }
                return Ok(word_idx as u64 * 64 + u64::from(w.trailing_zeros()));
            }
            skip -= ones;
            word_idx += 1;
            word = self.upper_word(data, word_idx)?;
        }
    }

    fn upper_word(&self, data: &[u8], idx: usize) -> Result<u64> {
        if idx >= self.upper_words {
            return Err(Error::CorruptIndex("offset table select ran off the end".to_string()));
        }
        read_u64(data, self.upper_off + idx * 8)
            .ok_or_else(|| Error::CorruptIndex("offset table upper bits out of bounds".to_string()))
    }

    fn low(&self, data: &[u8], i: u64) -> u64 {
        if self.low_bits == 0 {
            return 0;
        }
        let bit = i * u64::from(self.low_bits);
        let (byte, shift) = ((bit / 8) as usize, (bit % 8) as u32);
        let mut window = [0u8; 16];
        let end = std::cmp::min(self.low_len, byte + 16);
        window[..end - byte].copy_from_slice(&data[self.low_off + byte..self.low_off + end]);
        let mask = (1u64 << self.low_bits) - 1;
        ((u128::from_le_bytes(window) >> shift) as u64) & mask
    }
}

/// Scan the upper vector once: verify it holds exactly `n` ones and record
/// the bit position of every `SELECT_STEP`-th one.
fn build_select(data: &[u8], upper_off: usize, upper_words: usize, n: u64) -> Result<Vec<u64>> {
    let mut select = Vec::with_capacity((n / SELECT_STEP + 1) as usize);
    let mut seen = 0u64;
    for idx in 0..upper_words {
        let mut word = read_u64(data, upper_off + idx * 8)
            .ok_or_else(|| Error::CorruptIndex("truncated offset table upper bits".to_string()))?;
        while word != 0 {
            if seen % SELECT_STEP == 0 {
                let bit = idx as u64 * 64 + u64::from(word.trailing_zeros());
                select.push(bit);
            }
            word &= word - 1;
            seen += 1;
        }
    }
    if seen != n {
        return Err(Error::CorruptIndex(format!(
            "offset table holds {seen} entries, expected {n}"
        )));
    }
    Ok(select)
}

fn take_u64(cur: &mut &[u8], what: &str) -> Result<u64> {
    if cur.len() < 8 {
        return Err(Error::CorruptIndex(format!("truncated {what}")));
    }
    Ok(cur.get_u64_le())
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}
