//! Segment File Format
//!
//! This module implements the binary format of snapshot segment files: a
//! concatenation of variably-compressed "words", each word holding one
//! logical record's bytes.
//!
//! ## Segment File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Fixed header                                                │
//! │ - word count (8 bytes, LE)                                  │
//! │ - empty word count (8 bytes, LE)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Pattern dictionary                                          │
//! │ - byte size (8 bytes, LE)                                   │
//! │ - entries: { depth (8), length (8), pattern bytes }         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Position dictionary                                         │
//! │ - byte size (8 bytes, LE)                                   │
//! │ - entries: { depth (8), length = 8, position value (8 LE) } │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Word stream to EOF                                          │
//! │ - each word starts at a byte boundary                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Word Encoding
//!
//! One bit cursor reads an interleaved Huffman code stream per word:
//!
//! 1. a position symbol holding the uncompressed word length + 1; a decoded
//!    value of 1 marks the empty word (realign, done)
//! 2. repeated `{position, pattern}` pairs; position `p` places the next
//!    pattern at `cursor + p - 1`, position `0` terminates the list
//! 3. realign to the next byte boundary; raw literal bytes fill the output
//!    gaps left between patterns, in ascending order
//!
//! The next word begins at the byte after the last literal.
//!
//! ## Huffman Coding
//!
//! Dictionary entries are listed in non-decreasing depth order and assigned
//! canonical codes in listing order, emitted MSB-first. A single-entry table
//! uses one zero bit per symbol. Depths above [`MAX_CODE_DEPTH`] are
//! rejected at open.

mod compress;
mod decompress;

pub use compress::SegmentWriter;
pub use decompress::{Decompressor, WordIterator};

use frostfile_core::{Error, Result};

/// Deepest admissible Huffman code.
pub const MAX_CODE_DEPTH: u64 = 31;

/// Every position dictionary entry payload is one little-endian u64.
pub(crate) const POSITION_PAYLOAD_LEN: u64 = 8;

/// Assign canonical Huffman codes to a depth list.
///
/// Depths must be non-decreasing and in `1..=MAX_CODE_DEPTH`; the code set
/// must not be over-subscribed. Returns one `(code, depth)` pair per entry.
pub(crate) fn canonical_codes(depths: &[u64]) -> Result<Vec<(u64, u64)>> {
    let mut codes = Vec::with_capacity(depths.len());
    let mut code: u64 = 0;
    let mut prev_depth: u64 = 0;
    for (i, &depth) in depths.iter().enumerate() {
        if depth == 0 || depth > MAX_CODE_DEPTH {
            return Err(Error::CorruptHeader(format!(
                "dictionary code depth {depth} outside 1..={MAX_CODE_DEPTH}"
            )));
        }
        if depth < prev_depth {
            return Err(Error::CorruptHeader(
                "dictionary entries not sorted by code depth".to_string(),
            ));
        }
        if i > 0 {
            code += 1;
            code <<= depth - prev_depth;
        }
        if code >> depth != 0 {
            return Err(Error::CorruptHeader(
                "over-subscribed Huffman code set".to_string(),
            ));
        }
        codes.push((code, depth));
        prev_depth = depth;
    }
    Ok(codes)
}

/// Binary decode tree for one canonical Huffman table.
///
/// Nodes live in a flat arena; `u32::MAX` marks an absent child or symbol.
#[derive(Debug, Default)]
pub(crate) struct DecodeTree {
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    children: [u32; 2],
    symbol: u32,
}

const NONE: u32 = u32::MAX;

impl TreeNode {
    fn empty() -> Self {
        Self {
            children: [NONE, NONE],
            symbol: NONE,
        }
    }
}

impl DecodeTree {
    /// Build the tree for a dictionary given its (sorted) depth list.
    pub(crate) fn from_depths(depths: &[u64]) -> Result<Self> {
        let mut tree = Self::default();
        if depths.is_empty() {
            return Ok(tree);
        }
        tree.nodes.push(TreeNode::empty());
        for (symbol, (code, depth)) in canonical_codes(depths)?.into_iter().enumerate() {
            tree.insert(code, depth, symbol as u32)?;
        }
        Ok(tree)
    }

    fn insert(&mut self, code: u64, depth: u64, symbol: u32) -> Result<()> {
        let mut node = 0usize;
        for level in (0..depth).rev() {
            if self.nodes[node].symbol != NONE {
                return Err(Error::CorruptHeader(
                    "Huffman code descends through a shorter code".to_string(),
                ));
            }
            let bit = ((code >> level) & 1) as usize;
            let next = self.nodes[node].children[bit];
            node = if next == NONE {
                let id = self.nodes.len() as u32;
                self.nodes.push(TreeNode::empty());
                self.nodes[node].children[bit] = id;
                id as usize
            } else {
                next as usize
            };
        }
        let leaf = &mut self.nodes[node];
        if leaf.symbol != NONE || leaf.children != [NONE, NONE] {
            return Err(Error::CorruptHeader(
                "duplicate Huffman code assignment".to_string(),
            ));
        }
        leaf.symbol = symbol;
        Ok(())
    }

    /// Decode one symbol; `None` on an invalid code path or bit exhaustion.
    pub(crate) fn decode(&self, bits: &mut BitReader<'_>) -> Option<u32> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut node = 0usize;
        loop {
            let symbol = self.nodes[node].symbol;
            if symbol != NONE {
                return Some(symbol);
            }
            let bit = bits.read_bit()? as usize;
            let next = self.nodes[node].children[bit];
            if next == NONE {
                return None;
            }
            node = next as usize;
        }
    }
}

/// MSB-first bit cursor over a byte slice.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit: u8,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8], byte_offset: usize) -> Self {
        Self {
            data,
            pos: byte_offset,
            bit: 0,
        }
    }

    pub(crate) fn read_bit(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        let bit = (byte >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
        Some(bit)
    }

    /// Advance to the next byte boundary and return the byte position.
    pub(crate) fn align(&mut self) -> usize {
        if self.bit > 0 {
            self.bit = 0;
            self.pos += 1;
        }
        self.pos
    }
}

/// MSB-first bit accumulator used by the segment writer.
#[derive(Default)]
pub(crate) struct BitWriter {
    out: Vec<u8>,
    cur: u8,
    used: u8,
}

impl BitWriter {
    pub(crate) fn write_bits(&mut self, code: u64, width: u64) {
        for level in (0..width).rev() {
            let bit = ((code >> level) & 1) as u8;
            self.cur = (self.cur << 1) | bit;
            self.used += 1;
            if self.used == 8 {
                self.out.push(self.cur);
                self.cur = 0;
                self.used = 0;
            }
        }
    }

    /// Pad the partial byte with zero bits.
    pub(crate) fn align(&mut self) {
        if self.used > 0 {
            self.out.push(self.cur << (8 - self.used));
            self.cur = 0;
            self.used = 0;
        }
    }

    /// Append raw bytes; the cursor must be byte-aligned.
    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.used, 0, "unaligned literal write");
        self.out.extend_from_slice(bytes);
    }

    pub(crate) fn into_bytes(mut self) -> Vec<u8> {
        self.align();
        self.out
    }
}
