//! Segment Decompressor
//!
//! `Decompressor` memory-maps one segment file, parses its fixed header and
//! both Huffman dictionaries once at open, and hands out positional
//! [`WordIterator`]s over the compressed word stream.
//!
//! Word offsets are byte offsets relative to the start of the word stream;
//! every iterator position must sit on a word boundary. Seeking to a
//! non-boundary offset is not detectable up front and surfaces as a
//! [`Error::Decode`] on the next read.
//!
//! The mapping is read-only and dropped on destruction; the OS page cache is
//! the only caching layer.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Buf;
use frostfile_core::{Error, Result};
use memmap2::Mmap;
use tracing::trace;

use super::{BitReader, DecodeTree, MAX_CODE_DEPTH, POSITION_PAYLOAD_LEN};

/// Read-only view over one compressed segment file.
pub struct Decompressor {
    path: PathBuf,
    mmap: Mmap,
    word_count: u64,
    empty_word_count: u64,
    words_start: usize,
    patterns: Vec<Vec<u8>>,
    pattern_tree: DecodeTree,
    positions: Vec<u64>,
    position_tree: DecodeTree,
    mtime: SystemTime,
}

impl Decompressor {
    /// Map the file read-only and parse header and dictionaries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mtime = file.metadata()?.modified()?;
        // Safety: the mapping is read-only and segment files are immutable
        // by contract; no writer exists for the lifetime of the map.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut cur: &[u8] = &mmap[..];
        let word_count = take_u64(&mut cur, "word count")?;
        let empty_word_count = take_u64(&mut cur, "empty word count")?;

        let (patterns, pattern_depths) = parse_pattern_dict(&mut cur)?;
        let pattern_tree = DecodeTree::from_depths(&pattern_depths)?;

        let (positions, position_depths) = parse_position_dict(&mut cur)?;
        let position_tree = DecodeTree::from_depths(&position_depths)?;

        let words_start = mmap.len() - cur.len();
        trace!(
            path = %path.display(),
            word_count,
            empty_word_count,
            patterns = patterns.len(),
            positions = positions.len(),
            words_start,
            "segment opened"
        );

        Ok(Self {
            path,
            mmap,
            word_count,
            empty_word_count,
            words_start,
            patterns,
            pattern_tree,
            positions,
            position_tree,
            mtime,
        })
    }

    /// Total number of words declared by the header.
    pub fn word_count(&self) -> u64 {
        self.word_count
    }

    /// Number of zero-length words declared by the header.
    pub fn empty_word_count(&self) -> u64 {
        self.empty_word_count
    }

    /// Mapped file size in bytes.
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File mtime captured at open; indexes older than this are stale.
    pub fn last_write_time(&self) -> SystemTime {
        self.mtime
    }

    /// Positional iterator at word-stream offset 0.
    pub fn make_iterator(&self) -> WordIterator<'_> {
        WordIterator {
            dec: self,
            offset: 0,
        }
    }

    /// Run `f` with a fresh iterator over the whole word stream.
    ///
    /// `f` returns `Ok(false)` to short-circuit; `read_ahead` returns `f`'s
    /// final result. Open/close cannot race an active scope: they require
    /// `&mut` access while the scope borrows `&self`.
    pub fn read_ahead<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(WordIterator<'_>) -> Result<bool>,
    {
        f(self.make_iterator())
    }

    fn words(&self) -> &[u8] {
        &self.mmap[self.words_start..]
    }
}

/// Positional cursor over a segment's word stream.
///
/// Borrows the decompressor's mapping; yields one decoded word per `next`
/// call together with the byte offset of the following word.
pub struct WordIterator<'d> {
    dec: &'d Decompressor,
    offset: usize,
}

impl WordIterator<'_> {
    /// Seek to an absolute word-stream byte offset.
    ///
    /// The offset must be a word boundary; anything else is undefined and
    /// surfaces as [`Error::Decode`] on `next`.
    pub fn reset(&mut self, offset: u64) {
        self.offset = offset as usize;
    }

    /// Current word-stream byte offset.
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    /// True iff a word remains at the current offset.
    pub fn has_next(&self) -> bool {
        self.offset < self.dec.words().len()
    }

    /// Append the next decoded word to `out` and return the offset of the
    /// following word.
    pub fn next(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        let data = self.dec.words();
        if self.offset >= data.len() {
            return Err(Error::Decode(format!(
                "no word at offset {} in {}",
                self.offset,
                self.dec.path.display()
            )));
        }

        let mut bits = BitReader::new(data, self.offset);
        let len_marker = self.next_position(&mut bits)?;
        if len_marker == 0 {
            return Err(Error::Decode(format!(
                "pattern terminator at word start, offset {}",
                self.offset
            )));
        }
        let word_len = (len_marker - 1) as usize;
        if word_len == 0 {
            // Empty word: just the length marker, realigned.
            let next = bits.align();
            trace!(offset = self.offset, next, "decoded empty word");
            self.offset = next;
            return Ok(next as u64);
        }

        let base = out.len();
        out.resize(base + word_len, 0);

        // First pass: place dictionary patterns, remembering the covered
        // intervals so literals can fill the gaps afterwards.
        let mut placements: Vec<(usize, usize)> = Vec::new();
        let mut cursor = 0usize;
        loop {
            let pos = self.next_position(&mut bits)?;
            if pos == 0 {
                break;
            }
            let at = cursor + (pos - 1) as usize;
            let pattern = self.next_pattern(&mut bits)?;
            let end = at + pattern.len();
            if end > word_len {
                out.truncate(base);
                return Err(Error::Decode(format!(
                    "pattern overflows word of length {word_len} at offset {}",
                    self.offset
                )));
            }
            out[base + at..base + end].copy_from_slice(pattern);
            placements.push((at, pattern.len()));
            cursor = end;
        }

        // Second pass: raw literal bytes fill the uncovered gaps in order.
        let mut literal = bits.align();
        let mut prev_end = 0usize;
        for (at, len) in placements.into_iter().chain(std::iter::once((word_len, 0))) {
            let gap = at - prev_end;
            if gap > 0 {
                let Some(src) = data.get(literal..literal + gap) else {
                    out.truncate(base);
                    return Err(Error::Decode(format!(
                        "literal run past end of segment at offset {}",
                        self.offset
                    )));
                };
                out[base + prev_end..base + at].copy_from_slice(src);
                literal += gap;
            }
            prev_end = at + len;
        }

        trace!(offset = self.offset, word_len, next = literal, "decoded word");
        self.offset = literal;
        Ok(literal as u64)
    }

    fn next_position(&self, bits: &mut BitReader<'_>) -> Result<u64> {
        let symbol = self.dec.position_tree.decode(bits).ok_or_else(|| {
            Error::Decode(format!(
                "truncated or invalid position code near offset {}",
                self.offset
            ))
        })?;
        Ok(self.dec.positions[symbol as usize])
    }

    fn next_pattern(&self, bits: &mut BitReader<'_>) -> Result<&[u8]> {
        let symbol = self.dec.pattern_tree.decode(bits).ok_or_else(|| {
            Error::Decode(format!(
                "truncated or invalid pattern code near offset {}",
                self.offset
            ))
        })?;
        Ok(&self.dec.patterns[symbol as usize])
    }
}

fn take_u64(cur: &mut &[u8], what: &str) -> Result<u64> {
    if cur.len() < 8 {
        return Err(Error::CorruptHeader(format!("truncated {what}")));
    }
    Ok(cur.get_u64_le())
}

fn parse_pattern_dict(cur: &mut &[u8]) -> Result<(Vec<Vec<u8>>, Vec<u64>)> {
    let size = take_u64(cur, "pattern dictionary size")? as usize;
    if cur.len() < size {
        return Err(Error::CorruptHeader("truncated pattern dictionary".to_string()));
    }
    let (mut dict, rest) = cur.split_at(size);
    *cur = rest;

    let mut patterns = Vec::new();
    let mut depths = Vec::new();
    while !dict.is_empty() {
        let depth = take_u64(&mut dict, "pattern entry depth")?;
        let len = take_u64(&mut dict, "pattern entry length")? as usize;
        if dict.len() < len {
            return Err(Error::CorruptHeader("truncated pattern entry".to_string()));
        }
        if depth > MAX_CODE_DEPTH {
            return Err(Error::CorruptHeader(format!(
                "pattern code depth {depth} exceeds {MAX_CODE_DEPTH}"
            )));
        }
        patterns.push(dict[..len].to_vec());
        depths.push(depth);
        dict.advance(len);
    }
    Ok((patterns, depths))
}

fn parse_position_dict(cur: &mut &[u8]) -> Result<(Vec<u64>, Vec<u64>)> {
    let size = take_u64(cur, "position dictionary size")? as usize;
    if cur.len() < size {
        return Err(Error::CorruptHeader("truncated position dictionary".to_string()));
    }
    let (mut dict, rest) = cur.split_at(size);
    *cur = rest;

    let mut positions = Vec::new();
    let mut depths = Vec::new();
    while !dict.is_empty() {
        let depth = take_u64(&mut dict, "position entry depth")?;
        let len = take_u64(&mut dict, "position entry length")?;
        if len != POSITION_PAYLOAD_LEN {
            return Err(Error::CorruptHeader(format!(
                "position entry payload must be {POSITION_PAYLOAD_LEN} bytes, got {len}"
            )));
        }
        positions.push(take_u64(&mut dict, "position entry value")?);
        depths.push(depth);
    }
    Ok((positions, depths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentWriter;
    use tempfile::TempDir;

    fn write_segment(dir: &TempDir, name: &str, words: &[&[u8]]) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = SegmentWriter::create(&path);
        for word in words {
            writer.add_word(word);
        }
        writer.finish().unwrap();
        path
    }

    fn collect_words(dec: &Decompressor) -> Vec<(u64, Vec<u8>)> {
        let mut words = Vec::new();
        let mut it = dec.make_iterator();
        let mut offset = 0u64;
        while it.has_next() {
            let mut buf = Vec::new();
            let next = it.next(&mut buf).unwrap();
            words.push((offset, buf));
            offset = next;
        }
        words
    }

    #[test]
    fn test_open_literal_only_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "w.seg", &[b"alpha", b"", b"bravo-bravo", b"c"]);

        let dec = Decompressor::open(&path).unwrap();
        assert_eq!(dec.word_count(), 4);
        assert_eq!(dec.empty_word_count(), 1);

        let words = collect_words(&dec);
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].1, b"alpha");
        assert_eq!(words[1].1, b"");
        assert_eq!(words[2].1, b"bravo-bravo");
        assert_eq!(words[3].1, b"c");
    }

    #[test]
    fn test_reset_to_word_boundary() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "w.seg", &[b"first", b"second", b"third"]);

        let dec = Decompressor::open(&path).unwrap();
        let words = collect_words(&dec);

        let mut it = dec.make_iterator();
        it.reset(words[1].0);
        let mut buf = Vec::new();
        it.next(&mut buf).unwrap();
        assert_eq!(buf, b"second");
    }

    #[test]
    fn test_patterned_word_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seg");
        let mut writer = SegmentWriter::create(&path);
        let pat = writer.add_pattern(b"ababab".to_vec());
        // "xxababab__ababab" with two placements and literal gaps.
        writer
            .add_word_with_patterns(b"xxababab__ababab", &[(2, pat), (10, pat)])
            .unwrap();
        writer.add_word(b"plain");
        writer.finish().unwrap();

        let dec = Decompressor::open(&path).unwrap();
        let words = collect_words(&dec);
        assert_eq!(words[0].1, b"xxababab__ababab");
        assert_eq!(words[1].1, b"plain");
    }

    #[test]
    fn test_pattern_covering_whole_word() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.seg");
        let mut writer = SegmentWriter::create(&path);
        let pat = writer.add_pattern(b"deadbeef".to_vec());
        writer.add_word_with_patterns(b"deadbeef", &[(0, pat)]).unwrap();
        writer.finish().unwrap();

        let dec = Decompressor::open(&path).unwrap();
        let words = collect_words(&dec);
        assert_eq!(words[0].1, b"deadbeef");
    }

    #[test]
    fn test_empty_segment_has_no_words() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "e.seg", &[]);

        let dec = Decompressor::open(&path).unwrap();
        assert_eq!(dec.word_count(), 0);
        assert!(!dec.make_iterator().has_next());
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.seg");
        std::fs::write(&path, [0u8; 11]).unwrap();
        assert!(matches!(
            Decompressor::open(&path),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_truncated_dictionary_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "d.seg", &[b"word"]);
        let mut bytes = std::fs::read(&path).unwrap();
        // Inflate the declared pattern dictionary size beyond the file.
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Decompressor::open(&path),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_read_ahead_short_circuits() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "r.seg", &[b"one", b"two", b"three"]);
        let dec = Decompressor::open(&path).unwrap();

        let mut seen = 0;
        let completed = dec
            .read_ahead(|mut it| {
                let mut buf = Vec::new();
                while it.has_next() {
                    buf.clear();
                    it.next(&mut buf)?;
                    seen += 1;
                    if seen == 2 {
                        return Ok(false);
                    }
                }
                Ok(true)
            })
            .unwrap();
        assert!(!completed);
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_reset_past_end_has_no_next() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, "w.seg", &[b"word"]);
        let dec = Decompressor::open(&path).unwrap();
        let mut it = dec.make_iterator();
        it.reset(1 << 32);
        assert!(!it.has_next());
        let mut buf = Vec::new();
        assert!(matches!(it.next(&mut buf), Err(Error::Decode(_))));
    }
}
