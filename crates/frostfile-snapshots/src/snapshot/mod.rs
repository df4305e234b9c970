//! Snapshot Read Path
//!
//! A [`Snapshot`] owns the decompressor for one segment file and carries the
//! block range the file covers. The typed readers ([`HeaderSnapshot`],
//! [`BodySnapshot`], [`TransactionSnapshot`]) compose a `Snapshot` with the
//! minimal-perfect-hash indexes their record type needs and layer the two
//! lookup disciplines on top:
//!
//! - **by hash**: MPH lookup, ordinal→offset, decode, then mandatory
//!   re-validation of the record against the key (the MPH accepts any
//!   input, so a match is never trusted)
//! - **by ordinal**: `ordinal - base_data_id` straight into the offset
//!   table; the ordinal is authoritative, no re-validation
//!
//! ## Lifecycle
//!
//! Readers are constructed closed and move through
//! `Closed → SegmentOpen → IndexesOpen` via `reopen_segment` /
//! `reopen_index`; `close_segment` drops segment and indexes together. An
//! index whose mtime predates its segment's is silently rejected at
//! `reopen_index` and every index-backed lookup returns `None` until a
//! fresh one is opened.
//!
//! Open/close take `&mut self` while every lookup and scan takes `&self`,
//! so a scan can never race a reopen, and an open snapshot is freely
//! shareable across threads.

mod bodies;
mod headers;
mod transactions;

pub use bodies::BodySnapshot;
pub use headers::HeaderSnapshot;
pub use transactions::{StoredTransaction, TransactionSnapshot};

use std::time::SystemTime;

use frostfile_core::{Error, Result, SnapshotPath, SNAPSHOT_V1};
use tracing::{debug, warn};

use crate::index::RecSplitIndex;
use crate::segment::Decompressor;

/// One decoded word and its placement inside the segment.
#[derive(Debug, Default, Clone)]
pub struct WordItem {
    /// Byte offset where this word starts.
    pub offset: u64,
    /// Byte offset of the following word.
    pub next_offset: u64,
    /// Ordinal position of this word within the segment.
    pub position: u64,
    /// The word's decoded bytes.
    pub value: Vec<u8>,
}

/// Base reader for one segment file; typed readers embed it.
pub struct Snapshot {
    path: SnapshotPath,
    block_from: u64,
    block_to: u64,
    decompressor: Option<Decompressor>,
}

impl Snapshot {
    /// Construct closed. Rejects unknown versions and reversed ranges.
    pub fn new(path: SnapshotPath) -> Result<Self> {
        if path.version() != SNAPSHOT_V1 {
            return Err(Error::UnsupportedVersion(path.version()));
        }
        let (block_from, block_to) = (path.block_from(), path.block_to());
        if block_to < block_from {
            return Err(Error::CorruptSnapshot(format!(
                "invalid block range [{block_from}, {block_to}) in {path}"
            )));
        }
        Ok(Self {
            path,
            block_from,
            block_to,
            decompressor: None,
        })
    }

    /// Idempotently (re)open the segment mapping.
    pub fn reopen_segment(&mut self) -> Result<()> {
        self.close_segment();
        let decompressor = Decompressor::open(self.path.path())?;
        debug!(path = %self.path, words = decompressor.word_count(), "segment reopened");
        self.decompressor = Some(decompressor);
        Ok(())
    }

    /// Drop the segment mapping.
    pub fn close_segment(&mut self) {
        self.decompressor = None;
    }

    pub fn is_open(&self) -> bool {
        self.decompressor.is_some()
    }

    pub fn path(&self) -> &SnapshotPath {
        &self.path
    }

    /// First block covered by this snapshot.
    pub fn block_from(&self) -> u64 {
        self.block_from
    }

    /// One past the last block covered by this snapshot.
    pub fn block_to(&self) -> u64 {
        self.block_to
    }

    /// Segment mtime; `SegmentNotOpen` while closed.
    pub fn last_write_time(&self) -> Result<SystemTime> {
        Ok(self.decompressor()?.last_write_time())
    }

    pub(crate) fn decompressor(&self) -> Result<&Decompressor> {
        self.decompressor.as_ref().ok_or(Error::SegmentNotOpen)
    }

    /// Walk every word in offset order under one iterator scope.
    ///
    /// `f` returns `Ok(false)` to short-circuit. Returns whether the scan
    /// reached the end of the segment; a word-level decode failure is
    /// logged and ends the scan with `Ok(false)`.
    pub fn for_each_item<F>(&self, mut f: F) -> Result<bool>
    where
        F: FnMut(&WordItem) -> Result<bool>,
    {
        let decompressor = self.decompressor()?;
        decompressor.read_ahead(|mut it| {
            let mut item = WordItem::default();
            while it.has_next() {
                item.offset = it.offset();
                item.value.clear();
                match it.next(&mut item.value) {
                    Ok(next_offset) => item.next_offset = next_offset,
                    Err(Error::Decode(reason)) => {
                        warn!(path = %self.path, offset = item.offset, %reason, "segment scan abandoned");
                        return Ok(false);
                    }
                    Err(e) => return Err(e),
                }
                if !f(&item)? {
                    return Ok(false);
                }
                item.position += 1;
            }
            Ok(true)
        })
    }

    /// Decode the single word starting at `offset`.
    ///
    /// Returns `None` when no word remains or the word fails to decode;
    /// decode failures are logged, never thrown.
    pub fn next_item(&self, offset: u64) -> Option<WordItem> {
        let decompressor = self.decompressor().ok()?;
        let mut it = decompressor.make_iterator();
        it.reset(offset);
        if !it.has_next() {
            return None;
        }
        let mut item = WordItem {
            offset,
            ..Default::default()
        };
        match it.next(&mut item.value) {
            Ok(next_offset) => {
                item.next_offset = next_offset;
                Some(item)
            }
            Err(e) => {
                warn!(path = %self.path, offset, error = %e, "invalid word offset");
                None
            }
        }
    }

    /// Open the sibling index at `index_path` iff it exists and is not
    /// older than the segment; stale or missing indexes resolve to `None`.
    pub(crate) fn open_index(&self, index_path: &SnapshotPath) -> Result<Option<RecSplitIndex>> {
        let segment_mtime = self.last_write_time()?;
        if !index_path.exists() {
            debug!(path = %index_path, "index file missing");
            return Ok(None);
        }
        let index = RecSplitIndex::open(index_path.path())?;
        if index.last_write_time() < segment_mtime {
            debug!(path = %index_path, "stale index rejected, awaiting rebuild");
            return Ok(None);
        }
        Ok(Some(index))
    }
}
