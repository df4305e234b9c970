//! Header Snapshot Reader
//!
//! Word layout: one byte (first byte of the block hash, a producer-side
//! filter the reader only requires to be present) followed by the RLP of
//! the header. Indexed by the full 32-byte block hash with
//! `base_data_id = block_from`, so `header_by_number` needs no index
//! arithmetic beyond `number - base_data_id`.

use alloy_consensus::Header;
use alloy_primitives::B256;
use alloy_rlp::Decodable;
use frostfile_core::{Error, Result, SnapshotPath};
use tracing::warn;

use super::{Snapshot, WordItem};
use crate::index::RecSplitIndex;

/// Typed reader over one `headers` segment.
pub struct HeaderSnapshot {
    snapshot: Snapshot,
    idx_header_hash: Option<RecSplitIndex>,
}

impl HeaderSnapshot {
    /// Construct closed.
    pub fn new(path: SnapshotPath) -> Result<Self> {
        Ok(Self {
            snapshot: Snapshot::new(path)?,
            idx_header_hash: None,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn reopen_segment(&mut self) -> Result<()> {
        self.snapshot.reopen_segment()
    }

    /// Open the block-hash index; precondition: segment open. A stale or
    /// missing index leaves all indexed lookups returning `None`.
    pub fn reopen_index(&mut self) -> Result<()> {
        self.close_index();
        let index_path = self.snapshot.path().index_file();
        self.idx_header_hash = self.snapshot.open_index(&index_path)?;
        Ok(())
    }

    pub fn close_index(&mut self) {
        self.idx_header_hash = None;
    }

    /// Drop segment and indexes together.
    pub fn close(&mut self) {
        self.snapshot.close_segment();
        self.close_index();
    }

    /// Header whose hash is `block_hash`, or `None` when absent.
    ///
    /// The MPH resolves any 32-byte value to some ordinal, so the decoded
    /// header is re-hashed and compared before it is returned.
    pub fn header_by_hash(&self, block_hash: &B256) -> Result<Option<Header>> {
        let Some(index) = &self.idx_header_hash else {
            return Ok(None);
        };
        let position = index.lookup(block_hash.as_slice());
        let offset = index.ordinal_lookup(position)?;
        let Some(header) = self.next_header(offset)? else {
            return Ok(None);
        };
        if header.hash_slow() != *block_hash {
            return Ok(None);
        }
        Ok(Some(header))
    }

    /// Header of block `block_number`; `None` outside `[block_from,
    /// block_to)` or while the index is absent. The ordinal is
    /// authoritative, no re-validation happens.
    pub fn header_by_number(&self, block_number: u64) -> Result<Option<Header>> {
        let Some(index) = &self.idx_header_hash else {
            return Ok(None);
        };
        if block_number < self.snapshot.block_from() || block_number >= self.snapshot.block_to() {
            return Ok(None);
        }
        let position = block_number - index.base_data_id();
        let offset = match index.ordinal_lookup(position) {
            Ok(offset) => offset,
            Err(Error::OutOfRange { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.next_header(offset)
    }

    /// Walk every header in block order; `walker` returns `false` to halt.
    /// Returns whether the walk reached the end of the segment.
    pub fn for_each_header<F>(&self, mut walker: F) -> Result<bool>
    where
        F: FnMut(&Header) -> bool,
    {
        self.snapshot.for_each_item(|item| {
            let header = match self.decode_header(item) {
                Ok(header) => header,
                Err(Error::Decode(reason)) => {
                    warn!(offset = item.offset, %reason, "undecodable header word");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            Ok(walker(&header))
        })
    }

    /// Decode the single header word at `offset`; decode failures are
    /// absorbed into `None`.
    pub fn next_header(&self, offset: u64) -> Result<Option<Header>> {
        let Some(item) = self.snapshot.next_item(offset) else {
            return Ok(None);
        };
        match self.decode_header(&item) {
            Ok(header) => Ok(Some(header)),
            Err(Error::Decode(reason)) => {
                warn!(offset, %reason, "undecodable header word");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn decode_header(&self, item: &WordItem) -> Result<Header> {
        let Some(rlp) = item.value.get(1..) else {
            return Err(Error::Decode(format!(
                "header word at offset {} misses the hash byte",
                item.offset
            )));
        };
        let mut rlp = rlp;
        let header = Header::decode(&mut rlp)
            .map_err(|e| Error::Decode(format!("header at offset {}: {e}", item.offset)))?;
        if !rlp.is_empty() {
            return Err(Error::Decode(format!(
                "trailing bytes after header at offset {}",
                item.offset
            )));
        }
        if header.number < self.snapshot.block_from() {
            return Err(Error::CorruptSnapshot(format!(
                "header number {} below block_from {} in {}",
                header.number,
                self.snapshot.block_from(),
                self.snapshot.path()
            )));
        }
        Ok(header)
    }
}
