//! Body Snapshot Reader
//!
//! Word layout: the RLP of a [`StoredBlockBody`]. Indexed by block number
//! (8-byte little-endian key) with `base_data_id = block_from`; there is no
//! by-hash path for bodies.

use alloy_rlp::Decodable;
use frostfile_core::{Error, Result, SnapshotPath, StoredBlockBody};
use tracing::warn;

use super::{Snapshot, WordItem};
use crate::index::RecSplitIndex;

/// Typed reader over one `bodies` segment.
pub struct BodySnapshot {
    snapshot: Snapshot,
    idx_body_number: Option<RecSplitIndex>,
}

impl BodySnapshot {
    /// Construct closed.
    pub fn new(path: SnapshotPath) -> Result<Self> {
        Ok(Self {
            snapshot: Snapshot::new(path)?,
            idx_body_number: None,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn reopen_segment(&mut self) -> Result<()> {
        self.snapshot.reopen_segment()
    }

    /// Open the block-number index; precondition: segment open.
    pub fn reopen_index(&mut self) -> Result<()> {
        self.close_index();
        let index_path = self.snapshot.path().index_file();
        self.idx_body_number = self.snapshot.open_index(&index_path)?;
        Ok(())
    }

    pub fn close_index(&mut self) {
        self.idx_body_number = None;
    }

    /// Drop segment and indexes together.
    pub fn close(&mut self) {
        self.snapshot.close_segment();
        self.close_index();
    }

    /// Body of block `block_number`; `None` while the index is absent or
    /// the number falls outside the indexed range.
    pub fn body_by_number(&self, block_number: u64) -> Result<Option<StoredBlockBody>> {
        let Some(index) = &self.idx_body_number else {
            return Ok(None);
        };
        let Some(position) = block_number.checked_sub(index.base_data_id()) else {
            return Ok(None);
        };
        let offset = match index.ordinal_lookup(position) {
            Ok(offset) => offset,
            Err(Error::OutOfRange { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.next_body(offset)
    }

    /// Walk every body in block order as `(block_number, body)`; `walker`
    /// returns `false` to halt. Returns whether the walk completed.
    pub fn for_each_body<F>(&self, mut walker: F) -> Result<bool>
    where
        F: FnMut(u64, &StoredBlockBody) -> bool,
    {
        let block_from = self.snapshot.block_from();
        self.snapshot.for_each_item(|item| {
            let body = match decode_body(item) {
                Ok(body) => body,
                Err(Error::Decode(reason)) => {
                    warn!(offset = item.offset, %reason, "undecodable body word");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            Ok(walker(block_from + item.position, &body))
        })
    }

    /// First transaction id in the segment and the total transaction count:
    /// `(first_tx_id, last.base_txn_id + last.txn_count - first_tx_id)`.
    ///
    /// `EmptySnapshot` when the scan yields no bodies at the range ends.
    pub fn compute_txs_amount(&self) -> Result<(u64, u64)> {
        let block_from = self.snapshot.block_from();
        let block_to = self.snapshot.block_to();

        let mut first_tx_id = None;
        let mut last = None;
        let completed = self.for_each_body(|number, body| {
            if number == block_from {
                first_tx_id = Some(body.base_txn_id);
            }
            if number + 1 == block_to {
                last = Some((body.base_txn_id, body.txn_count));
            }
            true
        })?;
        if !completed {
            return Err(Error::Decode(format!(
                "body scan failed in {}",
                self.snapshot.path()
            )));
        }
        match (first_tx_id, last) {
            (Some(first), Some((last_base, last_count))) => {
                let total = (last_base + last_count).checked_sub(first).ok_or_else(|| {
                    Error::CorruptSnapshot(format!(
                        "txn ids regress across {}",
                        self.snapshot.path()
                    ))
                })?;
                Ok((first, total))
            }
            _ => Err(Error::EmptySnapshot(self.snapshot.path().to_string())),
        }
    }

    /// Decode the single body word at `offset`; decode failures are
    /// absorbed into `None`.
    pub fn next_body(&self, offset: u64) -> Result<Option<StoredBlockBody>> {
        let Some(item) = self.snapshot.next_item(offset) else {
            return Ok(None);
        };
        let body = match decode_body(&item) {
            Ok(body) => body,
            Err(Error::Decode(reason)) => {
                warn!(offset, %reason, "undecodable body word");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if let Some(index) = &self.idx_body_number {
            if body.base_txn_id < index.base_data_id() {
                return Err(Error::CorruptSnapshot(format!(
                    "{} has wrong base data id for base txn id {}",
                    index.path().display(),
                    body.base_txn_id
                )));
            }
        }
        Ok(Some(body))
    }
}

fn decode_body(item: &WordItem) -> Result<StoredBlockBody> {
    let mut rlp = item.value.as_slice();
    let body = StoredBlockBody::decode(&mut rlp)
        .map_err(|e| Error::Decode(format!("body at offset {}: {e}", item.offset)))?;
    if !rlp.is_empty() {
        return Err(Error::Decode(format!(
            "trailing bytes after body at offset {}",
            item.offset
        )));
    }
    Ok(body)
}
