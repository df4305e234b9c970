//! Transaction Snapshot Reader
//!
//! Word layout: one byte (first byte of the transaction hash) followed by
//! the 20-byte sender address and the transaction envelope RLP. The
//! envelope uses the network encoding: a legacy transaction is a plain RLP
//! list, a typed transaction is an RLP string wrapping `type ‖ payload`.
//!
//! Two indexes, each independently absent or stale:
//!
//! - `transactions`: key = transaction hash, `base_data_id` = the
//!   segment's first transaction id, offsets into this segment
//! - `transactions-to-block`: key = transaction hash, the offset table
//!   holds block numbers instead of byte offsets (reverse lookup)

use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::{Decodable2718, Encodable2718};
use alloy_primitives::{Address, B256};
use frostfile_core::{Error, Result, SnapshotPath, SnapshotType};
use tracing::warn;

use super::Snapshot;
use crate::index::RecSplitIndex;

/// Hash byte plus 20-byte sender address precede the envelope RLP in every
/// word.
const TXN_RLP_OFFSET: usize = 1 + 20;

/// One decoded transaction record.
#[derive(Debug, Clone)]
pub struct StoredTransaction {
    /// The signed transaction envelope.
    pub envelope: TxEnvelope,
    /// Sender restored from the stored 20 bytes, when requested.
    pub sender: Option<Address>,
}

/// Typed reader over one `transactions` segment.
pub struct TransactionSnapshot {
    snapshot: Snapshot,
    idx_txn_hash: Option<RecSplitIndex>,
    idx_txn_hash_to_block: Option<RecSplitIndex>,
}

impl TransactionSnapshot {
    /// Construct closed.
    pub fn new(path: SnapshotPath) -> Result<Self> {
        Ok(Self {
            snapshot: Snapshot::new(path)?,
            idx_txn_hash: None,
            idx_txn_hash_to_block: None,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn reopen_segment(&mut self) -> Result<()> {
        self.snapshot.reopen_segment()
    }

    /// Open both hash indexes; precondition: segment open. Either index may
    /// be absent or stale on its own, disabling only its lookups.
    pub fn reopen_index(&mut self) -> Result<()> {
        self.close_index();
        let hash_path = self
            .snapshot
            .path()
            .index_file_for_type(SnapshotType::Transactions);
        self.idx_txn_hash = self.snapshot.open_index(&hash_path)?;

        let to_block_path = self
            .snapshot
            .path()
            .index_file_for_type(SnapshotType::TransactionsToBlock);
        self.idx_txn_hash_to_block = self.snapshot.open_index(&to_block_path)?;
        Ok(())
    }

    pub fn close_index(&mut self) {
        self.idx_txn_hash = None;
        self.idx_txn_hash_to_block = None;
    }

    /// Drop segment and indexes together.
    pub fn close(&mut self) {
        self.snapshot.close_segment();
        self.close_index();
    }

    /// Transaction whose hash is `txn_hash`, sender restored.
    ///
    /// The MPH resolves any 32-byte value to some ordinal, so the decoded
    /// transaction's hash is compared before it is returned.
    pub fn txn_by_hash(&self, txn_hash: &B256) -> Result<Option<StoredTransaction>> {
        let Some(index) = &self.idx_txn_hash else {
            return Ok(None);
        };
        let position = index.lookup(txn_hash.as_slice());
        let offset = index.ordinal_lookup(position)?;
        let Some(txn) = self.next_txn(offset) else {
            return Ok(None);
        };
        if txn.envelope.trie_hash() != *txn_hash {
            return Ok(None);
        }
        Ok(Some(txn))
    }

    /// Transaction with id `txn_id`, sender restored; `None` while the
    /// index is absent or the id falls outside the indexed range. The
    /// ordinal is authoritative, no re-validation happens.
    pub fn txn_by_id(&self, txn_id: u64) -> Result<Option<StoredTransaction>> {
        let Some(index) = &self.idx_txn_hash else {
            return Ok(None);
        };
        let Some(position) = txn_id.checked_sub(index.base_data_id()) else {
            return Ok(None);
        };
        let offset = match index.ordinal_lookup(position) {
            Ok(offset) => offset,
            Err(Error::OutOfRange { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(self.next_txn(offset))
    }

    /// Block number holding the transaction with hash `txn_hash`, served by
    /// the reverse index; the transaction's existence is confirmed through
    /// the main index first.
    pub fn block_num_by_txn_hash(&self, txn_hash: &B256) -> Result<Option<u64>> {
        let Some(index) = &self.idx_txn_hash_to_block else {
            return Ok(None);
        };
        if self.txn_by_hash(txn_hash)?.is_none() {
            return Ok(None);
        }
        let position = index.lookup(txn_hash.as_slice());
        let block_number = index.ordinal_lookup(position)?;
        Ok(Some(block_number))
    }

    /// `count` consecutive transactions starting at `base_txn_id`,
    /// threading the word offsets returned by the decompressor. Senders are
    /// restored only when `read_senders` is set.
    pub fn txn_range(
        &self,
        base_txn_id: u64,
        count: u64,
        read_senders: bool,
    ) -> Result<Vec<StoredTransaction>> {
        let mut txns = Vec::with_capacity(count as usize);
        self.for_each_txn(base_txn_id, count, |i, sender, envelope| {
            let mut rlp = envelope;
            let tx = TxEnvelope::network_decode(&mut rlp)
                .map_err(|e| Error::Decode(format!("transaction envelope {i}: {e}")))?;
            txns.push(StoredTransaction {
                envelope: tx,
                sender: read_senders.then(|| Address::from_slice(sender)),
            });
            Ok(true)
        })?;
        Ok(txns)
    }

    /// Same traversal as [`txn_range`](Self::txn_range) but yielding the
    /// raw payload bytes with the envelope framing stripped.
    pub fn txn_rlp_range(&self, base_txn_id: u64, count: u64) -> Result<Vec<Vec<u8>>> {
        let mut payloads = Vec::with_capacity(count as usize);
        self.for_each_txn(base_txn_id, count, |i, _sender, envelope| {
            let payload = envelope_payload(envelope)
                .map_err(|e| Error::Decode(format!("transaction envelope {i}: {e}")))?;
            payloads.push(payload.to_vec());
            Ok(true)
        })?;
        Ok(payloads)
    }

    /// Decode the single transaction word at `offset`; decode failures are
    /// absorbed into `None`.
    pub fn next_txn(&self, offset: u64) -> Option<StoredTransaction> {
        let item = self.snapshot.next_item(offset)?;
        match decode_txn(&item.value, item.offset) {
            Ok(txn) => Some(txn),
            Err(e) => {
                warn!(offset, error = %e, "undecodable transaction word");
                None
            }
        }
    }

    /// Walk `count` raw transaction words starting at `base_txn_id`,
    /// handing `(index, sender bytes, envelope rlp)` to `walker`.
    fn for_each_txn<F>(&self, base_txn_id: u64, count: u64, mut walker: F) -> Result<()>
    where
        F: FnMut(u64, &[u8], &[u8]) -> Result<bool>,
    {
        let Some(index) = &self.idx_txn_hash else {
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }
        let Some(first_position) = base_txn_id.checked_sub(index.base_data_id()) else {
            return Err(Error::CorruptSnapshot(format!(
                "{} has wrong base data id for base txn id {base_txn_id}",
                index.path().display()
            )));
        };

        let mut offset = index.ordinal_lookup(first_position)?;
        for i in 0..count {
            let item = self.snapshot.next_item(offset).ok_or_else(|| {
                Error::Decode(format!("transaction record not found at offset {offset}"))
            })?;
            if item.value.len() < TXN_RLP_OFFSET {
                return Err(Error::Decode(format!(
                    "transaction word too short at offset {offset}: {} bytes",
                    item.value.len()
                )));
            }
            let go_on = walker(
                i,
                &item.value[1..TXN_RLP_OFFSET],
                &item.value[TXN_RLP_OFFSET..],
            )?;
            if !go_on {
                return Ok(());
            }
            offset = item.next_offset;
        }
        Ok(())
    }
}

/// Decode one word: `hash[0] ‖ sender(20) ‖ envelope`.
fn decode_txn(value: &[u8], offset: u64) -> Result<StoredTransaction> {
    if value.len() < TXN_RLP_OFFSET {
        return Err(Error::Decode(format!(
            "transaction word too short at offset {offset}: {} bytes",
            value.len()
        )));
    }
    let sender = Address::from_slice(&value[1..TXN_RLP_OFFSET]);
    let mut rlp = &value[TXN_RLP_OFFSET..];
    let envelope = TxEnvelope::network_decode(&mut rlp)
        .map_err(|e| Error::Decode(format!("transaction envelope at offset {offset}: {e}")))?;
    if !rlp.is_empty() {
        return Err(Error::Decode(format!(
            "trailing bytes after transaction at offset {offset}"
        )));
    }
    Ok(StoredTransaction {
        envelope,
        sender: Some(sender),
    })
}

/// Strip the envelope framing: a legacy transaction (RLP list) is already
/// the payload; a typed one sheds the outer RLP string header.
fn envelope_payload(envelope: &[u8]) -> Result<&[u8]> {
    let mut peek = envelope;
    let head = alloy_rlp::Header::decode(&mut peek)
        .map_err(|e| Error::Decode(format!("envelope header: {e}")))?;
    if head.list {
        Ok(envelope)
    } else {
        Ok(&envelope[envelope.len() - head.payload_length..])
    }
}
