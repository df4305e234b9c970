//! Stored Block Body Record
//!
//! Body segments do not store transactions inline. Each word is the RLP of a
//! compact record pointing into the flat transaction id space shared by the
//! matching transaction segment, plus the ommer headers:
//!
//! ```text
//! rlp([base_txn_id, txn_count, [ommer, ...]])
//! ```
//!
//! `base_txn_id` is the id of the block's first transaction; the block's
//! transactions occupy `[base_txn_id, base_txn_id + txn_count)`.

use alloy_consensus::Header;
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Compact body record stored in body segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StoredBlockBody {
    /// Id of the block's first transaction in the flat txn id space.
    pub base_txn_id: u64,

    /// Number of transactions in the block.
    pub txn_count: u64,

    /// Ommer (uncle) headers, usually empty after the merge.
    pub ommers: Vec<Header>,
}
