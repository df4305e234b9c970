//! Frostfile Snapshot Read Path
//!
//! This crate implements the read side of the immutable block snapshot
//! store: a content-addressed archive of historical chain data (headers,
//! bodies, transactions) organised into fixed block ranges.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Typed readers                │  header_by_hash / txn_by_id / ...
//! │ HeaderSnapshot, BodySnapshot,│  decode records, enforce invariants,
//! │ TransactionSnapshot          │  re-validate MPH hits
//! └───────┬──────────────┬───────┘
//!         │              │
//! ┌───────▼──────┐ ┌─────▼────────┐
//! │ RecSplitIndex│ │ Decompressor │
//! │ key → ordinal│ │ offset → word│
//! │ ordinal →    │ │ (mmap +      │
//! │ offset (EF)  │ │  Huffman)    │
//! └──────────────┘ └──────────────┘
//! ```
//!
//! A lookup by hash consults the index for an ordinal, resolves the ordinal
//! to a byte offset, seeks the decompressor there, decodes one word into a
//! record and re-validates the record against the key; minimal-perfect-
//! hash lookups admit false positives by design, so a mismatch simply means
//! "not found".
//!
//! Everything is read-only: segments and indexes are memory-mapped, never
//! written, and the OS page cache is the only caching layer.

pub mod index;
pub mod segment;
pub mod snapshot;

pub use frostfile_core::{
    Error, Result, SnapshotPath, SnapshotType, StoredBlockBody, FILE_NAME_BLOCK_STEP, SNAPSHOT_V1,
};
pub use index::{IndexBuilder, RecSplitIndex};
pub use segment::{Decompressor, SegmentWriter, WordIterator};
pub use snapshot::{
    BodySnapshot, HeaderSnapshot, Snapshot, StoredTransaction, TransactionSnapshot, WordItem,
};
