//! Error Types for Frostfile
//!
//! This module defines all error types that can occur while reading snapshot
//! segments and their indexes.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - `Io`: file open, metadata or mmap failure at the OS level
//!
//! ### Structural Errors (fatal to the snapshot instance)
//! - `CorruptHeader`: malformed segment header or Huffman dictionaries
//! - `CorruptIndex`: malformed index file
//! - `CorruptSnapshot`: a record violated a snapshot invariant
//! - `UnsupportedVersion`: snapshot version outside the known range
//! - `SegmentNotOpen`: index or scan operation before `reopen_segment`
//!
//! ### Record-Level Errors (absorbed by per-record accessors)
//! - `Decode`: RLP or word payload decoding failed for a single record
//!
//! ### Lookup Errors
//! - `OutOfRange`: ordinal beyond the index key count
//! - `EmptySnapshot`: a body scan yielded no records
//!
//! ### Naming Errors
//! - `InvalidName`: filename does not match the canonical snapshot grammar
//!
//! ## Usage
//! All fallible operations return `Result<T>` which is aliased to
//! `Result<T, Error>`, so `?` propagation works throughout the workspace.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot file name: {0}")]
    InvalidName(String),

    #[error("corrupt segment header: {0}")]
    CorruptHeader(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u8),

    #[error("record decode failed: {0}")]
    Decode(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("ordinal {ordinal} out of range for key count {key_count}")]
    OutOfRange { ordinal: u64, key_count: u64 },

    #[error("empty body snapshot: {0}")]
    EmptySnapshot(String),

    #[error("segment not open: call reopen_segment first")]
    SegmentNotOpen,

    #[error("snapshot build failed: {0}")]
    Build(String),
}

pub type Result<T> = std::result::Result<T, Error>;
