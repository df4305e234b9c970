//! Snapshot File Naming
//!
//! Canonical file name grammar for snapshot artifacts:
//!
//! ```text
//! v{N}-{FROM:06}-{TO:06}-{type}.{ext}
//!
//! v1-000500-000600-headers.seg
//! v1-000500-000600-headers.idx
//! v1-000500-000600-transactions-to-block.idx
//! ```
//!
//! `FROM` and `TO` are block numbers divided by 1,000 (the native segment
//! granularity), zero-padded to six digits. `type` is one of `headers`,
//! `bodies`, `transactions`, `transactions-to-block`. `ext` is `seg` for
//! segment files and `idx` for their minimal-perfect-hash indexes.
//!
//! Any deviation from the grammar is an [`Error::InvalidName`].

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// First and only supported snapshot format version.
pub const SNAPSHOT_V1: u8 = 1;

/// Block numbers in file names are divided by this step.
pub const FILE_NAME_BLOCK_STEP: u64 = 1_000;

const SEGMENT_EXT: &str = "seg";
const INDEX_EXT: &str = "idx";

/// The kind of chain data a snapshot file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotType {
    Headers,
    Bodies,
    Transactions,
    /// Auxiliary index mapping transaction hashes to block numbers.
    TransactionsToBlock,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Headers => "headers",
            SnapshotType::Bodies => "bodies",
            SnapshotType::Transactions => "transactions",
            SnapshotType::TransactionsToBlock => "transactions-to-block",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "headers" => Some(SnapshotType::Headers),
            "bodies" => Some(SnapshotType::Bodies),
            "transactions" => Some(SnapshotType::Transactions),
            "transactions-to-block" => Some(SnapshotType::TransactionsToBlock),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed snapshot file path.
///
/// Carries the full filesystem path plus the fields encoded in the canonical
/// file name. The block range is half-open: `[block_from, block_to)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPath {
    path: PathBuf,
    version: u8,
    block_from: u64,
    block_to: u64,
    snapshot_type: SnapshotType,
}

impl SnapshotPath {
    /// Parse a path whose file name must match the canonical grammar.
    pub fn parse(path: impl Into<PathBuf>) -> Result<Self> {
        let path: PathBuf = path.into();
        let invalid = || Error::InvalidName(path.display().to_string());

        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let (stem, ext) = file_name.rsplit_once('.').ok_or_else(invalid)?;
        if ext != SEGMENT_EXT && ext != INDEX_EXT {
            return Err(invalid());
        }

        // v{N}-{FROM:06}-{TO:06}-{type}; the type itself may contain dashes.
        let mut parts = stem.splitn(4, '-');
        let version_tag = parts.next().ok_or_else(invalid)?;
        let from_tag = parts.next().ok_or_else(invalid)?;
        let to_tag = parts.next().ok_or_else(invalid)?;
        let type_tag = parts.next().ok_or_else(invalid)?;

        let version: u8 = version_tag
            .strip_prefix('v')
            .and_then(|v| v.parse().ok())
            .ok_or_else(invalid)?;
        let block_from = parse_block_field(from_tag).ok_or_else(invalid)?;
        let block_to = parse_block_field(to_tag).ok_or_else(invalid)?;
        if block_to < block_from {
            return Err(invalid());
        }
        let snapshot_type = SnapshotType::from_str(type_tag).ok_or_else(invalid)?;

        Ok(Self {
            path,
            version,
            block_from,
            block_to,
            snapshot_type,
        })
    }

    /// Build the canonical `.seg` path for the given range and type.
    pub fn from(
        dir: impl AsRef<Path>,
        version: u8,
        block_from: u64,
        block_to: u64,
        snapshot_type: SnapshotType,
    ) -> Self {
        Self::build(dir.as_ref(), version, block_from, block_to, snapshot_type, SEGMENT_EXT)
    }

    /// The `.idx` path for this snapshot's own type.
    pub fn index_file(&self) -> SnapshotPath {
        self.index_file_for_type(self.snapshot_type)
    }

    /// The sibling `.idx` path for an auxiliary index type.
    pub fn index_file_for_type(&self, snapshot_type: SnapshotType) -> SnapshotPath {
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        Self::build(dir, self.version, self.block_from, self.block_to, snapshot_type, INDEX_EXT)
    }

    fn build(
        dir: &Path,
        version: u8,
        block_from: u64,
        block_to: u64,
        snapshot_type: SnapshotType,
        ext: &str,
    ) -> Self {
        let file_name = format!(
            "v{}-{:06}-{:06}-{}.{}",
            version,
            block_from / FILE_NAME_BLOCK_STEP,
            block_to / FILE_NAME_BLOCK_STEP,
            snapshot_type.as_str(),
            ext
        );
        Self {
            path: dir.join(file_name),
            version,
            block_from,
            block_to,
            snapshot_type,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// First block covered by this snapshot.
    pub fn block_from(&self) -> u64 {
        self.block_from
    }

    /// One past the last block covered by this snapshot.
    pub fn block_to(&self) -> u64 {
        self.block_to
    }

    pub fn snapshot_type(&self) -> SnapshotType {
        self.snapshot_type
    }
}

impl fmt::Display for SnapshotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Block fields are exactly six digits, scaled by the file name step.
fn parse_block_field(tag: &str) -> Option<u64> {
    if tag.len() != 6 || !tag.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let scaled: u64 = tag.parse().ok()?;
    scaled.checked_mul(FILE_NAME_BLOCK_STEP)
}
