//! Shared leaf types for the frostfile snapshot store: the workspace error
//! enum, canonical snapshot file naming, and the stored body record.

pub mod body;
pub mod error;
pub mod path;

pub use body::StoredBlockBody;
pub use error::{Error, Result};
pub use path::{SnapshotPath, SnapshotType, FILE_NAME_BLOCK_STEP, SNAPSHOT_V1};
