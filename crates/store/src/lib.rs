#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `store` owns the two embedded relational stores in the workspace: the
//! controller-side [`FileCache`] (per-file sync metadata keyed by relative
//! path, backing `should_sync` decisions) and the agent-side [`IndexStore`]
//! (an atomic, overwritable snapshot of a walked tree). Both ride on
//! rusqlite with a bundled SQLite.
//!
//! # Invariants
//!
//! - A cache row's `path` is unique and non-empty; the hash is recomputed
//!   only when size or modification time drift from the cached values.
//! - Snapshot replacement is a single transaction: readers observe either
//!   the old snapshot or the new one, never a mix.
//! - Store errors are returned to callers; nothing here retries or blocks.

mod cache;
mod index;

pub use cache::FileCache;
pub use index::{IndexDiff, IndexStore};

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Failures from the embedded stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite-level failure.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// Filesystem access around the store (stat, tmp-file, rename).
    #[error("{path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Content digest failure while answering a should-sync query.
    #[error(transparent)]
    Hash(#[from] checksums::HashError),
    /// JSON export serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Controller-side metadata for one synchronized file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Path relative to the watch root, forward slashes.
    pub path: String,
    /// Content digest at last successful sync.
    pub hash: String,
    /// Size in bytes at last successful sync.
    pub size: u64,
    /// File modification time, nanoseconds since the Unix epoch.
    pub mod_time: i64,
    /// When the last successful sync completed.
    pub last_sync: i64,
    /// Row creation time.
    pub created_at: i64,
    /// Last row update time.
    pub updated_at: i64,
}

/// Agent-side record for one walked entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Absolute path on the remote host.
    pub path: String,
    /// Path relative to the indexed root.
    pub rel: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch.
    pub mod_time_nanos: i64,
    /// Content digest; empty for directories.
    pub hash: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Wall-clock now as nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
