#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `filters` decides whether a path takes part in synchronization. Two rule
//! sources exist: an *authoritative* list shipped out-of-band by the
//! controller (when present and non-empty it forbids on-disk scanning), and
//! *cascading* `.sync_ignore` files loaded per directory from the root down
//! to the queried path's parent. Manual-transfer endpoints override both:
//! a path equal to an endpoint, or below it, is always synchronized.
//!
//! # Design
//!
//! Rules compile to [`globset`] matchers with gitignore-flavored semantics:
//! `*` does not cross `/`, `**` does, and a bare pattern such as `build`
//! matches both `build` and `**/build`. The last matching rule wins, with
//! `!`-negated rules un-ignoring. Fixed defaults (the sync scratch
//! directory, the controller config file, the ignore file itself, and the
//! collections directory) are ignored before any rule is consulted.
//!
//! # Errors
//!
//! An unreadable `.sync_ignore` contributes zero rules and never fails a
//! query. Individually malformed patterns are skipped with a warning;
//! [`FilterError`] is only returned from APIs that compile caller-supplied
//! rule lists.

mod engine;
mod manual;
mod rule;

pub use engine::IgnoreCache;
pub use manual::ManualTransferList;
pub use rule::{Rule, RuleSet};

/// Scratch directory for caches, logs, and deployed agent state.
pub const SYNC_TEMP_DIR: &str = ".sync_temp";

/// Per-directory ignore rule file name.
pub const IGNORE_FILE: &str = ".sync_ignore";

/// Controller configuration file name at the root of a watched tree.
pub const CONFIG_FILE: &str = "tether.json";

/// Saved menu/session collections directory.
pub const COLLECTIONS_DIR: &str = ".sync_collections";

/// Names that are ignored regardless of any rule file.
pub const DEFAULT_IGNORES: &[&str] = &[SYNC_TEMP_DIR, CONFIG_FILE, IGNORE_FILE, COLLECTIONS_DIR];

/// Rule sources handed to [`IgnoreCache::new`].
#[derive(Debug, Clone, Default)]
pub struct IgnoreConfig {
    /// Authoritative patterns. Non-empty forbids on-disk rule scanning.
    pub ignores: Vec<String>,
    /// Manual-transfer endpoint prefixes.
    pub manual_transfer: Vec<String>,
}

/// Failures compiling caller-supplied rule lists.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A pattern did not compile to a glob.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        /// The offending pattern text.
        pattern: String,
        /// Underlying glob error.
        source: globset::Error,
    },
}
