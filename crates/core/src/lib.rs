#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `core` is the controller: it loads the configuration, watches the local
//! tree, mirrors changes over the transport, consumes the remote agent's
//! event stream, and runs the interactive menu that hands the keyboard to
//! numbered terminal sessions.
//!
//! # Design
//!
//! Everything is threads and channels. The watcher debounces filesystem
//! notifications into a bounded queue; a sync thread drains it through the
//! [`sync::SyncCoordinator`]; the [`monitor::AgentMonitor`] keeps the remote
//! watch stream alive with exponential back-off; and the main thread owns
//! the menu, the [`router::InputRouter`], and slot focus hand-offs.

pub mod config;
pub mod controller;
pub mod monitor;
pub mod paths;
pub mod router;
pub mod sync;
pub mod watcher;

pub use config::{Config, OsTarget};
pub use controller::run;

use std::path::PathBuf;

/// Failures surfaced by the controller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Missing or malformed configuration. Fatal at start; a failed reload
    /// reverts to the previous snapshot instead.
    #[error("config: {0}")]
    Config(String),
    /// Embedded store failure.
    #[error(transparent)]
    Store(#[from] store::StoreError),
    /// Remote channel failure.
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    /// Session plumbing failure.
    #[error(transparent)]
    Mux(#[from] mux::MuxError),
    /// Terminal failure.
    #[error(transparent)]
    Term(#[from] term::TermError),
    /// Ignore rule compilation failure.
    #[error(transparent)]
    Filter(#[from] filters::FilterError),
    /// Filesystem notification backend failure.
    #[error("watch: {0}")]
    Notify(#[from] notify::Error),
    /// Local filesystem failure.
    #[error("{path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}
