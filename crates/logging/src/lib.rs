#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` wires up the tracing subscriber and owns the per-slot session
//! log sinks. The controller is an interactive terminal program: diagnostics
//! must never land on the tty, so the subscriber writes to a rolling file
//! under the sync scratch directory instead of stderr. Session sinks record
//! bridge output with ANSI escapes stripped so the logs read cleanly.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the diagnostic filter.
pub const LOG_FILTER_ENV: &str = "TETHER_LOG";

/// Initialize the global subscriber, writing to `<log_dir>/tether.log`.
///
/// Returns the appender guard; hold it for the life of the process so
/// buffered diagnostics flush on exit. Returns `None` when a subscriber is
/// already installed (tests, embedding).
pub fn init(log_dir: &Path) -> io::Result<Option<WorkerGuard>> {
    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::never(log_dir, "tether.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .is_ok();

    Ok(installed.then_some(guard))
}

/// An append-only log for one terminal session.
///
/// Bridges feed their output taps here; bytes are recorded whether or not
/// the session is paused on screen. ANSI escape sequences are stripped so
/// the file stays greppable.
#[derive(Debug)]
pub struct SessionLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl SessionLogSink {
    /// Create (or append to) `<dir>/<name>.log`.
    pub fn create(dir: &Path, name: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Where the log lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a chunk of session output, ANSI-stripped.
    ///
    /// Write failures are swallowed after a diagnostic; a full disk must not
    /// take down the session itself.
    pub fn write(&self, bytes: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(bytes);
        let mut file = self.file.lock().expect("session log poisoned");
        if let Err(err) = file.write_all(&cleaned) {
            tracing::warn!(path = %self.path.display(), %err, "session log write failed");
        }
    }
}
