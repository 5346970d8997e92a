#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `transport` owns every byte that crosses the SSH boundary. The
//! [`Transport`] type holds one authenticated primary session for one-shot
//! commands and framed file transfers, an optional auxiliary session for
//! long-lived streaming monitors, and dials dedicated connections for
//! interactive remote ptys so a busy shell never contends with an upload.
//!
//! # Design
//!
//! The crate is fully synchronous: blocking libssh2 calls run on the calling
//! thread (or a dedicated reader thread for streams), and results travel
//! over crossbeam channels. libssh2 sessions are not thread-safe, so each
//! session lives behind a mutex and lock holds are kept short: streaming
//! reads use a session read timeout so the lock is released between polls.
//!
//! # Errors
//!
//! All failures surface as [`TransportError`]. Connection, authentication
//! and I/O problems are recoverable by `close()` + `connect()`; the agent
//! monitor layers exponential back-off on top.

mod pty;
mod session;
mod shell;
mod stream;
mod transfer;
mod transport;

pub use pty::{PtyOutput, RemotePtySession};
pub use shell::{posix_join, posix_parent, shell_quote};
pub use stream::StreamHandle;
pub use transport::Transport;

use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for the TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the receiver's initial transfer acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Absolute safety-net deadline for streamed commands.
pub const STREAM_DEADLINE: Duration = Duration::from_secs(50 * 60);

/// Credentials and address for one remote host.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Private key file; preferred when present.
    pub private_key: Option<PathBuf>,
    /// Password; used when no key is configured or key auth fails.
    pub password: Option<String>,
}

impl Endpoint {
    /// `host:port` for dialing and diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Failures on the remote channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// TCP connect failed or timed out.
    #[error("connect {addr}: {source}")]
    Connect {
        /// Address dialed.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// No authentication method succeeded.
    #[error("authentication failed for {user}@{addr}")]
    Auth {
        /// Login user.
        user: String,
        /// Address dialed.
        addr: String,
    },
    /// libssh2-level failure.
    #[error(transparent)]
    Ssh(#[from] ssh2::Error),
    /// Local file I/O during a transfer.
    #[error("{path}: {source}")]
    Io {
        /// Local path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The transfer protocol was violated.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    /// The receiver reported a transfer error.
    #[error("remote rejected transfer: {0}")]
    RemoteRejected(String),
    /// The initial acknowledgement did not arrive in time.
    #[error("no acknowledgement within 10s")]
    AckTimeout,
    /// A remote command exited non-zero.
    #[error("remote command {cmd:?} exited with status {status}")]
    CommandFailed {
        /// The command line.
        cmd: String,
        /// Its exit status.
        status: i32,
    },
    /// Operation needs a connection and none is open.
    #[error("transport is not connected")]
    NotConnected,
    /// The streamed command outlived the safety-net deadline.
    #[error("stream exceeded the 50 minute safety deadline")]
    StreamDeadline,
}
