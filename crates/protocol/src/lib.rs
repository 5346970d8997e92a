#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `protocol` holds every format that crosses the controller/agent boundary:
//!
//! - the agent's stdout line grammar ([`event`]): `EVENT` and `HASH` lines
//!   plus liveness markers, with encode/decode that round-trips,
//! - a partial-line [`stream::LineAssembler`] for chunked channel reads,
//! - the framed file-transfer header and ACK bytes ([`framing`]),
//! - the remote agent configuration document ([`remote_config`]).
//!
//! Everything here is pure data plumbing: no I/O, no state beyond the line
//! assembler's carry buffer.

pub mod event;
pub mod framing;
pub mod remote_config;
pub mod stream;

pub use event::{AgentEvent, EventKind};
pub use framing::{FrameHeader, ACK_ERROR, ACK_FATAL, ACK_OK};
pub use remote_config::RemoteConfig;
pub use stream::LineAssembler;

/// Failures interpreting wire data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A stdout line that matches no production of the grammar.
    #[error("unrecognized agent line: {0:?}")]
    UnknownLine(String),
    /// A structured line that is missing fields.
    #[error("malformed {kind} line: {line:?}")]
    MalformedLine {
        /// Which production failed (`EVENT`, `HASH`, ...).
        kind: &'static str,
        /// The offending line.
        line: String,
    },
    /// A transfer frame header that could not be parsed.
    #[error("malformed transfer header: {0:?}")]
    MalformedHeader(String),
    /// An ACK byte outside the defined set.
    #[error("unexpected acknowledgement byte {0:#04x}")]
    UnexpectedAck(u8),
}
