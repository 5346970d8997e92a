#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `mux` owns the interactive half of the controller: terminal session
//! endpoints ([`Bridge`]) and the numbered-slot [`Multiplexer`] that routes
//! one keyboard among them.
//!
//! A bridge is a capability bundle over one child process: a subshell in a
//! local pty or a shell on an SSH channel with a requested pty. Both
//! variants share one state machine
//! (`Created → Running ↔ Paused → Exited/Closed`), one stdin pump, and one
//! observer set: an input tap (raw forwarded bytes), a throttled shortcut
//! tap (synthetic codes like `alt+3`), and an output tap that sees child
//! output even while the session is paused on screen.
//!
//! The multiplexer maps slots 2..=9 to bridges, keeps at most one focused,
//! and turns shortcut codes into pause/switch/close decisions. Slot 1 is the
//! menu and never owns a session.
//!
//! # Invariants
//!
//! - At most one slot is focused; stdin bytes reach only that bridge.
//! - Exit listeners fire exactly once per bridge, however the end arrives.
//! - Shortcut codes are rate-limited to one per 300 ms window.
//! - The focus command channel has exactly one closer.

mod bridge;
mod multiplexer;
mod shortcut;

pub use bridge::{Bridge, BridgeState, LocalShell, RemoteShell};
pub use multiplexer::{FocusOutcome, Multiplexer, PtySession};
pub use shortcut::{DecodedInput, ShortcutDecoder};

use std::sync::Arc;

/// Observer of raw stdin bytes forwarded to a child.
pub type InputTap = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Observer of synthetic shortcut codes (`"alt+3"`).
pub type ShortcutTap = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer of child output: `(bytes, is_stderr)`. Sees output regardless
/// of pause state.
pub type OutputTap = Arc<dyn Fn(&[u8], bool) + Send + Sync>;

/// At-most-once notification that a bridge's child ended.
pub type ExitListener = Box<dyn FnOnce() + Send>;

/// Menu slot; never holds a session.
pub const MENU_SLOT: u8 = 1;

/// The dedicated bare-shell slot.
pub const SHELL_SLOT: u8 = 2;

/// Highest addressable slot.
pub const MAX_SLOT: u8 = 9;

/// Minimum spacing between delivered shortcut codes.
pub const SHORTCUT_THROTTLE: std::time::Duration = std::time::Duration::from_millis(300);

/// Failures in session plumbing.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The slot already holds a session.
    #[error("slot {0} is already occupied")]
    SlotOccupied(u8),
    /// The slot holds no session.
    #[error("slot {0} is empty")]
    SlotVacant(u8),
    /// Slots outside 2..=9 cannot hold sessions.
    #[error("slot {0} cannot hold a session")]
    ReservedSlot(u8),
    /// Local pty allocation or spawn failure.
    #[error("pty: {0}")]
    Pty(String),
    /// Remote channel failure.
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    /// Raw-mode failure on the controlling tty.
    #[error(transparent)]
    Term(#[from] term::TermError),
    /// Local I/O failure on the bridge plumbing.
    #[error("bridge io: {0}")]
    Io(#[from] std::io::Error),
}
