#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `term` is the one place that touches the controlling tty. Raw mode is a
//! scoped acquisition: [`enter_raw`] returns a guard whose drop restores the
//! previous mode even on panic. Every write goes through the global
//! [`Terminal`] so concurrent threads can never interleave mid-escape-
//! sequence.
//!
//! # Invariants
//!
//! - Raw mode nests: the tty leaves raw mode only when the last guard drops.
//! - All output primitives serialize on one process-wide lock.
//! - While suspended, primitives are silent; nothing is buffered or replayed.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crossterm::cursor::{Hide, Show};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::QueueableCommand;

/// Failures acquiring or driving the tty.
#[derive(Debug, thiserror::Error)]
pub enum TermError {
    /// Raw mode could not be entered or left.
    #[error("raw mode: {0}")]
    RawMode(#[source] io::Error),
    /// A write to the tty failed.
    #[error("tty write: {0}")]
    Write(#[source] io::Error),
}

static RAW_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Scoped raw-mode acquisition; restores on drop.
#[derive(Debug)]
pub struct RawModeGuard {
    released: bool,
}

impl RawModeGuard {
    /// Leave raw mode early instead of waiting for drop.
    pub fn release(mut self) {
        self.restore();
        self.released = true;
    }

    fn restore(&mut self) {
        if self.released {
            return;
        }
        if RAW_DEPTH.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = terminal::disable_raw_mode();
        }
        self.released = true;
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Enter raw mode on the controlling tty.
///
/// Guards nest; the tty returns to cooked mode when the last one drops.
pub fn enter_raw() -> Result<RawModeGuard, TermError> {
    if RAW_DEPTH.fetch_add(1, Ordering::SeqCst) == 0 {
        if let Err(err) = terminal::enable_raw_mode() {
            RAW_DEPTH.fetch_sub(1, Ordering::SeqCst);
            return Err(TermError::RawMode(err));
        }
    }
    Ok(RawModeGuard { released: false })
}

/// Whether any raw-mode guard is live.
pub fn raw_active() -> bool {
    RAW_DEPTH.load(Ordering::SeqCst) > 0
}

/// Current terminal size as `(cols, rows)`, with an 80x24 fallback.
pub fn size() -> (u16, u16) {
    terminal::size().unwrap_or((80, 24))
}

/// The process-wide tty writer.
///
/// Ownership of the tty crosses function boundaries (bridges, the router,
/// menu rendering), so the instance is global; the internal mutex is what
/// actually guarantees exclusion.
#[derive(Debug)]
pub struct Terminal {
    lock: Mutex<()>,
    silenced: AtomicBool,
}

static TERMINAL: OnceLock<Terminal> = OnceLock::new();

impl Terminal {
    /// The shared instance.
    pub fn global() -> &'static Self {
        TERMINAL.get_or_init(|| Self {
            lock: Mutex::new(()),
            silenced: AtomicBool::new(false),
        })
    }

    /// Print a line. Uses `\r\n` so output is stable in raw mode.
    pub fn println(&self, text: &str) {
        self.with_stdout(|out| {
            for line in text.split('\n') {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\r\n")?;
            }
            Ok(())
        });
    }

    /// Print without a trailing newline.
    pub fn print(&self, text: &str) {
        self.with_stdout(|out| out.write_all(text.as_bytes()));
    }

    /// Print formatted text without a trailing newline.
    pub fn printf(&self, args: std::fmt::Arguments<'_>) {
        self.print(&args.to_string());
    }

    /// Forward raw bytes (bridge output) untouched.
    pub fn write_raw(&self, bytes: &[u8]) {
        self.with_stdout(|out| out.write_all(bytes));
    }

    /// Print a multi-line block, optionally clearing the screen first.
    pub fn print_block(&self, text: &str, clear_first: bool) {
        self.with_stdout(|out| {
            if clear_first {
                out.queue(Clear(ClearType::All))?;
                out.queue(crossterm::cursor::MoveTo(0, 0))?;
            }
            for line in text.split('\n') {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\r\n")?;
            }
            Ok(())
        });
    }

    /// Erase the current line and return the cursor to column zero.
    pub fn clear_line(&self) {
        self.with_stdout(|out| {
            out.queue(Clear(ClearType::CurrentLine))?;
            out.write_all(b"\r")
        });
    }

    /// Clear the whole screen and home the cursor.
    pub fn clear_screen(&self) {
        self.with_stdout(|out| {
            out.queue(Clear(ClearType::All))?;
            out.queue(crossterm::cursor::MoveTo(0, 0))?;
            Ok(())
        });
    }

    /// Hide the cursor.
    pub fn hide_cursor(&self) {
        self.with_stdout(|out| {
            out.queue(Hide)?;
            Ok(())
        });
    }

    /// Show the cursor.
    pub fn show_cursor(&self) {
        self.with_stdout(|out| {
            out.queue(Show)?;
            Ok(())
        });
    }

    /// Silence every primitive until [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.silenced.store(true, Ordering::SeqCst);
    }

    /// Undo [`suspend`](Self::suspend).
    pub fn resume(&self) {
        self.silenced.store(false, Ordering::SeqCst);
    }

    /// Whether output is currently silenced.
    pub fn is_suspended(&self) -> bool {
        self.silenced.load(Ordering::SeqCst)
    }

    fn with_stdout(&self, f: impl FnOnce(&mut io::Stdout) -> io::Result<()>) {
        if self.is_suspended() {
            return;
        }
        let _guard = self.lock.lock().expect("terminal lock poisoned");
        let mut out = io::stdout();
        if f(&mut out).is_ok() {
            let _ = out.flush();
        }
    }
}
