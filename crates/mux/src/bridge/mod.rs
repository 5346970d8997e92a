//! Session endpoints: the shared state machine and the two shell variants.

mod local;
mod remote;

pub use local::LocalShell;
pub use remote::RemoteShell;

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, warn};

use crate::shortcut::{DecodedInput, ShortcutDecoder};
use crate::{ExitListener, InputTap, MuxError, OutputTap, ShortcutTap, SHORTCUT_THROTTLE};

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Constructed; no child yet.
    Created,
    /// Child running, IO forwarded.
    Running,
    /// Child running, forwarding suspended.
    Paused,
    /// Child gone or torn down. Terminal.
    Closed,
}

#[derive(Default)]
struct TapSet {
    input: Option<InputTap>,
    shortcut: Option<ShortcutTap>,
    output: Option<OutputTap>,
}

/// State shared by both bridge variants and their pump threads.
pub(crate) struct BridgeCore {
    state: Mutex<BridgeState>,
    input_disabled: AtomicBool,
    output_disabled: AtomicBool,
    closed: AtomicBool,
    taps: RwLock<TapSet>,
    on_exit: Mutex<Option<ExitListener>>,
    last_shortcut: Mutex<Option<Instant>>,
}

impl BridgeCore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BridgeState::Created),
            input_disabled: AtomicBool::new(false),
            output_disabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            taps: RwLock::new(TapSet::default()),
            on_exit: Mutex::new(None),
            last_shortcut: Mutex::new(None),
        })
    }

    pub(crate) fn state(&self) -> BridgeState {
        *self.state.lock().expect("bridge state poisoned")
    }

    pub(crate) fn set_state(&self, state: BridgeState) {
        *self.state.lock().expect("bridge state poisoned") = state;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns false when the bridge was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn input_disabled(&self) -> bool {
        self.input_disabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_input_disabled(&self, disabled: bool) {
        self.input_disabled.store(disabled, Ordering::SeqCst);
    }

    pub(crate) fn set_output_disabled(&self, disabled: bool) {
        self.output_disabled.store(disabled, Ordering::SeqCst);
    }

    pub(crate) fn set_input_tap(&self, tap: InputTap) {
        self.taps.write().expect("taps poisoned").input = Some(tap);
    }

    pub(crate) fn set_shortcut_tap(&self, tap: ShortcutTap) {
        self.taps.write().expect("taps poisoned").shortcut = Some(tap);
    }

    pub(crate) fn set_output_tap(&self, tap: OutputTap) {
        self.taps.write().expect("taps poisoned").output = Some(tap);
    }

    pub(crate) fn set_on_exit(&self, listener: ExitListener) {
        *self.on_exit.lock().expect("exit listener poisoned") = Some(listener);
    }

    /// Fire the exit listener; at most once whatever races here.
    pub(crate) fn fire_exit(&self) {
        let listener = self.on_exit.lock().expect("exit listener poisoned").take();
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Deliver child output to the tap and, unless disabled, the tty.
    pub(crate) fn emit_output(&self, bytes: &[u8], is_stderr: bool) {
        if let Some(tap) = &self.taps.read().expect("taps poisoned").output {
            tap(bytes, is_stderr);
        }
        if !self.output_disabled.load(Ordering::SeqCst) && !self.is_closed() {
            term::Terminal::global().write_raw(bytes);
        }
    }

    pub(crate) fn emit_input(&self, bytes: &[u8]) {
        if let Some(tap) = &self.taps.read().expect("taps poisoned").input {
            tap(bytes);
        }
    }

    /// Deliver a shortcut code unless inside the throttle window.
    ///
    /// The throttle suppresses key-repeat storms: two codes inside one
    /// window collapse into the first.
    pub(crate) fn emit_shortcut(&self, code: &str) {
        {
            let mut last = self.last_shortcut.lock().expect("throttle poisoned");
            let now = Instant::now();
            if let Some(fired) = *last {
                if now.duration_since(fired) < SHORTCUT_THROTTLE {
                    debug!(code, "shortcut suppressed by throttle");
                    return;
                }
            }
            *last = Some(now);
        }
        if let Some(tap) = &self.taps.read().expect("taps poisoned").shortcut {
            tap(code);
        }
    }
}

/// Forward the controller's stdin into a child until disabled or closed.
///
/// The pump swallows the read that wakes it after being disabled (that
/// keystroke is the "press any key" one) and recovers from panics so the
/// bridge's exit path still runs.
pub(crate) fn spawn_stdin_pump<W>(core: Arc<BridgeCore>, write: W) -> std::io::Result<JoinHandle<()>>
where
    W: Fn(&[u8]) -> std::io::Result<()> + Send + 'static,
{
    std::thread::Builder::new()
        .name("bridge-stdin".into())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| pump_stdin(&core, &write)));
            if outcome.is_err() {
                warn!("stdin pump panicked; input routing stopped");
            }
        })
}

fn pump_stdin<W>(core: &Arc<BridgeCore>, write: &W)
where
    W: Fn(&[u8]) -> std::io::Result<()>,
{
    let mut decoder = ShortcutDecoder::new();
    let mut buf = [0u8; 1024];
    loop {
        if core.is_closed() || core.input_disabled() {
            break;
        }
        let n = match std::io::stdin().read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        // A disable that raced the blocking read swallows this chunk.
        if core.is_closed() || core.input_disabled() {
            break;
        }

        core.emit_input(&buf[..n]);

        if let Some(DecodedInput::Bytes(stale)) = decoder.flush_stale() {
            if write(&stale).is_err() {
                break;
            }
        }
        for item in decoder.feed(&buf[..n]) {
            match item {
                DecodedInput::Shortcut(code) => core.emit_shortcut(&code),
                DecodedInput::Bytes(bytes) => {
                    if write(&bytes).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// A polymorphic session endpoint.
///
/// The variant picks the IO plumbing; every state transition and observer
/// behavior is shared.
pub enum Bridge {
    /// A subshell in a local pseudo-terminal.
    Local(LocalShell),
    /// A shell (or command) on an SSH channel with a requested pty.
    Remote(RemoteShell),
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::Local(_) => "Local",
            Self::Remote(_) => "Remote",
        };
        f.debug_struct("Bridge")
            .field("variant", &variant)
            .field("state", &self.state())
            .finish()
    }
}

impl Bridge {
    fn core(&self) -> &Arc<BridgeCore> {
        match self {
            Self::Local(shell) => shell.core(),
            Self::Remote(shell) => shell.core(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.core().state()
    }

    /// Start the child and run IO pumps; returns when the child exits.
    pub fn start(&self) -> Result<(), MuxError> {
        match self {
            Self::Local(shell) => shell.start(),
            Self::Remote(shell) => shell.start(),
        }
    }

    /// Suspend forwarding; the child keeps running and the output tap keeps
    /// observing.
    pub fn pause(&self) {
        match self {
            Self::Local(shell) => shell.pause(),
            Self::Remote(shell) => shell.pause(),
        }
    }

    /// Resume forwarding after a pause.
    pub fn resume(&self) -> Result<(), MuxError> {
        match self {
            Self::Local(shell) => shell.resume(),
            Self::Remote(shell) => shell.resume(),
        }
    }

    /// Terminate the child and release the pty. Fires the exit listener at
    /// most once. Idempotent.
    pub fn close(&self) {
        match self {
            Self::Local(shell) => shell.close(),
            Self::Remote(shell) => shell.close(),
        }
    }

    /// Write bytes directly to the child's stdin.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<(), MuxError> {
        match self {
            Self::Local(shell) => shell.write_stdin(bytes),
            Self::Remote(shell) => shell.write_stdin(bytes),
        }
    }

    /// Install the at-most-once exit listener.
    pub fn set_on_exit(&self, listener: ExitListener) {
        self.core().set_on_exit(listener);
    }

    /// Install the raw-stdin observer.
    pub fn set_input_tap(&self, tap: InputTap) {
        self.core().set_input_tap(tap);
    }

    /// Install the shortcut-code observer.
    pub fn set_shortcut_tap(&self, tap: ShortcutTap) {
        self.core().set_shortcut_tap(tap);
    }

    /// Install the output observer (sees output even while paused).
    pub fn set_output_tap(&self, tap: OutputTap) {
        self.core().set_output_tap(tap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_listener_fires_exactly_once() {
        let core = BridgeCore::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        core.set_on_exit(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        core.fire_exit();
        core.fire_exit();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exit_listener_fires_once_under_concurrent_callers() {
        let core = BridgeCore::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        core.set_on_exit(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let core = Arc::clone(&core);
                std::thread::spawn(move || core.fire_exit())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shortcut_throttle_collapses_bursts() {
        let core = BridgeCore::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        core.set_shortcut_tap(Arc::new(move |_code| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        core.emit_shortcut("alt+3");
        core.emit_shortcut("alt+3");
        core.emit_shortcut("alt+4");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn output_tap_sees_bytes_even_when_display_is_disabled() {
        let core = BridgeCore::new();
        let captured = Arc::new(Mutex::new(Vec::<(Vec<u8>, bool)>::new()));
        let sink = Arc::clone(&captured);
        core.set_output_tap(Arc::new(move |bytes, is_stderr| {
            sink.lock().unwrap().push((bytes.to_vec(), is_stderr));
        }));

        core.set_output_disabled(true);
        core.emit_output(b"hidden from tty", true);

        let seen = captured.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (b"hidden from tty".to_vec(), true));
    }

    #[test]
    fn mark_closed_reports_the_first_caller_only() {
        let core = BridgeCore::new();
        assert!(core.mark_closed());
        assert!(!core.mark_closed());
        assert!(core.is_closed());
    }
}
