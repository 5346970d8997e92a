//! The SSH-backed bridge.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};
use transport::{Endpoint, PtyOutput, RemotePtySession};

use super::{spawn_stdin_pump, BridgeCore, BridgeState};
use crate::MuxError;

const EXIT_POLL: Duration = Duration::from_millis(50);

/// A shell (or command) on a dedicated SSH connection with a requested pty.
///
/// The pty is sized to the local terminal (80x24 when unknown) and announces
/// `xterm-256color`. Stdout and stderr run on separate reader loops so the
/// output tap can label the stream; both honor the pause flag but always
/// deliver to the tap.
pub struct RemoteShell {
    core: Arc<BridgeCore>,
    endpoint: Endpoint,
    command: Option<String>,
    session: Mutex<Option<RemotePtySession>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    stdin_pump: Mutex<Option<JoinHandle<()>>>,
    raw_guard: Mutex<Option<term::RawModeGuard>>,
}

impl RemoteShell {
    /// A bridge that will run `command` (or an interactive shell) on
    /// `endpoint`.
    pub fn new(endpoint: Endpoint, command: Option<String>) -> Self {
        Self {
            core: BridgeCore::new(),
            endpoint,
            command,
            session: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            stdin_pump: Mutex::new(None),
            raw_guard: Mutex::new(None),
        }
    }

    pub(crate) fn core(&self) -> &Arc<BridgeCore> {
        &self.core
    }

    /// The command this shell was opened with.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Dial, start the remote process, and pump IO until it exits.
    pub fn start(&self) -> Result<(), MuxError> {
        let (cols, rows) = term::size();
        let session = RemotePtySession::open(
            &self.endpoint,
            u32::from(cols),
            u32::from(rows),
            self.command.as_deref(),
        )?;
        *self.session.lock().expect("session poisoned") = Some(session.clone());

        *self.raw_guard.lock().expect("raw guard poisoned") = Some(term::enter_raw()?);
        self.core.set_input_disabled(false);
        self.core.set_output_disabled(false);
        self.core.set_state(BridgeState::Running);

        self.spawn_reader(session.clone(), false)?;
        self.spawn_reader(session.clone(), true)?;
        self.spawn_pump()?;

        // The start call owns the wait: return only when the remote side is
        // done or the bridge was torn down.
        while !self.core.is_closed() && !session.is_eof() {
            std::thread::sleep(EXIT_POLL);
        }
        debug!(addr = %self.endpoint.addr(), "remote shell ended");

        self.core.mark_closed();
        self.core.set_state(BridgeState::Closed);
        session.close();
        drop(self.raw_guard.lock().expect("raw guard poisoned").take());
        self.join_readers();
        self.core.fire_exit();
        Ok(())
    }

    /// Stop forwarding; the remote process keeps running.
    pub fn pause(&self) {
        if self.core.state() != BridgeState::Running {
            return;
        }
        self.core.set_input_disabled(true);
        self.core.set_output_disabled(true);
        self.join_pump();
        drop(self.raw_guard.lock().expect("raw guard poisoned").take());
        self.core.set_state(BridgeState::Paused);
    }

    /// Restart forwarding after a pause.
    pub fn resume(&self) -> Result<(), MuxError> {
        if self.core.state() != BridgeState::Paused {
            return Ok(());
        }
        *self.raw_guard.lock().expect("raw guard poisoned") = Some(term::enter_raw()?);
        self.core.set_input_disabled(false);
        self.core.set_output_disabled(false);
        self.core.set_state(BridgeState::Running);

        // The local terminal may have been resized while we were away.
        let (cols, rows) = term::size();
        if let Some(session) = self.session.lock().expect("session poisoned").as_ref() {
            if let Err(err) = session.resize(u32::from(cols), u32::from(rows)) {
                warn!(%err, "remote pty resize failed");
            }
        }
        self.spawn_pump()?;
        Ok(())
    }

    /// Tear down the channel and the connection. Idempotent.
    pub fn close(&self) {
        if !self.core.mark_closed() {
            return;
        }
        self.core.set_input_disabled(true);
        self.core.set_output_disabled(true);
        if let Some(session) = self.session.lock().expect("session poisoned").take() {
            session.close();
        }
        self.join_pump();
        self.join_readers();
        drop(self.raw_guard.lock().expect("raw guard poisoned").take());
        self.core.set_state(BridgeState::Closed);
        self.core.fire_exit();
    }

    /// Forward bytes to the remote stdin.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<(), MuxError> {
        let guard = self.session.lock().expect("session poisoned");
        let session = guard.as_ref().ok_or_else(|| {
            MuxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "shell not started",
            ))
        })?;
        session.write_stdin(bytes)?;
        Ok(())
    }

    fn spawn_reader(&self, session: RemotePtySession, stderr: bool) -> Result<(), MuxError> {
        let core = Arc::clone(&self.core);
        let name = if stderr {
            "remote-shell-err"
        } else {
            "remote-shell-out"
        };
        let handle = std::thread::Builder::new().name(name.into()).spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                if core.is_closed() {
                    break;
                }
                let outcome = if stderr {
                    session.read_stderr(&mut buf)
                } else {
                    session.read_stdout(&mut buf)
                };
                match outcome {
                    Ok(PtyOutput::Data(n)) => core.emit_output(&buf[..n], stderr),
                    Ok(PtyOutput::Idle) => RemotePtySession::idle_wait(),
                    Ok(PtyOutput::Eof) => break,
                    Err(err) => {
                        if !core.is_closed() {
                            warn!(%err, stderr, "remote read failed");
                        }
                        break;
                    }
                }
            }
        })?;
        self.readers.lock().expect("readers poisoned").push(handle);
        Ok(())
    }

    fn spawn_pump(&self) -> Result<(), MuxError> {
        let session = self
            .session
            .lock()
            .expect("session poisoned")
            .clone()
            .ok_or_else(|| {
                MuxError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "shell not started",
                ))
            })?;
        let pump = spawn_stdin_pump(Arc::clone(&self.core), move |bytes| {
            session
                .write_stdin(bytes)
                .map_err(std::io::Error::other)
        })?;
        *self.stdin_pump.lock().expect("pump poisoned") = Some(pump);
        Ok(())
    }

    fn join_pump(&self) {
        if let Some(pump) = self.stdin_pump.lock().expect("pump poisoned").take() {
            let _ = pump.join();
        }
    }

    fn join_readers(&self) {
        let handles: Vec<_> = self
            .readers
            .lock()
            .expect("readers poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}
