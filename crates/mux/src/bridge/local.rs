//! The local pseudo-terminal bridge.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tracing::{debug, warn};

use super::{spawn_stdin_pump, BridgeCore, BridgeState};
use crate::MuxError;

/// A subshell running in a local pty.
///
/// On POSIX the shell is `$SHELL` (fallback `/bin/sh`), run as `-lc <cmd>`
/// for command slots or as a login shell for bare ones. On Windows the
/// shell comes from `COMSPEC` (fallback `cmd.exe`) with `/C <cmd>` and the
/// terminal size is polled every 500 ms, since ConPTY delivers no resize
/// events to the parent.
pub struct LocalShell {
    core: Arc<BridgeCore>,
    command: Option<String>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    master: Arc<Mutex<Option<Box<dyn portable_pty::MasterPty + Send>>>>,
    stdin_pump: Mutex<Option<JoinHandle<()>>>,
    raw_guard: Mutex<Option<term::RawModeGuard>>,
}

impl LocalShell {
    /// A bridge that will run `command` (or a bare login shell).
    pub fn new(command: Option<String>) -> Self {
        Self {
            core: BridgeCore::new(),
            command,
            writer: Arc::new(Mutex::new(None)),
            killer: Mutex::new(None),
            master: Arc::new(Mutex::new(None)),
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

    /// Spawn the child in a fresh pty and pump IO until it exits.
    pub fn start(&self) -> Result<(), MuxError> {
        let (cols, rows) = term::size();
        let pty = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| MuxError::Pty(err.to_string()))?;

        let mut child = pty
            .slave
            .spawn_command(self.shell_command())
            .map_err(|err| MuxError::Pty(err.to_string()))?;
        drop(pty.slave);

        let mut reader = pty
            .master
            .try_clone_reader()
            .map_err(|err| MuxError::Pty(err.to_string()))?;
        let writer = pty
            .master
            .take_writer()
            .map_err(|err| MuxError::Pty(err.to_string()))?;

        *self.writer.lock().expect("writer poisoned") = Some(writer);
        *self.killer.lock().expect("killer poisoned") = Some(child.clone_killer());
        *self.master.lock().expect("master poisoned") = Some(pty.master);

        *self.raw_guard.lock().expect("raw guard poisoned") = Some(term::enter_raw()?);
        self.core.set_input_disabled(false);
        self.core.set_output_disabled(false);
        self.core.set_state(BridgeState::Running);

        // Child output to the tty (and the tap). A local pty merges the
        // child's stderr into the stream, so is_stderr is always false.
        let out_core = Arc::clone(&self.core);
        let output_thread = std::thread::Builder::new()
            .name("local-shell-out".into())
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => out_core.emit_output(&buf[..n], false),
                    }
                }
            })?;

        self.spawn_pump()?;

        #[cfg(windows)]
        self.spawn_size_poll();

        let status = child.wait();
        debug!(status = ?status, "local shell exited");

        self.core.mark_closed();
        self.core.set_state(BridgeState::Closed);
        drop(self.raw_guard.lock().expect("raw guard poisoned").take());
        let _ = output_thread.join();
        self.core.fire_exit();
        Ok(())
    }

    /// Stop forwarding; the child keeps running.
    pub fn pause(&self) {
        if self.core.state() != BridgeState::Running {
            return;
        }
        self.core.set_input_disabled(true);
        self.core.set_output_disabled(true);
        self.join_pump();
        drop(self.raw_guard.lock().expect("raw guard poisoned").take());
        self.core.set_state(BridgeState::Paused);

        #[cfg(windows)]
        {
            // ConPTY leaves the console in odd modes after detach; a full
            // reset before showing the menu avoids mode confusion.
            term::Terminal::global().print("\x1bc");
        }
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
        self.resize_to_terminal();
        self.spawn_pump()?;
        Ok(())
    }

    /// Kill the child and release the pty. Idempotent.
    pub fn close(&self) {
        if !self.core.mark_closed() {
            return;
        }
        self.core.set_input_disabled(true);
        self.core.set_output_disabled(true);
        if let Some(mut killer) = self.killer.lock().expect("killer poisoned").take() {
            if let Err(err) = killer.kill() {
                warn!(%err, "killing local shell failed");
            }
        }
        self.join_pump();
        drop(self.master.lock().expect("master poisoned").take());
        drop(self.raw_guard.lock().expect("raw guard poisoned").take());
        self.core.set_state(BridgeState::Closed);
        self.core.fire_exit();
    }

    /// Forward bytes to the child's stdin.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<(), MuxError> {
        let mut guard = self.writer.lock().expect("writer poisoned");
        let writer = guard.as_mut().ok_or_else(|| {
            MuxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "shell not started",
            ))
        })?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn spawn_pump(&self) -> Result<(), MuxError> {
        let writer = Arc::clone(&self.writer);
        let pump = spawn_stdin_pump(Arc::clone(&self.core), move |bytes| {
            let mut guard = writer.lock().expect("writer poisoned");
            match guard.as_mut() {
                Some(writer) => {
                    writer.write_all(bytes)?;
                    writer.flush()
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "writer gone",
                )),
            }
        })?;
        *self.stdin_pump.lock().expect("pump poisoned") = Some(pump);
        Ok(())
    }

    fn join_pump(&self) {
        if let Some(pump) = self.stdin_pump.lock().expect("pump poisoned").take() {
            let _ = pump.join();
        }
    }

    fn resize_to_terminal(&self) {
        let (cols, rows) = term::size();
        if let Some(master) = self.master.lock().expect("master poisoned").as_ref() {
            let _ = master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
    }

    #[cfg(windows)]
    fn spawn_size_poll(&self) {
        let core = Arc::downgrade(&self.core);
        let master_slot = Arc::clone(&self.master);
        std::thread::spawn(move || {
            let mut last = term::size();
            loop {
                std::thread::sleep(std::time::Duration::from_millis(500));
                let Some(core) = core.upgrade() else { break };
                if core.is_closed() {
                    break;
                }
                let now = term::size();
                if now != last {
                    last = now;
                    if let Some(master) = master_slot.lock().expect("master poisoned").as_ref() {
                        let _ = master.resize(PtySize {
                            rows: now.1,
                            cols: now.0,
                            pixel_width: 0,
                            pixel_height: 0,
                        });
                    }
                }
            }
        });
    }

    fn shell_command(&self) -> CommandBuilder {
        let mut cmd = shell_builder(self.command.as_deref());
        cmd.env("TERM", "xterm-256color");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        cmd
    }
}

#[cfg(unix)]
fn shell_builder(command: Option<&str>) -> CommandBuilder {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let mut cmd = CommandBuilder::new(shell);
    match command {
        Some(line) => {
            cmd.arg("-lc");
            cmd.arg(line);
        }
        None => {
            cmd.arg("-l");
        }
    }
    cmd
}

#[cfg(windows)]
fn shell_builder(command: Option<&str>) -> CommandBuilder {
    let shell = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
    let mut cmd = CommandBuilder::new(shell);
    if let Some(line) = command {
        cmd.arg("/C");
        cmd.arg(line);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_shell_is_created_and_unstarted() {
        let shell = LocalShell::new(Some("htop".into()));
        assert_eq!(shell.core().state(), BridgeState::Created);
        assert_eq!(shell.command(), Some("htop"));
    }

    #[test]
    fn writes_before_start_are_rejected() {
        let shell = LocalShell::new(None);
        assert!(matches!(
            shell.write_stdin(b"x").unwrap_err(),
            MuxError::Io(_)
        ));
    }

    #[test]
    fn close_before_start_is_safe_and_fires_exit() {
        let shell = LocalShell::new(None);
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = Arc::clone(&fired);
        shell
            .core()
            .set_on_exit(Box::new(move || seen.store(true, std::sync::atomic::Ordering::SeqCst)));

        shell.close();
        shell.close();
        assert_eq!(shell.core().state(), BridgeState::Closed);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
