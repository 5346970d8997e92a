//! Interactive remote pty sessions for the RemoteShell bridge.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ssh2::{Channel, Session};
use tracing::debug;

use crate::{session, Endpoint, TransportError};

/// One non-blocking read attempt against a pty stream.
#[derive(Debug, PartialEq, Eq)]
pub enum PtyOutput {
    /// Bytes were read.
    Data(usize),
    /// Nothing available right now.
    Idle,
    /// The channel reached end of stream.
    Eof,
}

struct Inner {
    session: Session,
    channel: Channel,
}

/// A dedicated SSH connection carrying one interactive shell under a pty.
///
/// libssh2 sessions are not thread-safe, so the session and its channel sit
/// behind one mutex. Reads flip the session into non-blocking mode for the
/// duration of the call and release the lock between polls, keeping
/// keystroke writes responsive while reader threads spin.
pub struct RemotePtySession {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for RemotePtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePtySession").finish_non_exhaustive()
    }
}

impl RemotePtySession {
    /// Dial `endpoint` and start a shell (or `command`) under a pty.
    ///
    /// Requests an `xterm-256color` terminal of the given size so
    /// `TERM` is right before the remote shell initializes.
    pub fn open(
        endpoint: &Endpoint,
        cols: u32,
        rows: u32,
        command: Option<&str>,
    ) -> Result<Self, TransportError> {
        let session = session::dial(endpoint)?;
        let mut channel = session.channel_session()?;
        channel.request_pty("xterm-256color", None, Some((cols, rows, 0, 0)))?;
        match command {
            Some(cmd) => channel.exec(cmd)?,
            None => channel.shell()?,
        }
        debug!(addr = %endpoint.addr(), cols, rows, "remote pty session started");
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { session, channel })),
        })
    }

    /// Forward input bytes to the remote stdin.
    pub fn write_stdin(&self, buf: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.channel.write_all(buf).map_err(wrap_io)?;
        inner.channel.flush().map_err(wrap_io)?;
        Ok(())
    }

    /// Try to read from the remote stdout without blocking.
    pub fn read_stdout(&self, buf: &mut [u8]) -> Result<PtyOutput, TransportError> {
        self.read_stream(buf, false)
    }

    /// Try to read from the remote stderr without blocking.
    pub fn read_stderr(&self, buf: &mut [u8]) -> Result<PtyOutput, TransportError> {
        self.read_stream(buf, true)
    }

    fn read_stream(&self, buf: &mut [u8], stderr: bool) -> Result<PtyOutput, TransportError> {
        let mut inner = self.lock();
        inner.session.set_blocking(false);
        let outcome = if stderr {
            inner.channel.stderr().read(buf)
        } else {
            inner.channel.read(buf)
        };
        inner.session.set_blocking(true);

        match outcome {
            Ok(0) => {
                if inner.channel.eof() {
                    Ok(PtyOutput::Eof)
                } else {
                    Ok(PtyOutput::Idle)
                }
            }
            Ok(n) => Ok(PtyOutput::Data(n)),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if inner.channel.eof() {
                    Ok(PtyOutput::Eof)
                } else {
                    Ok(PtyOutput::Idle)
                }
            }
            Err(err) => Err(wrap_io(err)),
        }
    }

    /// Propagate a local terminal resize to the remote pty.
    pub fn resize(&self, cols: u32, rows: u32) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner
            .channel
            .request_pty_size(cols, rows, None, None)
            .map_err(TransportError::from)
    }

    /// Whether the remote process has closed its end.
    pub fn is_eof(&self) -> bool {
        self.lock().channel.eof()
    }

    /// Exit status, meaningful once the channel is closed.
    pub fn exit_status(&self) -> Result<i32, TransportError> {
        self.lock().channel.exit_status().map_err(TransportError::from)
    }

    /// Close the channel and tear the connection down. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        let _ = inner.channel.close();
        let _ = inner.channel.wait_close();
        let _ = inner
            .session
            .disconnect(None, "session closed", None);
    }

    /// A sleep used by reader loops between idle polls.
    pub fn idle_wait() {
        std::thread::sleep(Duration::from_millis(15));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("remote pty session poisoned")
    }
}

impl Clone for RemotePtySession {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn wrap_io(err: std::io::Error) -> TransportError {
    TransportError::Io {
        path: std::path::PathBuf::from("<channel>"),
        source: err,
    }
}
