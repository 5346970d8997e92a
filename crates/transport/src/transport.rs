//! The controller's remote channel.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use ssh2::Session;
use tracing::{debug, warn};

use protocol::framing::FrameHeader;

use crate::shell::{posix_parent, shell_quote};
use crate::stream::{spawn_stream, StreamHandle};
use crate::transfer::{recv_frame, send_frame};
use crate::{session, Endpoint, RemotePtySession, TransportError};

/// An authenticated remote channel with idempotent lifecycle.
///
/// One primary session serves one-shot commands and framed transfers; an
/// optional auxiliary session backs liveness checks for streaming monitors.
/// Streamed commands and interactive ptys dial their own connections so a
/// long read never starves a keystroke or an upload.
pub struct Transport {
    endpoint: Endpoint,
    primary: Mutex<Option<Session>>,
    aux: Mutex<Option<Session>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// A transport for `endpoint`; nothing is dialed yet.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            primary: Mutex::new(None),
            aux: Mutex::new(None),
        }
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Establish the primary session. Idempotent.
    pub fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.primary.lock().expect("transport session poisoned");
        if guard.is_none() {
            *guard = Some(session::dial(&self.endpoint)?);
        }
        Ok(())
    }

    /// Drop the primary and auxiliary sessions. Idempotent.
    pub fn close(&self) {
        if let Some(session) = self.primary.lock().expect("transport session poisoned").take() {
            let _ = session.disconnect(None, "transport closed", None);
        }
        self.stop_persistent_session();
    }

    /// Whether a primary session is open.
    pub fn is_connected(&self) -> bool {
        self.primary
            .lock()
            .expect("transport session poisoned")
            .is_some()
    }

    /// Run a one-shot command, discarding output.
    pub fn run(&self, cmd: &str) -> Result<(), TransportError> {
        self.with_session(|session| {
            let (_, status) = exec_capture(session, cmd)?;
            if status == 0 {
                Ok(())
            } else {
                Err(TransportError::CommandFailed {
                    cmd: cmd.to_string(),
                    status,
                })
            }
        })
    }

    /// Run a one-shot command and capture combined stdout/stderr.
    pub fn run_with_output(&self, cmd: &str) -> Result<String, TransportError> {
        self.with_session(|session| {
            let (output, status) = exec_capture(session, cmd)?;
            if status == 0 {
                Ok(output)
            } else {
                Err(TransportError::CommandFailed {
                    cmd: cmd.to_string(),
                    status,
                })
            }
        })
    }

    /// Start a long-running command on a dedicated connection.
    ///
    /// A pty is always requested so the remote process holds a controlling
    /// terminal and dies with the connection.
    pub fn run_with_stream(&self, cmd: &str) -> Result<StreamHandle, TransportError> {
        spawn_stream(&self.endpoint, cmd)
    }

    /// Upload `local` to the absolute remote path `remote`.
    ///
    /// Creates missing remote parent directories, preserves the file mode,
    /// and verifies every acknowledgement of the framed protocol.
    pub fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let meta = std::fs::metadata(local).map_err(|source| TransportError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        let size = meta.len();
        let mode = local_mode(&meta);
        let name = remote.rsplit('/').next().unwrap_or(remote).to_string();
        let parent = posix_parent(remote).unwrap_or("/").to_string();

        self.with_session(|session| {
            let (_, status) = exec_capture(session, &format!("mkdir -p {}", shell_quote(&parent)))?;
            if status != 0 {
                return Err(TransportError::CommandFailed {
                    cmd: format!("mkdir -p {parent}"),
                    status,
                });
            }

            let mut file = File::open(local).map_err(|source| TransportError::Io {
                path: local.to_path_buf(),
                source,
            })?;

            let mut channel = session.channel_session()?;
            channel.exec(&format!("scp -t {}", shell_quote(&parent)))?;

            let header = FrameHeader::new(mode, size, name.clone());
            let result = send_frame(&mut channel, &header, &mut file);

            let _ = channel.send_eof();
            let _ = channel.wait_close();
            result?;

            debug!(local = %local.display(), remote, size, "upload complete");
            Ok(())
        })
    }

    /// Download the absolute remote path `remote` into `local`.
    ///
    /// The body lands in a temporary sibling first and is renamed into place
    /// so readers never observe a half-written file.
    pub fn download(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        self.with_session(|session| {
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent).map_err(|source| TransportError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            let mut channel = session.channel_session()?;
            channel.exec(&format!("scp -f {}", shell_quote(remote)))?;

            let tmp = local.with_extension("tether-part");
            let mut sink = File::create(&tmp).map_err(|source| TransportError::Io {
                path: tmp.clone(),
                source,
            })?;

            let outcome = recv_frame(&mut channel, &mut sink);
            let _ = channel.send_eof();
            let _ = channel.wait_close();

            match outcome {
                Ok(header) => {
                    drop(sink);
                    apply_mode(&tmp, header.mode);
                    std::fs::rename(&tmp, local).map_err(|source| TransportError::Io {
                        path: local.to_path_buf(),
                        source,
                    })?;
                    debug!(remote, local = %local.display(), size = header.size, "download complete");
                    Ok(())
                }
                Err(err) => {
                    drop(sink);
                    let _ = std::fs::remove_file(&tmp);
                    Err(err)
                }
            }
        })
    }

    /// Open the auxiliary session. Idempotent.
    pub fn start_persistent_session(&self) -> Result<(), TransportError> {
        let mut guard = self.aux.lock().expect("aux session poisoned");
        if guard.is_none() {
            *guard = Some(session::dial(&self.endpoint)?);
        }
        Ok(())
    }

    /// Drop the auxiliary session. Idempotent.
    pub fn stop_persistent_session(&self) {
        if let Some(session) = self.aux.lock().expect("aux session poisoned").take() {
            let _ = session.disconnect(None, "aux session closed", None);
        }
    }

    /// Cheap liveness probe over the auxiliary session.
    ///
    /// Returns false (and drops the auxiliary session) when the probe cannot
    /// run; streaming monitors use this to decide whether to re-dial.
    pub fn check_alive(&self) -> bool {
        let mut guard = self.aux.lock().expect("aux session poisoned");
        let Some(session) = guard.as_ref() else {
            return false;
        };
        match exec_capture(session, "true") {
            Ok((_, 0)) => true,
            Ok((_, status)) => {
                warn!(status, "liveness probe exited non-zero");
                *guard = None;
                false
            }
            Err(err) => {
                warn!(%err, "liveness probe failed");
                *guard = None;
                false
            }
        }
    }

    /// Open an interactive pty session on a dedicated connection.
    pub fn open_pty_session(
        &self,
        cols: u32,
        rows: u32,
        command: Option<&str>,
    ) -> Result<RemotePtySession, TransportError> {
        RemotePtySession::open(&self.endpoint, cols, rows, command)
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&Session) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let guard = self.primary.lock().expect("transport session poisoned");
        let session = guard.as_ref().ok_or(TransportError::NotConnected)?;
        f(session)
    }
}

/// Run `cmd`, capturing merged stdout/stderr and the exit status.
fn exec_capture(session: &Session, cmd: &str) -> Result<(String, i32), TransportError> {
    let mut channel = session.channel_session()?;
    channel.handle_extended_data(ssh2::ExtendedData::Merge)?;
    channel.exec(cmd)?;

    let mut bytes = Vec::new();
    channel
        .read_to_end(&mut bytes)
        .map_err(|source| TransportError::Io {
            path: std::path::PathBuf::from("<channel>"),
            source,
        })?;

    let _ = channel.send_eof();
    channel.wait_close()?;
    let status = channel.exit_status()?;
    Ok((String::from_utf8_lossy(&bytes).into_owned(), status))
}

#[cfg(unix)]
fn local_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) {}
