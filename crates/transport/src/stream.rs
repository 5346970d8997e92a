//! Long-running remote commands with streamed output.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::{session, Endpoint, TransportError, STREAM_DEADLINE};

const READ_BUF: usize = 8 * 1024;
const IDLE_SLEEP: Duration = Duration::from_millis(25);

/// A handle to one streamed remote command.
///
/// Output chunks arrive on [`chunks`](Self::chunks) in emission order; a
/// terminal failure (if any) arrives on [`errors`](Self::errors). Both
/// channels close when the command ends, the stream is stopped, or the
/// safety-net deadline fires.
#[derive(Debug)]
pub struct StreamHandle {
    chunks: Receiver<Vec<u8>>,
    errors: Receiver<TransportError>,
    stop: Arc<AtomicBool>,
}

impl StreamHandle {
    /// Output chunks, in order.
    pub fn chunks(&self) -> &Receiver<Vec<u8>> {
        &self.chunks
    }

    /// Terminal stream failure, if one occurred.
    pub fn errors(&self) -> &Receiver<TransportError> {
        &self.errors
    }

    /// Ask the reader to wind down. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Dial a dedicated session and start `cmd` under a pty.
///
/// A pty is always requested so the remote process gets a controlling
/// terminal and receives SIGHUP when the connection drops.
pub(crate) fn spawn_stream(endpoint: &Endpoint, cmd: &str) -> Result<StreamHandle, TransportError> {
    let session = session::dial(endpoint)?;
    let mut channel = session.channel_session()?;
    channel.request_pty("xterm-256color", None, None)?;
    channel.exec(cmd)?;

    let (chunk_tx, chunk_rx) = bounded::<Vec<u8>>(256);
    let (err_tx, err_rx) = bounded::<TransportError>(1);
    let stop = Arc::new(AtomicBool::new(false));

    let stop_flag = Arc::clone(&stop);
    let cmd_label = cmd.to_string();
    std::thread::Builder::new()
        .name("transport-stream".into())
        .spawn(move || {
            pump(&session, &mut channel, &chunk_tx, &err_tx, &stop_flag);
            drop(chunk_tx);
            debug!(cmd = %cmd_label, "stream reader finished");
        })
        .map_err(|source| TransportError::Io {
            path: std::path::PathBuf::from("<channel>"),
            source,
        })?;

    Ok(StreamHandle {
        chunks: chunk_rx,
        errors: err_rx,
        stop,
    })
}

/// Read the channel until EOF, stop, failure, or the absolute deadline.
fn pump(
    session: &ssh2::Session,
    channel: &mut ssh2::Channel,
    chunks: &Sender<Vec<u8>>,
    errors: &Sender<TransportError>,
    stop: &AtomicBool,
) {
    let deadline = Instant::now() + STREAM_DEADLINE;
    let mut buf = [0u8; READ_BUF];

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if Instant::now() >= deadline {
            let _ = errors.try_send(TransportError::StreamDeadline);
            break;
        }

        session.set_blocking(false);
        let outcome = channel.read(&mut buf);
        session.set_blocking(true);

        match outcome {
            Ok(0) => {
                if channel.eof() {
                    break;
                }
                std::thread::sleep(IDLE_SLEEP);
            }
            Ok(n) => {
                if chunks.send(buf[..n].to_vec()).is_err() {
                    // Receiver gone; nobody is listening anymore.
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if channel.eof() {
                    break;
                }
                std::thread::sleep(IDLE_SLEEP);
            }
            Err(err) => {
                warn!(%err, "stream read failed");
                let _ = errors.try_send(TransportError::Io {
                    path: std::path::PathBuf::from("<channel>"),
                    source: err,
                });
                break;
            }
        }
    }

    let _ = channel.close();
    let _ = channel.wait_close();
}
