//! The framed transfer protocol, spoken over any duplex byte stream.
//!
//! The functions here are generic over `Read + Write` so the protocol logic
//! is testable against a scripted in-memory peer; [`crate::Transport`] runs
//! them over an exec channel driving `scp -t` / `scp -f` on the far side.

use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

use protocol::framing::{FrameHeader, ACK_ERROR, ACK_FATAL, ACK_OK, FRAME_TERMINATOR};
use protocol::ProtocolError;

use crate::{TransportError, ACK_TIMEOUT};

const COPY_CHUNK: usize = 64 * 1024;
const POLL_SLEEP_MS: u64 = 25;
const MAX_HEADER_LEN: usize = 4096;

/// Send one file frame: await the receiver's greeting ACK, send the header,
/// stream the body, terminate, and verify each acknowledgement.
pub(crate) fn send_frame<S, B>(
    peer: &mut S,
    header: &FrameHeader,
    body: &mut B,
) -> Result<(), TransportError>
where
    S: Read + Write,
    B: Read,
{
    await_ack(peer)?;

    peer.write_all(header.encode().as_bytes())
        .map_err(channel_io)?;
    peer.flush().map_err(channel_io)?;
    await_ack(peer)?;

    let mut remaining = header.size;
    let mut buf = vec![0u8; COPY_CHUNK];
    while remaining > 0 {
        let want = COPY_CHUNK.min(usize::try_from(remaining).unwrap_or(COPY_CHUNK));
        let n = body.read(&mut buf[..want]).map_err(channel_io)?;
        if n == 0 {
            return Err(ProtocolError::MalformedHeader("body shorter than header size".into()).into());
        }
        peer.write_all(&buf[..n]).map_err(channel_io)?;
        remaining -= n as u64;
    }

    peer.write_all(&[FRAME_TERMINATOR]).map_err(channel_io)?;
    peer.flush().map_err(channel_io)?;
    await_ack(peer)?;
    Ok(())
}

/// Receive one file frame into `sink`, acknowledging each protocol step.
pub(crate) fn recv_frame<S, O>(peer: &mut S, sink: &mut O) -> Result<FrameHeader, TransportError>
where
    S: Read + Write,
    O: Write,
{
    // The sink side speaks first.
    peer.write_all(&[ACK_OK]).map_err(channel_io)?;
    peer.flush().map_err(channel_io)?;

    let header_line = read_header_line(peer)?;
    let header = FrameHeader::parse(&header_line)?;

    peer.write_all(&[ACK_OK]).map_err(channel_io)?;
    peer.flush().map_err(channel_io)?;

    let mut remaining = header.size;
    let mut buf = vec![0u8; COPY_CHUNK];
    while remaining > 0 {
        let want = COPY_CHUNK.min(usize::try_from(remaining).unwrap_or(COPY_CHUNK));
        let n = read_some(peer, &mut buf[..want])?;
        sink.write_all(&buf[..n]).map_err(channel_io)?;
        remaining -= n as u64;
    }

    // The sender closes the frame with its own status byte.
    let status = read_byte(peer)?;
    protocol::framing::check_ack(status)?;
    peer.write_all(&[ACK_OK]).map_err(channel_io)?;
    peer.flush().map_err(channel_io)?;
    Ok(header)
}

/// Wait for an ACK byte, honoring the acknowledgement timeout.
///
/// Error ACKs carry a diagnostic line after the byte; it becomes the
/// [`TransportError::RemoteRejected`] message.
fn await_ack<S: Read>(peer: &mut S) -> Result<(), TransportError> {
    let byte = read_byte(peer)?;
    match byte {
        ACK_OK => Ok(()),
        ACK_ERROR | ACK_FATAL => {
            let message = read_line_lossy(peer);
            Err(TransportError::RemoteRejected(if message.is_empty() {
                format!("acknowledgement byte {byte}")
            } else {
                message
            }))
        }
        other => Err(ProtocolError::UnexpectedAck(other).into()),
    }
}

/// Read a single byte, polling through `WouldBlock` until [`ACK_TIMEOUT`].
fn read_byte<S: Read>(peer: &mut S) -> Result<u8, TransportError> {
    let deadline = Instant::now() + ACK_TIMEOUT;
    let mut byte = [0u8; 1];
    loop {
        match peer.read(&mut byte) {
            Ok(1) => return Ok(byte[0]),
            Ok(0) => {
                return Err(ProtocolError::MalformedHeader("peer closed mid-transfer".into()).into())
            }
            Ok(_) => unreachable!("single-byte read"),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(TransportError::AckTimeout);
                }
                std::thread::sleep(std::time::Duration::from_millis(POLL_SLEEP_MS));
            }
            Err(err) => return Err(channel_io(err)),
        }
    }
}

/// Read at least one byte, polling through `WouldBlock`.
fn read_some<S: Read>(peer: &mut S, buf: &mut [u8]) -> Result<usize, TransportError> {
    loop {
        match peer.read(buf) {
            Ok(0) => {
                return Err(ProtocolError::MalformedHeader("peer closed mid-transfer".into()).into())
            }
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(POLL_SLEEP_MS));
            }
            Err(err) => return Err(channel_io(err)),
        }
    }
}

fn read_header_line<S: Read>(peer: &mut S) -> Result<String, TransportError> {
    let mut line = Vec::new();
    loop {
        let byte = read_byte(peer)?;
        if byte == ACK_ERROR || byte == ACK_FATAL {
            if line.is_empty() {
                let message = read_line_lossy(peer);
                return Err(TransportError::RemoteRejected(message));
            }
            line.push(byte);
            continue;
        }
        if byte == b'\n' {
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte);
        if line.len() > MAX_HEADER_LEN {
            return Err(ProtocolError::MalformedHeader("header line too long".into()).into());
        }
    }
}

fn read_line_lossy<S: Read>(peer: &mut S) -> String {
    let mut line = Vec::new();
    while let Ok(byte) = read_byte(peer) {
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() > MAX_HEADER_LEN {
            break;
        }
    }
    String::from_utf8_lossy(&line).trim().to_string()
}

fn channel_io(err: std::io::Error) -> TransportError {
    TransportError::Io {
        path: std::path::PathBuf::from("<channel>"),
        source: err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted duplex peer: pops reads from a queue, captures writes.
    struct ScriptedPeer {
        reads: VecDeque<u8>,
        writes: Vec<u8>,
    }

    impl ScriptedPeer {
        fn new(script: &[u8]) -> Self {
            Self {
                reads: script.iter().copied().collect(),
                writes: Vec::new(),
            }
        }
    }

    impl Read for ScriptedPeer {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.reads.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPeer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_frame_speaks_the_protocol() {
        // Receiver greets, then ACKs header, body, and terminator.
        let mut peer = ScriptedPeer::new(&[ACK_OK, ACK_OK, ACK_OK]);
        let header = FrameHeader::new(0o644, 5, "a.txt");
        send_frame(&mut peer, &header, &mut &b"hello"[..]).unwrap();

        let mut expected = b"C0644 5 a.txt\nhello".to_vec();
        expected.push(FRAME_TERMINATOR);
        assert_eq!(peer.writes, expected);
    }

    #[test]
    fn send_frame_reports_remote_rejection_with_message() {
        let mut script = vec![ACK_OK, ACK_ERROR];
        script.extend_from_slice(b"scp: permission denied\n");
        let mut peer = ScriptedPeer::new(&script);

        let header = FrameHeader::new(0o644, 2, "x");
        let err = send_frame(&mut peer, &header, &mut &b"ab"[..]).unwrap_err();
        match err {
            TransportError::RemoteRejected(msg) => {
                assert!(msg.contains("permission denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn recv_frame_consumes_header_body_and_status() {
        let mut script = Vec::new();
        script.extend_from_slice(b"C0755 3 run\n");
        script.extend_from_slice(b"abc");
        script.push(FRAME_TERMINATOR);
        let mut peer = ScriptedPeer::new(&script);

        let mut sink = Vec::new();
        let header = recv_frame(&mut peer, &mut sink).unwrap();

        assert_eq!(header.mode, 0o755);
        assert_eq!(header.name, "run");
        assert_eq!(sink, b"abc");
        // Greeting ACK + header ACK + final ACK.
        assert_eq!(peer.writes, vec![ACK_OK, ACK_OK, ACK_OK]);
    }

    #[test]
    fn recv_frame_surfaces_source_error() {
        let mut script = vec![ACK_ERROR];
        script.extend_from_slice(b"scp: no such file\n");
        let mut peer = ScriptedPeer::new(&script);

        let err = recv_frame(&mut peer, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, TransportError::RemoteRejected(_)));
    }

    #[test]
    fn empty_file_round_trips() {
        let mut peer = ScriptedPeer::new(&[ACK_OK, ACK_OK, ACK_OK]);
        let header = FrameHeader::new(0o644, 0, "empty");
        send_frame(&mut peer, &header, &mut std::io::empty()).unwrap();

        let mut script = Vec::new();
        script.extend_from_slice(b"C0644 0 empty\n");
        script.push(FRAME_TERMINATOR);
        let mut rx_peer = ScriptedPeer::new(&script);
        let mut sink = Vec::new();
        let header = recv_frame(&mut rx_peer, &mut sink).unwrap();
        assert_eq!(header.size, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn short_body_is_a_protocol_error() {
        let mut peer = ScriptedPeer::new(&[ACK_OK, ACK_OK, ACK_OK]);
        let header = FrameHeader::new(0o644, 10, "short");
        let err = send_frame(&mut peer, &header, &mut &b"abc"[..]).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
