//! The framed file-transfer protocol.
//!
//! A transfer is one header line, the body, a trailing NUL, and ACK bytes
//! after each step:
//!
//! ```text
//! C<mode> <size> <filename>\n   (mode is four octal digits)
//! <size bytes of body>
//! \0
//! ```
//!
//! ACK `0` acknowledges, `1` and `2` report an error (the message follows on
//! the error stream). The receiver must also send an initial ACK before the
//! header; a sender that does not observe it within the transfer timeout
//! aborts.

use crate::ProtocolError;

/// Positive acknowledgement.
pub const ACK_OK: u8 = 0;
/// Recoverable error; a message follows on stderr.
pub const ACK_ERROR: u8 = 1;
/// Fatal error; a message follows on stderr.
pub const ACK_FATAL: u8 = 2;

/// Body terminator.
pub const FRAME_TERMINATOR: u8 = 0;

/// A parsed transfer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Unix permission bits.
    pub mode: u32,
    /// Body length in bytes.
    pub size: u64,
    /// File name (no directory components).
    pub name: String,
}

impl FrameHeader {
    /// Build a header for a file.
    pub fn new(mode: u32, size: u64, name: impl Into<String>) -> Self {
        Self {
            mode: mode & 0o7777,
            size,
            name: name.into(),
        }
    }

    /// Render the header line, including the trailing newline.
    pub fn encode(&self) -> String {
        format!("C{:04o} {} {}\n", self.mode, self.size, self.name)
    }

    /// Parse a header line (trailing newline optional).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches('\n');
        let body = line
            .strip_prefix('C')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;

        let mut parts = body.splitn(3, ' ');
        let mode = parts
            .next()
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        let size = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;

        Ok(Self {
            mode,
            size,
            name: name.to_string(),
        })
    }
}

/// Interpret an ACK byte.
///
/// `Ok(())` for [`ACK_OK`]; [`ProtocolError::UnexpectedAck`] wraps error and
/// out-of-protocol bytes so the caller can collect the diagnostic message.
pub fn check_ack(byte: u8) -> Result<(), ProtocolError> {
    if byte == ACK_OK {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedAck(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader::new(0o644, 1234, "report final.txt");
        let encoded = header.encode();
        assert_eq!(encoded, "C0644 1234 report final.txt\n");
        assert_eq!(FrameHeader::parse(&encoded).unwrap(), header);
    }

    #[test]
    fn executable_mode_survives() {
        let header = FrameHeader::new(0o755, 9, "run.sh");
        assert_eq!(FrameHeader::parse(&header.encode()).unwrap().mode, 0o755);
    }

    #[test]
    fn mode_is_clamped_to_permission_bits() {
        let header = FrameHeader::new(0o100_644, 1, "f");
        assert_eq!(header.mode, 0o644);
    }

    #[test]
    fn zero_size_frames_are_legal() {
        let header = FrameHeader::parse("C0644 0 empty").unwrap();
        assert_eq!(header.size, 0);
    }

    #[test]
    fn garbage_headers_are_rejected() {
        for bad in ["", "D0644 1 f", "C 1 f", "C0644", "C0644 x f", "C0644 1 "] {
            assert!(FrameHeader::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn ack_bytes() {
        assert!(check_ack(ACK_OK).is_ok());
        assert_eq!(check_ack(ACK_ERROR), Err(ProtocolError::UnexpectedAck(1)));
        assert_eq!(check_ack(ACK_FATAL), Err(ProtocolError::UnexpectedAck(2)));
        assert_eq!(check_ack(7), Err(ProtocolError::UnexpectedAck(7)));
    }
}
