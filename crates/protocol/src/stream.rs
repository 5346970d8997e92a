//! Partial-line buffering for chunked stream reads.

use memchr::memchr;

/// Reassembles complete lines from arbitrarily sliced byte chunks.
///
/// The remote channel delivers agent stdout in whatever chunk sizes the
/// transport produces; a line may arrive split across chunks or several
/// lines may share one chunk. `push` returns every newly completed line and
/// carries the unterminated tail until the next chunk (or [`finish`]).
///
/// [`finish`]: LineAssembler::finish
#[derive(Debug, Default)]
pub struct LineAssembler {
    carry: Vec<u8>,
}

impl LineAssembler {
    /// A fresh assembler with no carried bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the lines completed by it, newline-stripped.
    ///
    /// Non-UTF-8 sequences are replaced lossily; paths on the wire are
    /// expected to be valid UTF-8 but a corrupt chunk must not wedge the
    /// stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = memchr(b'\n', &self.carry[start..]) {
            let end = start + offset;
            lines.push(decode(&self.carry[start..end]));
            start = end + 1;
        }
        self.carry.drain(..start);
        lines
    }

    /// Flush the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let line = decode(&self.carry);
        self.carry.clear();
        Some(line)
    }

    /// Bytes currently carried while waiting for a newline.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn decode(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\r').to_string()
}
