//! Escape-sequence decoding for the keyboard stream.
//!
//! Alt+digit arrives as `ESC <digit>`; arrows and friends share the ESC
//! prefix and may fragment across reads. The decoder holds a lone trailing
//! ESC for a short quiescence window; if the continuation does not arrive
//! in time, the ESC flushes as literal input.

use std::time::{Duration, Instant};

/// How long a lone ESC may wait for its continuation.
pub const ESC_QUIESCENCE: Duration = Duration::from_millis(25);

/// One decoded unit of the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedInput {
    /// Literal bytes to forward to the child.
    Bytes(Vec<u8>),
    /// A synthetic shortcut code such as `alt+3`.
    Shortcut(String),
}

/// Stateful decoder for one stdin stream.
#[derive(Debug)]
pub struct ShortcutDecoder {
    held_esc: Option<Instant>,
}

impl Default for ShortcutDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortcutDecoder {
    /// A decoder with no held bytes.
    pub fn new() -> Self {
        Self { held_esc: None }
    }

    /// Feed a chunk of raw input.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodedInput> {
        self.feed_at(chunk, Instant::now())
    }

    /// Drop-in for [`feed`](Self::feed) with an explicit clock, so the
    /// quiescence window is testable.
    pub fn feed_at(&mut self, chunk: &[u8], now: Instant) -> Vec<DecodedInput> {
        let mut out = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut bytes = chunk.iter().copied().peekable();

        // A held ESC either pairs with this chunk or has gone stale.
        if let Some(held_at) = self.held_esc.take() {
            if now.duration_since(held_at) > ESC_QUIESCENCE {
                out.push(DecodedInput::Bytes(vec![0x1b]));
            } else if let Some(&next) = bytes.peek() {
                if next.is_ascii_digit() {
                    bytes.next();
                    out.push(DecodedInput::Shortcut(format!(
                        "alt+{}",
                        char::from(next)
                    )));
                } else {
                    pending.push(0x1b);
                }
            } else {
                self.held_esc = Some(held_at);
                return out;
            }
        }

        while let Some(byte) = bytes.next() {
            if byte != 0x1b {
                pending.push(byte);
                continue;
            }
            match bytes.peek() {
                Some(&next) if next.is_ascii_digit() => {
                    bytes.next();
                    flush(&mut out, &mut pending);
                    out.push(DecodedInput::Shortcut(format!(
                        "alt+{}",
                        char::from(next)
                    )));
                }
                Some(_) => {
                    // CSI / SS3 / alt+letter: not ours, forward verbatim.
                    pending.push(byte);
                }
                None => {
                    // Chunk ends on ESC; hold it for the quiescence window.
                    flush(&mut out, &mut pending);
                    self.held_esc = Some(now);
                }
            }
        }

        flush(&mut out, &mut pending);
        out
    }

    /// Flush a held ESC that has outlived the quiescence window.
    pub fn flush_stale(&mut self) -> Option<DecodedInput> {
        self.flush_stale_at(Instant::now())
    }

    /// Clock-explicit variant of [`flush_stale`](Self::flush_stale).
    pub fn flush_stale_at(&mut self, now: Instant) -> Option<DecodedInput> {
        let held_at = self.held_esc?;
        if now.duration_since(held_at) > ESC_QUIESCENCE {
            self.held_esc = None;
            Some(DecodedInput::Bytes(vec![0x1b]))
        } else {
            None
        }
    }
}

fn flush(out: &mut Vec<DecodedInput>, pending: &mut Vec<u8>) {
    if !pending.is_empty() {
        out.push(DecodedInput::Bytes(std::mem::take(pending)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esc_digit_in_one_chunk_is_a_shortcut() {
        let mut decoder = ShortcutDecoder::new();
        assert_eq!(
            decoder.feed(b"\x1b3"),
            vec![DecodedInput::Shortcut("alt+3".into())]
        );
    }

    #[test]
    fn esc_digit_split_across_chunks_is_a_shortcut() {
        let mut decoder = ShortcutDecoder::new();
        let start = Instant::now();
        assert!(decoder.feed_at(b"\x1b", start).is_empty());
        assert_eq!(
            decoder.feed_at(b"4", start + Duration::from_millis(5)),
            vec![DecodedInput::Shortcut("alt+4".into())]
        );
    }

    #[test]
    fn stale_esc_flushes_as_literal() {
        let mut decoder = ShortcutDecoder::new();
        let start = Instant::now();
        assert!(decoder.feed_at(b"\x1b", start).is_empty());
        let late = start + Duration::from_millis(100);
        assert_eq!(
            decoder.feed_at(b"5", late),
            vec![
                DecodedInput::Bytes(vec![0x1b]),
                DecodedInput::Bytes(b"5".to_vec()),
            ]
        );
    }

    #[test]
    fn arrow_sequences_forward_verbatim() {
        let mut decoder = ShortcutDecoder::new();
        assert_eq!(
            decoder.feed(b"\x1b[A"),
            vec![DecodedInput::Bytes(b"\x1b[A".to_vec())]
        );
    }

    #[test]
    fn plain_text_passes_through() {
        let mut decoder = ShortcutDecoder::new();
        assert_eq!(
            decoder.feed(b"ls -la\r"),
            vec![DecodedInput::Bytes(b"ls -la\r".to_vec())]
        );
    }

    #[test]
    fn text_around_a_shortcut_splits_cleanly() {
        let mut decoder = ShortcutDecoder::new();
        assert_eq!(
            decoder.feed(b"ab\x1b7cd"),
            vec![
                DecodedInput::Bytes(b"ab".to_vec()),
                DecodedInput::Shortcut("alt+7".into()),
                DecodedInput::Bytes(b"cd".to_vec()),
            ]
        );
    }

    #[test]
    fn flush_stale_respects_the_window() {
        let mut decoder = ShortcutDecoder::new();
        let start = Instant::now();
        decoder.feed_at(b"\x1b", start);
        assert_eq!(decoder.flush_stale_at(start + Duration::from_millis(10)), None);
        assert_eq!(
            decoder.flush_stale_at(start + Duration::from_millis(50)),
            Some(DecodedInput::Bytes(vec![0x1b]))
        );
        assert_eq!(decoder.flush_stale_at(start + Duration::from_millis(60)), None);
    }
}
