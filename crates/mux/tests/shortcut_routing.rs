//! Shortcut decoding as the stdin pump sees it: mixed typing, fragmented
//! escapes, and key-repeat storms.

use std::time::{Duration, Instant};

use mux::{DecodedInput, ShortcutDecoder};

#[test]
fn a_typing_session_with_one_switch() {
    let mut decoder = ShortcutDecoder::new();
    let mut forwarded: Vec<u8> = Vec::new();
    let mut shortcuts: Vec<String> = Vec::new();

    for chunk in [&b"vim sr"[..], b"c/main.rs\r", b"\x1b4", b"ls\r"] {
        for item in decoder.feed(chunk) {
            match item {
                DecodedInput::Bytes(bytes) => forwarded.extend_from_slice(&bytes),
                DecodedInput::Shortcut(code) => shortcuts.push(code),
            }
        }
    }

    assert_eq!(forwarded, b"vim src/main.rs\rls\r");
    assert_eq!(shortcuts, vec!["alt+4"]);
}

#[test]
fn escape_fragmentation_across_read_boundaries() {
    let mut decoder = ShortcutDecoder::new();
    let start = Instant::now();

    // ESC lands alone at a chunk boundary, digit follows within the window.
    assert!(decoder.feed_at(b"echo hi\r\x1b", start).len() == 1);
    let items = decoder.feed_at(b"3", start + Duration::from_millis(10));
    assert_eq!(items, vec![DecodedInput::Shortcut("alt+3".into())]);
}

#[test]
fn vim_style_escape_then_pause_then_digit_stays_literal() {
    let mut decoder = ShortcutDecoder::new();
    let start = Instant::now();

    decoder.feed_at(b"\x1b", start);
    // The user paused; this is "ESC, then the digit 0", not alt+0.
    let items = decoder.feed_at(b"0", start + Duration::from_millis(200));
    assert_eq!(
        items,
        vec![
            DecodedInput::Bytes(vec![0x1b]),
            DecodedInput::Bytes(b"0".to_vec()),
        ]
    );
}

#[test]
fn arrows_and_function_keys_are_not_shortcuts() {
    let mut decoder = ShortcutDecoder::new();
    let mut shortcuts = 0;
    for seq in [&b"\x1b[A"[..], b"\x1b[B", b"\x1bOP", b"\x1b[1;5C"] {
        for item in decoder.feed(seq) {
            if matches!(item, DecodedInput::Shortcut(_)) {
                shortcuts += 1;
            }
        }
    }
    assert_eq!(shortcuts, 0);
}
