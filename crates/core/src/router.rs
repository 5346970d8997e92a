//! The keyboard input router, active whenever no slot owns stdin.

use std::io::Read;

use mux::{DecodedInput, ShortcutDecoder};
use tracing::debug;

use crate::CoreError;

/// What the user asked the menu to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    /// Ctrl+C: restore the terminal and exit.
    Quit,
    /// Ctrl+R: stop the watcher gracefully.
    StopWatcher,
    /// `R`: reload the configuration.
    ReloadConfig,
    /// `A`: deploy the agent.
    DeployAgent,
    /// `S`: show cache statistics.
    ShowStats,
    /// Alt+1: redraw the main menu.
    MainMenu,
    /// Alt+2..=9: enter (or open) that slot.
    Slot(u8),
}

/// Reads single keys and escape sequences off the raw-mode tty.
///
/// The router must only run while no bridge owns stdin; the controller's
/// focus hand-off guarantees the ordering.
#[derive(Debug, Default)]
pub struct InputRouter {
    decoder: ShortcutDecoder,
}

impl InputRouter {
    /// A fresh router.
    pub fn new() -> Self {
        Self {
            decoder: ShortcutDecoder::new(),
        }
    }

    /// Block until the user issues a recognized action.
    ///
    /// Arrow keys and other unbound sequences are swallowed so they leave
    /// no artifacts on the menu screen.
    pub fn read_action(&mut self) -> Result<RouterAction, CoreError> {
        let mut buf = [0u8; 64];
        loop {
            let n = std::io::stdin()
                .read(&mut buf)
                .map_err(|source| CoreError::Io {
                    path: std::path::PathBuf::from("<stdin>"),
                    source,
                })?;
            if n == 0 {
                return Ok(RouterAction::Quit);
            }

            if let Some(DecodedInput::Bytes(stale)) = self.decoder.flush_stale() {
                if let Some(action) = Self::action_for_bytes(&stale) {
                    return Ok(action);
                }
            }
            for item in self.decoder.feed(&buf[..n]) {
                match item {
                    DecodedInput::Shortcut(code) => {
                        if let Some(action) = Self::action_for_shortcut(&code) {
                            return Ok(action);
                        }
                    }
                    DecodedInput::Bytes(bytes) => {
                        if let Some(action) = Self::action_for_bytes(&bytes) {
                            return Ok(action);
                        }
                    }
                }
            }
        }
    }

    fn action_for_shortcut(code: &str) -> Option<RouterAction> {
        let digit = code.strip_prefix("alt+")?.parse::<u8>().ok()?;
        match digit {
            1 => Some(RouterAction::MainMenu),
            2..=9 => Some(RouterAction::Slot(digit)),
            _ => None,
        }
    }

    fn action_for_bytes(bytes: &[u8]) -> Option<RouterAction> {
        // Escape sequences that are not alt+digit (arrows, function keys)
        // are swallowed whole.
        if bytes.first() == Some(&0x1b) {
            debug!(len = bytes.len(), "swallowing unbound escape sequence");
            return None;
        }
        for byte in bytes {
            let action = match byte {
                0x03 => Some(RouterAction::Quit),
                0x12 => Some(RouterAction::StopWatcher),
                b'R' | b'r' => Some(RouterAction::ReloadConfig),
                b'A' | b'a' => Some(RouterAction::DeployAgent),
                b'S' | b's' => Some(RouterAction::ShowStats),
                _ => None,
            };
            if action.is_some() {
                return action;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_commands_map() {
        assert_eq!(
            InputRouter::action_for_bytes(&[0x03]),
            Some(RouterAction::Quit)
        );
        assert_eq!(
            InputRouter::action_for_bytes(&[0x12]),
            Some(RouterAction::StopWatcher)
        );
        assert_eq!(
            InputRouter::action_for_bytes(b"r"),
            Some(RouterAction::ReloadConfig)
        );
        assert_eq!(
            InputRouter::action_for_bytes(b"A"),
            Some(RouterAction::DeployAgent)
        );
        assert_eq!(
            InputRouter::action_for_bytes(b"s"),
            Some(RouterAction::ShowStats)
        );
        assert_eq!(InputRouter::action_for_bytes(b"x"), None);
    }

    #[test]
    fn alt_digit_codes_map_to_menu_and_slots() {
        assert_eq!(
            InputRouter::action_for_shortcut("alt+1"),
            Some(RouterAction::MainMenu)
        );
        assert_eq!(
            InputRouter::action_for_shortcut("alt+2"),
            Some(RouterAction::Slot(2))
        );
        assert_eq!(
            InputRouter::action_for_shortcut("alt+9"),
            Some(RouterAction::Slot(9))
        );
        assert_eq!(InputRouter::action_for_shortcut("alt+0"), None);
    }

    #[test]
    fn arrow_sequences_are_swallowed() {
        assert_eq!(InputRouter::action_for_bytes(b"\x1b[A"), None);
        assert_eq!(InputRouter::action_for_bytes(b"\x1b[D"), None);
    }
}
