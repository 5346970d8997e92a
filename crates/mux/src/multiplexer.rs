//! Slot ownership and keyboard focus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};
use transport::Endpoint;

use crate::bridge::{Bridge, LocalShell, RemoteShell};
use crate::{MuxError, OutputTap, MAX_SLOT, MENU_SLOT, SHELL_SLOT};

/// One occupied slot.
pub struct PtySession {
    /// The slot number, 2..=9.
    pub slot: u8,
    /// The command the session was opened with, if any.
    pub command: Option<String>,
    /// When the slot was opened.
    pub created_at: SystemTime,
    bridge: Arc<Bridge>,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("slot", &self.slot)
            .field("command", &self.command)
            .field("state", &self.bridge.state())
            .finish()
    }
}

/// Why a focus cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    /// The user asked for the menu (or another slot); the session is paused.
    Menu,
    /// The session's child exited.
    SessionEnded,
}

enum FocusSignal {
    Pause,
    Exited,
}

/// Owner of all terminal sessions and the single keyboard focus.
///
/// External callers hold only slot numbers; the bridge objects live here.
/// At most one slot is focused at a time, and while it is, its bridge owns
/// stdin exclusively.
pub struct Multiplexer {
    sessions: RwLock<HashMap<u8, PtySession>>,
    active: Mutex<Option<u8>>,
    // Per-focus-cycle signal sender. Constructed under this mutex; the focus
    // teardown is the one place that drops it.
    pending: Mutex<Option<Sender<FocusSignal>>>,
}

impl Multiplexer {
    /// An empty multiplexer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            active: Mutex::new(None),
            pending: Mutex::new(None),
        })
    }

    /// Open a local shell session in `slot`. The bridge is constructed but
    /// not started; IO begins on first focus.
    pub fn open_local_slot(&self, slot: u8, command: Option<String>) -> Result<(), MuxError> {
        self.insert(slot, Bridge::Local(LocalShell::new(command.clone())), command)
    }

    /// Open an SSH-backed session in `slot`. The bridge is constructed but
    /// not started; IO begins on first focus.
    pub fn open_remote_slot(
        &self,
        slot: u8,
        endpoint: Endpoint,
        command: Option<String>,
    ) -> Result<(), MuxError> {
        self.insert(
            slot,
            Bridge::Remote(RemoteShell::new(endpoint, command.clone())),
            command,
        )
    }

    fn insert(&self, slot: u8, bridge: Bridge, command: Option<String>) -> Result<(), MuxError> {
        if !(SHELL_SLOT..=MAX_SLOT).contains(&slot) {
            return Err(MuxError::ReservedSlot(slot));
        }
        let mut sessions = self.sessions.write().expect("session map poisoned");
        if sessions.contains_key(&slot) {
            return Err(MuxError::SlotOccupied(slot));
        }
        sessions.insert(
            slot,
            PtySession {
                slot,
                command,
                created_at: SystemTime::now(),
                bridge: Arc::new(bridge),
            },
        );
        debug!(slot, "slot opened");
        Ok(())
    }

    /// Whether `slot` holds a session.
    pub fn has_slot(&self, slot: u8) -> bool {
        self.sessions
            .read()
            .expect("session map poisoned")
            .contains_key(&slot)
    }

    /// Occupied slots, ascending.
    pub fn list_slots(&self) -> Vec<u8> {
        let mut slots: Vec<u8> = self
            .sessions
            .read()
            .expect("session map poisoned")
            .keys()
            .copied()
            .collect();
        slots.sort_unstable();
        slots
    }

    /// The focused slot, if any.
    pub fn active_slot(&self) -> Option<u8> {
        *self.active.lock().expect("active slot poisoned")
    }

    /// Install an output tap (e.g. a session log sink) on `slot`.
    pub fn set_output_tap_for_slot(&self, slot: u8, tap: OutputTap) -> Result<(), MuxError> {
        self.bridge_for(slot)?.set_output_tap(tap);
        Ok(())
    }

    /// Pause `slot` without changing focus bookkeeping.
    pub fn pause_slot(&self, slot: u8) -> Result<(), MuxError> {
        self.bridge_for(slot)?.pause();
        Ok(())
    }

    /// Resume `slot`'s IO forwarding.
    pub fn resume_slot(&self, slot: u8) -> Result<(), MuxError> {
        self.bridge_for(slot)?.resume()
    }

    /// Close `slot`, dropping the multiplexer's bridge reference.
    ///
    /// Idempotent: returns whether a session was actually there.
    pub fn close_slot(&self, slot: u8) -> bool {
        let removed = self
            .sessions
            .write()
            .expect("session map poisoned")
            .remove(&slot);
        let Some(session) = removed else {
            return false;
        };

        let mut active = self.active.lock().expect("active slot poisoned");
        if *active == Some(slot) {
            *active = None;
        }
        drop(active);

        session.bridge.close();
        debug!(slot, "slot closed");
        true
    }

    /// Route the keyboard into `slot` until the user leaves or the session
    /// ends.
    ///
    /// `already_exists` picks resume-vs-start. `on_switch` is invoked with
    /// the target slot (1 for the menu) when the user alt-switches away; the
    /// caller acts on it after `focus` returns [`FocusOutcome::Menu`].
    pub fn focus(
        self: &Arc<Self>,
        slot: u8,
        already_exists: bool,
        on_switch: Arc<dyn Fn(u8) + Send + Sync>,
    ) -> Result<FocusOutcome, MuxError> {
        let bridge = self.bridge_for(slot)?;
        *self.active.lock().expect("active slot poisoned") = Some(slot);

        let (signal_tx, signal_rx) = bounded::<FocusSignal>(8);
        *self.pending.lock().expect("pending channel poisoned") = Some(signal_tx.clone());

        self.install_shortcut_listener(slot, &bridge, &on_switch, &signal_tx);
        self.install_exit_listener(slot, &bridge, &signal_tx);
        drop(signal_tx);

        if already_exists {
            bridge.resume()?;
            self.print_status_block(slot);
        } else {
            let worker = Arc::clone(&bridge);
            std::thread::Builder::new()
                .name(format!("slot-{slot}"))
                .spawn(move || {
                    if let Err(err) = worker.start() {
                        warn!(slot, %err, "session failed to start");
                        // A failed start never reaches the bridge's own exit
                        // path, so close it here to release listeners.
                        worker.close();
                    }
                })?;
        }

        let outcome = self.pump_signals(&signal_rx, &bridge);

        *self.active.lock().expect("active slot poisoned") = None;
        // Sole closer of the per-focus channel.
        self.pending.lock().expect("pending channel poisoned").take();
        Ok(outcome)
    }

    fn pump_signals(&self, rx: &Receiver<FocusSignal>, bridge: &Arc<Bridge>) -> FocusOutcome {
        match rx.recv() {
            Ok(FocusSignal::Pause) => {
                term::Terminal::global()
                    .println("\r\npress any key to return to menu");
                bridge.pause();
                FocusOutcome::Menu
            }
            Ok(FocusSignal::Exited) | Err(_) => {
                term::Terminal::global()
                    .println("\r\nsession ended - press any key to return to menu");
                FocusOutcome::SessionEnded
            }
        }
    }

    fn install_shortcut_listener(
        self: &Arc<Self>,
        slot: u8,
        bridge: &Arc<Bridge>,
        on_switch: &Arc<dyn Fn(u8) + Send + Sync>,
        signal_tx: &Sender<FocusSignal>,
    ) {
        let mux = Arc::downgrade(self);
        let on_switch = Arc::clone(on_switch);
        let signal_tx = signal_tx.clone();
        bridge.set_shortcut_tap(Arc::new(move |code| {
            let Some(target) = code.strip_prefix("alt+").and_then(|d| d.parse::<u8>().ok())
            else {
                return;
            };
            if target == slot {
                return;
            }
            match target {
                0 => {
                    // Close the current slot. Dispatched off the stdin path;
                    // close joins pumps and must not run on them.
                    if let Some(mux) = mux.upgrade() {
                        std::thread::spawn(move || {
                            mux.close_slot(slot);
                        });
                    }
                }
                MENU_SLOT => {
                    on_switch(MENU_SLOT);
                    let _ = signal_tx.try_send(FocusSignal::Pause);
                }
                target if target <= MAX_SLOT => {
                    on_switch(target);
                    let _ = signal_tx.try_send(FocusSignal::Pause);
                }
                _ => {}
            }
        }));
    }

    fn install_exit_listener(
        self: &Arc<Self>,
        slot: u8,
        bridge: &Arc<Bridge>,
        signal_tx: &Sender<FocusSignal>,
    ) {
        let mux = Arc::downgrade(self);
        let signal_tx = signal_tx.clone();
        bridge.set_on_exit(Box::new(move || {
            let _ = signal_tx.try_send(FocusSignal::Exited);
            // Never call back into the multiplexer synchronously: the
            // listener runs inside bridge teardown, and close_slot takes the
            // session write lock.
            if let Some(mux) = mux.upgrade() {
                std::thread::spawn(move || {
                    mux.close_slot(slot);
                });
            }
        }));
    }

    fn print_status_block(&self, slot: u8) {
        let sessions = self.sessions.read().expect("session map poisoned");
        if let Some(session) = sessions.get(&slot) {
            let command = session.command.as_deref().unwrap_or("shell");
            term::Terminal::global().print_block(
                &format!("-- slot {slot} resumed: {command} (alt+1 menu, alt+0 close) --"),
                false,
            );
        }
    }

    fn bridge_for(&self, slot: u8) -> Result<Arc<Bridge>, MuxError> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .get(&slot)
            .map(|session| Arc::clone(&session.bridge))
            .ok_or(MuxError::SlotVacant(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "example.invalid".into(),
            port: 22,
            username: "dev".into(),
            private_key: None,
            password: None,
        }
    }

    #[test]
    fn slots_open_list_and_close() {
        let mux = Multiplexer::new();
        mux.open_local_slot(3, Some("htop".into())).unwrap();
        mux.open_remote_slot(4, endpoint(), None).unwrap();

        assert!(mux.has_slot(3));
        assert_eq!(mux.list_slots(), vec![3, 4]);

        assert!(mux.close_slot(3));
        assert!(!mux.close_slot(3));
        assert_eq!(mux.list_slots(), vec![4]);
    }

    #[test]
    fn occupied_slots_reject_reopen() {
        let mux = Multiplexer::new();
        mux.open_local_slot(5, None).unwrap();
        assert!(matches!(
            mux.open_local_slot(5, None).unwrap_err(),
            MuxError::SlotOccupied(5)
        ));
    }

    #[test]
    fn menu_slot_and_out_of_range_are_reserved() {
        let mux = Multiplexer::new();
        assert!(matches!(
            mux.open_local_slot(1, None).unwrap_err(),
            MuxError::ReservedSlot(1)
        ));
        assert!(matches!(
            mux.open_local_slot(10, None).unwrap_err(),
            MuxError::ReservedSlot(10)
        ));
        assert!(matches!(
            mux.open_local_slot(0, None).unwrap_err(),
            MuxError::ReservedSlot(0)
        ));
    }

    #[test]
    fn vacant_slot_operations_report_vacancy() {
        let mux = Multiplexer::new();
        assert!(matches!(
            mux.pause_slot(7).unwrap_err(),
            MuxError::SlotVacant(7)
        ));
        assert!(matches!(
            mux.resume_slot(7).unwrap_err(),
            MuxError::SlotVacant(7)
        ));
        assert!(matches!(
            mux.set_output_tap_for_slot(7, Arc::new(|_, _| {})).unwrap_err(),
            MuxError::SlotVacant(7)
        ));
    }

    #[test]
    fn close_slot_fires_the_exit_listener_once() {
        let mux = Multiplexer::new();
        mux.open_remote_slot(6, endpoint(), None).unwrap();

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let sessions = mux.sessions.read().unwrap();
            let seen = Arc::clone(&count);
            sessions.get(&6).unwrap().bridge.set_on_exit(Box::new(move || {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }

        assert!(mux.close_slot(6));
        assert!(!mux.close_slot(6));
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!mux.has_slot(6));
    }

    #[test]
    fn no_slot_is_active_initially() {
        let mux = Multiplexer::new();
        assert_eq!(mux.active_slot(), None);
    }
}
