//! The controller entry point and menu loop.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use filters::IgnoreCache;
use mux::{FocusOutcome, Multiplexer};
use store::FileCache;
use term::Terminal;
use tracing::{info, warn};
use transport::Transport;

use crate::monitor::AgentMonitor;
use crate::router::{InputRouter, RouterAction};
use crate::sync::SyncCoordinator;
use crate::watcher::{FsWatcher, WatchSettings};
use crate::{Config, CoreError};

/// Load everything, run the menu loop, and return the process exit code.
pub fn run(config_path: Option<PathBuf>) -> i32 {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(filters::CONFIG_FILE));
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("tether: {err}");
            return 1;
        }
    };

    let scratch = config.watch_root().join(filters::SYNC_TEMP_DIR);
    let _log_guard = match logging::init(&scratch) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("tether: logging: {err}");
            return 1;
        }
    };

    match Controller::bootstrap(config_path, config) {
        Ok(controller) => controller.main_loop(),
        Err(err) => {
            eprintln!("tether: {err}");
            1
        }
    }
}

struct Controller {
    config_path: PathBuf,
    config: Arc<RwLock<Config>>,
    transport: Arc<Transport>,
    cache: Arc<FileCache>,
    ignore: Arc<RwLock<Arc<IgnoreCache>>>,
    watcher: Mutex<Option<FsWatcher>>,
    coordinator: Arc<SyncCoordinator>,
    monitor: Arc<AgentMonitor>,
    mux: Arc<Multiplexer>,
    shutdown: Arc<AtomicBool>,
    started_slots: Mutex<HashSet<u8>>,
}

impl Controller {
    fn bootstrap(config_path: PathBuf, config: Config) -> Result<Arc<Self>, CoreError> {
        let root = config.watch_root();
        let scratch = root.join(filters::SYNC_TEMP_DIR);

        let cache = Arc::new(FileCache::open(&scratch.join("file_cache.db"))?);
        if config.reset_cache {
            info!("reset_cache set, clearing file cache");
            cache.reset()?;
        }

        let ignore = Arc::new(RwLock::new(Arc::new(IgnoreCache::new(
            &root,
            &config.ignore_config(),
        )?)));

        let transport = Arc::new(Transport::new(config.endpoint()));
        if let Err(err) = transport.connect() {
            warn!(%err, "initial connect failed; will retry on demand");
        }

        let config = Arc::new(RwLock::new(config));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&cache),
            Arc::clone(&config),
        ));
        let shutdown = Arc::new(AtomicBool::new(false));
        let monitor = AgentMonitor::new(
            Arc::clone(&transport),
            Arc::clone(&coordinator),
            Arc::clone(&config),
            Arc::clone(&shutdown),
        );

        let settings = {
            let config = config.read().expect("config poisoned");
            WatchSettings {
                trigger: config.devsync.trigger_perm.clone(),
                ..WatchSettings::default()
            }
        };
        let watcher = FsWatcher::start(root, Arc::clone(&ignore), settings)?;

        let controller = Arc::new(Self {
            config_path,
            config,
            transport,
            cache,
            ignore,
            watcher: Mutex::new(Some(watcher)),
            coordinator,
            monitor,
            mux: Multiplexer::new(),
            shutdown,
            started_slots: Mutex::new(HashSet::new()),
        });

        controller.spawn_sync_thread()?;
        if let Err(err) = controller.monitor.deploy() {
            warn!(%err, "agent deploy failed; press A to retry");
        }
        controller
            .monitor
            .spawn()
            .map_err(|source| CoreError::Io {
                path: PathBuf::from("<agent-monitor>"),
                source,
            })?;

        Ok(controller)
    }

    /// Local watcher events drain into the coordinator off the main thread.
    fn spawn_sync_thread(self: &Arc<Self>) -> Result<(), CoreError> {
        let events = {
            let watcher = self.watcher.lock().expect("watcher poisoned");
            watcher
                .as_ref()
                .map(|w| w.events().clone())
                .ok_or_else(|| CoreError::Config("watcher not running".into()))?
        };
        let controller = Arc::clone(self);
        std::thread::Builder::new()
            .name("sync".into())
            .spawn(move || loop {
                if controller.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match events.recv_timeout(Duration::from_millis(500)) {
                    Ok(event) => controller.coordinator.handle_event(&event),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|source| CoreError::Io {
                path: PathBuf::from("<sync>"),
                source,
            })?;
        Ok(())
    }

    fn main_loop(self: Arc<Self>) -> i32 {
        let mut router = InputRouter::new();
        loop {
            self.show_menu();
            let action = {
                let raw = match term::enter_raw() {
                    Ok(guard) => guard,
                    Err(err) => {
                        // Raw-mode failure at the menu is fatal: without it
                        // the router cannot read single keys.
                        eprintln!("tether: {err}");
                        self.shutdown_sequence();
                        return 1;
                    }
                };
                let action = router.read_action();
                raw.release();
                action
            };

            match action {
                Ok(RouterAction::Quit) => {
                    self.shutdown_sequence();
                    return 0;
                }
                Ok(RouterAction::StopWatcher) => self.stop_watcher(),
                Ok(RouterAction::ReloadConfig) => self.reload_config(),
                Ok(RouterAction::DeployAgent) => match self.monitor.deploy() {
                    Ok(()) => Terminal::global().println("agent deployed"),
                    Err(err) => Terminal::global().println(&format!("! deploy failed: {err}")),
                },
                Ok(RouterAction::ShowStats) => self.show_stats(),
                Ok(RouterAction::MainMenu) => {}
                Ok(RouterAction::Slot(slot)) => self.enter_slot(slot),
                Err(err) => {
                    warn!(%err, "input router failed");
                    self.shutdown_sequence();
                    return 1;
                }
            }
        }
    }

    fn show_menu(&self) {
        let config = self.config.read().expect("config poisoned");
        let host = format!(
            "{}@{}:{}",
            config.devsync.auth.username, config.devsync.auth.host, config.devsync.auth.port
        );
        let remote = config.remote_root().to_string();
        drop(config);

        let mut lines = vec![
            format!("tether - {host} -> {remote}"),
            String::new(),
            "  alt+2      shell slot".to_string(),
            "  alt+3..9   command slots (prefix with ! for a local command)".to_string(),
            "  R reload   A deploy   S stats   ctrl+r stop watcher   ctrl+c quit".to_string(),
            String::new(),
        ];
        let slots = self.mux.list_slots();
        if slots.is_empty() {
            lines.push("  no open sessions".to_string());
        } else {
            for slot in slots {
                let active = self.mux.active_slot() == Some(slot);
                lines.push(format!(
                    "  [{slot}] session{}",
                    if active { " (active)" } else { "" }
                ));
            }
        }
        Terminal::global().print_block(&lines.join("\n"), true);
    }

    fn show_stats(&self) {
        match self.cache.stats() {
            Ok((count, bytes)) => Terminal::global().println(&format!(
                "cache: {count} files, {bytes} bytes tracked"
            )),
            Err(err) => Terminal::global().println(&format!("! cache stats failed: {err}")),
        }
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self.watcher.lock().expect("watcher poisoned").take() {
            watcher.stop();
            Terminal::global().println("watcher stopped (reload config to restart)");
        } else {
            Terminal::global().println("watcher already stopped");
        }
    }

    /// Reload the config; a bad file keeps the previous snapshot running.
    fn reload_config(self: &Arc<Self>) {
        let fresh = match Config::load(&self.config_path) {
            Ok(config) => config,
            Err(err) => {
                Terminal::global().println(&format!("! reload failed, keeping previous: {err}"));
                return;
            }
        };

        let new_ignore = match IgnoreCache::new(&fresh.watch_root(), &fresh.ignore_config()) {
            Ok(cache) => Arc::new(cache),
            Err(err) => {
                Terminal::global().println(&format!("! reload failed, keeping previous: {err}"));
                return;
            }
        };

        *self.ignore.write().expect("ignore cache poisoned") = new_ignore;
        let settings = WatchSettings {
            trigger: fresh.devsync.trigger_perm.clone(),
            ..WatchSettings::default()
        };
        *self.config.write().expect("config poisoned") = fresh;

        let mut restarted = false;
        {
            let mut watcher = self.watcher.lock().expect("watcher poisoned");
            match watcher.as_ref() {
                Some(active) => active.reload(settings),
                None => {
                    // Ctrl+R stopped it earlier; a reload brings it back.
                    let root = self.config.read().expect("config poisoned").watch_root();
                    match FsWatcher::start(root, Arc::clone(&self.ignore), settings) {
                        Ok(fresh) => {
                            *watcher = Some(fresh);
                            restarted = true;
                        }
                        Err(err) => warn!(%err, "watcher restart failed"),
                    }
                }
            }
        }
        if restarted {
            // The previous drain thread ended when the old queue closed.
            if let Err(err) = self.spawn_sync_thread() {
                warn!(%err, "sync drain restart failed");
            }
        }

        if let Err(err) = self.monitor.deploy() {
            warn!(%err, "republishing remote config failed");
        }
        Terminal::global().println("config reloaded");
    }

    /// Enter a slot, following alt+N hand-offs until the user returns to
    /// the menu.
    fn enter_slot(self: &Arc<Self>, slot: u8) {
        let mut current = slot;
        loop {
            if let Err(err) = self.ensure_slot_open(current) {
                Terminal::global().println(&format!("! slot {current}: {err}"));
                return;
            }

            let already_started = self
                .started_slots
                .lock()
                .expect("started slots poisoned")
                .contains(&current);
            let pending: Arc<Mutex<Option<u8>>> = Arc::new(Mutex::new(None));
            let switch_target = Arc::clone(&pending);
            let on_switch: Arc<dyn Fn(u8) + Send + Sync> = Arc::new(move |target| {
                *switch_target.lock().expect("switch target poisoned") = Some(target);
            });

            self.started_slots
                .lock()
                .expect("started slots poisoned")
                .insert(current);

            match self.mux.focus(current, already_started, on_switch) {
                Ok(FocusOutcome::SessionEnded) => {
                    self.started_slots
                        .lock()
                        .expect("started slots poisoned")
                        .remove(&current);
                    return;
                }
                Ok(FocusOutcome::Menu) => {
                    let target = pending.lock().expect("switch target poisoned").take();
                    match target {
                        Some(next) if (2..=9).contains(&next) => {
                            current = next;
                        }
                        _ => return,
                    }
                }
                Err(err) => {
                    // Raw-mode or pty failure: fatal for this focus cycle
                    // only.
                    Terminal::global().println(&format!("! slot {current}: {err}"));
                    self.started_slots
                        .lock()
                        .expect("started slots poisoned")
                        .remove(&current);
                    return;
                }
            }
        }
    }

    fn ensure_slot_open(&self, slot: u8) -> Result<(), CoreError> {
        if self.mux.has_slot(slot) {
            return Ok(());
        }

        let command = if slot == mux::SHELL_SLOT {
            None
        } else {
            match self.prompt_command(slot) {
                Some(command) => Some(command),
                None => return Err(CoreError::Config("no command given".into())),
            }
        };

        let endpoint = self.config.read().expect("config poisoned").endpoint();
        match command {
            Some(line) if line.starts_with('!') => {
                let local = line.trim_start_matches('!').trim().to_string();
                self.mux.open_local_slot(slot, Some(local))?;
            }
            other => {
                self.mux.open_remote_slot(slot, endpoint, other)?;
            }
        }

        // Session output is logged (ANSI-stripped) whether or not the slot
        // is on screen.
        let scratch = self
            .config
            .read()
            .expect("config poisoned")
            .watch_root()
            .join(filters::SYNC_TEMP_DIR);
        match logging::SessionLogSink::create(&scratch, &format!("slot-{slot}")) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                self.mux.set_output_tap_for_slot(
                    slot,
                    Arc::new(move |bytes, _is_stderr| sink.write(bytes)),
                )?;
            }
            Err(err) => warn!(%err, "session log unavailable"),
        }
        Ok(())
    }

    /// A one-line cooked-mode prompt for the slot's command.
    fn prompt_command(&self, slot: u8) -> Option<String> {
        Terminal::global().print(&format!("command for slot {slot} (empty cancels): "));
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// The coordinated teardown behind Ctrl+C.
    fn shutdown_sequence(&self) {
        Terminal::global().println("shutting down...");
        self.shutdown.store(true, Ordering::SeqCst);

        for slot in self.mux.list_slots() {
            self.mux.close_slot(slot);
        }
        if let Some(watcher) = self.watcher.lock().expect("watcher poisoned").take() {
            watcher.stop();
        }
        self.monitor.kill_remote_agent();
        self.transport.stop_persistent_session();
        self.transport.close();
        Terminal::global().show_cursor();
        info!("shutdown complete");
    }
}
