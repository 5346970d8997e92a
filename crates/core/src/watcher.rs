//! The local filesystem watcher.
//!
//! Raw notifications funnel through ignore rules, per-kind gating, and a
//! `(path, kind)` debounce window into a bounded queue the sync thread
//! drains. The queue never blocks the notify backend: when full, the oldest
//! queued event is shed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use filters::{IgnoreCache, IGNORE_FILE};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use protocol::EventKind;
use tracing::{debug, warn};

use crate::config::TriggerPerm;
use crate::{paths, CoreError};

/// Capacity of the outgoing event queue.
pub const QUEUE_CAPACITY: usize = 100;

/// Default `(path, kind)` suppression window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// How long `stop` waits for the pump to acknowledge.
pub const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// One debounced, ignore-filtered local file event.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Watch-root-relative path, forward slashes.
    pub rel: String,
    /// Absolute local path.
    pub abs: PathBuf,
    /// Normalized kind.
    pub kind: EventKind,
    /// Whether the path is (or was) a directory.
    pub is_dir: bool,
    /// When the watcher accepted the event.
    pub timestamp: SystemTime,
}

/// Reloadable watcher settings.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Per-kind gating.
    pub trigger: TriggerPerm,
    /// Debounce window.
    pub debounce: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            trigger: TriggerPerm::default(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Watches one local tree and feeds the sync queue.
pub struct FsWatcher {
    events: Receiver<FileEvent>,
    stopped: AtomicBool,
    stop_tx: Sender<()>,
    ack_rx: Receiver<()>,
    settings: Arc<RwLock<WatchSettings>>,
    // Dropping the backend watcher is what stops notifications; keep it
    // until stop.
    backend: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl FsWatcher {
    /// Start watching `root` recursively.
    pub fn start(
        root: PathBuf,
        ignore: Arc<RwLock<Arc<IgnoreCache>>>,
        settings: WatchSettings,
    ) -> Result<Self, CoreError> {
        let (raw_tx, raw_rx) = bounded::<notify::Result<notify::Event>>(1024);
        let (event_tx, event_rx) = bounded::<FileEvent>(QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ack_tx, ack_rx) = bounded::<()>(1);

        let mut backend = RecommendedWatcher::new(
            move |event| {
                let _ = raw_tx.try_send(event);
            },
            notify::Config::default(),
        )?;
        backend.watch(&root, RecursiveMode::Recursive)?;

        let settings = Arc::new(RwLock::new(settings));
        let pump_settings = Arc::clone(&settings);
        let shed_rx = event_rx.clone();
        std::thread::Builder::new()
            .name("fs-watcher".into())
            .spawn(move || {
                let queue = EventQueue {
                    tx: event_tx,
                    shed_rx,
                };
                pump(&root, &ignore, &pump_settings, &raw_rx, &queue, &stop_rx);
                let _ = ack_tx.try_send(());
            })
            .map_err(|source| CoreError::Io {
                path: PathBuf::from("<fs-watcher>"),
                source,
            })?;

        Ok(Self {
            events: event_rx,
            stopped: AtomicBool::new(false),
            stop_tx,
            ack_rx,
            settings,
            backend: Mutex::new(Some(backend)),
        })
    }

    /// The debounced event queue.
    pub fn events(&self) -> &Receiver<FileEvent> {
        &self.events
    }

    /// Swap in new gating/debounce settings (config reload).
    pub fn reload(&self, settings: WatchSettings) {
        *self.settings.write().expect("watch settings poisoned") = settings;
    }

    /// Stop watching. Idempotent; waits up to five seconds for the pump to
    /// acknowledge shutdown.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.backend.lock().expect("backend poisoned").take());
        let _ = self.stop_tx.try_send(());
        if self.ack_rx.recv_timeout(STOP_ACK_TIMEOUT).is_err() {
            warn!("watcher pump did not acknowledge stop in time");
        }
    }

    /// Whether `stop` has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The bounded outgoing queue with load-shedding on overflow.
struct EventQueue {
    tx: Sender<FileEvent>,
    shed_rx: Receiver<FileEvent>,
}

impl EventQueue {
    /// Enqueue without ever blocking: a full queue sheds its oldest event.
    fn push(&self, event: FileEvent) {
        if let Err(err) = self.tx.try_send(event) {
            if let Ok(shed) = self.shed_rx.try_recv() {
                warn!(rel = %shed.rel, "event queue full, shedding oldest");
            }
            let _ = self.tx.try_send(err.into_inner());
        }
    }
}

fn pump(
    root: &Path,
    ignore: &RwLock<Arc<IgnoreCache>>,
    settings: &RwLock<WatchSettings>,
    raw_rx: &Receiver<notify::Result<notify::Event>>,
    queue: &EventQueue,
    stop_rx: &Receiver<()>,
) {
    let mut recent: HashMap<(String, EventKind), Instant> = HashMap::new();
    let mut last_sweep = Instant::now();

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        let raw = match raw_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => {
                warn!(%err, "notify backend error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let debounce = settings.read().expect("watch settings poisoned").debounce;

        // The map only grows under sustained traffic; sweep it on the same
        // cadence as the window.
        if last_sweep.elapsed() > debounce {
            let now = Instant::now();
            recent.retain(|_, seen| now.duration_since(*seen) < debounce);
            last_sweep = now;
        }

        for (kind, path) in split_event(&raw) {
            handle_path(
                root, ignore, settings, &mut recent, queue, kind, &path, debounce,
            );
        }
    }
}

/// Map one raw notify event onto `(kind, path)` pairs.
///
/// Renames become best-effort Remove(old) + Create(new); when the pair is
/// unknown, the path reported falls back to Create alone.
fn split_event(event: &notify::Event) -> Vec<(EventKind, PathBuf)> {
    use notify::event::{ModifyKind, RenameMode};
    use notify::EventKind as K;

    match &event.kind {
        K::Create(_) => event
            .paths
            .iter()
            .map(|p| (EventKind::Create, p.clone()))
            .collect(),
        K::Remove(_) => event
            .paths
            .iter()
            .map(|p| (EventKind::Delete, p.clone()))
            .collect(),
        K::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            (EventKind::Delete, event.paths[0].clone()),
            (EventKind::Create, event.paths[1].clone()),
        ],
        K::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| (EventKind::Delete, p.clone()))
            .collect(),
        K::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| (EventKind::Create, p.clone()))
            .collect(),
        K::Modify(_) => event
            .paths
            .iter()
            .map(|p| (EventKind::Write, p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_path(
    root: &Path,
    ignore: &RwLock<Arc<IgnoreCache>>,
    settings: &RwLock<WatchSettings>,
    recent: &mut HashMap<(String, EventKind), Instant>,
    queue: &EventQueue,
    kind: EventKind,
    path: &Path,
    debounce: Duration,
) {
    let Some(rel) = paths::relative_of(root, path) else {
        return;
    };

    // Edits to a rule file re-shape every decision below that directory.
    if rel.rsplit('/').next() == Some(IGNORE_FILE) {
        let dir = path.parent().unwrap_or(root);
        ignore
            .read()
            .expect("ignore cache poisoned")
            .invalidate(dir);
        debug!(%rel, "ignore rules changed, cache invalidated");
        return;
    }

    let is_dir = path.is_dir() || (kind == EventKind::Delete && rel.ends_with('/'));
    if ignore
        .read()
        .expect("ignore cache poisoned")
        .is_ignored_with_manual(&rel, is_dir, true)
    {
        return;
    }

    let trigger = settings.read().expect("watch settings poisoned").trigger.clone();
    let permitted = match kind {
        EventKind::Create => trigger.add,
        EventKind::Write => trigger.change,
        EventKind::Delete => {
            if is_dir {
                trigger.unlink_folder
            } else {
                trigger.unlink
            }
        }
    };
    if !permitted {
        return;
    }

    let key = (rel.clone(), kind);
    let now = Instant::now();
    if let Some(seen) = recent.get(&key) {
        if now.duration_since(*seen) < debounce {
            return;
        }
    }
    recent.insert(key, now);

    queue.push(FileEvent {
        rel,
        abs: path.to_path_buf(),
        kind,
        is_dir,
        timestamp: SystemTime::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use filters::IgnoreConfig;
    use std::fs;

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    fn start_watcher(root: &Path) -> FsWatcher {
        let ignore = Arc::new(RwLock::new(Arc::new(
            IgnoreCache::new(root, &IgnoreConfig::default()).unwrap(),
        )));
        FsWatcher::start(
            root.to_path_buf(),
            ignore,
            WatchSettings {
                trigger: TriggerPerm::default(),
                debounce: Duration::from_millis(300),
            },
        )
        .unwrap()
    }

    #[test]
    fn file_writes_surface_as_events() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = start_watcher(dir.path());

        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let mut seen = Vec::new();
        assert!(wait_for(|| {
            while let Ok(event) = watcher.events().try_recv() {
                seen.push(event);
            }
            seen.iter().any(|e| e.rel == "a.txt")
        }));
        watcher.stop();
    }

    #[test]
    fn duplicate_events_inside_the_window_are_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = start_watcher(dir.path());

        fs::write(dir.path().join("b.txt"), b"one").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        fs::write(dir.path().join("b.txt"), b"two").unwrap();
        std::thread::sleep(Duration::from_millis(800));

        let mut writes = 0;
        while let Ok(event) = watcher.events().try_recv() {
            if event.rel == "b.txt" && event.kind == EventKind::Write {
                writes += 1;
            }
        }
        assert!(writes <= 1, "expected at most one write, saw {writes}");
        watcher.stop();
    }

    #[test]
    fn stop_is_idempotent_and_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = start_watcher(dir.path());
        watcher.stop();
        watcher.stop();
        assert!(watcher.is_stopped());
    }

    #[test]
    fn ignored_paths_never_enqueue() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".sync_ignore"), "*.tmp\n").unwrap();
        let watcher = start_watcher(dir.path());

        fs::write(dir.path().join("x.tmp"), b"scratch").unwrap();
        fs::write(dir.path().join("y.txt"), b"real").unwrap();

        let mut rels = Vec::new();
        assert!(wait_for(|| {
            while let Ok(event) = watcher.events().try_recv() {
                rels.push(event.rel.clone());
            }
            rels.iter().any(|r| r == "y.txt")
        }));
        assert!(!rels.iter().any(|r| r == "x.tmp"));
        watcher.stop();
    }
}
