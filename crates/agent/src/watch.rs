//! The `watch` subcommand: stream filesystem events as protocol lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, RecvTimeoutError};
use filters::IgnoreCache;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use protocol::event::{format_event_line, format_hash_line};
use protocol::EventKind;
use tracing::{debug, warn};

use crate::shutdown::{self, DRAIN_GRACE};
use crate::{AgentContext, AgentError};

/// How often missing watch paths are retried.
const PENDING_RETRY: Duration = Duration::from_secs(5);

/// Watch the configured paths until a shutdown signal arrives.
pub fn run(ctx: &AgentContext) -> Result<(), AgentError> {
    if !ctx.config_found {
        println!("NO_REMOTE_CONFIG");
    }
    println!("AGENT_STARTING");
    println!("AGENT_PID:{}", std::process::id());
    flush_stdout();

    let shutdown = shutdown::install().map_err(|source| AgentError::Io {
        path: PathBuf::from("<signals>"),
        source,
    })?;
    let ignore = IgnoreCache::new(&ctx.working_dir, &ctx.ignore_config())?;

    let (event_tx, event_rx) = bounded::<notify::Result<notify::Event>>(1024);
    let mut watcher = RecommendedWatcher::new(
        move |event| {
            // A full queue sheds load; the indexer reconciles later.
            let _ = event_tx.try_send(event);
        },
        notify::Config::default(),
    )?;

    let mut pending = watch_paths(ctx);
    register_pending(&mut watcher, &mut pending);
    let mut next_retry = Instant::now() + PENDING_RETRY;

    while !shutdown.load(Ordering::SeqCst) {
        // Missing paths retry on a fixed cadence; registered ones keep
        // working regardless.
        if !pending.is_empty() && Instant::now() >= next_retry {
            register_pending(&mut watcher, &mut pending);
            next_retry = Instant::now() + PENDING_RETRY;
        }

        match event_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(event)) => {
                emit(ctx, &ignore, &event);
                flush_stdout();
            }
            Ok(Err(err)) => warn!(%err, "watch backend error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("shutdown requested, draining");
    std::thread::sleep(DRAIN_GRACE);
    Ok(())
}

/// The configured watch paths, absolute, deduplicated.
fn watch_paths(ctx: &AgentContext) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = if ctx.config.agent_watchs.is_empty() {
        vec![ctx.working_dir.clone()]
    } else {
        ctx.config
            .agent_watchs
            .iter()
            .map(|p| {
                let path = Path::new(p);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    ctx.working_dir.join(path)
                }
            })
            .collect()
    };
    paths.sort();
    paths.dedup();
    paths
}

/// Try to register every pending path; successes print the liveness marker.
fn register_pending(watcher: &mut RecommendedWatcher, pending: &mut Vec<PathBuf>) {
    pending.retain(|path| {
        if !path.exists() {
            return true;
        }
        match watcher.watch(path, RecursiveMode::Recursive) {
            Ok(()) => {
                println!("WATCH_READY:{}", path.display());
                flush_stdout();
                false
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "watch registration failed, will retry");
                true
            }
        }
    });
}

/// Print the protocol lines for one raw notify event.
fn emit(ctx: &AgentContext, ignore: &IgnoreCache, event: &notify::Event) {
    let Some(kind) = map_kind(&event.kind) else {
        return;
    };

    for path in &event.paths {
        let rel = path
            .strip_prefix(&ctx.working_dir)
            .map(|r| r.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if !rel.is_empty() && ignore.is_ignored_with_manual(&rel, path.is_dir(), true) {
            continue;
        }

        let ts = timestamp();
        println!("{}", format_event_line(&ts, kind, &path.to_string_lossy()));
        if kind != EventKind::Delete && path.is_file() {
            match checksums::hash_file(path) {
                Ok(digest) => {
                    println!("{}", format_hash_line(&ts, &path.to_string_lossy(), &digest));
                }
                Err(err) => debug!(path = %path.display(), %err, "hash after event failed"),
            }
        }
    }
}

fn map_kind(kind: &notify::EventKind) -> Option<EventKind> {
    use notify::EventKind as K;
    match kind {
        K::Create(_) => Some(EventKind::Create),
        K::Modify(notify::event::ModifyKind::Name(_)) => Some(EventKind::Create),
        K::Modify(_) => Some(EventKind::Write),
        K::Remove(_) => Some(EventKind::Delete),
        _ => None,
    }
}

/// Seconds since the epoch with millisecond precision; the controller
/// treats the bracketed field as opaque.
fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_onto_the_wire_vocabulary() {
        use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
        use notify::EventKind as K;

        assert_eq!(map_kind(&K::Create(CreateKind::File)), Some(EventKind::Create));
        assert_eq!(
            map_kind(&K::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventKind::Write)
        );
        assert_eq!(map_kind(&K::Remove(RemoveKind::File)), Some(EventKind::Delete));
        assert_eq!(map_kind(&K::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn watch_paths_default_to_the_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentContext::resolve_in(dir.path().to_path_buf()).unwrap();
        assert_eq!(watch_paths(&ctx), vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn timestamps_are_numeric_with_millis() {
        let ts = timestamp();
        let (secs, millis) = ts.split_once('.').unwrap();
        assert!(secs.parse::<u64>().is_ok());
        assert_eq!(millis.len(), 3);
    }
}
