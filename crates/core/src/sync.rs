//! The sync coordinator: local events out, agent events back in.

use std::path::Path;
use std::sync::{Arc, RwLock};

use protocol::{AgentEvent, EventKind};
use store::FileCache;
use tracing::{debug, info, warn};
use transport::{shell_quote, Transport};

use crate::watcher::FileEvent;
use crate::{paths, Config, OsTarget};

/// Turns watcher events into remote operations and agent events into local
/// ones, keeping the file cache truthful on every success.
pub struct SyncCoordinator {
    transport: Arc<Transport>,
    cache: Arc<FileCache>,
    config: Arc<RwLock<Config>>,
}

impl SyncCoordinator {
    /// A coordinator over the shared transport, cache, and config snapshot.
    pub fn new(
        transport: Arc<Transport>,
        cache: Arc<FileCache>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            transport,
            cache,
            config,
        }
    }

    /// Dispatch one local event.
    pub fn handle_event(&self, event: &FileEvent) {
        match event.kind {
            EventKind::Create | EventKind::Write => self.sync_up(event),
            EventKind::Delete => self.delete_remote(event),
        }
    }

    /// Mirror a local create/write to the remote tree.
    fn sync_up(&self, event: &FileEvent) {
        let (os, remote_root) = self.target();
        let remote = paths::to_remote(os, &remote_root, &event.rel);

        if event.is_dir {
            if let Err(err) = self.transport.run(&mkdir_command(os, &remote)) {
                warn!(rel = %event.rel, %err, "remote mkdir failed");
            }
            return;
        }

        // A cache fault must not stop the mirror: fall back to hashing the
        // file directly and sync anyway.
        let needed = match self.cache.should_sync(&event.rel, &event.abs) {
            Ok(decision) => decision,
            Err(store::StoreError::Io { path, source }) => {
                // The file disappeared between the event and now.
                debug!(path = %path.display(), %source, "event path unreadable, skipping");
                return;
            }
            Err(err) => {
                warn!(rel = %event.rel, %err, "cache query failed, syncing anyway");
                match checksums::hash_file(&event.abs) {
                    Ok(digest) => Some(digest),
                    Err(hash_err) => {
                        warn!(rel = %event.rel, err = %hash_err, "hash failed, skipping");
                        return;
                    }
                }
            }
        };
        let Some(hash) = needed else {
            debug!(rel = %event.rel, "content unchanged, skipping upload");
            return;
        };

        match self.transport.upload(&event.abs, &remote) {
            Ok(()) => {
                info!(rel = %event.rel, "uploaded");
                if let Err(err) = self.cache.record_sync(&event.rel, &event.abs, &hash) {
                    warn!(rel = %event.rel, %err, "cache upsert failed");
                }
            }
            Err(err) => {
                // Cache stays untouched so the next event retries.
                warn!(rel = %event.rel, %err, "upload failed");
            }
        }
    }

    /// Mirror a local deletion; the cache row goes regardless of remote
    /// outcome.
    fn delete_remote(&self, event: &FileEvent) {
        let (os, remote_root) = self.target();
        let remote = paths::to_remote(os, &remote_root, &event.rel);

        if paths::under_sync_temp(&remote) {
            warn!(%remote, "refusing to delete inside the scratch directory");
        } else if let Err(err) = self.transport.run(&delete_command(os, &remote)) {
            warn!(rel = %event.rel, %err, "remote delete failed");
        } else {
            info!(rel = %event.rel, "remote deleted");
        }

        if let Err(err) = self.cache.remove(&event.rel) {
            warn!(rel = %event.rel, %err, "cache remove failed");
        }
    }

    /// Apply one event from the remote agent stream.
    pub fn apply_agent_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::FileEvent {
                kind: EventKind::Delete,
                path,
            } => self.delete_local(path),
            AgentEvent::Hash { path, digest } => self.reconcile_hash(path, digest),
            // Create/Write events carry no digest; the HASH line that
            // follows them drives the download.
            AgentEvent::FileEvent { .. } => {}
            _ => {}
        }
    }

    /// Remote deletion propagates to the local tree and the cache.
    fn delete_local(&self, remote_path: &str) {
        if paths::under_sync_temp(remote_path) {
            return;
        }
        let Some((abs, rel)) = self.map_remote(remote_path) else {
            return;
        };

        let outcome = if abs.is_dir() {
            std::fs::remove_dir_all(&abs)
        } else {
            std::fs::remove_file(&abs)
        };
        match outcome {
            Ok(()) => info!(%rel, "local path removed after remote delete"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(%rel, %err, "local remove failed"),
        }

        if let Err(err) = self.cache.remove(&rel) {
            warn!(%rel, %err, "cache remove failed");
        }
    }

    /// A remote digest that differs from ours means the remote copy wins.
    fn reconcile_hash(&self, remote_path: &str, digest: &str) {
        if paths::under_sync_temp(remote_path) {
            return;
        }
        let Some((abs, rel)) = self.map_remote(remote_path) else {
            return;
        };

        if abs.is_file() {
            match checksums::hash_file(&abs) {
                Ok(local_digest) if local_digest == digest => {
                    debug!(%rel, "digests match, nothing to do");
                    return;
                }
                Ok(_) => {}
                Err(err) => debug!(%rel, %err, "local hash failed, downloading"),
            }
        }

        match self.transport.download(remote_path, &abs) {
            Ok(()) => {
                info!(%rel, "downloaded after remote change");
                if let Err(err) = self.cache.record_sync(&rel, &abs, digest) {
                    warn!(%rel, %err, "cache upsert failed");
                }
            }
            Err(err) => warn!(%rel, %err, "download failed"),
        }
    }

    fn map_remote(&self, remote_path: &str) -> Option<(std::path::PathBuf, String)> {
        let config = self.config.read().expect("config poisoned");
        let mapped = paths::to_local(&config.watch_root(), config.remote_root(), remote_path);
        if mapped.is_none() {
            debug!(%remote_path, "agent path outside the remote root, ignoring");
        }
        mapped
    }

    fn target(&self) -> (OsTarget, String) {
        let config = self.config.read().expect("config poisoned");
        (config.devsync.os_target, config.remote_root().to_string())
    }
}

fn mkdir_command(os: OsTarget, remote: &str) -> String {
    match os {
        OsTarget::Linux | OsTarget::Darwin => format!("mkdir -p {}", shell_quote(remote)),
        OsTarget::Windows => format!("cmd /C if not exist \"{remote}\" mkdir \"{remote}\""),
    }
}

fn delete_command(os: OsTarget, remote: &str) -> String {
    match os {
        OsTarget::Linux | OsTarget::Darwin => format!("rm -rf {}", shell_quote(remote)),
        OsTarget::Windows => format!(
            "cmd /C if exist \"{remote}\\\" (rmdir /S /Q \"{remote}\") else (del /F /Q \"{remote}\")"
        ),
    }
}

/// Whether a path that the agent reported should even be considered.
///
/// Exposed for the monitor, which filters before handing events over.
pub fn relevant_agent_path(path: &str) -> bool {
    !paths::under_sync_temp(path)
}
