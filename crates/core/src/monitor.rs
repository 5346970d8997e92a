//! The agent monitor: deployment, the watch stream, and reconnects.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use protocol::{AgentEvent, LineAssembler};
use tracing::{debug, info, warn};
use transport::{posix_join, shell_quote, Transport};

use crate::sync::{relevant_agent_path, SyncCoordinator};
use crate::{Config, CoreError};

/// First reconnect delay.
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Consecutive failed attempts before the monitor gives up.
pub const MAX_ATTEMPTS: u32 = 6;
/// Delay before restarting an agent that exited cleanly.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Name of the deployed agent binary inside the scratch directory.
pub const AGENT_BINARY: &str = "tether-agent";

/// Env var: when set truthy, agent stream lines are mirrored to the tty.
pub const STREAM_DIAGNOSTICS_ENV: &str = "TETHER_STREAM_DIAGNOSTICS";

/// Keeps the remote watch stream alive and feeds the coordinator.
pub struct AgentMonitor {
    transport: Arc<Transport>,
    coordinator: Arc<SyncCoordinator>,
    config: Arc<RwLock<Config>>,
    shutdown: Arc<AtomicBool>,
    agent_pid: AtomicU32,
}

impl AgentMonitor {
    /// A monitor over the shared transport and coordinator.
    pub fn new(
        transport: Arc<Transport>,
        coordinator: Arc<SyncCoordinator>,
        config: Arc<RwLock<Config>>,
        shutdown: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            coordinator,
            config,
            shutdown,
            agent_pid: AtomicU32::new(0),
        })
    }

    /// The last pid the agent announced, if any.
    pub fn agent_pid(&self) -> Option<u32> {
        match self.agent_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Upload the agent and its configuration when the remote copy is stale.
    ///
    /// The identity probe decides: a missing or different digest re-uploads.
    pub fn deploy(&self) -> Result<(), CoreError> {
        let (remote_root, remote_config) = {
            let config = self.config.read().expect("config poisoned");
            (
                config.remote_root().to_string(),
                config.remote_config(),
            )
        };
        let remote_agent = posix_join(&posix_join(&remote_root, filters::SYNC_TEMP_DIR), AGENT_BINARY);

        let local_agent = local_agent_path()?;
        let local_digest = checksums::hash_file(&local_agent).map_err(store::StoreError::from)?;

        let remote_digest = self
            .transport
            .run_with_output(&format!("{} identity", shell_quote(&remote_agent)))
            .map(|out| out.trim().to_string())
            .unwrap_or_default();

        if remote_digest == local_digest {
            info!("agent up to date, skipping upload");
        } else {
            info!(remote = %remote_agent, "uploading agent");
            self.transport.upload(&local_agent, &remote_agent)?;
            self.transport
                .run(&format!("chmod +x {}", shell_quote(&remote_agent)))?;
        }

        // Publish the remote configuration next to the binary.
        let rendered = remote_config
            .to_json_pretty()
            .map_err(|err| CoreError::Config(err.to_string()))?;
        let staged = tempfile_path("remote-config.json");
        std::fs::write(&staged, rendered).map_err(|source| CoreError::Io {
            path: staged.clone(),
            source,
        })?;
        let remote_config_path =
            posix_join(&posix_join(&remote_root, filters::SYNC_TEMP_DIR), "config.json");
        let outcome = self.transport.upload(&staged, &remote_config_path);
        let _ = std::fs::remove_file(&staged);
        outcome?;
        info!("remote config published");
        Ok(())
    }

    /// Kill the remote agent by its announced pid, best effort.
    pub fn kill_remote_agent(&self) {
        if let Some(pid) = self.agent_pid() {
            debug!(pid, "stopping remote agent");
            let _ = self.transport.run(&format!("kill {pid}"));
        }
    }

    /// Run the monitor loop on its own thread.
    pub fn spawn(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let monitor = Arc::clone(self);
        std::thread::Builder::new()
            .name("agent-monitor".into())
            .spawn(move || monitor.monitor_loop())
    }

    fn monitor_loop(&self) {
        let mut attempts: u32 = 0;
        let mut backoff = BACKOFF_INITIAL;

        while !self.shutdown.load(Ordering::SeqCst) {
            let command = self.watch_command();
            let stream = match self.transport.run_with_stream(&command) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%err, "agent stream failed to start");
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        warn!("agent monitor giving up after {MAX_ATTEMPTS} attempts");
                        return;
                    }
                    self.redial(&mut backoff);
                    continue;
                }
            };

            let _ = self.transport.start_persistent_session();
            let healthy = self.consume(&stream);
            stream.stop();

            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if healthy {
                // The agent exited on its own; give the host a breather and
                // start it again.
                attempts = 0;
                backoff = BACKOFF_INITIAL;
                info!("agent stream ended, restarting after {RESTART_DELAY:?}");
                std::thread::sleep(RESTART_DELAY);
            } else {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    warn!("agent monitor giving up after {MAX_ATTEMPTS} attempts");
                    return;
                }
                self.redial(&mut backoff);
            }
        }
    }

    /// Drain one stream until it ends. Returns whether it ended cleanly.
    fn consume(&self, stream: &transport::StreamHandle) -> bool {
        let mirror = std::env::var(STREAM_DIAGNOSTICS_ENV).is_ok_and(|v| v == "1" || v == "true");
        let mut assembler = LineAssembler::new();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return true;
            }
            match stream.chunks().recv_timeout(Duration::from_millis(500)) {
                Ok(chunk) => {
                    for line in assembler.push(&chunk) {
                        self.handle_line(&line, mirror);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Ok(err) = stream.errors().try_recv() {
                        warn!(%err, "agent stream error");
                        return false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(line) = assembler.finish() {
                        self.handle_line(&line, mirror);
                    }
                    return stream.errors().try_recv().is_err();
                }
            }
        }
    }

    fn handle_line(&self, line: &str, mirror: bool) {
        if line.trim().is_empty() {
            return;
        }
        if mirror {
            term::Terminal::global().println(&format!("[agent] {line}"));
        }
        match protocol::event::parse_line(line) {
            Ok(AgentEvent::Pid(pid)) => {
                self.agent_pid.store(pid, Ordering::SeqCst);
                debug!(pid, "agent announced pid");
            }
            Ok(AgentEvent::Starting) => info!("agent starting"),
            Ok(AgentEvent::WatchReady(path)) => info!(%path, "agent watch ready"),
            Ok(AgentEvent::NoRemoteConfig) => warn!("agent found no remote config"),
            Ok(event @ (AgentEvent::FileEvent { .. } | AgentEvent::Hash { .. })) => {
                let path = match &event {
                    AgentEvent::FileEvent { path, .. } | AgentEvent::Hash { path, .. } => path,
                    _ => return,
                };
                if relevant_agent_path(path) {
                    self.coordinator.apply_agent_event(&event);
                }
            }
            Err(err) => debug!(%err, "unparsed agent line"),
        }
    }

    fn watch_command(&self) -> String {
        let config = self.config.read().expect("config poisoned");
        let root = config.remote_root().to_string();
        drop(config);
        let agent = posix_join(&posix_join(&root, filters::SYNC_TEMP_DIR), AGENT_BINARY);
        format!(
            "cd {root} && {agent} watch",
            root = shell_quote(&root),
            agent = shell_quote(&agent)
        )
    }

    fn redial(&self, backoff: &mut Duration) {
        warn!(delay = ?*backoff, "re-dialing transport");
        self.transport.close();
        std::thread::sleep(*backoff);
        *backoff = (*backoff * 2).min(BACKOFF_CAP);
        if let Err(err) = self.transport.connect() {
            warn!(%err, "reconnect failed");
        }
    }
}

/// A per-process staging path in the system temp directory.
fn tempfile_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tether-{}-{name}", std::process::id()))
}

/// The agent binary shipped alongside the controller executable.
fn local_agent_path() -> Result<std::path::PathBuf, CoreError> {
    let exe = std::env::current_exe().map_err(|source| CoreError::Io {
        path: std::path::PathBuf::from("<current_exe>"),
        source,
    })?;
    let dir = exe.parent().ok_or_else(|| {
        CoreError::Config("controller executable has no parent directory".into())
    })?;
    let candidate = dir.join(AGENT_BINARY);
    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(CoreError::Config(format!(
            "agent binary not found at {}",
            candidate.display()
        )))
    }
}
