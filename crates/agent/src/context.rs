//! Working-directory and configuration resolution.

use std::path::{Path, PathBuf};

use filters::{IgnoreConfig, SYNC_TEMP_DIR};
use protocol::RemoteConfig;
use tracing::debug;

use crate::AgentError;

/// Name of the published configuration file inside the scratch directory.
pub const CONFIG_NAME: &str = "config.json";

/// Resolved execution context for one agent invocation.
#[derive(Debug)]
pub struct AgentContext {
    /// The base directory: the tree the scratch directory lives in.
    pub base: PathBuf,
    /// Parsed remote configuration (default when the file is missing).
    pub config: RemoteConfig,
    /// Whether a configuration file was actually found.
    pub config_found: bool,
    /// The directory walks and watches are rooted at.
    pub working_dir: PathBuf,
}

impl AgentContext {
    /// Resolve the context from the process environment.
    ///
    /// The base is the current directory, unless the executable itself
    /// lives inside a `.sync_temp` directory, in which case the base is
    /// that directory's parent (the deployed layout). The working directory
    /// comes from the config when set, otherwise it is the base.
    pub fn resolve() -> Result<Self, AgentError> {
        let exe = std::env::current_exe().ok();
        let base = exe
            .as_deref()
            .and_then(deployed_base)
            .map_or_else(
                || {
                    std::env::current_dir().map_err(|source| AgentError::Io {
                        path: PathBuf::from("."),
                        source,
                    })
                },
                Ok,
            )?;
        Self::resolve_in(base)
    }

    /// Resolve against an explicit base directory (tests, embedding).
    pub fn resolve_in(base: PathBuf) -> Result<Self, AgentError> {
        let config_path = base.join(SYNC_TEMP_DIR).join(CONFIG_NAME);
        let (config, config_found) = match RemoteConfig::load(&config_path) {
            Ok(config) => (config, true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                (RemoteConfig::default(), false)
            }
            Err(source) => {
                return Err(AgentError::Config(format!(
                    "{}: {source}",
                    config_path.display()
                )))
            }
        };

        let working_dir = if config.working_dir.is_empty() {
            base.clone()
        } else {
            PathBuf::from(&config.working_dir)
        };
        debug!(base = %base.display(), working_dir = %working_dir.display(), config_found, "agent context resolved");

        Ok(Self {
            base,
            config,
            config_found,
            working_dir,
        })
    }

    /// Where the configuration file is expected.
    pub fn config_path(&self) -> PathBuf {
        self.base.join(SYNC_TEMP_DIR).join(CONFIG_NAME)
    }

    /// Where the index snapshot lives.
    pub fn index_db_path(&self) -> PathBuf {
        self.working_dir
            .join(SYNC_TEMP_DIR)
            .join("indexing_files.db")
    }

    /// The configuration's rule sources, in `filters` terms.
    pub fn ignore_config(&self) -> IgnoreConfig {
        IgnoreConfig {
            ignores: self.config.ignores.clone(),
            manual_transfer: self.config.manual_transfer.clone(),
        }
    }
}

/// If `exe` sits inside a `.sync_temp` directory, its grandparent is the
/// deployed base.
fn deployed_base(exe: &Path) -> Option<PathBuf> {
    let parent = exe.parent()?;
    if parent.file_name()?.to_str()? == SYNC_TEMP_DIR {
        parent.parent().map(Path::to_path_buf)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_resolves_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentContext::resolve_in(dir.path().to_path_buf()).unwrap();
        assert!(!ctx.config_found);
        assert_eq!(ctx.working_dir, dir.path());
    }

    #[test]
    fn config_working_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join(SYNC_TEMP_DIR);
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(
            scratch.join(CONFIG_NAME),
            "{\"devsync.working_dir\": \"/srv/app\"}",
        )
        .unwrap();

        let ctx = AgentContext::resolve_in(dir.path().to_path_buf()).unwrap();
        assert!(ctx.config_found);
        assert_eq!(ctx.working_dir, PathBuf::from("/srv/app"));
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join(SYNC_TEMP_DIR);
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join(CONFIG_NAME), "not json").unwrap();

        let err = AgentContext::resolve_in(dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert_eq!(err.exit_code(), crate::EXIT_CONFIG);
    }

    #[test]
    fn deployed_base_detects_the_scratch_layout() {
        assert_eq!(
            deployed_base(Path::new("/srv/app/.sync_temp/tether-agent")),
            Some(PathBuf::from("/srv/app"))
        );
        assert_eq!(deployed_base(Path::new("/usr/bin/tether-agent")), None);
    }
}
