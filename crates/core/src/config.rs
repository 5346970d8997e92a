//! Controller configuration.
//!
//! One JSON document at the root of the watched tree (`tether.json`)
//! describes the local root, the SSH endpoint, the remote root, and the
//! sync policy. Reload keeps the previous snapshot when the new file does
//! not validate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Remote operating system; controls path joining and delete commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsTarget {
    /// POSIX paths, `rm -rf` deletes.
    #[default]
    Linux,
    /// Same remote semantics as Linux.
    Darwin,
    /// Backslash joins, drive-letter mapping, `rmdir /s /q` deletes.
    Windows,
}

/// Per-event-kind sync gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPerm {
    /// Mirror file creations.
    #[serde(default = "enabled")]
    pub add: bool,
    /// Mirror content changes.
    #[serde(default = "enabled")]
    pub change: bool,
    /// Mirror file deletions.
    #[serde(default = "enabled")]
    pub unlink: bool,
    /// Mirror directory deletions.
    #[serde(default = "enabled")]
    pub unlink_folder: bool,
}

fn enabled() -> bool {
    true
}

impl Default for TriggerPerm {
    fn default() -> Self {
        Self {
            add: true,
            change: true,
            unlink: true,
            unlink_folder: true,
        }
    }
}

/// SSH credentials and the two roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Remote host.
    #[serde(default)]
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user.
    #[serde(default)]
    pub username: String,
    /// Private key path.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Password, when key auth is not used.
    #[serde(default)]
    pub password: Option<String>,
    /// Root of the mirrored tree on the remote host.
    #[serde(default)]
    pub remote_path: String,
    /// Optional override of the local root.
    #[serde(default)]
    pub local_path: Option<String>,
}

fn default_port() -> u16 {
    22
}

/// The `devsync` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevsyncConfig {
    /// Transport credentials and roots.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Remote operating system.
    #[serde(default)]
    pub os_target: OsTarget,
    /// Authoritative ignore rules forwarded to the agent.
    #[serde(default)]
    pub ignores: Vec<String>,
    /// Manual-transfer endpoint prefixes.
    #[serde(default)]
    pub manual_transfer: Vec<String>,
    /// Paths the remote agent watches (relative to the remote root).
    #[serde(default)]
    pub agent_watchs: Vec<String>,
    /// Per-kind event gating.
    #[serde(default)]
    pub trigger_perm: TriggerPerm,
    /// User scripts; accepted and preserved, executed elsewhere.
    #[serde(default)]
    pub script: serde_json::Value,
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root of the watched tree.
    #[serde(default)]
    pub local_path: String,
    /// Sync and session settings.
    #[serde(default)]
    pub devsync: DevsyncConfig,
    /// Clear the file cache on startup.
    #[serde(default)]
    pub reset_cache: bool,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| CoreError::Config(format!("{}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| CoreError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants a usable configuration must hold.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.local_path.is_empty() {
            return Err(CoreError::Config("local_path is required".into()));
        }
        if !self.watch_root().is_dir() {
            return Err(CoreError::Config(format!(
                "local_path {} is not a directory",
                self.local_path
            )));
        }
        if self.devsync.auth.host.is_empty() {
            return Err(CoreError::Config("devsync.auth.host is required".into()));
        }
        if self.devsync.auth.username.is_empty() {
            return Err(CoreError::Config("devsync.auth.username is required".into()));
        }
        if self.devsync.auth.remote_path.is_empty() {
            return Err(CoreError::Config(
                "devsync.auth.remote_path is required".into(),
            ));
        }
        Ok(())
    }

    /// The local tree being mirrored.
    pub fn watch_root(&self) -> PathBuf {
        self.devsync
            .auth
            .local_path
            .as_deref()
            .map_or_else(|| PathBuf::from(&self.local_path), PathBuf::from)
    }

    /// The remote tree being mirrored onto.
    pub fn remote_root(&self) -> &str {
        &self.devsync.auth.remote_path
    }

    /// The transport endpoint for this configuration.
    pub fn endpoint(&self) -> transport::Endpoint {
        transport::Endpoint {
            host: self.devsync.auth.host.clone(),
            port: self.devsync.auth.port,
            username: self.devsync.auth.username.clone(),
            private_key: self.devsync.auth.private_key.as_deref().map(PathBuf::from),
            password: self.devsync.auth.password.clone(),
        }
    }

    /// The rule sources handed to the ignore engine.
    pub fn ignore_config(&self) -> filters::IgnoreConfig {
        filters::IgnoreConfig {
            ignores: self.devsync.ignores.clone(),
            manual_transfer: self.devsync.manual_transfer.clone(),
        }
    }

    /// The configuration document published to the agent.
    pub fn remote_config(&self) -> protocol::RemoteConfig {
        protocol::RemoteConfig {
            ignores: self.devsync.ignores.clone(),
            agent_watchs: self.devsync.agent_watchs.clone(),
            manual_transfer: self.devsync.manual_transfer.clone(),
            working_dir: self.devsync.auth.remote_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json(local: &Path) -> String {
        format!(
            r#"{{
                "local_path": "{}",
                "devsync": {{
                    "auth": {{
                        "host": "dev.example.com",
                        "username": "dev",
                        "remote_path": "/srv/app"
                    }}
                }}
            }}"#,
            local.display()
        )
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        std::fs::write(&path, minimal_json(dir.path())).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.devsync.auth.port, 22);
        assert_eq!(config.devsync.os_target, OsTarget::Linux);
        assert!(config.devsync.trigger_perm.add);
        assert!(!config.reset_cache);
        assert_eq!(config.remote_root(), "/srv/app");
    }

    #[test]
    fn missing_required_fields_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        std::fs::write(
            &path,
            format!(r#"{{"local_path": "{}"}}"#, dir.path().display()),
        )
        .unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn nonexistent_local_path_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        std::fs::write(&path, minimal_json(Path::new("/no/such/tree"))).unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn auth_local_path_overrides_top_level() {
        let mut config = Config {
            local_path: "/top".into(),
            ..Config::default()
        };
        assert_eq!(config.watch_root(), PathBuf::from("/top"));
        config.devsync.auth.local_path = Some("/override".into());
        assert_eq!(config.watch_root(), PathBuf::from("/override"));
    }

    #[test]
    fn remote_config_carries_the_dotted_keys() {
        let config = Config {
            devsync: DevsyncConfig {
                ignores: vec!["*.bak".into()],
                agent_watchs: vec!["src".into()],
                auth: AuthConfig {
                    remote_path: "/srv/app".into(),
                    ..AuthConfig::default()
                },
                ..DevsyncConfig::default()
            },
            ..Config::default()
        };
        let remote = config.remote_config();
        assert_eq!(remote.working_dir, "/srv/app");
        assert_eq!(remote.ignores, vec!["*.bak"]);
        assert_eq!(remote.agent_watchs, vec!["src"]);
    }
}
