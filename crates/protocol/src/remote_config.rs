//! The configuration document published to the agent.
//!
//! The controller uploads this JSON to `<remote_base>/.sync_temp/config.json`
//! before starting the agent. Key names are flat, dotted strings for
//! compatibility with the controller's own config namespace.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Agent-side configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Authoritative ignore rules; non-empty suppresses on-disk rule files.
    #[serde(rename = "devsync.ignores", default)]
    pub ignores: Vec<String>,
    /// Paths (relative to `working_dir`) the agent watches.
    #[serde(rename = "devsync.agent_watchs", default)]
    pub agent_watchs: Vec<String>,
    /// Manual-transfer endpoint prefixes.
    #[serde(rename = "devsync.manual_transfer", default)]
    pub manual_transfer: Vec<String>,
    /// The agent's working directory (the remote sync root).
    #[serde(rename = "devsync.working_dir", default)]
    pub working_dir: String,
}

impl RemoteConfig {
    /// Parse a config document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load a config document from disk.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(std::io::Error::other)
    }

    /// Render the document for publication.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
