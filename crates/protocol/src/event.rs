//! The agent stdout line grammar.
//!
//! ```text
//! [<ts>] EVENT|<kind>|<abs_path>
//! [<ts>] HASH|<abs_path>|<hex_digest>
//! AGENT_PID:<pid>
//! AGENT_STARTING
//! NO_REMOTE_CONFIG
//! WATCH_READY:<path>
//! ```
//!
//! Paths pass through verbatim, including whitespace. Unknown lines parse to
//! [`ProtocolError::UnknownLine`] so callers can log and skip them.

use std::fmt;

use crate::ProtocolError;

/// Normalized file event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A path came into existence.
    Create,
    /// A path's content changed.
    Write,
    /// A path went away.
    Delete,
}

impl EventKind {
    /// Normalize a kind token.
    ///
    /// Watcher backends spell removals many ways (`Remove`, `Remove(File)`,
    /// `NotifyRemove`); anything containing `Delete` or `Remove` collapses
    /// to [`EventKind::Delete`].
    pub fn parse(token: &str) -> Option<Self> {
        if token.contains("Delete") || token.contains("Remove") {
            return Some(Self::Delete);
        }
        if token.contains("Create") {
            return Some(Self::Create);
        }
        if token.contains("Write") || token.contains("Modify") {
            return Some(Self::Write);
        }
        None
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Create => "Create",
            Self::Write => "Write",
            Self::Delete => "Delete",
        };
        f.write_str(token)
    }
}

/// One parsed line of agent stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A remote filesystem event.
    FileEvent {
        /// Normalized kind.
        kind: EventKind,
        /// Absolute remote path, verbatim.
        path: String,
    },
    /// A content digest for a remote path.
    Hash {
        /// Absolute remote path, verbatim.
        path: String,
        /// Lowercase hex digest.
        digest: String,
    },
    /// The agent announced its process id.
    Pid(u32),
    /// The agent is starting up.
    Starting,
    /// The agent found no configuration file.
    NoRemoteConfig,
    /// A watch path registered successfully.
    WatchReady(String),
}

/// Parse one complete line of agent stdout.
pub fn parse_line(line: &str) -> Result<AgentEvent, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(pid) = line.strip_prefix("AGENT_PID:") {
        return pid
            .trim()
            .parse::<u32>()
            .map(AgentEvent::Pid)
            .map_err(|_| ProtocolError::MalformedLine {
                kind: "AGENT_PID",
                line: line.to_string(),
            });
    }
    if line == "AGENT_STARTING" {
        return Ok(AgentEvent::Starting);
    }
    if line == "NO_REMOTE_CONFIG" {
        return Ok(AgentEvent::NoRemoteConfig);
    }
    if let Some(path) = line.strip_prefix("WATCH_READY:") {
        return Ok(AgentEvent::WatchReady(path.trim().to_string()));
    }

    // Timestamped productions: "[<ts>] EVENT|..." / "[<ts>] HASH|...".
    let rest = match line.strip_prefix('[') {
        Some(tail) => match tail.find("] ") {
            Some(pos) => &tail[pos + 2..],
            None => {
                return Err(ProtocolError::UnknownLine(line.to_string()));
            }
        },
        None => line,
    };

    if let Some(body) = rest.strip_prefix("EVENT|") {
        let (kind_token, path) = body
            .split_once('|')
            .ok_or_else(|| ProtocolError::MalformedLine {
                kind: "EVENT",
                line: line.to_string(),
            })?;
        let kind = EventKind::parse(kind_token).ok_or_else(|| ProtocolError::MalformedLine {
            kind: "EVENT",
            line: line.to_string(),
        })?;
        if path.is_empty() {
            return Err(ProtocolError::MalformedLine {
                kind: "EVENT",
                line: line.to_string(),
            });
        }
        return Ok(AgentEvent::FileEvent {
            kind,
            path: path.to_string(),
        });
    }

    if let Some(body) = rest.strip_prefix("HASH|") {
        // The digest is the last |-field; the path keeps everything else so
        // separators in path names survive.
        let (path, digest) = body
            .rsplit_once('|')
            .ok_or_else(|| ProtocolError::MalformedLine {
                kind: "HASH",
                line: line.to_string(),
            })?;
        if path.is_empty() || digest.is_empty() {
            return Err(ProtocolError::MalformedLine {
                kind: "HASH",
                line: line.to_string(),
            });
        }
        return Ok(AgentEvent::Hash {
            path: path.to_string(),
            digest: digest.to_string(),
        });
    }

    Err(ProtocolError::UnknownLine(line.to_string()))
}

/// Render an `EVENT` line the way the agent emits it.
pub fn format_event_line(timestamp: &str, kind: EventKind, path: &str) -> String {
    format!("[{timestamp}] EVENT|{kind}|{path}")
}

/// Render a `HASH` line the way the agent emits it.
pub fn format_hash_line(timestamp: &str, path: &str, digest: &str) -> String {
    format!("[{timestamp}] HASH|{path}|{digest}")
}
