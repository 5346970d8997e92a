#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `agent` is the remote half of tether. The controller deploys one binary
//! to `<remote_base>/.sync_temp/` and drives it through subcommands:
//!
//! - `identity`: digest of the agent's own executable, for redeploy checks
//! - `version`: crate version
//! - `config`: the resolved remote configuration, pretty-printed
//! - `watch`: recursive filesystem notifications as `EVENT`/`HASH` lines
//! - `indexing`: a full walk committed as an atomic snapshot
//! - `prune`: deepest-first removal of literally empty directories
//!
//! Exit codes: 0 success, 1 misconfiguration, 2 runtime failure.

mod context;
mod indexing;
mod prune;
mod shutdown;
mod watch;

pub use context::AgentContext;
pub use indexing::IndexingOptions;
pub use prune::PruneSummary;

use std::ffi::OsString;
use std::io::Write;

use clap::{Parser, Subcommand};
use tracing::error;

/// Misconfiguration exit code.
pub const EXIT_CONFIG: i32 = 1;
/// Runtime failure exit code.
pub const EXIT_RUNTIME: i32 = 2;

/// Failures in agent subcommands.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Missing or unusable configuration.
    #[error("configuration: {0}")]
    Config(String),
    /// Store access failed.
    #[error(transparent)]
    Store(#[from] store::StoreError),
    /// Ignore rules failed to compile.
    #[error(transparent)]
    Filter(#[from] filters::FilterError),
    /// Content digest failure.
    #[error(transparent)]
    Hash(#[from] checksums::HashError),
    /// Filesystem watching failed.
    #[error("watch: {0}")]
    Notify(#[from] notify::Error),
    /// Local filesystem failure.
    #[error("{path}: {source}")]
    Io {
        /// Path involved.
        path: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl AgentError {
    /// Map the error onto the agent's exit-code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            _ => EXIT_RUNTIME,
        }
    }
}

#[derive(Parser)]
#[command(name = "tether-agent", version, about = "Remote helper for tether")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a digest of this executable.
    Identity,
    /// Print the agent version.
    Version,
    /// Print the resolved remote configuration.
    Config,
    /// Watch configured paths and stream events on stdout.
    Watch,
    /// Walk, hash, and commit an index snapshot.
    Indexing {
        /// Limit the walk to these endpoint prefixes (config's list when
        /// given without values).
        #[arg(long, num_args = 0.., value_name = "PREFIX")]
        manual_transfer: Option<Vec<String>>,
        /// Skip ignore evaluation entirely.
        #[arg(long)]
        bypass_ignore: bool,
    },
    /// Remove literally empty directories under the sync prefixes.
    Prune {
        /// Report removals without performing them.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Run the agent CLI; returns the process exit code.
pub fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // Help/version go to stdout with success per clap convention.
            let _ = err.print();
            return if err.use_stderr() { EXIT_CONFIG } else { 0 };
        }
    };

    let outcome = match cli.command {
        Command::Identity => identity(),
        Command::Version => {
            println!("tether-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Config => show_config(),
        Command::Watch => AgentContext::resolve().and_then(|ctx| watch::run(&ctx)),
        Command::Indexing {
            manual_transfer,
            bypass_ignore,
        } => AgentContext::resolve().and_then(|ctx| {
            indexing::run(
                &ctx,
                &IndexingOptions {
                    manual_transfer,
                    bypass_ignore,
                },
            )
        }),
        Command::Prune { dry_run } => {
            AgentContext::resolve().and_then(|ctx| prune::run(&ctx, dry_run).map(|_| ()))
        }
    };

    match outcome {
        Ok(()) => 0,
        Err(err) => {
            error!(%err, "agent command failed");
            eprintln!("tether-agent: {err}");
            err.exit_code()
        }
    }
}

/// `identity`: one line, the digest of the running executable.
fn identity() -> Result<(), AgentError> {
    let exe = std::env::current_exe().map_err(|source| AgentError::Io {
        path: std::path::PathBuf::from("<current_exe>"),
        source,
    })?;
    let digest = checksums::hash_file(&exe)?;
    println!("{digest}");
    let _ = std::io::stdout().flush();
    Ok(())
}

/// `config`: resolved configuration as pretty JSON.
fn show_config() -> Result<(), AgentError> {
    let ctx = AgentContext::resolve()?;
    if !ctx.config_found {
        println!("NO_REMOTE_CONFIG");
        return Err(AgentError::Config(format!(
            "no config at {}",
            ctx.config_path().display()
        )));
    }
    let rendered = ctx
        .config
        .to_json_pretty()
        .map_err(|err| AgentError::Config(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}
