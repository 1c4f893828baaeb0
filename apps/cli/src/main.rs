//! chunkup command-line client entry point.

mod app;
mod config;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Resumable chunked file uploads
#[derive(Parser)]
#[command(name = "chunkup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to ~/.config/chunkup/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upload server base URL
    #[arg(long)]
    server: Option<String>,

    /// Bearer token (overrides CHUNKUP_TOKEN and the config file)
    #[arg(long)]
    token: Option<String>,

    /// Assemble into a local directory instead of a server
    #[arg(long)]
    local: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a file
    Upload {
        /// File to upload
        file: PathBuf,

        /// Title for the uploaded file (defaults to the file name before its first dot)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Continue an interrupted upload
    Resume {
        /// Upload id printed when the upload started
        upload_id: String,

        /// The same file that was being uploaded
        file: PathBuf,

        /// Title for the uploaded file (defaults to the file name before its first dot)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Show which chunks the server holds
    Status {
        upload_id: String,
    },

    /// Release an upload session on the server
    Cancel {
        upload_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_overrides(cli.server, cli.token, std::env::var(config::TOKEN_ENV).ok());
    tracing::debug!(server = %config.server_url, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(cli.command, cli.local, config));
    // A cancelled upload has released its session before `run` returns.
    // Do not wait on a stdin read that may never return.
    rt.shutdown_background();
    result
}
