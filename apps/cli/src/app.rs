//! Command execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chunkup_uploader::{
    HttpTransport, LocalTransport, SessionTransport, TransferOrchestrator, UploadCallbacks,
    UploadHandle, UploadOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::Commands;
use crate::config::Config;
use crate::progress::UploadBar;

/// Runs one CLI command to completion.
pub async fn run(command: Commands, local: Option<PathBuf>, config: Config) -> anyhow::Result<()> {
    let target = Target::new(local.as_deref(), &config)?;

    match command {
        Commands::Upload { file, title } => {
            let title = title.unwrap_or_else(|| default_title(&file));
            let handle = target
                .orchestrator(&config)
                .start(&file, &title, UploadCallbacks::new())?;
            drive(handle, &file, &target).await
        }
        Commands::Resume {
            upload_id,
            file,
            title,
        } => {
            target.require_remote("resume")?;
            let title = title.unwrap_or_else(|| default_title(&file));
            let handle = target.orchestrator(&config).resume_existing(
                &upload_id,
                &file,
                &title,
                UploadCallbacks::new(),
            )?;
            drive(handle, &file, &target).await
        }
        Commands::Status { upload_id } => {
            target.require_remote("status")?;
            let status = target.transport().status(&upload_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Cancel { upload_id } => {
            target.require_remote("cancel")?;
            target.transport().cancel(&upload_id).await?;
            println!("upload {upload_id} cancelled");
            Ok(())
        }
    }
}

/// Where uploads go.
enum Target {
    Remote(Arc<HttpTransport>),
    Local(Arc<LocalTransport>),
}

impl Target {
    fn new(local: Option<&Path>, config: &Config) -> anyhow::Result<Self> {
        if let Some(dir) = local {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
            info!(dir = %dir.display(), "assembling uploads locally");
            return Ok(Self::Local(Arc::new(LocalTransport::new(dir))));
        }

        let timeout = config.upload.retry_policy().request_timeout;
        let transport = HttpTransport::new(&config.server_url, &config.token, timeout)?;
        Ok(Self::Remote(Arc::new(transport)))
    }

    fn transport(&self) -> Arc<dyn SessionTransport> {
        match self {
            Self::Remote(t) => t.clone(),
            Self::Local(t) => t.clone(),
        }
    }

    fn orchestrator(&self, config: &Config) -> TransferOrchestrator {
        TransferOrchestrator::new(self.transport(), config.upload.clone())
    }

    /// Local sessions live only as long as this process.
    fn require_remote(&self, command: &str) -> anyhow::Result<()> {
        if matches!(self, Self::Local(_)) {
            bail!("`{command}` needs a server; --local only supports `upload`");
        }
        Ok(())
    }
}

/// Runs an upload in the foreground, reading pause/resume/cancel from stdin
/// and cancelling on Ctrl-C.
async fn drive(mut handle: UploadHandle, file: &Path, target: &Target) -> anyhow::Result<()> {
    let mut events = handle
        .take_events()
        .context("upload events already taken")?;
    let control = handle.control();
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut bar = UploadBar::new(&name);
    bar.note("controls: p = pause, r = resume, c = cancel (then Enter)");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            Some(event) = events.recv() => bar.apply(&event),
            _ = tokio::signal::ctrl_c() => {
                bar.note("cancelling...");
                control.cancel();
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "p" | "pause" => control.pause(),
                    "r" | "resume" => control.resume(),
                    "c" | "cancel" => control.cancel(),
                    "" => {}
                    other => bar.note(format!("unknown command: {other}")),
                },
                _ => stdin_open = false,
            },
        }
    };
    while let Ok(event) = events.try_recv() {
        bar.apply(&event);
    }

    match outcome {
        UploadOutcome::Complete { upload_id, file_id } => {
            bar.finish("upload complete".into());
            println!("file id {file_id} (upload {upload_id})");
            if let Target::Local(local) = target
                && let Some(path) = local.assembled_path(file_id)
            {
                println!("assembled at {}", path.display());
            }
            Ok(())
        }
        UploadOutcome::Cancelled => {
            bar.abandon("cancelled".into());
            println!("upload cancelled");
            Ok(())
        }
        UploadOutcome::Failed { reason } => {
            bar.abandon("failed".into());
            if let (Some(id), Target::Remote(_)) = (bar.upload_id(), target) {
                eprintln!(
                    "resume later with: chunkup resume {id} {}",
                    file.display()
                );
            }
            bail!("upload failed: {reason}")
        }
    }
}

/// Title used when none is given: the file name up to its first dot.
fn default_title(file: &Path) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}
