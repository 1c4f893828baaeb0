//! Upload progress display.

use chunkup_uploader::UploadEvent;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over acknowledged chunks, driven by upload events.
pub struct UploadBar {
    bar: ProgressBar,
    file_name: String,
    upload_id: Option<String>,
}

impl UploadBar {
    pub fn new(file_name: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_prefix(format!("Uploading: {file_name}"));

        Self {
            bar,
            file_name: file_name.to_string(),
            upload_id: None,
        }
    }

    /// Server-issued id, once the session is open.
    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn apply(&mut self, event: &UploadEvent) {
        match event {
            UploadEvent::Initialized {
                upload_id,
                total_chunks,
            } => {
                self.upload_id = Some(upload_id.clone());
                self.bar.set_length(u64::from(*total_chunks));
                self.bar
                    .set_prefix(format!("Uploading: {} ({upload_id})", self.file_name));
            }
            UploadEvent::Progress {
                progress,
                bytes_per_second,
                eta,
            } => {
                self.bar.set_position(u64::from(progress.uploaded_chunks));
                let eta = eta
                    .map(|d| format!(", eta {}s", d.as_secs()))
                    .unwrap_or_default();
                self.bar.set_message(format!(
                    "{:.1}% ({}/s{eta})",
                    progress.percentage,
                    format_bytes(*bytes_per_second as u64)
                ));
            }
            UploadEvent::Retrying {
                index,
                attempt,
                delay,
                reason,
            } => {
                self.bar.println(format!(
                    "chunk {index} failed ({reason}); retry {attempt} in {}ms",
                    delay.as_millis()
                ));
            }
            UploadEvent::Paused { .. } => self.bar.set_message("paused (r to resume)"),
            UploadEvent::Resumed { missing, .. } => {
                self.bar.set_message(String::new());
                self.bar
                    .println(format!("resumed, {missing} chunk(s) remaining"));
            }
            UploadEvent::ChunkComplete { .. }
            | UploadEvent::Completed { .. }
            | UploadEvent::Failed { .. }
            | UploadEvent::Cancelled { .. } => {}
        }
    }

    pub fn note(&self, msg: impl Into<String>) {
        self.bar.println(msg.into());
    }

    pub fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Leaves the bar where it stopped (for errors and cancellation).
    pub fn abandon(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }
}

/// Formats bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
