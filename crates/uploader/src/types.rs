//! Upload event, outcome and callback types.

use std::fmt;
use std::time::Duration;

use chunkup_protocol::UploadProgress;

/// Event emitted by a running upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The server opened the session.
    Initialized { upload_id: String, total_chunks: u32 },
    /// A chunk was acknowledged.
    Progress {
        progress: UploadProgress,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    /// Chunk `index` is stored on the server.
    ChunkComplete { index: u32 },
    /// A transient failure; the same chunk is sent again after `delay`.
    Retrying {
        index: u32,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// The upload stopped at a chunk boundary.
    Paused { upload_id: String },
    /// The upload continues from the server's view of missing chunks.
    Resumed { upload_id: String, missing: usize },
    /// The server assembled the file.
    Completed { upload_id: String, file_id: u64 },
    /// The upload stopped for good.
    Failed {
        upload_id: Option<String>,
        reason: String,
    },
    /// The caller cancelled the upload.
    Cancelled { upload_id: Option<String> },
}

/// Final result of an upload task.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Complete { upload_id: String, file_id: u64 },
    Failed { reason: String },
    Cancelled,
}

impl UploadOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// `(percentage, uploaded_chunks, total_chunks)`.
pub type ProgressCallback = Box<dyn Fn(f64, u32, u32) + Send + Sync>;
/// Index of the acknowledged chunk.
pub type ChunkCallback = Box<dyn Fn(u32) + Send + Sync>;
/// Server-side file id.
pub type CompletionCallback = Box<dyn Fn(u64) + Send + Sync>;
/// Human-readable failure reason.
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Optional observers invoked from the upload task.
///
/// The completion and error callbacks fire at most once, and never both.
#[derive(Default)]
pub struct UploadCallbacks {
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_chunk_complete: Option<ChunkCallback>,
    pub(crate) on_complete: Option<CompletionCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl UploadCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl Fn(f64, u32, u32) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_chunk_complete(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_chunk_complete = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub(crate) fn progress(&self, percentage: f64, uploaded: u32, total: u32) {
        if let Some(f) = &self.on_progress {
            f(percentage, uploaded, total);
        }
    }

    pub(crate) fn chunk_complete(&self, index: u32) {
        if let Some(f) = &self.on_chunk_complete {
            f(index);
        }
    }

    pub(crate) fn complete(&self, file_id: u64) {
        if let Some(f) = &self.on_complete {
            f(file_id);
        }
    }

    pub(crate) fn error(&self, reason: &str) {
        if let Some(f) = &self.on_error {
            f(reason);
        }
    }
}

impl fmt::Debug for UploadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_chunk_complete", &self.on_chunk_complete.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn unset_callbacks_are_noops() {
        let callbacks = UploadCallbacks::new();
        callbacks.progress(50.0, 1, 2);
        callbacks.chunk_complete(0);
        callbacks.complete(7);
        callbacks.error("boom");
    }

    #[test]
    fn callbacks_receive_arguments() {
        let seen = Arc::new(AtomicU32::new(0));
        let s = seen.clone();
        let callbacks = UploadCallbacks::new().on_chunk_complete(move |i| {
            s.store(i, Ordering::SeqCst);
        });
        callbacks.chunk_complete(4);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert!(format!("{callbacks:?}").contains("on_chunk_complete: true"));
    }

    #[test]
    fn outcome_helpers() {
        assert!(
            UploadOutcome::Complete {
                upload_id: "u".into(),
                file_id: 1
            }
            .is_complete()
        );
        assert!(!UploadOutcome::Cancelled.is_complete());
    }
}
