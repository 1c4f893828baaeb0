//! Client-side upload session state machine.
//!
//! ```text
//! Idle → Initializing → Transferring ⇄ Paused → Finalizing → Complete
//!                  └──────────┴─────────┴───────────┴──→ Failed
//! ```
//!
//! The session is owned by exactly one task; every mutation goes through
//! `&mut self`. Server responses are the authority for acknowledged chunks:
//! the local missing set is replaced wholesale on every status
//! reconciliation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chunkup_protocol::{ChunkUploadResponse, UploadProgress, UploadState, UploadStatusResponse};

use crate::chunked::ChunkLayout;
use crate::validation::{UploadLimits, validate_upload};
use crate::TransferError;

/// Percentage reported while a session has not yet been finalized.
const MAX_PENDING_PERCENTAGE: f64 = 99.0;

/// Reason recorded on a session the caller cancelled.
const CANCELLED_REASON: &str = "upload cancelled";

/// Immutable reference to the file being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File name sent to the server.
    pub name: String,
    pub size: u64,
}

impl SourceFile {
    /// Reads name and size from the filesystem.
    pub fn from_path(path: &Path) -> Result<Self, TransferError> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }
}

/// Outcome of recording a transient chunk failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the same chunk; `attempt` is the new retry count (1-based).
    Retry { attempt: u32 },
    /// The per-chunk retry budget is spent.
    Exhausted { attempts: u32 },
}

/// State of one in-progress transfer.
#[derive(Debug)]
pub struct UploadSession {
    file: SourceFile,
    title: String,
    chunk_size: u64,
    max_retries: u32,
    state: UploadState,
    upload_id: Option<String>,
    file_id: Option<u64>,
    total_chunks: u32,
    uploaded_chunks: u32,
    missing: BTreeSet<u32>,
    retry_count: u32,
    cancelled: bool,
    error: Option<String>,
}

impl UploadSession {
    /// Creates an idle session. Nothing is validated until
    /// [`begin_initialize`](Self::begin_initialize).
    pub fn new(file: SourceFile, title: impl Into<String>, chunk_size: u64, max_retries: u32) -> Self {
        Self {
            file,
            title: title.into(),
            chunk_size,
            max_retries: max_retries.max(1),
            state: UploadState::Idle,
            upload_id: None,
            file_id: None,
            total_chunks: 0,
            uploaded_chunks: 0,
            missing: BTreeSet::new(),
            retry_count: 0,
            cancelled: false,
            error: None,
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// `Idle → Initializing`, guarded by the pre-flight checks.
    pub fn begin_initialize(&mut self, limits: &UploadLimits) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Idle], "initialize")?;
        validate_upload(&self.file, &self.title, limits)?;
        self.layout()?;
        self.state = UploadState::Initializing;
        Ok(())
    }

    /// `Initializing → Transferring` once the server has issued an id.
    ///
    /// A non-zero `chunk_size` from the server replaces the requested one;
    /// the resulting layout must agree with the server's `total_chunks`.
    pub fn initialized(
        &mut self,
        upload_id: String,
        file_id: Option<u64>,
        total_chunks: u32,
        chunk_size: u64,
    ) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Initializing], "accept session")?;
        let chunk_size = if chunk_size > 0 {
            chunk_size
        } else {
            self.chunk_size
        };
        self.check_total(chunk_size, total_chunks)?;

        self.chunk_size = chunk_size;
        self.upload_id = Some(upload_id);
        self.file_id = file_id;
        self.total_chunks = total_chunks;
        self.uploaded_chunks = 0;
        self.missing = (0..total_chunks).collect();
        self.retry_count = 0;
        self.state = UploadState::Transferring;
        Ok(())
    }

    /// `Idle → Transferring` for a session the server already knows about,
    /// e.g. after an application restart.
    pub fn attach(
        &mut self,
        upload_id: String,
        status: &UploadStatusResponse,
        limits: &UploadLimits,
    ) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Idle], "attach")?;
        validate_upload(&self.file, &self.title, limits)?;
        self.check_total(self.chunk_size, status.total_chunks)?;

        self.upload_id = Some(upload_id);
        self.total_chunks = status.total_chunks;
        self.state = UploadState::Transferring;
        self.reconcile(status)
    }

    /// Records a chunk acknowledgment from the server.
    ///
    /// Allowed while paused so the in-flight chunk can land after a pause
    /// request, and while finalizing for resubmitted chunks.
    pub fn record_ack(
        &mut self,
        index: u32,
        ack: &ChunkUploadResponse,
    ) -> Result<(), TransferError> {
        self.expect_state(
            &[
                UploadState::Transferring,
                UploadState::Paused,
                UploadState::Finalizing,
            ],
            "record chunk",
        )?;
        if index >= self.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        self.missing.remove(&index);
        self.raise_uploaded(ack.uploaded_chunks);
        self.retry_count = 0;
        Ok(())
    }

    /// Counts a transient failure of the current chunk.
    pub fn record_transient_failure(&mut self) -> RetryDecision {
        self.retry_count += 1;
        if self.retry_count < self.max_retries {
            RetryDecision::Retry {
                attempt: self.retry_count,
            }
        } else {
            RetryDecision::Exhausted {
                attempts: self.retry_count,
            }
        }
    }

    /// Replaces local progress with the server's view.
    pub fn reconcile(&mut self, status: &UploadStatusResponse) -> Result<(), TransferError> {
        self.expect_state(
            &[
                UploadState::Transferring,
                UploadState::Paused,
                UploadState::Finalizing,
            ],
            "reconcile",
        )?;
        if let Some(id) = &self.upload_id
            && *id != status.upload_id
        {
            return Err(TransferError::InvalidRequest(format!(
                "status for {} does not belong to session {id}",
                status.upload_id
            )));
        }
        if status.total_chunks != self.total_chunks {
            return Err(TransferError::InvalidRequest(format!(
                "server reports {} chunks, session has {}",
                status.total_chunks, self.total_chunks
            )));
        }
        self.missing = status
            .missing_chunks
            .iter()
            .copied()
            .filter(|&i| i < self.total_chunks)
            .collect();
        self.raise_uploaded(status.uploaded_chunks);
        Ok(())
    }

    /// `Transferring → Paused`.
    pub fn pause(&mut self) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Transferring], "pause")?;
        self.state = UploadState::Paused;
        Ok(())
    }

    /// `Paused → Transferring`. The caller must reconcile before sending.
    pub fn resume(&mut self) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Paused], "resume")?;
        self.state = UploadState::Transferring;
        Ok(())
    }

    /// `Transferring → Finalizing`, only once every chunk is acknowledged
    /// locally.
    pub fn begin_finalize(&mut self) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Transferring], "finalize")?;
        if !self.missing.is_empty() {
            return Err(TransferError::IncompleteUpload {
                missing: self.missing_chunks(),
            });
        }
        self.state = UploadState::Finalizing;
        Ok(())
    }

    /// `Finalizing → Complete`.
    pub fn complete(&mut self, file_id: u64) -> Result<(), TransferError> {
        self.expect_state(&[UploadState::Finalizing], "complete")?;
        if !self.missing.is_empty() {
            return Err(TransferError::IncompleteUpload {
                missing: self.missing_chunks(),
            });
        }
        self.file_id = Some(file_id);
        self.uploaded_chunks = self.total_chunks;
        self.state = UploadState::Complete;
        Ok(())
    }

    /// Any non-terminal state → `Failed`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransferError> {
        if self.state.is_terminal() {
            return Err(TransferError::InvalidTransition {
                from: self.state,
                action: "fail",
            });
        }
        self.error = Some(reason.into());
        self.state = UploadState::Failed;
        Ok(())
    }

    /// Any non-terminal state → `Failed`, flagged as cancelled.
    pub fn cancel(&mut self) -> Result<(), TransferError> {
        self.fail(CANCELLED_REASON)?;
        self.cancelled = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Chunk layout for the current chunk size.
    pub fn layout(&self) -> Result<ChunkLayout, TransferError> {
        ChunkLayout::new(self.file.size, self.chunk_size)
    }

    /// Lowest chunk index not yet acknowledged.
    pub fn next_missing(&self) -> Option<u32> {
        self.missing.first().copied()
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        self.missing.iter().copied().collect()
    }

    /// Acknowledged-chunk percentage, `uploaded / total * 100`.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        f64::from(self.uploaded_chunks) / f64::from(self.total_chunks) * 100.0
    }

    /// Progress as reported to callers: never 100% before completion.
    pub fn progress(&self) -> UploadProgress {
        let percentage = if self.state == UploadState::Complete {
            100.0
        } else {
            self.progress_percentage().min(MAX_PENDING_PERCENTAGE)
        };
        UploadProgress {
            upload_id: self.upload_id.clone().unwrap_or_default(),
            state: self.state,
            uploaded_chunks: self.uploaded_chunks,
            total_chunks: self.total_chunks,
            percentage,
            error: self.error.clone().unwrap_or_default(),
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn file_id(&self) -> Option<u64> {
        self.file_id
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn uploaded_chunks(&self) -> u32 {
        self.uploaded_chunks
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_paused(&self) -> bool {
        self.state == UploadState::Paused
    }

    pub fn is_complete(&self) -> bool {
        self.state == UploadState::Complete
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn expect_state(
        &self,
        allowed: &[UploadState],
        action: &'static str,
    ) -> Result<(), TransferError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TransferError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }

    fn check_total(&self, chunk_size: u64, total_chunks: u32) -> Result<(), TransferError> {
        let expected = ChunkLayout::new(self.file.size, chunk_size)?.total_chunks();
        if expected != total_chunks {
            return Err(TransferError::InvalidRequest(format!(
                "server expects {total_chunks} chunks of {chunk_size} bytes, file has {expected}"
            )));
        }
        Ok(())
    }

    // Reported progress never goes backwards, even if the server's count does.
    fn raise_uploaded(&mut self, reported: u32) {
        self.uploaded_chunks = self.uploaded_chunks.max(reported).min(self.total_chunks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(size: u64) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/data/report.pdf"),
            name: "report.pdf".into(),
            size,
        }
    }

    fn ack(index: u32, uploaded: u32, total: u32) -> ChunkUploadResponse {
        ChunkUploadResponse {
            detail: String::new(),
            chunk_number: index,
            chunk_size: 0,
            uploaded_chunks: uploaded,
            total_chunks: total,
            progress_percentage: f64::from(uploaded) / f64::from(total) * 100.0,
        }
    }

    fn status(id: &str, total: u32, missing: Vec<u32>) -> UploadStatusResponse {
        let uploaded = total - missing.len() as u32;
        UploadStatusResponse {
            upload_id: id.into(),
            file_title: String::new(),
            total_chunks: total,
            uploaded_chunks: uploaded,
            is_complete: false,
            progress_percentage: f64::from(uploaded) / f64::from(total) * 100.0,
            missing_chunks: missing,
        }
    }

    /// Session of 5 chunks of 10 bytes, in `Transferring`.
    fn transferring() -> UploadSession {
        let mut s = UploadSession::new(source(50), "Report", 10, 3);
        s.begin_initialize(&UploadLimits::default()).unwrap();
        s.initialized("u1".into(), None, 5, 10).unwrap();
        s
    }

    #[test]
    fn new_session_is_idle() {
        let s = UploadSession::new(source(50), "Report", 10, 3);
        assert_eq!(s.state(), UploadState::Idle);
        assert!(s.upload_id().is_none());
        assert_eq!(s.progress_percentage(), 0.0);
    }

    #[test]
    fn initialize_validates_before_leaving_idle() {
        let mut s = UploadSession::new(source(50), "", 10, 3);
        assert!(matches!(
            s.begin_initialize(&UploadLimits::default()),
            Err(TransferError::EmptyTitle)
        ));
        assert_eq!(s.state(), UploadState::Idle);

        let mut big = UploadSession::new(source(500), "Big", 10, 3);
        let limits = UploadLimits {
            max_file_size: 100,
            ..Default::default()
        };
        assert!(matches!(
            big.begin_initialize(&limits),
            Err(TransferError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn initialized_populates_missing_set() {
        let s = transferring();
        assert_eq!(s.state(), UploadState::Transferring);
        assert_eq!(s.upload_id(), Some("u1"));
        assert_eq!(s.total_chunks(), 5);
        assert_eq!(s.missing_chunks(), vec![0, 1, 2, 3, 4]);
        assert_eq!(s.next_missing(), Some(0));
    }

    #[test]
    fn initialized_adopts_server_chunk_size() {
        let mut s = UploadSession::new(source(50), "Report", 10, 3);
        s.begin_initialize(&UploadLimits::default()).unwrap();
        s.initialized("u1".into(), None, 2, 25).unwrap();
        assert_eq!(s.chunk_size(), 25);
        assert_eq!(s.missing_chunks(), vec![0, 1]);
    }

    #[test]
    fn initialized_rejects_layout_mismatch() {
        let mut s = UploadSession::new(source(50), "Report", 10, 3);
        s.begin_initialize(&UploadLimits::default()).unwrap();
        assert!(matches!(
            s.initialized("u1".into(), None, 4, 10),
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejected_server_chunk_size_is_not_adopted() {
        let mut s = UploadSession::new(source(50), "Report", 10, 3);
        s.begin_initialize(&UploadLimits::default()).unwrap();
        assert!(s.initialized("u1".into(), None, 5, 25).is_err());
        assert_eq!(s.state(), UploadState::Initializing);
        assert_eq!(s.chunk_size(), 10);
        assert_eq!(s.layout().unwrap().total_chunks(), 5);
        assert!(s.upload_id().is_none());
    }

    #[test]
    fn ack_uses_server_count_and_resets_retries() {
        let mut s = transferring();
        assert_eq!(
            s.record_transient_failure(),
            RetryDecision::Retry { attempt: 1 }
        );
        assert_eq!(s.retry_count(), 1);

        s.record_ack(0, &ack(0, 1, 5)).unwrap();
        assert_eq!(s.uploaded_chunks(), 1);
        assert_eq!(s.retry_count(), 0);
        assert_eq!(s.next_missing(), Some(1));

        // Server may count more than the client expected.
        s.record_ack(1, &ack(1, 3, 5)).unwrap();
        assert_eq!(s.uploaded_chunks(), 3);
    }

    #[test]
    fn uploaded_never_decreases() {
        let mut s = transferring();
        s.record_ack(0, &ack(0, 3, 5)).unwrap();
        s.record_ack(1, &ack(1, 2, 5)).unwrap();
        assert_eq!(s.uploaded_chunks(), 3);

        s.pause().unwrap();
        s.reconcile(&status("u1", 5, vec![2, 3, 4])).unwrap();
        assert_eq!(s.uploaded_chunks(), 3);
    }

    #[test]
    fn retry_budget_is_per_chunk() {
        let mut s = transferring();
        assert_eq!(
            s.record_transient_failure(),
            RetryDecision::Retry { attempt: 1 }
        );
        assert_eq!(
            s.record_transient_failure(),
            RetryDecision::Retry { attempt: 2 }
        );
        assert_eq!(
            s.record_transient_failure(),
            RetryDecision::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn pause_and_resume() {
        let mut s = transferring();
        s.pause().unwrap();
        assert!(s.is_paused());
        assert!(s.pause().is_err());

        // In-flight chunk may still land while paused.
        s.record_ack(0, &ack(0, 1, 5)).unwrap();

        s.resume().unwrap();
        assert_eq!(s.state(), UploadState::Transferring);
        assert!(s.resume().is_err());
    }

    #[test]
    fn reconcile_replaces_missing_set() {
        let mut s = transferring();
        for i in 0..3 {
            s.record_ack(i, &ack(i, i + 1, 5)).unwrap();
        }
        s.pause().unwrap();
        s.resume().unwrap();

        // Server lost chunk 1 and says 3, 4 are outstanding.
        s.reconcile(&status("u1", 5, vec![1, 3, 4])).unwrap();
        assert_eq!(s.missing_chunks(), vec![1, 3, 4]);
        assert_eq!(s.next_missing(), Some(1));
    }

    #[test]
    fn reconcile_rejects_foreign_status() {
        let mut s = transferring();
        assert!(s.reconcile(&status("other", 5, vec![])).is_err());
        assert!(s.reconcile(&status("u1", 6, vec![])).is_err());
    }

    #[test]
    fn finalize_requires_empty_missing_set() {
        let mut s = transferring();
        assert!(matches!(
            s.begin_finalize(),
            Err(TransferError::IncompleteUpload { .. })
        ));

        for i in 0..5 {
            s.record_ack(i, &ack(i, i + 1, 5)).unwrap();
        }
        s.begin_finalize().unwrap();
        assert_eq!(s.state(), UploadState::Finalizing);

        // Server disagrees at finalize time.
        s.reconcile(&status("u1", 5, vec![4])).unwrap();
        assert!(s.complete(7).is_err());

        s.record_ack(4, &ack(4, 5, 5)).unwrap();
        s.complete(7).unwrap();
        assert!(s.is_complete());
        assert!(!s.is_paused());
        assert_eq!(s.file_id(), Some(7));
    }

    #[test]
    fn progress_only_hits_100_on_completion() {
        let mut s = transferring();
        for i in 0..5 {
            s.record_ack(i, &ack(i, i + 1, 5)).unwrap();
        }
        assert_eq!(s.progress_percentage(), 100.0);
        assert!(s.progress().percentage < 100.0);

        s.begin_finalize().unwrap();
        s.complete(1).unwrap();
        assert_eq!(s.progress().percentage, 100.0);
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut s = transferring();
        s.fail("network down").unwrap();
        assert_eq!(s.state(), UploadState::Failed);
        assert_eq!(s.error(), Some("network down"));
        assert!(s.pause().is_err());
        assert!(s.fail("again").is_err());
        assert!(s.cancel().is_err());
        assert!(s.record_ack(0, &ack(0, 1, 5)).is_err());
    }

    #[test]
    fn cancel_flags_session() {
        let mut s = transferring();
        s.pause().unwrap();
        s.cancel().unwrap();
        assert!(s.is_cancelled());
        assert_eq!(s.state(), UploadState::Failed);
        assert_eq!(s.progress().error, CANCELLED_REASON);
    }

    #[test]
    fn attach_resumes_known_session() {
        let mut s = UploadSession::new(source(50), "Report", 10, 3);
        s.attach("u9".into(), &status("u9", 5, vec![3, 4]), &UploadLimits::default())
            .unwrap();
        assert_eq!(s.state(), UploadState::Transferring);
        assert_eq!(s.uploaded_chunks(), 3);
        assert_eq!(s.missing_chunks(), vec![3, 4]);
    }

    #[test]
    fn attach_rejects_mismatched_layout() {
        let mut s = UploadSession::new(source(50), "Report", 10, 3);
        assert!(
            s.attach("u9".into(), &status("u9", 2, vec![1]), &UploadLimits::default())
                .is_err()
        );
    }
}
