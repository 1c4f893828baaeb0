//! Upload orchestrator and per-upload session actor.
//!
//! Each upload runs in its own task that exclusively owns the
//! [`UploadSession`]. Callers steer it through an [`UploadHandle`]:
//! pause and resume travel as commands and are applied at chunk boundaries,
//! cancellation is a [`CancellationToken`] that also interrupts in-flight
//! requests and backoff sleeps.

use std::path::Path;
use std::sync::Arc;

use chunkup_protocol::{InitUploadRequest, UploadProgress};
use chunkup_transfer::{
    Chunk, ChunkReader, RetryDecision, SourceFile, SpeedCalculator, UploadLimits, UploadSession,
    validate_upload,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::retry::RetryPolicy;
use crate::transport::{SessionTransport, TransportFuture};
use crate::types::{UploadCallbacks, UploadEvent, UploadOutcome};

/// Starts uploads against one transport.
pub struct TransferOrchestrator {
    transport: Arc<dyn SessionTransport>,
    config: UploadConfig,
}

impl TransferOrchestrator {
    pub fn new(transport: Arc<dyn SessionTransport>, config: UploadConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Validates `path` and starts a fresh upload in a background task.
    ///
    /// Validation failures are returned here, before any request is sent.
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        path: &Path,
        title: &str,
        callbacks: UploadCallbacks,
    ) -> Result<UploadHandle, UploadError> {
        let file = SourceFile::from_path(path)?;
        let mut session = UploadSession::new(
            file,
            title,
            self.config.chunk_size,
            self.config.retry_policy().max_retries,
        );
        session.begin_initialize(&self.config.limits())?;
        self.spawn(session, Start::Fresh, callbacks)
    }

    /// Continues a session the server already knows about, e.g. after the
    /// client process restarted.
    ///
    /// Only the chunks the server reports missing are sent.
    pub fn resume_existing(
        &self,
        upload_id: &str,
        path: &Path,
        title: &str,
        callbacks: UploadCallbacks,
    ) -> Result<UploadHandle, UploadError> {
        let file = SourceFile::from_path(path)?;
        validate_upload(&file, title, &self.config.limits())?;
        let session = UploadSession::new(
            file,
            title,
            self.config.chunk_size,
            self.config.retry_policy().max_retries,
        );
        self.spawn(session, Start::Attach(upload_id.to_string()), callbacks)
    }

    fn spawn(
        &self,
        session: UploadSession,
        start: Start,
        callbacks: UploadCallbacks,
    ) -> Result<UploadHandle, UploadError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UploadError::Internal(format!("no async runtime: {e}")))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(256);
        let (progress_tx, progress_rx) = watch::channel(session.progress());
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            transport: Arc::clone(&self.transport),
            session,
            policy: self.config.retry_policy(),
            limits: self.config.limits(),
            commands: commands_rx,
            commands_open: true,
            cancel: cancel.clone(),
            events: events_tx,
            progress: progress_tx,
            callbacks,
            speed: SpeedCalculator::default(),
            reader: None,
        };
        let task = runtime.spawn(actor.run(start));

        Ok(UploadHandle {
            control: UploadControl {
                commands: commands_tx,
                cancel,
            },
            events: Some(events_rx),
            progress: progress_rx,
            task,
        })
    }
}

/// Cloneable pause/resume/cancel control for a running upload.
#[derive(Debug, Clone)]
pub struct UploadControl {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl UploadControl {
    /// Requests a pause. The chunk in flight is allowed to finish.
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    /// Resumes a paused upload after re-syncing with the server.
    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Cancels the upload and releases the server session.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Handle to one running upload.
#[derive(Debug)]
pub struct UploadHandle {
    control: UploadControl,
    events: Option<mpsc::Receiver<UploadEvent>>,
    progress: watch::Receiver<UploadProgress>,
    task: JoinHandle<UploadOutcome>,
}

impl UploadHandle {
    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn control(&self) -> UploadControl {
        self.control.clone()
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events.take()
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> UploadProgress {
        self.progress.borrow().clone()
    }

    /// Server-issued session id, once known.
    pub fn upload_id(&self) -> Option<String> {
        let id = self.progress.borrow().upload_id.clone();
        (!id.is_empty()).then_some(id)
    }

    /// Waits for the upload to finish.
    pub async fn wait(self) -> UploadOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome::Failed {
                reason: format!("upload task failed: {e}"),
            },
        }
    }
}

#[derive(Debug)]
enum Command {
    Pause,
    Resume,
}

enum Start {
    Fresh,
    Attach(String),
}

/// Single owner of an [`UploadSession`].
struct SessionActor {
    transport: Arc<dyn SessionTransport>,
    session: UploadSession,
    policy: RetryPolicy,
    limits: UploadLimits,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    cancel: CancellationToken,
    events: mpsc::Sender<UploadEvent>,
    progress: watch::Sender<UploadProgress>,
    callbacks: UploadCallbacks,
    speed: SpeedCalculator,
    reader: Option<ChunkReader>,
}

impl SessionActor {
    async fn run(mut self, start: Start) -> UploadOutcome {
        let result = self.drive(start).await;
        // Release before reporting, so a caller that exits on the outcome
        // does not drop the request.
        if matches!(result, Err(UploadError::Cancelled))
            && let Some(id) = self.session.upload_id().map(str::to_string)
        {
            self.release(&id).await;
        }
        self.finish(result)
    }

    async fn drive(&mut self, start: Start) -> Result<u64, UploadError> {
        match start {
            Start::Fresh => self.initialize().await?,
            Start::Attach(upload_id) => self.attach(upload_id).await?,
        }
        self.open_reader().await?;

        loop {
            self.transfer_missing().await?;
            if self.session.is_paused() {
                self.wait_for_resume().await?;
                continue;
            }
            self.session.begin_finalize()?;
            self.publish();
            return self.finalize().await;
        }
    }

    // -----------------------------------------------------------------------
    // Session setup
    // -----------------------------------------------------------------------

    async fn initialize(&mut self) -> Result<(), UploadError> {
        let layout = self.session.layout()?;
        let req = InitUploadRequest {
            file_title: self.session.title().to_string(),
            file_name: self.session.file().name.clone(),
            file_size: layout.file_size(),
            total_chunks: layout.total_chunks(),
            chunk_size: layout.chunk_size(),
        };
        let resp = self
            .guarded_with_retry("initialize", || self.transport.initialize(&req))
            .await?;

        self.session.initialized(
            resp.upload_id.clone(),
            resp.file_id,
            resp.total_chunks,
            resp.chunk_size,
        )?;
        info!(
            upload_id = %resp.upload_id,
            file = %req.file_name,
            total_chunks = resp.total_chunks,
            chunk_size = self.session.chunk_size(),
            "upload session initialized"
        );
        self.emit(UploadEvent::Initialized {
            upload_id: resp.upload_id,
            total_chunks: resp.total_chunks,
        });
        self.publish();
        Ok(())
    }

    async fn attach(&mut self, upload_id: String) -> Result<(), UploadError> {
        let status = self
            .guarded_with_retry("status", || self.transport.status(&upload_id))
            .await?;
        self.session.attach(upload_id.clone(), &status, &self.limits)?;
        info!(
            upload_id = %upload_id,
            uploaded = status.uploaded_chunks,
            missing = status.missing_chunks.len(),
            "attached to existing upload session"
        );
        self.emit(UploadEvent::Initialized {
            upload_id,
            total_chunks: status.total_chunks,
        });
        self.publish();
        Ok(())
    }

    async fn open_reader(&mut self) -> Result<(), UploadError> {
        let path = self.session.file().path.clone();
        let chunk_size = self.session.chunk_size();
        let reader = tokio::task::spawn_blocking(move || ChunkReader::open(&path, chunk_size))
            .await
            .map_err(|e| UploadError::Internal(format!("task join error: {e}")))??;

        if reader.layout() != self.session.layout()? {
            return Err(UploadError::InvalidRequest(
                "source file changed since the upload started".into(),
            ));
        }
        self.reader = Some(reader);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// Sends missing chunks in ascending order until none remain or a pause
    /// request arrives.
    async fn transfer_missing(&mut self) -> Result<(), UploadError> {
        loop {
            self.check_cancelled()?;
            self.apply_commands();
            if self.session.is_paused() {
                return Ok(());
            }
            let Some(index) = self.session.next_missing() else {
                return Ok(());
            };
            self.send_chunk(index).await?;
        }
    }

    /// Submits chunk `index`, retrying transient failures with linear
    /// backoff until the retry budget is spent.
    async fn send_chunk(&mut self, index: u32) -> Result<(), UploadError> {
        let upload_id = self.upload_id()?;
        let mut chunk = self.read_chunk(index).await?;

        loop {
            let result = self.guarded(self.transport.submit_chunk(&upload_id, &chunk)).await;
            let err = match result {
                Ok(ack) => {
                    self.session.record_ack(index, &ack)?;
                    self.speed.record(chunk.len() as u64);
                    debug!(
                        upload_id = %upload_id,
                        chunk = index,
                        uploaded = self.session.uploaded_chunks(),
                        total = self.session.total_chunks(),
                        "chunk acknowledged"
                    );
                    self.callbacks.chunk_complete(index);
                    self.emit(UploadEvent::ChunkComplete { index });
                    self.emit_progress();
                    return Ok(());
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            match self.session.record_transient_failure() {
                RetryDecision::Retry { attempt } => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        upload_id = %upload_id,
                        chunk = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "chunk submission failed, retrying"
                    );
                    self.emit(UploadEvent::Retrying {
                        index,
                        attempt,
                        delay,
                        reason: err.to_string(),
                    });
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if matches!(err, UploadError::DigestMismatch(_)) {
                        // The bytes may have been misread; take them from disk again.
                        chunk = self.read_chunk(index).await?;
                    }
                }
                RetryDecision::Exhausted { attempts } => {
                    return Err(UploadError::RetriesExhausted {
                        index,
                        attempts,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    async fn read_chunk(&mut self, index: u32) -> Result<Chunk, UploadError> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| UploadError::Internal("chunk reader not open".into()))?;
        let (reader, chunk) = tokio::task::spawn_blocking(move || {
            let chunk = reader.read_chunk(index);
            (reader, chunk)
        })
        .await
        .map_err(|e| UploadError::Internal(format!("task join error: {e}")))?;
        self.reader = Some(reader);
        Ok(chunk?)
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    /// Drains pending commands without blocking.
    fn apply_commands(&mut self) {
        while self.commands_open {
            match self.commands.try_recv() {
                Ok(cmd) => self.apply(cmd),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.commands_open = false,
            }
        }
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Pause => match self.session.pause() {
                Ok(()) => {
                    let upload_id = self.session.upload_id().unwrap_or_default().to_string();
                    info!(upload_id = %upload_id, "upload paused");
                    self.speed.reset();
                    self.publish();
                    self.emit(UploadEvent::Paused { upload_id });
                }
                Err(e) => debug!(error = %e, "pause ignored"),
            },
            Command::Resume => {
                if !self.session.is_paused() {
                    debug!(state = ?self.session.state(), "resume ignored");
                }
            }
        }
    }

    /// Blocks until a resume command, then replaces the local missing set
    /// with the server's.
    async fn wait_for_resume(&mut self) -> Result<(), UploadError> {
        if !self.commands_open {
            return Err(UploadError::Cancelled);
        }
        loop {
            let cmd = tokio::select! {
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                cmd = self.commands.recv(), if self.commands_open => cmd,
            };
            match cmd {
                Some(Command::Resume) => break,
                Some(Command::Pause) => {}
                // Nobody left to resume us.
                None => {
                    self.commands_open = false;
                    return Err(UploadError::Cancelled);
                }
            }
        }

        self.session.resume()?;
        let upload_id = self.upload_id()?;
        let status = self
            .guarded_with_retry("status", || self.transport.status(&upload_id))
            .await?;
        self.session.reconcile(&status)?;

        let missing = self.session.missing_chunks().len();
        info!(upload_id = %upload_id, missing, "upload resumed");
        self.emit(UploadEvent::Resumed { upload_id, missing });
        self.publish();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------------

    /// Re-syncs, sends whatever the server still lacks and finalizes.
    ///
    /// An incomplete-upload rejection gets exactly one more round.
    async fn finalize(&mut self) -> Result<u64, UploadError> {
        let upload_id = self.upload_id()?;

        self.resubmit_missing(&upload_id).await?;
        let result = self
            .guarded_with_retry("finalize", || self.transport.finalize(&upload_id))
            .await;
        match result {
            Ok(resp) => return self.complete(resp.file_id),
            Err(UploadError::IncompleteUpload { missing }) => {
                warn!(upload_id = %upload_id, ?missing, "server reports missing chunks, resubmitting");
            }
            Err(e) => return Err(e),
        }

        self.resubmit_missing(&upload_id).await?;
        let resp = self
            .guarded_with_retry("finalize", || self.transport.finalize(&upload_id))
            .await?;
        self.complete(resp.file_id)
    }

    async fn resubmit_missing(&mut self, upload_id: &str) -> Result<(), UploadError> {
        let status = self
            .guarded_with_retry("status", || self.transport.status(upload_id))
            .await?;
        self.session.reconcile(&status)?;
        while let Some(index) = self.session.next_missing() {
            self.check_cancelled()?;
            self.send_chunk(index).await?;
        }
        Ok(())
    }

    fn complete(&mut self, file_id: u64) -> Result<u64, UploadError> {
        self.session.complete(file_id)?;
        self.emit_progress();
        Ok(file_id)
    }

    // -----------------------------------------------------------------------
    // Outcome
    // -----------------------------------------------------------------------

    fn finish(mut self, result: Result<u64, UploadError>) -> UploadOutcome {
        let upload_id = self.session.upload_id().map(str::to_string);

        let outcome = match result {
            Ok(file_id) => {
                let upload_id = upload_id.unwrap_or_default();
                info!(upload_id = %upload_id, file_id, "upload complete");
                self.callbacks.complete(file_id);
                self.emit(UploadEvent::Completed {
                    upload_id: upload_id.clone(),
                    file_id,
                });
                UploadOutcome::Complete { upload_id, file_id }
            }
            Err(UploadError::Cancelled) => {
                let _ = self.session.cancel();
                info!(upload_id = ?upload_id, "upload cancelled");
                self.emit(UploadEvent::Cancelled { upload_id });
                UploadOutcome::Cancelled
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = self.session.fail(&reason);
                error!(upload_id = ?upload_id, error = %reason, "upload failed");
                self.callbacks.error(&reason);
                self.emit(UploadEvent::Failed {
                    upload_id,
                    reason: reason.clone(),
                });
                UploadOutcome::Failed { reason }
            }
        };
        self.publish();
        outcome
    }

    /// Best-effort server release; failures are logged, never surfaced.
    async fn release(&self, upload_id: &str) {
        let timeout = self.policy.request_timeout;
        match tokio::time::timeout(timeout, self.transport.cancel(upload_id)).await {
            Ok(Ok(())) => debug!(upload_id = %upload_id, "server session released"),
            Ok(Err(e)) => warn!(upload_id = %upload_id, error = %e, "failed to release server session"),
            Err(_) => warn!(upload_id = %upload_id, "timed out releasing server session"),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Bounds a transport call by the request timeout and cancellation.
    async fn guarded<T>(&self, call: TransportFuture<'_, T>) -> Result<T, UploadError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            res = tokio::time::timeout(self.policy.request_timeout, call) => {
                res.map_err(|_| UploadError::Timeout)?
            }
        }
    }

    /// [`guarded`](Self::guarded) with linear backoff on transient errors.
    ///
    /// Gives up after `policy.max_retries` attempts and returns the last error.
    async fn guarded_with_retry<'a, T>(
        &self,
        op: &'static str,
        call: impl Fn() -> TransportFuture<'a, T>,
    ) -> Result<T, UploadError> {
        let mut attempt = 0;
        loop {
            let err = match self.guarded(call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };
            attempt += 1;
            if attempt >= self.policy.max_retries {
                warn!(op, attempts = attempt, error = %err, "request failed, giving up");
                return Err(err);
            }
            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn upload_id(&self) -> Result<String, UploadError> {
        self.session
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| UploadError::Internal("session has no upload id".into()))
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "upload event dropped");
        }
    }

    fn publish(&self) {
        self.progress.send_replace(self.session.progress());
    }

    fn emit_progress(&self) {
        let progress = self.session.progress();
        let remaining_bytes: u64 = match self.session.layout() {
            Ok(layout) => self
                .session
                .missing_chunks()
                .into_iter()
                .filter_map(|i| layout.chunk_len(i).ok())
                .sum(),
            Err(_) => 0,
        };

        self.callbacks.progress(
            progress.percentage,
            progress.uploaded_chunks,
            progress.total_chunks,
        );
        self.progress.send_replace(progress.clone());
        self.emit(UploadEvent::Progress {
            progress,
            bytes_per_second: self.speed.bytes_per_second(),
            eta: self.speed.eta(remaining_bytes),
        });
    }
}
