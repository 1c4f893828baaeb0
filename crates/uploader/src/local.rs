//! In-process transport backed by a [`ChunkAssembler`].
//!
//! Useful for local targets and for exercising the full client against a
//! real server model without a network.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chunkup_protocol::{
    ChunkUploadResponse, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    UploadStatusResponse,
};
use chunkup_transfer::{AssembledFile, Chunk, ChunkAssembler, TransferError};

use crate::error::UploadError;
use crate::transport::{SessionTransport, TransportFuture};

/// Transport that assembles uploads into a local directory.
///
/// Assembler calls touch the filesystem and run on the blocking pool.
pub struct LocalTransport {
    assembler: Arc<Mutex<ChunkAssembler>>,
    assembled: Mutex<Vec<AssembledFile>>,
}

impl LocalTransport {
    /// Assembles uploads under `output_root`.
    pub fn new(output_root: &Path) -> Self {
        Self::with_assembler(ChunkAssembler::new(output_root))
    }

    pub fn with_assembler(assembler: ChunkAssembler) -> Self {
        Self {
            assembler: Arc::new(Mutex::new(assembler)),
            assembled: Mutex::new(Vec::new()),
        }
    }

    /// Location of an assembled file, once finalized.
    pub fn assembled_path(&self, file_id: u64) -> Option<PathBuf> {
        self.assembled
            .lock()
            .ok()?
            .iter()
            .find(|f| f.file_id == file_id)
            .map(|f| f.path.clone())
    }

    async fn with<T, F>(&self, op: F) -> Result<T, UploadError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ChunkAssembler) -> Result<T, TransferError> + Send + 'static,
    {
        let assembler = Arc::clone(&self.assembler);
        tokio::task::spawn_blocking(move || {
            let mut assembler = assembler
                .lock()
                .map_err(|_| UploadError::Internal("assembler lock poisoned".into()))?;
            op(&mut assembler).map_err(rejection)
        })
        .await
        .map_err(|e| UploadError::Internal(format!("task join error: {e}")))?
    }
}

impl SessionTransport for LocalTransport {
    fn initialize<'a>(&'a self, req: &'a InitUploadRequest) -> TransportFuture<'a, InitUploadResponse> {
        let req = req.clone();
        Box::pin(async move { self.with(move |a| a.init(&req)).await })
    }

    fn submit_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk: &'a Chunk,
    ) -> TransportFuture<'a, ChunkUploadResponse> {
        let upload_id = upload_id.to_string();
        let chunk = chunk.clone();
        Box::pin(async move {
            self.with(move |a| {
                a.accept_chunk(&upload_id, chunk.index, &chunk.digest, &chunk.data)
            })
            .await
        })
    }

    fn status<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, UploadStatusResponse> {
        let upload_id = upload_id.to_string();
        Box::pin(async move { self.with(move |a| a.status(&upload_id)).await })
    }

    fn finalize<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, CompleteUploadResponse> {
        let id = upload_id.to_string();
        Box::pin(async move {
            let file = self.with(move |a| a.finalize(&id)).await?;
            let resp = CompleteUploadResponse {
                detail: format!("File assembled at {}", file.path.display()),
                file_id: file.file_id,
            };
            if let Ok(mut assembled) = self.assembled.lock()
                && !assembled.iter().any(|f| f.file_id == file.file_id)
            {
                assembled.push(file);
            }
            Ok(resp)
        })
    }

    fn cancel<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, ()> {
        let upload_id = upload_id.to_string();
        Box::pin(async move { self.with(move |a| a.cancel(&upload_id)).await })
    }
}

/// Maps an assembler rejection the way the HTTP server reports it.
fn rejection(err: TransferError) -> UploadError {
    let detail = err.to_string();
    match err {
        TransferError::DigestMismatch { .. } => UploadError::DigestMismatch(detail),
        TransferError::SessionNotFound(id) => UploadError::SessionNotFound(id),
        TransferError::IncompleteUpload { missing } => UploadError::IncompleteUpload { missing },
        TransferError::Io(_) => UploadError::Server {
            status: 500,
            detail,
        },
        _ => UploadError::InvalidRequest(detail),
    }
}
