//! Session transport trait.
//!
//! `SessionTransport` is the seam between the upload actor and whatever
//! carries the five session operations: HTTP in production, an in-process
//! [`ChunkAssembler`](chunkup_transfer::ChunkAssembler) locally, mocks in tests.

use std::future::Future;
use std::pin::Pin;

use chunkup_protocol::{
    ChunkUploadResponse, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    UploadStatusResponse,
};
use chunkup_transfer::Chunk;

use crate::error::UploadError;

/// Boxed future returned by every transport operation.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract connection to an upload server.
///
/// Implementations map server rejections onto [`UploadError`] variants so
/// the actor can tell transient failures from permanent ones.
pub trait SessionTransport: Send + Sync {
    /// Opens a new upload session.
    fn initialize<'a>(&'a self, req: &'a InitUploadRequest) -> TransportFuture<'a, InitUploadResponse>;

    /// Submits one chunk together with its digest.
    fn submit_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk: &'a Chunk,
    ) -> TransportFuture<'a, ChunkUploadResponse>;

    /// Queries which chunks the server holds.
    fn status<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, UploadStatusResponse>;

    /// Asks the server to assemble the file.
    fn finalize<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, CompleteUploadResponse>;

    /// Releases the session on the server.
    fn cancel<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, ()>;
}
