//! Chunked file transfer primitives: layout, digests, the client-side
//! upload session state machine and the server-side assembly model.

mod assembly;
mod chunked;
mod hasher;
mod progress;
mod session;
mod validation;

pub use assembly::{AssembledFile, ChunkAssembler};
pub use chunked::{Chunk, ChunkLayout, ChunkReader};
pub use hasher::{chunk_digest, file_digest, verify_chunk_digest};
pub use progress::SpeedCalculator;
pub use session::{RetryDecision, SourceFile, UploadSession};
pub use validation::{UploadLimits, is_accepted_type, validate_file_name, validate_upload};

use chunkup_protocol::UploadState;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default upper bound on the size of a single uploaded file: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("digest mismatch for chunk {index}")]
    DigestMismatch { index: u32 },

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file title must not be empty")]
    EmptyTitle,

    #[error("file is empty")]
    EmptyFile,

    #[error("file size {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("file type not supported: {file_name} (accepted: {accepted})")]
    DisallowedType { file_name: String, accepted: String },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("chunk {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upload incomplete, missing chunks: {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        from: UploadState,
        action: &'static str,
    },
}
