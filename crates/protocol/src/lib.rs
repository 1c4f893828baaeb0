pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    ChunkUploadResponse, CompleteUploadRequest, CompleteUploadResponse, ErrorBody,
    InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};
pub use types::{UploadProgress, UploadState};
