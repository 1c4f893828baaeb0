use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a new chunked-upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub file_title: String,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

/// Finalizes a session once every chunk has been received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Server acknowledgment of a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub upload_id: String,
    /// Identifier of the file record reserved for this upload, if the
    /// server allocates one up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

/// Server acknowledgment of one chunk.
///
/// `uploaded_chunks` is authoritative; it may differ from a local count
/// when the same chunk was delivered twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub chunk_number: u32,
    #[serde(default)]
    pub chunk_size: u64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub progress_percentage: f64,
}

/// Snapshot of a session as seen by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_title: String,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub is_complete: bool,
    pub progress_percentage: f64,
    #[serde(default)]
    pub missing_chunks: Vec<u32>,
}

/// Server confirmation that the file has been assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub file_id: u64,
}

/// Body returned alongside non-2xx statuses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: String,
    /// Present on incomplete-upload rejections at finalize time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<u32>,
}
