//! Upload error types.

/// Errors produced while driving an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {detail}")]
    Server { status: u16, detail: String },

    #[error("chunk digest rejected: {0}")]
    DigestMismatch(String),

    #[error("authentication rejected: {0}")]
    Unauthenticated(String),

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upload incomplete, missing chunks: {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("chunk {index} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        index: u32,
        attempts: u32,
        reason: String,
    },

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("upload cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Transfer(#[from] chunkup_transfer::TransferError),
}

impl UploadError {
    /// Whether the failed request may succeed if sent again.
    ///
    /// Network failures, timeouts, 5xx responses and digest mismatches are
    /// transient. Everything else fails the session on first sight.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Server { .. } | Self::DigestMismatch(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }
}
