use serde::{Deserialize, Serialize};

/// Lifecycle state of a client-side upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadState {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "initializing")]
    Initializing,
    #[serde(rename = "transferring")]
    Transferring,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "failed")]
    Failed,
}

impl UploadState {
    /// Returns `true` for states that accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Progress information for an active upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub state: UploadState,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    /// Acknowledged-chunk percentage as reported to callers.
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl UploadProgress {
    /// Number of chunks not yet acknowledged.
    pub fn remaining_chunks(&self) -> u32 {
        self.total_chunks.saturating_sub(self.uploaded_chunks)
    }
}
