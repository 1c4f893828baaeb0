use std::time::Duration;

/// Timeout for every request/response round-trip (init, chunk, status, complete).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of hex characters kept from the chunk digest.
pub const DIGEST_HEX_LEN: usize = 8;

/// Route prefix shared by all chunked-upload endpoints.
pub const UPLOAD_ROUTE: &str = "/api/upload-chunk";

/// Multipart field carrying the 0-based chunk index.
pub const FIELD_CHUNK_NUMBER: &str = "chunk_number";

/// Multipart field carrying the chunk digest.
pub const FIELD_CHUNK_HASH: &str = "chunk_hash";

/// Multipart field carrying the raw chunk bytes.
pub const FIELD_CHUNK: &str = "chunk";

/// `POST`: opens a new session.
pub fn init_path() -> String {
    format!("{UPLOAD_ROUTE}/init")
}

/// `POST` (multipart): submits one chunk.
pub fn chunk_path(upload_id: &str) -> String {
    format!("{UPLOAD_ROUTE}/{upload_id}")
}

/// `GET`: session status with the missing chunk set.
pub fn status_path(upload_id: &str) -> String {
    format!("{UPLOAD_ROUTE}/status/{upload_id}")
}

/// `POST`: finalizes the session.
pub fn complete_path() -> String {
    format!("{UPLOAD_ROUTE}/complete")
}

/// `DELETE`: releases server-side session state.
pub fn cancel_path(upload_id: &str) -> String {
    format!("{UPLOAD_ROUTE}/cancel/{upload_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_embed_upload_id() {
        assert_eq!(init_path(), "/api/upload-chunk/init");
        assert_eq!(chunk_path("abc"), "/api/upload-chunk/abc");
        assert_eq!(status_path("abc"), "/api/upload-chunk/status/abc");
        assert_eq!(complete_path(), "/api/upload-chunk/complete");
        assert_eq!(cancel_path("abc"), "/api/upload-chunk/cancel/abc");
    }
}
