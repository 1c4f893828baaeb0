//! HTTP transport.
//!
//! Async client using `reqwest` with Bearer token authentication against the
//! `/api/upload-chunk` routes.

use std::time::Duration;

use chunkup_protocol::constants::{
    FIELD_CHUNK, FIELD_CHUNK_HASH, FIELD_CHUNK_NUMBER, cancel_path, chunk_path, complete_path,
    init_path, status_path,
};
use chunkup_protocol::{
    ChunkUploadResponse, CompleteUploadRequest, CompleteUploadResponse, ErrorBody,
    InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};
use chunkup_transfer::Chunk;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::UploadError;
use crate::transport::{SessionTransport, TransportFuture};

/// Upload server reached over HTTP.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a client for `base_url` authenticating with `token`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| UploadError::InvalidToken)?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, UploadError> {
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(error_from_status(status.as_u16(), &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

impl SessionTransport for HttpTransport {
    fn initialize<'a>(&'a self, req: &'a InitUploadRequest) -> TransportFuture<'a, InitUploadResponse> {
        Box::pin(async move {
            let resp = self.http.post(self.url(&init_path())).json(req).send().await?;
            Self::parse(resp).await
        })
    }

    fn submit_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk: &'a Chunk,
    ) -> TransportFuture<'a, ChunkUploadResponse> {
        Box::pin(async move {
            let part = Part::bytes(chunk.data.clone()).file_name(format!("chunk_{}", chunk.index));
            let form = Form::new()
                .text(FIELD_CHUNK_NUMBER, chunk.index.to_string())
                .text(FIELD_CHUNK_HASH, chunk.digest.clone())
                .part(FIELD_CHUNK, part);

            debug!(upload_id, chunk = chunk.index, bytes = chunk.len(), "posting chunk");
            let resp = self
                .http
                .post(self.url(&chunk_path(upload_id)))
                .multipart(form)
                .send()
                .await?;
            Self::parse(resp).await
        })
    }

    fn status<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, UploadStatusResponse> {
        Box::pin(async move {
            let resp = self.http.get(self.url(&status_path(upload_id))).send().await?;
            Self::parse(resp).await
        })
    }

    fn finalize<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, CompleteUploadResponse> {
        Box::pin(async move {
            let body = CompleteUploadRequest {
                upload_id: upload_id.to_string(),
            };
            let resp = self
                .http
                .post(self.url(&complete_path()))
                .json(&body)
                .send()
                .await?;
            Self::parse(resp).await
        })
    }

    fn cancel<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let resp = self.http.delete(self.url(&cancel_path(upload_id))).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.bytes().await?;
                return Err(error_from_status(status.as_u16(), &body));
            }
            Ok(())
        })
    }
}

/// Maps a non-2xx response onto an [`UploadError`].
///
/// The server's `detail` is passed through verbatim when present.
pub(crate) fn error_from_status(status: u16, body: &[u8]) -> UploadError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let detail = if parsed.detail.is_empty() {
        String::from_utf8_lossy(body).trim().to_string()
    } else {
        parsed.detail
    };
    let lower = detail.to_ascii_lowercase();
    let or = |fallback: &str| {
        if detail.is_empty() {
            fallback.to_string()
        } else {
            detail.clone()
        }
    };

    match status {
        401 | 403 => UploadError::Unauthenticated(or("credentials rejected")),
        404 => UploadError::SessionNotFound(or("unknown upload id")),
        409 => UploadError::IncompleteUpload {
            missing: parsed.missing_chunks,
        },
        400 | 422 if ["hash", "digest", "checksum"].iter().any(|k| lower.contains(k)) => {
            UploadError::DigestMismatch(or("chunk digest mismatch"))
        }
        400 | 422
            if !parsed.missing_chunks.is_empty()
                || lower.contains("missing")
                || lower.contains("incomplete") =>
        {
            UploadError::IncompleteUpload {
                missing: parsed.missing_chunks,
            }
        }
        500..=599 => UploadError::Server {
            status,
            detail: or("server error"),
        },
        _ => UploadError::InvalidRequest(or(&format!("request rejected with status {status}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Starts a mock HTTP server that answers one request with `status` and
    /// `body`, recording the raw request it received.
    async fn mock_server(
        status: u16,
        body: &str,
    ) -> (String, Arc<Mutex<String>>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();
        let request = Arc::new(Mutex::new(String::new()));
        let captured = request.clone();

        let handle = tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let raw = read_request(&mut stream).await;
                *captured.lock().unwrap() = String::from_utf8_lossy(&raw).to_string();

                let resp = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, request, handle)
    }

    /// Reads headers plus a `Content-Length` body so the client never sees
    /// the connection close mid-upload.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut raw = Vec::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = stream.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return raw;
            }
            raw.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&raw).to_string();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                return raw;
            }
        }
    }

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(url, "secret-token", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn initialize_posts_json_with_bearer() {
        let json = r#"{"upload_id":"u-1","detail":"Chunked upload initialized","total_chunks":3,"chunk_size":5000000}"#;
        let (url, request, handle) = mock_server(200, json).await;

        let req = InitUploadRequest {
            file_title: "Report".into(),
            file_name: "report.pdf".into(),
            file_size: 10_500_000,
            total_chunks: 3,
            chunk_size: 5_000_000,
        };
        let resp = transport(&url).initialize(&req).await.unwrap();
        assert_eq!(resp.upload_id, "u-1");
        assert_eq!(resp.total_chunks, 3);
        assert!(resp.file_id.is_none());

        handle.await.unwrap();
        let raw = request.lock().unwrap().clone();
        assert!(raw.starts_with("POST /api/upload-chunk/init "));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret-token"));
    }

    #[tokio::test]
    async fn submit_chunk_sends_multipart_fields() {
        let json = r#"{"chunk_number":0,"chunk_size":4,"uploaded_chunks":1,"total_chunks":2,"progress_percentage":50.0}"#;
        let (url, request, handle) = mock_server(200, json).await;

        let chunk = Chunk::new(0, 0, b"AABB".to_vec());
        let resp = transport(&url).submit_chunk("u-1", &chunk).await.unwrap();
        assert_eq!(resp.uploaded_chunks, 1);

        handle.await.unwrap();
        let raw = request.lock().unwrap().clone();
        assert!(raw.starts_with("POST /api/upload-chunk/u-1 "));
        assert!(raw.contains("multipart/form-data"));
    }

    #[tokio::test]
    async fn status_parses_missing_chunks() {
        let json = r#"{"upload_id":"u-1","total_chunks":5,"uploaded_chunks":3,"is_complete":false,"progress_percentage":60.0,"missing_chunks":[3,4]}"#;
        let (url, request, handle) = mock_server(200, json).await;

        let status = transport(&url).status("u-1").await.unwrap();
        assert_eq!(status.missing_chunks, vec![3, 4]);

        handle.await.unwrap();
        assert!(request.lock().unwrap().starts_with("GET /api/upload-chunk/status/u-1 "));
    }

    #[tokio::test]
    async fn not_found_maps_to_session_not_found() {
        let (url, _, handle) = mock_server(404, r#"{"detail":"Upload session not found"}"#).await;
        let err = transport(&url).status("gone").await.unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(ref d) if d == "Upload session not found"));
        assert!(!err.is_transient());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let (url, _, handle) = mock_server(503, r#"{"detail":"try later"}"#).await;
        let err = transport(&url).finalize("u-1").await.unwrap_err();
        assert!(matches!(err, UploadError::Server { status: 503, .. }));
        assert!(err.is_transient());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_accepts_empty_success() {
        let (url, request, handle) = mock_server(200, "").await;
        transport(&url).cancel("u-1").await.unwrap();
        handle.await.unwrap();
        assert!(request.lock().unwrap().starts_with("DELETE /api/upload-chunk/cancel/u-1 "));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            error_from_status(401, br#"{"detail":"Token expired"}"#),
            UploadError::Unauthenticated(ref d) if d == "Token expired"
        ));
        assert!(matches!(
            error_from_status(400, br#"{"detail":"Chunk hash mismatch"}"#),
            UploadError::DigestMismatch(_)
        ));
        assert!(matches!(
            error_from_status(400, br#"{"detail":"Missing chunks: [4]","missing_chunks":[4]}"#),
            UploadError::IncompleteUpload { ref missing } if *missing == vec![4]
        ));
        assert!(matches!(
            error_from_status(409, b""),
            UploadError::IncompleteUpload { .. }
        ));
        assert!(matches!(
            error_from_status(400, br#"{"detail":"File size mismatch"}"#),
            UploadError::InvalidRequest(ref d) if d == "File size mismatch"
        ));
        assert!(matches!(
            error_from_status(502, b"Bad Gateway"),
            UploadError::Server { status: 502, ref detail } if detail == "Bad Gateway"
        ));
        assert!(matches!(
            error_from_status(418, b""),
            UploadError::InvalidRequest(ref d) if d == "request rejected with status 418"
        ));
    }

    #[test]
    fn rejects_unprintable_token() {
        assert!(matches!(
            HttpTransport::new("http://localhost", "bad\ntoken", Duration::from_secs(1)),
            Err(UploadError::InvalidToken)
        ));
    }
}
