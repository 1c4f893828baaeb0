//! Resumable chunked-upload client.
//!
//! [`TransferOrchestrator`] runs each upload in its own task over a
//! [`SessionTransport`]: [`HttpTransport`] for a remote server,
//! [`LocalTransport`] for an in-process assembler.

pub mod config;
pub mod error;
pub mod http;
pub mod local;
pub mod orchestrator;
pub mod retry;
pub mod transport;
pub mod types;

pub use config::UploadConfig;
pub use error::UploadError;
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use orchestrator::{TransferOrchestrator, UploadControl, UploadHandle};
pub use retry::RetryPolicy;
pub use transport::{SessionTransport, TransportFuture};
pub use types::{UploadCallbacks, UploadEvent, UploadOutcome};
