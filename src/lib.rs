//! Dropbox Rust Client Library
//!
//! Async Rust client for the Dropbox HTTP API.
//! Provides a type-safe API for uploading, downloading and managing files.
//!
//! # Features
//!
//! - Account information
//! - File upload (single request and resumable chunked sessions)
//! - File download (in memory, streamed to a writer, or to disk)
//! - File operations (copy, move, delete, create folder)
//! - Offset reconciliation and retries for chunked uploads
//! - Pluggable HTTP transport
//! - Async/await support with Tokio
//!
//! # Example
//!
//! ```no_run
//! use dropbox::{Client, ClientConfig, WriteMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::from_env()?)?;
//!
//!     let metadata = client
//!         .upload_file_from_bytes("/hello.txt", &WriteMode::Add, &b"Hello, Dropbox!"[..])
//!         .await?;
//!     if let Some((_, data)) = client.get_file(&metadata.path, None).await? {
//!         assert_eq!(&data[..], b"Hello, Dropbox!");
//!     }
//!     client.delete(&metadata.path).await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod errors;
mod operations;
pub mod protocol;
mod retry;
mod source;
mod transport;
mod types;
mod upload;

// Re-export public API
pub use client::Client;
pub use errors::{map_status_to_error, DropboxError, Result};
pub use operations::Operations;
pub use retry::RetryPolicy;
pub use source::{ByteSource, ReaderSource};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody, StreamingResponse,
};
pub use types::{
    AccessType, AccountInfo, AppendOutcome, ClientConfig, Metadata, QuotaInfo, UploadSessionId,
    UploadState, WriteMode, ACCESS_TOKEN_ENV, AUTO_CHUNKED_UPLOAD_THRESHOLD, DEFAULT_API_HOST,
    DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_HOST, DEFAULT_MAX_RETRIES, METADATA_HEADER,
};
pub use upload::{ChunkedUploader, SessionTransport};
