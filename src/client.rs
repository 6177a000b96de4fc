//! Dropbox Rust Client
//!
//! Main client struct for interacting with the Dropbox API.

use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{DropboxError, Result};
use crate::operations::Operations;
use crate::protocol::{check_path, check_path_non_root};
use crate::source::ReaderSource;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::*;
use crate::upload::{ChunkedUploader, SessionTransport};

/// Dropbox client for file operations
///
/// This client provides a high-level, async Rust API for the Dropbox HTTP
/// API. Large or unsized uploads go through resumable upload sessions with
/// automatic retries of transient network failures.
///
/// # Example
///
/// ```no_run
/// use dropbox::{Client, ClientConfig, WriteMode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new(ClientConfig::new("my-access-token"))?;
///
///     let file = tokio::fs::File::open("report.pdf").await?;
///     let metadata = client.upload_file("/reports/report.pdf", &WriteMode::Add, file, None).await?;
///     println!("uploaded {} bytes as rev {:?}", metadata.bytes, metadata.rev);
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
    ops: Arc<Operations>,
    closed: Arc<RwLock<bool>>,
}

impl Client {
    /// Creates a new Dropbox client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::validate_config(&config)?;
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::build(config, transport))
    }

    /// Creates a client that sends its requests through `transport`
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        Self::validate_config(&config)?;
        Ok(Self::build(config, transport))
    }

    fn build(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let ops = Arc::new(Operations::new(transport, &config));
        Self {
            config,
            ops,
            closed: Arc::new(RwLock::new(false)),
        }
    }

    /// Validates the client configuration
    fn validate_config(config: &ClientConfig) -> Result<()> {
        if config.access_token.trim().is_empty() {
            return Err(DropboxError::InvalidArgument(
                "Access token is required".to_string(),
            ));
        }

        for host in [&config.api_host, &config.content_host] {
            if !(host.starts_with("https://") || host.starts_with("http://")) {
                return Err(DropboxError::InvalidArgument(format!(
                    "Invalid host URL: {}",
                    host
                )));
            }
        }

        if config.chunk_size == 0 {
            return Err(DropboxError::InvalidArgument(
                "Chunk size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Checks if the client is closed
    async fn check_closed(&self) -> Result<()> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(DropboxError::ClientClosed);
        }
        Ok(())
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Endpoint-level access, for callers driving upload sessions by hand
    pub fn operations(&self) -> &Operations {
        &self.ops
    }

    /// A single-use chunked uploader using the configured chunk size and retry budget
    pub fn chunked_uploader(&self) -> ChunkedUploader<'_, Operations> {
        ChunkedUploader::new(self.ops.as_ref())
            .with_chunk_size(self.config.chunk_size)
            .with_max_retries(self.config.max_retries)
    }

    /// Returns basic account and quota information
    pub async fn account_info(&self) -> Result<AccountInfo> {
        self.check_closed().await?;
        self.ops.account_info().await
    }

    /// Downloads a file into memory
    ///
    /// Returns `None` if there is no file at `path` (or at that revision).
    pub async fn get_file(&self, path: &str, rev: Option<&str>) -> Result<Option<(Metadata, Bytes)>> {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        check_rev(rev)?;
        self.ops.get_file(path, rev).await
    }

    /// Downloads a file, writing its contents to `writer` as they arrive
    pub async fn get_file_to_writer<W>(
        &self,
        path: &str,
        writer: &mut W,
        rev: Option<&str>,
    ) -> Result<Option<Metadata>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        check_rev(rev)?;
        self.ops.get_file_to_writer(path, writer, rev).await
    }

    /// Downloads a file and saves it to the local filesystem
    ///
    /// Parent directories are created as needed. The contents are written to
    /// a sibling `.part` file that replaces `local_path` only once the
    /// download has completed, so a file already at `local_path` is left
    /// untouched on any failure. If the remote file does not exist, `None`
    /// is returned.
    pub async fn download_to_file(
        &self,
        path: &str,
        local_path: impl AsRef<Path>,
        rev: Option<&str>,
    ) -> Result<Option<Metadata>> {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        check_rev(rev)?;

        let local_path = local_path.as_ref();
        let file_name = local_path.file_name().ok_or_else(|| {
            DropboxError::InvalidArgument(format!(
                "'local_path' has no file name: {}",
                local_path.display()
            ))
        })?;
        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut part_name = std::ffi::OsString::from(".");
        part_name.push(file_name);
        part_name.push(".part");
        let part_path = local_path.with_file_name(part_name);

        let mut file = tokio::fs::File::create(&part_path).await?;
        let result = self.ops.get_file_to_writer(path, &mut file, rev).await;
        drop(file);

        match result {
            Ok(Some(metadata)) => {
                if let Err(e) = tokio::fs::rename(&part_path, local_path).await {
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(e.into());
                }
                debug!(path, local = %local_path.display(), "saved download");
                Ok(Some(metadata))
            }
            other => {
                let _ = tokio::fs::remove_file(&part_path).await;
                other
            }
        }
    }

    /// Creates a file from everything `reader` yields
    ///
    /// When `num_bytes` is unknown or above
    /// [`AUTO_CHUNKED_UPLOAD_THRESHOLD`], the upload goes through a chunked
    /// upload session; otherwise exactly `num_bytes` are read and sent in a
    /// single request. The reader is dropped before this returns.
    pub async fn upload_file<R>(
        &self,
        path: &str,
        write_mode: &WriteMode,
        reader: R,
        num_bytes: Option<u64>,
    ) -> Result<Metadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_closed().await?;
        check_path_non_root("path", path)?;

        match num_bytes {
            Some(n) if n <= AUTO_CHUNKED_UPLOAD_THRESHOLD => {
                let mut data = Vec::with_capacity(n as usize);
                reader.take(n).read_to_end(&mut data).await?;
                if data.len() as u64 != n {
                    return Err(DropboxError::SizeMismatch {
                        expected: n,
                        actual: data.len() as u64,
                    });
                }
                debug!(path, bytes = n, "single request upload");
                self.ops.upload_bytes(path, write_mode, Bytes::from(data)).await
            }
            _ => {
                self.chunked_uploader()
                    .upload(path, write_mode, ReaderSource::new(reader), num_bytes)
                    .await
            }
        }
    }

    /// Creates a file with the given contents in a single request
    pub async fn upload_file_from_bytes(
        &self,
        path: &str,
        write_mode: &WriteMode,
        data: impl Into<Bytes>,
    ) -> Result<Metadata> {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        self.ops.upload_bytes(path, write_mode, data.into()).await
    }

    /// Creates a file through a chunked upload session
    ///
    /// `chunk_size` overrides the configured chunk size. When
    /// `expected_total` is given and the stream length differs, the session
    /// is not committed and [`DropboxError::SizeMismatch`] is returned.
    pub async fn upload_file_chunked<R>(
        &self,
        path: &str,
        write_mode: &WriteMode,
        reader: R,
        expected_total: Option<u64>,
        chunk_size: Option<usize>,
    ) -> Result<Metadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        if chunk_size == Some(0) {
            return Err(DropboxError::InvalidArgument(
                "'chunk_size' must be positive".to_string(),
            ));
        }

        let mut uploader = self.chunked_uploader();
        if let Some(size) = chunk_size {
            uploader = uploader.with_chunk_size(size);
        }
        uploader
            .upload(path, write_mode, ReaderSource::new(reader), expected_total)
            .await
    }

    /// Opens an upload session with its first chunk (single attempt)
    pub async fn start_session(&self, first_chunk: impl Into<Bytes>) -> Result<UploadSessionId> {
        self.check_closed().await?;
        self.ops.start(first_chunk.into()).await
    }

    /// Appends a chunk to an upload session at `offset` (single attempt)
    pub async fn continue_session(
        &self,
        session_id: &UploadSessionId,
        offset: u64,
        chunk: impl Into<Bytes>,
    ) -> Result<AppendOutcome> {
        self.check_closed().await?;
        check_session_id(session_id)?;
        self.ops.append(session_id, offset, chunk.into()).await
    }

    /// Commits an upload session to `path` (single attempt)
    ///
    /// Returns `None` if the server does not know the session.
    pub async fn finish_session(
        &self,
        session_id: &UploadSessionId,
        path: &str,
        write_mode: &WriteMode,
    ) -> Result<Option<Metadata>> {
        self.check_closed().await?;
        check_session_id(session_id)?;
        check_path_non_root("path", path)?;
        self.ops.finish(session_id, path, write_mode).await
    }

    /// Creates a folder; `None` if something already exists at `path`
    pub async fn create_folder(&self, path: &str) -> Result<Option<Metadata>> {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        self.ops.create_folder(path).await
    }

    /// Deletes a file or folder
    pub async fn delete(&self, path: &str) -> Result<Metadata> {
        self.check_closed().await?;
        check_path_non_root("path", path)?;
        self.ops.delete(path).await
    }

    /// Copies a file or folder to a new location
    pub async fn copy(&self, from_path: &str, to_path: &str) -> Result<Metadata> {
        self.check_closed().await?;
        check_path("from_path", from_path)?;
        check_path_non_root("to_path", to_path)?;
        self.ops.copy(from_path, to_path).await
    }

    /// Moves a file or folder to a new location
    pub async fn move_file(&self, from_path: &str, to_path: &str) -> Result<Metadata> {
        self.check_closed().await?;
        check_path_non_root("from_path", from_path)?;
        check_path_non_root("to_path", to_path)?;
        self.ops.move_file(from_path, to_path).await
    }

    /// Closes the client
    ///
    /// After calling close, all operations will return ClientClosed error.
    /// It's safe to call close multiple times.
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        *closed = true;
    }
}

fn check_rev(rev: Option<&str>) -> Result<()> {
    match rev {
        Some(r) if r.is_empty() => Err(DropboxError::InvalidArgument(
            "'rev' must not be empty".to_string(),
        )),
        _ => Ok(()),
    }
}

fn check_session_id(session_id: &UploadSessionId) -> Result<()> {
    if session_id.as_str().is_empty() {
        return Err(DropboxError::InvalidArgument(
            "'session_id' must not be empty".to_string(),
        ));
    }
    Ok(())
}
