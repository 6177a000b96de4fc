//! Chunked Upload
//!
//! This module drives the session-oriented upload protocol: the first chunk
//! opens a session, further chunks are appended at the offset the client
//! believes is committed, and the session is finally committed to a path.
//!
//! Network failures during an append are ambiguous: the server may have
//! stored the chunk before the connection dropped. The retried append then
//! claims a stale offset, the server answers with its own, and the uploader
//! trims the bytes the server already has instead of sending them twice.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::errors::{DropboxError, Result};
use crate::retry::RetryPolicy;
use crate::source::ByteSource;
use crate::types::*;

/// The three remote operations of an upload session
///
/// Each call is a single network exchange. Expected protocol branches are
/// reported through [`AppendOutcome`] and `Option`, not through errors.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Opens a session with its first chunk
    ///
    /// The server must acknowledge exactly the bytes sent, otherwise this
    /// fails with [`DropboxError::Protocol`].
    async fn start(&self, chunk: Bytes) -> Result<UploadSessionId>;

    /// Appends `chunk` at `offset`
    async fn append(
        &self,
        session_id: &UploadSessionId,
        offset: u64,
        chunk: Bytes,
    ) -> Result<AppendOutcome>;

    /// Commits the session to `path`; `None` when the session is unknown
    async fn finish(
        &self,
        session_id: &UploadSessionId,
        path: &str,
        write_mode: &WriteMode,
    ) -> Result<Option<Metadata>>;
}

/// Uploads one byte stream through one session
///
/// An uploader is single-use: it owns the session id and the committed
/// offset of exactly one upload.
///
/// # Example
///
/// ```no_run
/// use dropbox::{Client, ReaderSource, WriteMode};
///
/// # async fn run(client: &Client) -> dropbox::Result<()> {
/// let file = tokio::fs::File::open("video.mp4").await?;
/// let mut uploader = client.chunked_uploader().with_chunk_size(8 << 20);
/// let metadata = uploader
///     .upload("/videos/video.mp4", &WriteMode::Add, ReaderSource::new(file), None)
///     .await?;
/// assert_eq!(metadata.bytes, uploader.committed_offset());
/// # Ok(())
/// # }
/// ```
pub struct ChunkedUploader<'a, T: ?Sized> {
    transport: &'a T,
    chunk_size: usize,
    retry: RetryPolicy,
    state: UploadState,
    offset: u64,
    session_id: Option<UploadSessionId>,
}

impl<'a, T: SessionTransport + ?Sized> ChunkedUploader<'a, T> {
    /// Creates an uploader with the default chunk size and retry budget
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            state: UploadState::NotStarted,
            offset: 0,
            session_id: None,
        }
    }

    /// Sets the number of bytes read and sent per request
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the retries per network operation
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryPolicy::new(max_retries);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Bytes the server has confirmed for this session
    pub fn committed_offset(&self) -> u64 {
        self.offset
    }

    /// Session id, once the session has been started
    pub fn session_id(&self) -> Option<&UploadSessionId> {
        self.session_id.as_ref()
    }

    /// Uploads everything `source` yields and commits it to `path`
    ///
    /// `source` is consumed and dropped before this returns, whatever the
    /// outcome. When `expected_total` is given and the stream length
    /// differs, the session is not committed and
    /// [`DropboxError::SizeMismatch`] is returned. A commit whose metadata
    /// reports a different size than was uploaded is a
    /// [`DropboxError::Protocol`] error.
    pub async fn upload<S: ByteSource>(
        &mut self,
        path: &str,
        write_mode: &WriteMode,
        source: S,
        expected_total: Option<u64>,
    ) -> Result<Metadata> {
        if self.state != UploadState::NotStarted {
            return Err(DropboxError::InvalidArgument(
                "a ChunkedUploader can only run one upload".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(DropboxError::InvalidArgument(
                "chunk size must be positive".to_string(),
            ));
        }

        let result = self.run(path, write_mode, source, expected_total).await;
        match &result {
            Ok(_) => self.transition(UploadState::Done),
            Err(e) => {
                warn!(
                    path,
                    offset = self.offset,
                    state = ?self.state,
                    error = %e,
                    "chunked upload failed"
                );
                self.transition(UploadState::Failed);
            }
        }
        result
    }

    async fn run<S: ByteSource>(
        &mut self,
        path: &str,
        write_mode: &WriteMode,
        mut source: S,
        expected_total: Option<u64>,
    ) -> Result<Metadata> {
        let transport = self.transport;
        let retry = self.retry;

        let (first, mut eof) = source.read_chunk(self.chunk_size).await?;
        let first_len = first.len() as u64;
        let session_id = retry
            .run("chunked_upload_start", || transport.start(first.clone()))
            .await?;
        info!(session = %session_id, bytes = first_len, "upload session started");

        self.offset = first_len;
        self.session_id = Some(session_id.clone());
        self.transition(UploadState::Started);

        while !eof {
            let (next, at_end) = source.read_chunk(self.chunk_size).await?;
            eof = at_end;
            self.transition(UploadState::Uploading);
            self.append_chunk(&session_id, next).await?;
        }

        if let Some(expected) = expected_total {
            if expected != self.offset {
                return Err(DropboxError::SizeMismatch {
                    expected,
                    actual: self.offset,
                });
            }
        }
        drop(source);

        self.transition(UploadState::Finalizing);
        let metadata = retry
            .run("chunked_upload_finish", || {
                transport.finish(&session_id, path, write_mode)
            })
            .await?;

        match metadata {
            Some(metadata) if metadata.bytes != self.offset => Err(DropboxError::Protocol(format!(
                "committed file has {} bytes, but we uploaded {}",
                metadata.bytes, self.offset
            ))),
            Some(metadata) => {
                info!(session = %session_id, path, bytes = self.offset, "upload session committed");
                Ok(metadata)
            }
            None => Err(DropboxError::SessionLost(format!(
                "server did not recognize upload session {} on commit",
                session_id
            ))),
        }
    }

    /// Appends one chunk, reconciling offsets until the server has all of it
    async fn append_chunk(&mut self, session_id: &UploadSessionId, mut chunk: Bytes) -> Result<()> {
        let transport = self.transport;
        let retry = self.retry;

        loop {
            let claimed = self.offset;
            let outcome = retry
                .run("chunked_upload_append", || {
                    transport.append(session_id, claimed, chunk.clone())
                })
                .await?;

            match outcome {
                AppendOutcome::Committed => {
                    self.offset += chunk.len() as u64;
                    debug!(session = %session_id, offset = self.offset, "chunk committed");
                    return Ok(());
                }
                AppendOutcome::SessionUnknown => {
                    return Err(DropboxError::SessionLost(format!(
                        "server forgot upload session {} at offset {}",
                        session_id, claimed
                    )));
                }
                AppendOutcome::OffsetMismatch(server) => {
                    let diff = self.reconcile(claimed, server, chunk.len())?;
                    warn!(
                        session = %session_id,
                        ours = claimed,
                        server,
                        "server is ahead, resending the rest of the chunk"
                    );
                    self.offset += diff as u64;
                    chunk = chunk.slice(diff..);
                }
            }
        }
    }

    /// Validates a server offset correction and returns how many bytes of
    /// the current chunk the server already has
    fn reconcile(&self, ours: u64, server: u64, chunk_len: usize) -> Result<usize> {
        if server == ours {
            return Err(DropboxError::Protocol(format!(
                "offset correction agrees with our offset: {}",
                ours
            )));
        }
        if server < ours {
            return Err(DropboxError::Protocol(format!(
                "server is at an earlier byte offset: us={}, server={}",
                ours, server
            )));
        }
        let diff = server - ours;
        if diff > chunk_len as u64 {
            return Err(DropboxError::Protocol(format!(
                "server is more than a chunk ahead: us={}, server={}",
                ours, server
            )));
        }
        Ok(diff as usize)
    }

    fn transition(&mut self, next: UploadState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, offset = self.offset, "upload state");
            self.state = next;
        }
    }
}
