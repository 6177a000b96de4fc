//! Chunk Sources
//!
//! A [`ByteSource`] hands the chunked uploader sequential, destructive reads
//! of bounded size and tells it when the stream is exhausted.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::errors::Result;

/// A readable stream of known or unknown length, consumed in chunks
#[async_trait]
pub trait ByteSource: Send {
    /// Reads up to `max_bytes`
    ///
    /// Fewer than `max_bytes` are returned only at end of stream. The flag is
    /// true when nothing is left to read after the returned bytes.
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<(Bytes, bool)>;
}

/// Adapts any tokio reader into a [`ByteSource`]
///
/// End of stream is detected by peeking into the read buffer, so a stream
/// whose length is an exact multiple of the chunk size reports EOF together
/// with its last full chunk instead of producing a trailing empty one.
pub struct ReaderSource<R> {
    reader: BufReader<R>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    /// Wraps `reader`
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            bytes_read: 0,
        }
    }

    /// Total bytes handed out so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Gives back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for ReaderSource<R> {
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<(Bytes, bool)> {
        let mut buf = BytesMut::zeroed(max_bytes);
        let mut filled = 0;
        while filled < max_bytes {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.bytes_read += filled as u64;

        let eof = filled < max_bytes || self.reader.fill_buf().await?.is_empty();
        Ok((buf.freeze(), eof))
    }
}
