//! Body-to-sink streaming copy
//!
//! Pulls chunks from the body stream, runs each through a [`SizeLimiter`],
//! and writes it to the sink. Only one chunk is held in memory at a time.
//! The copy settles once: the first error returns immediately and the body
//! stream is dropped, so nothing else is read or written afterwards.

use super::{SizeLimiter, UploadError};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Why the client side of the body went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientClose {
    /// The client disconnected mid-body
    Aborted,
    /// No data arrived within the server's read timeout
    TimedOut,
}

impl fmt::Display for ClientClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientClose::Aborted => f.write_str("The request has been aborted by the client"),
            ClientClose::TimedOut => {
                f.write_str("Timeout: the request has been aborted by the server")
            }
        }
    }
}

/// Streaming copier
#[derive(Debug, Clone, Default)]
pub struct StreamCopier {
    read_timeout: Option<Duration>,
}

impl StreamCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`ClientClose::TimedOut`] when a single read stalls longer than `timeout`
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Copy `source` into `sink`, returning the number of bytes written.
    ///
    /// Resolves only after the source has ended and the sink has flushed.
    pub async fn copy<S, W>(
        &self,
        source: S,
        sink: &mut W,
        limiter: &mut SizeLimiter,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
        W: AsyncWrite + Unpin + ?Sized,
    {
        tokio::pin!(source);
        let mut written: u64 = 0;

        while let Some(chunk) = self.next_chunk(&mut source).await? {
            limiter.observe(chunk.len())?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        sink.flush().await?;

        tracing::debug!(bytes = written, "Body copy completed");
        Ok(written)
    }

    async fn next_chunk<S>(
        &self,
        source: &mut std::pin::Pin<&mut S>,
    ) -> Result<Option<Bytes>, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        let next = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, source.next())
                .await
                .map_err(|_| UploadError::ClientClosedRequest(ClientClose::TimedOut))?,
            None => source.next().await,
        };

        next.transpose()
    }
}
