//! Upload module
//!
//! Streams a request body into a temp file, enforces the size policy while
//! doing so, and moves the finished file into its destination directory.
//!
//! # Flow
//!
//! 1. Ensure the temp and destination directories exist
//! 2. Build a [`FileDescriptor`] from the request headers
//! 3. Copy the body through a [`SizeLimiter`] into the temp file
//! 4. Check the written size against the declared one
//! 5. Relocate the temp file without clobbering anything
//!
//! Any failure after the temp file exists removes it again.

use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

pub mod copier;
pub mod descriptor;
pub mod relocate;
pub mod size_limit;
pub mod temp_file;
pub mod uploader;

pub use copier::{ClientClose, StreamCopier};
pub use descriptor::{
    FileDescriptor, FileNameGenerator, RandomFileName, RelativePathGenerator, RequestMeta,
    RequestPathDirectory, RequestPathFileName, UploadRoot,
};
pub use size_limit::{SizeBound, SizeLimiter};
pub use uploader::{UploadResult, Uploader, UploaderConfig};

/// HTTP status used for requests the client closed before completion.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    RequestTooLarge(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    ClientClosedRequest(ClientClose),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`UploadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    TooLarge,
    ClientClosed,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::ClientClosed => "client_closed",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::BadRequest(_) => ErrorKind::BadRequest,
            UploadError::RequestTooLarge(_) | UploadError::PayloadTooLarge(_) => {
                ErrorKind::TooLarge
            }
            UploadError::ClientClosedRequest(_) => ErrorKind::ClientClosed,
            UploadError::Io(_) => ErrorKind::Io,
        }
    }

    /// HTTP status code the adapter should answer with
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadRequest => 400,
            ErrorKind::TooLarge => 413,
            ErrorKind::ClientClosed => STATUS_CLIENT_CLOSED_REQUEST,
            ErrorKind::Io => 500,
        }
    }
}

/// Request body as seen by the uploader
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, UploadError>> + Send>>;

/// Upload handler trait
#[async_trait::async_trait]
pub trait UploadHandler: Send + Sync {
    /// Consume `body` and store it, returning the final name and size
    async fn upload(
        &self,
        meta: &RequestMeta,
        body: BodyStream,
    ) -> Result<UploadResult, UploadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(UploadError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(UploadError::RequestTooLarge("x".into()).status_code(), 413);
        assert_eq!(UploadError::PayloadTooLarge("x".into()).status_code(), 413);
        assert_eq!(
            UploadError::ClientClosedRequest(ClientClose::Aborted).status_code(),
            499
        );
        assert_eq!(
            UploadError::ClientClosedRequest(ClientClose::TimedOut).status_code(),
            499
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(UploadError::from(io).status_code(), 500);
    }

    #[test]
    fn test_message_is_preserved() {
        let err = UploadError::BadRequest("Request does not have a content to upload.".into());
        assert_eq!(err.to_string(), "Request does not have a content to upload.");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_client_close_messages_differ() {
        let aborted = UploadError::ClientClosedRequest(ClientClose::Aborted).to_string();
        let timed_out = UploadError::ClientClosedRequest(ClientClose::TimedOut).to_string();
        assert_ne!(aborted, timed_out);
        assert!(timed_out.contains("Timeout"));
    }
}
