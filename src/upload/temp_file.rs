//! Scoped ownership of an in-progress temp file
//!
//! The temp file is created exclusively (`O_CREAT | O_EXCL`), so two uploads
//! can never write the same path. Until [`TempFileGuard::disarm`] is called
//! the guard owns the path: [`TempFileGuard::discard`] removes it on the
//! error path, and `Drop` removes it if the upload future is cancelled.
//!
//! Removal failures are logged and never returned.

use super::FileDescriptor;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// Temp file owned by a single upload
pub struct TempFileGuard {
    path: Option<PathBuf>,
}

impl TempFileGuard {
    /// Create the descriptor's file; fails if anything already exists there
    pub async fn create(descriptor: &FileDescriptor) -> io::Result<(Self, File)> {
        let path = descriptor.full_path().to_path_buf();

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o666);

        let file = options.open(&path).await?;

        Ok((Self { path: Some(path) }, file))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Give up ownership, e.g. once the file has been moved away
    pub fn disarm(mut self) {
        self.path = None;
    }

    /// Remove the temp file, logging (not returning) any failure
    pub async fn discard(mut self) {
        if let Some(path) = self.path.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed temp file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log_cleanup_failure(&path, &e),
            }
        }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed abandoned temp file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log_cleanup_failure(&path, &e),
            }
        }
    }
}

fn log_cleanup_failure(path: &Path, error: &io::Error) {
    crate::metrics::record_cleanup_failure();
    tracing::warn!(
        path = %path.display(),
        error = %error,
        "Failed to clean up temp file"
    );
}
