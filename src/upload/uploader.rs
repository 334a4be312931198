//! Upload lifecycle
//!
//! `Init -> DirectoriesReady -> Streaming -> Validating -> Relocating -> Done`
//!
//! Stages run strictly one after the other. Every failure after the temp
//! file is created goes through [`TempFileGuard::discard`], and the error
//! the caller sees is always the one that stopped the upload.
//!
//! # Example
//!
//! ```no_run
//! use spool_uploadr::upload::{RequestMeta, Uploader, UploaderConfig, UploadError};
//! use bytes::Bytes;
//! use futures::stream;
//!
//! # async fn example() -> Result<(), UploadError> {
//! let uploader = Uploader::new(
//!     UploaderConfig::new("./upload")
//!         .max_size(Some(1024 * 1024))
//!         .type_suffix(Some("json".into())),
//! );
//!
//! let body = stream::iter(vec![Ok::<_, UploadError>(Bytes::from("{}"))]);
//! let result = uploader.upload(&RequestMeta::default(), body).await?;
//! println!("Stored {} ({} bytes)", result.name, result.size);
//! # Ok(())
//! # }
//! ```

use super::copier::StreamCopier;
use super::descriptor::{
    validate_relative_path, DescriptorParams, FileDescriptor, FileNameGenerator, RandomFileName,
    RelativePathGenerator, RequestMeta, UploadRoot,
};
use super::relocate::move_no_clobber;
use super::temp_file::TempFileGuard;
use super::{BodyStream, SizeLimiter, UploadError, UploadHandler};
use crate::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;

/// Temp-file creation attempts before a name collision becomes an error
pub const MAX_NAME_ATTEMPTS: usize = 3;

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    /// Final name, relative to the upload directory, `/`-separated
    pub name: String,
    /// Bytes written
    pub size: u64,
    /// Final location on disk
    #[serde(skip)]
    pub path: PathBuf,
}

/// Uploader settings, resolved once when the uploader is built
#[derive(Clone)]
pub struct UploaderConfig {
    /// Label used in logs and metrics
    pub name: String,
    /// Maximum body size; `None` means unlimited
    pub max_size: Option<u64>,
    /// Where bodies are written while streaming. Default: OS temp dir
    pub temp_dir: PathBuf,
    /// Where finished files end up
    pub upload_dir: PathBuf,
    /// Appended to generated names as `.{suffix}`
    pub type_suffix: Option<String>,
    /// Default: [`RandomFileName`]
    pub file_names: Arc<dyn FileNameGenerator>,
    /// Default: [`UploadRoot`]
    pub relative_paths: Arc<dyn RelativePathGenerator>,
    /// Per-read body timeout. Default: none
    pub read_timeout: Option<Duration>,
}

impl UploaderConfig {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "default".into(),
            max_size: None,
            temp_dir: std::env::temp_dir(),
            upload_dir: upload_dir.into(),
            type_suffix: None,
            file_names: Arc::new(RandomFileName::default()),
            relative_paths: Arc::new(UploadRoot),
            read_timeout: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_size(mut self, max_size: Option<u64>) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn type_suffix(mut self, type_suffix: Option<String>) -> Self {
        self.type_suffix = type_suffix;
        self
    }

    pub fn file_names(mut self, generator: impl FileNameGenerator + 'static) -> Self {
        self.file_names = Arc::new(generator);
        self
    }

    pub fn relative_paths(mut self, generator: impl RelativePathGenerator + 'static) -> Self {
        self.relative_paths = Arc::new(generator);
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for UploaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploaderConfig")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .field("temp_dir", &self.temp_dir)
            .field("upload_dir", &self.upload_dir)
            .field("type_suffix", &self.type_suffix)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

/// Streams request bodies to disk
#[derive(Debug, Clone)]
pub struct Uploader {
    config: UploaderConfig,
    copier: StreamCopier,
}

impl Uploader {
    pub fn new(config: UploaderConfig) -> Self {
        let copier = StreamCopier::new().with_read_timeout(config.read_timeout);
        Self { config, copier }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Store `body` and return its final name and size
    #[tracing::instrument(
        name = "upload.file",
        skip(self, meta, body),
        fields(
            upload.route = %self.config.name,
            upload.path = %meta.path,
            upload.name = tracing::field::Empty,
            upload.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload<S>(&self, meta: &RequestMeta, body: S) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Send,
    {
        let start_time = Instant::now();
        let result = self.run(meta, body).await;
        let duration = start_time.elapsed();

        metrics::record_upload_duration(&self.config.name, duration.as_secs_f64());

        match &result {
            Ok(uploaded) => {
                metrics::record_upload_success(&self.config.name, uploaded.size);

                let span = tracing::Span::current();
                span.record("upload.name", uploaded.name.as_str());
                span.record("upload.bytes", uploaded.size);

                tracing::info!(
                    name = %uploaded.name,
                    bytes = uploaded.size,
                    duration_ms = duration.as_millis(),
                    "Upload completed"
                );
            }
            Err(e) => {
                metrics::record_upload_failure(&self.config.name, e.kind());
                tracing::debug!(
                    kind = %e.kind(),
                    duration_ms = duration.as_millis(),
                    "Upload failed"
                );
            }
        }

        result
    }

    async fn run<S>(&self, meta: &RequestMeta, body: S) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Send,
    {
        // Init -> DirectoriesReady
        let relative = self.config.relative_paths.generate(meta)?;
        validate_relative_path(&relative)?;

        tokio::try_join!(
            ensure_dir(&self.config.temp_dir),
            ensure_dir(&self.config.upload_dir)
        )?;

        // DirectoriesReady -> Streaming
        let descriptor = FileDescriptor::build(DescriptorParams {
            meta,
            max_size: self.config.max_size,
            directory: &self.config.temp_dir,
            type_suffix: self.config.type_suffix.as_deref(),
            name_generator: self.config.file_names.as_ref(),
        })?;
        let (descriptor, guard, file) = self.create_temp(descriptor, meta).await?;

        match self.stream_and_place(descriptor, file, body, &relative).await {
            Ok(result) => {
                guard.disarm();
                Ok(result)
            }
            Err(e) => {
                guard.discard().await;
                Err(e)
            }
        }
    }

    /// Exclusive create, regenerating the name on collision
    async fn create_temp(
        &self,
        mut descriptor: FileDescriptor,
        meta: &RequestMeta,
    ) -> Result<(FileDescriptor, TempFileGuard, File), UploadError> {
        let mut attempt = 1;
        loop {
            match TempFileGuard::create(&descriptor).await {
                Ok((guard, file)) => return Ok((descriptor, guard, file)),
                Err(e)
                    if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS =>
                {
                    tracing::warn!(
                        path = %descriptor.full_path().display(),
                        attempt,
                        "Temp file name collision, generating a new name"
                    );
                    attempt += 1;
                    let name = self
                        .config
                        .file_names
                        .generate(meta, self.config.type_suffix.as_deref())?;
                    descriptor = descriptor.renamed(name)?;
                }
                Err(e) => {
                    return Err(with_context(
                        e,
                        format!("Failed to create temp file {}", descriptor.full_path().display()),
                    ))
                }
            }
        }
    }

    async fn stream_and_place<S>(
        &self,
        descriptor: FileDescriptor,
        mut file: File,
        body: S,
        relative: &Path,
    ) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Send,
    {
        // Streaming
        let mut limiter = SizeLimiter::from(descriptor.size_bound());
        let size = self.copier.copy(body, &mut file, &mut limiter).await?;
        file.sync_data().await?;
        drop(file);

        // Streaming -> Validating
        if let Some(expected) = descriptor.size_bound().exact() {
            if size != expected {
                return Err(UploadError::BadRequest(format!(
                    "Data size ({}) does not match the expected one ({}): upload aborted.",
                    size, expected
                )));
            }
        }

        // Validating -> Relocating
        let dest_dir = self.config.upload_dir.join(relative);
        ensure_dir(&dest_dir).await?;

        let temp_path = descriptor.full_path().to_path_buf();
        let placed = descriptor.relocated(dest_dir);
        move_no_clobber(&temp_path, placed.full_path())
            .await
            .map_err(|e| {
                with_context(
                    e,
                    format!("Failed to move upload to {}", placed.full_path().display()),
                )
            })?;

        // Relocating -> Done
        Ok(UploadResult {
            name: display_name(relative, placed.file_name()),
            size,
            path: placed.full_path().to_path_buf(),
        })
    }
}

#[async_trait]
impl UploadHandler for Uploader {
    async fn upload(
        &self,
        meta: &RequestMeta,
        body: BodyStream,
    ) -> Result<UploadResult, UploadError> {
        Uploader::upload(self, meta, body).await
    }
}

async fn ensure_dir(path: &Path) -> Result<(), UploadError> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        with_context(e, format!("Failed to create directory {}", path.display()))
    })
}

fn with_context(e: io::Error, context: String) -> UploadError {
    UploadError::Io(io::Error::new(e.kind(), format!("{}: {}", context, e)))
}

fn display_name(relative: &Path, file_name: &str) -> String {
    relative
        .iter()
        .map(|c| c.to_string_lossy())
        .filter(|c| c != ".")
        .chain(std::iter::once(file_name.into()))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new(""), "a.txt"), "a.txt");
        assert_eq!(display_name(Path::new("x/y"), "a.txt"), "x/y/a.txt");
        assert_eq!(display_name(Path::new("./x"), "a.txt"), "x/a.txt");
    }

    #[test]
    fn test_config_defaults() {
        let config = UploaderConfig::new("/srv/upload");
        assert_eq!(config.temp_dir, std::env::temp_dir());
        assert_eq!(config.max_size, None);
        assert!(config.type_suffix.is_none());
        assert!(config.read_timeout.is_none());
    }

    #[test]
    fn test_result_serializes_name_and_size_only() {
        let result = UploadResult {
            name: "a.txt".into(),
            size: 3,
            path: PathBuf::from("/srv/upload/a.txt"),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"name": "a.txt", "size": 3}));
    }
}
