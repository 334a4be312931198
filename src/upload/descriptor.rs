//! Planned-file descriptors and naming strategies
//!
//! A [`FileDescriptor`] is built from the request metadata before any body
//! byte is read. Building it is where the declared `content-length` is
//! checked against the configured maximum.

use super::{SizeBound, UploadError};
use hyper::header::{HeaderMap, CONTENT_LENGTH};
use rand::Rng;
use std::path::{Component, Path, PathBuf};

/// Random bytes used by [`RandomFileName`] by default
pub const DEFAULT_NAME_ENTROPY_BYTES: usize = 5;

/// The parts of a request the uploader looks at besides the body
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: HeaderMap,
    /// Request path below the route prefix, without leading `/`
    pub path: String,
}

impl RequestMeta {
    pub fn new(headers: HeaderMap, path: impl Into<String>) -> Self {
        Self {
            headers,
            path: path.into(),
        }
    }

    /// Declared body length, `None` when the header is absent
    pub fn content_length(&self) -> Result<Option<u64>, UploadError> {
        let Some(value) = self.headers.get(CONTENT_LENGTH) else {
            return Ok(None);
        };

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or_else(|| {
                UploadError::BadRequest(format!("Invalid content-length header: {:?}", value))
            })
    }

    /// Non-empty `/`-separated segments of [`RequestMeta::path`]
    pub fn path_segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// Strategy producing the file name of an upload
pub trait FileNameGenerator: Send + Sync {
    fn generate(&self, meta: &RequestMeta, type_suffix: Option<&str>)
        -> Result<String, UploadError>;
}

impl<F> FileNameGenerator for F
where
    F: Fn(&RequestMeta, Option<&str>) -> Result<String, UploadError> + Send + Sync,
{
    fn generate(
        &self,
        meta: &RequestMeta,
        type_suffix: Option<&str>,
    ) -> Result<String, UploadError> {
        self(meta, type_suffix)
    }
}

/// Strategy producing the sub-directory of the upload directory
pub trait RelativePathGenerator: Send + Sync {
    fn generate(&self, meta: &RequestMeta) -> Result<PathBuf, UploadError>;
}

impl<F> RelativePathGenerator for F
where
    F: Fn(&RequestMeta) -> Result<PathBuf, UploadError> + Send + Sync,
{
    fn generate(&self, meta: &RequestMeta) -> Result<PathBuf, UploadError> {
        self(meta)
    }
}

/// Hex-encoded random name, e.g. `3fa94c01be.json`
#[derive(Debug, Clone)]
pub struct RandomFileName {
    bytes: usize,
}

impl RandomFileName {
    pub fn new(bytes: usize) -> Self {
        Self {
            bytes: bytes.max(DEFAULT_NAME_ENTROPY_BYTES),
        }
    }
}

impl Default for RandomFileName {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_ENTROPY_BYTES)
    }
}

impl FileNameGenerator for RandomFileName {
    fn generate(
        &self,
        _meta: &RequestMeta,
        type_suffix: Option<&str>,
    ) -> Result<String, UploadError> {
        let mut bytes = vec![0u8; self.bytes];
        rand::rng().fill(bytes.as_mut_slice());
        Ok(with_suffix(hex::encode(bytes), type_suffix))
    }
}

/// Uses the last segment of the request path as the file name
#[derive(Debug, Clone, Default)]
pub struct RequestPathFileName;

impl FileNameGenerator for RequestPathFileName {
    fn generate(
        &self,
        meta: &RequestMeta,
        type_suffix: Option<&str>,
    ) -> Result<String, UploadError> {
        let name = meta.path_segments().last().copied().ok_or_else(|| {
            UploadError::BadRequest("Request path does not name a file.".into())
        })?;
        Ok(with_suffix(name.to_string(), type_suffix))
    }
}

/// Places every upload directly in the upload directory
#[derive(Debug, Clone, Default)]
pub struct UploadRoot;

impl RelativePathGenerator for UploadRoot {
    fn generate(&self, _meta: &RequestMeta) -> Result<PathBuf, UploadError> {
        Ok(PathBuf::new())
    }
}

/// Uses every request path segment but the last as sub-directories
#[derive(Debug, Clone, Default)]
pub struct RequestPathDirectory;

impl RelativePathGenerator for RequestPathDirectory {
    fn generate(&self, meta: &RequestMeta) -> Result<PathBuf, UploadError> {
        let segments = meta.path_segments();
        let dirs = segments.len().saturating_sub(1);
        Ok(segments[..dirs].iter().collect())
    }
}

fn with_suffix(mut name: String, type_suffix: Option<&str>) -> String {
    if let Some(suffix) = type_suffix.filter(|s| !s.is_empty()) {
        name.push('.');
        name.push_str(suffix);
    }
    name
}

/// Reject names that are not exactly one plain path component
pub fn validate_file_name(name: &str) -> Result<(), UploadError> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == name
    );

    if name.contains(['/', '\\']) || !single_normal {
        return Err(UploadError::BadRequest(format!(
            "Invalid file name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Reject relative paths that could leave the upload directory
pub fn validate_relative_path(path: &Path) -> Result<(), UploadError> {
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(())
    } else {
        Err(UploadError::BadRequest(format!(
            "Invalid destination path: {}",
            path.display()
        )))
    }
}

/// Resolve the size policy from a declared length and a configured maximum
pub fn resolve_size_bound(
    declared: Option<u64>,
    max_size: Option<u64>,
) -> Result<SizeBound, UploadError> {
    if let (Some(declared), Some(max)) = (declared, max_size) {
        if declared > max {
            return Err(UploadError::RequestTooLarge(format!(
                "Data size bigger than the maximum allowed size. Incoming size:{},maximum:{}",
                declared, max
            )));
        }
    }

    if declared == Some(0) {
        return Err(UploadError::BadRequest(
            "Request does not have a content to upload.".into(),
        ));
    }

    Ok(match (declared, max_size) {
        (Some(n), _) => SizeBound::Exact(n),
        (None, Some(max)) => SizeBound::AtMost(max),
        (None, None) => SizeBound::Unbounded,
    })
}

/// Inputs of [`FileDescriptor::build`]
pub struct DescriptorParams<'a> {
    pub meta: &'a RequestMeta,
    pub max_size: Option<u64>,
    pub directory: &'a Path,
    pub type_suffix: Option<&'a str>,
    pub name_generator: &'a dyn FileNameGenerator,
}

/// A planned file: where it lives and how big it should become
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    directory: PathBuf,
    file_name: String,
    full_path: PathBuf,
    size_bound: SizeBound,
}

impl FileDescriptor {
    /// Check the declared size and generate a name. No I/O happens here.
    pub fn build(params: DescriptorParams<'_>) -> Result<Self, UploadError> {
        let size_bound = resolve_size_bound(params.meta.content_length()?, params.max_size)?;
        let file_name = params
            .name_generator
            .generate(params.meta, params.type_suffix)?;
        Self::new(params.directory.to_path_buf(), file_name, size_bound)
    }

    pub fn new(
        directory: PathBuf,
        file_name: String,
        size_bound: SizeBound,
    ) -> Result<Self, UploadError> {
        validate_file_name(&file_name)?;
        Ok(Self {
            full_path: directory.join(&file_name),
            directory,
            file_name,
            size_bound,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn size_bound(&self) -> SizeBound {
        self.size_bound
    }

    /// Ceiling enforced while streaming, if any.
    ///
    /// This is not a size the file must match; only
    /// [`SizeBound::exact`] on [`FileDescriptor::size_bound`] is.
    pub fn expected_size(&self) -> Option<u64> {
        self.size_bound.limit()
    }

    /// Same plan under a different name
    pub fn renamed(self, file_name: String) -> Result<Self, UploadError> {
        Self::new(self.directory, file_name, self.size_bound)
    }

    /// Same file, now living in `directory`
    pub fn relocated(self, directory: PathBuf) -> Self {
        Self {
            full_path: directory.join(&self.file_name),
            directory,
            file_name: self.file_name,
            size_bound: self.size_bound,
        }
    }
}
