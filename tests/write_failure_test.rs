//! Disk Write Failure Tests
//!
//! Makes writes to the temp file fail for real by lowering the process
//! file size limit (`RLIMIT_FSIZE`), then checks that the upload reports an
//! IO error and leaves nothing behind.
//!
//! The limit is process-wide, so this file holds a single test and runs as
//! its own test binary.

#![cfg(unix)]

use bytes::Bytes;
use futures::stream;
use hyper::header::HeaderMap;
use spool_uploadr::upload::{RequestMeta, UploadError, Uploader, UploaderConfig};
use std::path::Path;

const FILE_SIZE_LIMIT: u64 = 4096;

/// Lowers the soft file size limit until dropped
struct FileSizeLimit {
    previous: libc::rlimit,
}

impl FileSizeLimit {
    fn set(bytes: u64) -> Self {
        let mut previous = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        unsafe {
            // Exceeding the limit must fail the write, not kill the process
            libc::signal(libc::SIGXFSZ, libc::SIG_IGN);
            assert_eq!(libc::getrlimit(libc::RLIMIT_FSIZE, &mut previous), 0);

            let limited = libc::rlimit {
                rlim_cur: (bytes as libc::rlim_t).min(previous.rlim_max),
                rlim_max: previous.rlim_max,
            };
            assert_eq!(libc::setrlimit(libc::RLIMIT_FSIZE, &limited), 0);
        }
        Self { previous }
    }
}

impl Drop for FileSizeLimit {
    fn drop(&mut self) {
        unsafe {
            libc::setrlimit(libc::RLIMIT_FSIZE, &self.previous);
        }
    }
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_failed_disk_write_removes_temp_file() {
    let root = tempfile::tempdir().expect("Should create temp root");
    let tmp = root.path().join("tmp");
    let upload = root.path().join("upload");
    std::fs::create_dir_all(&tmp).unwrap();
    std::fs::create_dir_all(&upload).unwrap();

    let uploader = Uploader::new(UploaderConfig::new(&upload).temp_dir(&tmp));
    let meta = RequestMeta::new(HeaderMap::new(), "");
    let chunk = Bytes::from(vec![b'a'; FILE_SIZE_LIMIT as usize]);
    let chunks: Vec<Result<Bytes, UploadError>> = (0..4).map(|_| Ok(chunk.clone())).collect();

    let result = {
        let _limit = FileSizeLimit::set(FILE_SIZE_LIMIT);
        uploader.upload(&meta, stream::iter(chunks)).await
    };

    let err = result.expect_err("Write past the file size limit should fail");
    assert!(matches!(err, UploadError::Io(_)), "unexpected error: {:?}", err);
    assert_eq!(err.status_code(), 500);
    assert_eq!(file_count(&tmp), 0, "Temp file should be removed");
    assert_eq!(file_count(&upload), 0);
}
