//! No-clobber atomic file moves
//!
//! `rename(2)` silently replaces an existing destination, so the move is a
//! `link(2)` (which fails with `EEXIST`) followed by unlinking the source.
//! The destination either does not exist or holds the complete file.
//!
//! When source and destination sit on different filesystems the file is
//! first copied to a hidden staging name inside the destination directory
//! and then linked into place the same way.

use std::io;
use std::path::{Path, PathBuf};

/// Move `src` to `dst`, failing with `AlreadyExists` if `dst` exists
pub async fn move_no_clobber(src: &Path, dst: &Path) -> io::Result<()> {
    match tokio::fs::hard_link(src, dst).await {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device move, copying through staging file"
            );
            copy_then_link(src, dst).await?;
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = tokio::fs::remove_file(src).await {
        // dst is already complete here
        crate::metrics::record_cleanup_failure();
        tracing::warn!(
            path = %src.display(),
            error = %e,
            "Failed to remove source after move"
        );
    }
    Ok(())
}

async fn copy_then_link(src: &Path, dst: &Path) -> io::Result<()> {
    let staging = staging_path(dst)?;

    // Staging name is owned exclusively by this move
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staging)
        .await?;

    let result = async {
        let mut input = tokio::fs::File::open(src).await?;
        tokio::io::copy(&mut input, &mut out).await?;
        out.sync_all().await?;
        tokio::fs::hard_link(&staging, dst).await
    }
    .await;

    if let Err(e) = tokio::fs::remove_file(&staging).await {
        tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
    }
    result
}

fn staging_path(dst: &Path) -> io::Result<PathBuf> {
    let name = dst.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination has no file name: {}", dst.display()),
        )
    })?;

    let mut staging = std::ffi::OsString::from(".");
    staging.push(name);
    staging.push(".partial");
    Ok(dst.with_file_name(staging))
}

fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}
