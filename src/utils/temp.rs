//! Scoped temporary files.
//!
//! Every file the pipeline creates is owned by a [`TempPath`], so it is
//! removed when its owner is dropped, on success and error paths alike.
//! Only [`persist`] hands a file over to the caller.

use std::fs::File;
use std::io;
use std::path::Path;
use tempfile::TempPath;

/// Creates an empty file in `dir` and returns its handle with the guard.
pub fn create_in(dir: &Path, prefix: &str, suffix: &str) -> io::Result<(File, TempPath)> {
    let named = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    Ok(named.into_parts())
}

/// Async variant of [`create_in`] for the staging and splitting loops.
pub fn create_async_in(
    dir: &Path,
    prefix: &str,
    suffix: &str,
) -> io::Result<(tokio::fs::File, TempPath)> {
    let (file, path) = create_in(dir, prefix, suffix)?;
    Ok((tokio::fs::File::from_std(file), path))
}

/// Moves a temporary file to `dest`, falling back to copy + delete when the
/// destination lives on another filesystem.
pub fn persist(path: TempPath, dest: &Path) -> io::Result<()> {
    match path.persist(dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                "Rename to {} failed ({}), copying instead",
                dest.display(),
                err.error
            );
            let path = err.path;
            std::fs::copy(&path, dest)?;
            drop(path);
            Ok(())
        }
    }
}
