//! Staging-file naming and the raw file primitives used by the operations
//! and their compensations.
//!
//! Staging files are created beside their target so that moving content in
//! and out of them is a same-volume rename:
//!
//! ```text
//! originalContentOf-<targetFileName>-<uuid>.tmp
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, TxfsError};

pub const STAGING_PREFIX: &str = "originalContentOf";
pub const STAGING_SUFFIX: &str = ".tmp";

/// Returns a fresh staging path for `target`, in the same directory.
pub fn staging_path_for(target: &Path) -> Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| TxfsError::InvalidPath {
        path: target.to_path_buf(),
        reason: "path has no file name".into(),
    })?;

    let staged = format!(
        "{}-{}-{}{}",
        STAGING_PREFIX,
        name.to_string_lossy(),
        Uuid::new_v4(),
        STAGING_SUFFIX
    );

    Ok(match target.parent() {
        Some(dir) => dir.join(staged),
        None => PathBuf::from(staged),
    })
}

/// Returns true if `path` is named like a staging file.
pub fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| {
            name.starts_with(&format!("{}-", STAGING_PREFIX)) && name.ends_with(STAGING_SUFFIX)
        })
}

/// Lists staging files directly inside `dir`.
pub fn find_staging_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_staging_file(&path) {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}

/// Returns true if `a` and `b` resolve to the same existing file.
///
/// Paths that cannot be resolved (usually because one does not exist) are
/// never the same file.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn with_path(e: io::Error, action: &str, path: &Path) -> TxfsError {
    TxfsError::Io(io::Error::new(
        e.kind(),
        format!("Failed to {} {}: {}", action, path.display(), e),
    ))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            fs::create_dir_all(dir).map_err(|source| TxfsError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Writes `data` to `path`, creating missing parent directories.
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, data).map_err(|e| with_path(e, "write", path))?;
    log::debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

/// Copies the bytes of `from` into `to`, creating missing parent directories.
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    ensure_parent(to)?;
    fs::copy(from, to).map_err(|e| with_path(e, "copy", from))?;
    log::debug!("Copied: {} → {}", from.display(), to.display());
    Ok(())
}

/// Renames `from` to `to`, creating the destination directory when it
/// differs from the source directory and is missing.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from.parent() != to.parent() {
        ensure_parent(to)?;
    }

    fs::rename(from, to).map_err(|source| TxfsError::RenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;

    log::debug!("Moved: {} → {}", from.display(), to.display());
    Ok(())
}

/// Deletes `path` if it exists. Returns whether anything was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("Deleted: {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(with_path(e, "delete", path)),
    }
}
