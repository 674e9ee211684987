//! Hash-gated atomic file writer.
//!
//! ## `write_if_changed` protocol
//!
//! 1. SHA-256 hash the desired content.
//! 2. Hash the file currently on disk (missing file = no hash).
//! 3. Identical hashes: skip, nothing touched.
//! 4. Write to a fresh, randomly named temp file next to `path`, created
//!    with `O_EXCL` so a planted name or symlink is never followed.
//! 5. Rename over the final path (atomic on POSIX; a symlink at `path` is
//!    replaced, not followed).
//!
//! Running a manager twice against the same metadata therefore leaves every
//! file (and its mtime) exactly as the first run did.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};
use tempfile::NamedTempFile;

use crate::error::{io_err, ManagerError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Content changed (or the file did not exist) and was written.
    Written { path: PathBuf },
    /// File already had the desired content.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

fn digest(content: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(content);
    hex::encode(h.finalize())
}

/// Read a file, treating "not found" as empty.
pub fn read_or_empty(path: &Path) -> Result<String, ManagerError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Atomically replace `path` with `content` unless it already matches.
pub fn write_if_changed(path: &Path, content: &str) -> Result<WriteResult, ManagerError> {
    let existing = match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(io_err(path, err)),
    };

    if let Some(existing) = &existing {
        if digest(existing) == digest(content.as_bytes()) {
            tracing::debug!(path = %path.display(), "unchanged");
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_err(parent, e))?;
    if let Err(e) = tmp.write_all(content.as_bytes()) {
        return Err(io_err(tmp.path(), e));
    }
    if let Some(existing) = &existing {
        copy_permissions(path, tmp.path());
        let before = String::from_utf8_lossy(existing);
        tracing::debug!(
            path = %path.display(),
            changed_lines = changed_lines(&before, content),
            "rewriting file",
        );
    }
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;

    tracing::info!(path = %path.display(), "wrote file");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

fn copy_permissions(from: &Path, to: &Path) {
    if let Ok(meta) = std::fs::metadata(from) {
        let _ = std::fs::set_permissions(to, meta.permissions());
    }
}

fn changed_lines(before: &str, after: &str) -> usize {
    TextDiff::from_lines(before, after)
        .iter_all_changes()
        .filter(|c| c.tag() != ChangeTag::Equal)
        .count()
}
