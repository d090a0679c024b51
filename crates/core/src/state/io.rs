//! # IO Utilities
//!
//! Atomic file writes for the project store: content goes to a temp file
//! in the target directory, is fsynced, then renamed into place.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Atomically replace `path` with `content`, creating parents as needed
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let temp = stage(path, content)?;
    temp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Atomically create `path`. Returns `Ok(false)` if it already exists.
pub fn write_new(path: &Path, content: &[u8]) -> Result<bool, StoreError> {
    let temp = stage(path, content)?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StoreError::io(path, e.error)),
    }
}

/// Read a file, mapping "not found" to `None`
pub fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn stage(path: &Path, content: &[u8]) -> Result<NamedTempFile, StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| StoreError::io(parent, e))?;
    temp.write_all(content)
        .map_err(|e| StoreError::io(temp.path().to_path_buf(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(temp.path().to_path_buf(), e))?;
    Ok(temp)
}
