//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! centralise the rename-or-copy move used when publishing into the
//! content store.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into a storage error with operation + path context.
pub fn storage_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::storage(format!("{op} {}: {source}", path.display()))
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| storage_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Recursive size of a directory in bytes.
pub async fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| storage_error("reading directory", &dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("reading directory entry", &dir, e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| storage_error("reading metadata", &entry.path(), e))?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }

    Ok(total)
}

/// Move a directory into place, preferring an atomic rename.
///
/// Falls back to a recursive copy followed by source removal when the
/// rename fails with a cross-device error. The fallback is a defined
/// behavior, not a retry.
pub async fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent_dir(dst).await?;

    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            copy_dir_recursive(src, dst).await?;
            tokio::fs::remove_dir_all(src)
                .await
                .map_err(|e| storage_error("removing source directory", src, e))
        }
        Err(e) => Err(storage_error("renaming directory", src, e)),
    }
}

/// Copy a directory tree.
pub async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir_all(dst).await?;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| storage_error("reading directory", &from, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("reading directory entry", &from, e))?
        {
            let target = to.join(entry.file_name());
            let meta = entry
                .metadata()
                .await
                .map_err(|e| storage_error("reading metadata", &entry.path(), e))?;
            if meta.is_dir() {
                ensure_dir_all(&target).await?;
                stack.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| storage_error("copying file", &entry.path(), e))?;
            }
        }
    }

    Ok(())
}

/// Age of a path since its last modification.
pub async fn modified_age(path: &Path) -> Result<std::time::Duration> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| storage_error("reading metadata", path, e))?;
    let modified = meta
        .modified()
        .map_err(|e| storage_error("reading mtime", path, e))?;
    Ok(modified.elapsed().unwrap_or_default())
}
