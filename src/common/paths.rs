//! Path helpers for translating image paths into host paths.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Map an absolute path inside the image to its location under `install_root`.
///
/// `Path::join` with an absolute path would discard the root, so the leading
/// `/` is stripped first. `/` itself maps to `install_root`.
pub fn host_path(install_root: &Path, image_path: &str) -> PathBuf {
    let relative = image_path.trim_start_matches('/');
    if relative.is_empty() {
        install_root.to_path_buf()
    } else {
        install_root.join(relative)
    }
}

/// Ensure all parent directories of a file exist.
///
/// Creates all parent directories of the given path. If the path has no parents,
/// does nothing (doesn't error).
pub fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
