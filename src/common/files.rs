//! Utilities for file operations with automatic parent directory creation.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::paths::ensure_parent_exists;

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_exists(path)?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories as needed.
///
/// # Arguments
/// * `path` - Path to the file to write
/// * `content` - Content to write
/// * `mode` - Unix permission bits (e.g., 0o644, 0o600)
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    set_mode(path, mode)
}

/// Append to a file, creating it and its parent directories if missing.
pub fn append_to_file<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_exists(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    file.write_all(content.as_ref())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Copy `src` to `dst`, creating the destination's parent directories.
pub fn copy_file_with_dirs(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent_exists(dst)?;
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Lowercase hex SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Set Unix permission bits on `path`.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to chmod {:o} {}", mode, path.display()))
}
