//! Installed kernel discovery.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::host_path;
use crate::error::ConfigError;

const KERNEL_PREFIX: &str = "vmlinuz-";

/// A kernel image installed under `/boot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKernel {
    pub version: String,
    /// Path inside the image, e.g. `/boot/vmlinuz-6.6.0`.
    pub image_path: String,
}

impl InstalledKernel {
    /// Initramfs path inside the image for this kernel.
    pub fn initramfs_path(&self) -> String {
        format!("/boot/initramfs-{}.img", self.version)
    }
}

/// Find the kernel in the image's `/boot`: the first `vmlinuz-<version>` by name.
pub fn find_kernel(install_root: &Path) -> Result<InstalledKernel> {
    let boot_dir: PathBuf = host_path(install_root, "/boot");
    let entries = fs::read_dir(&boot_dir)
        .with_context(|| format!("failed to read boot directory {}", boot_dir.display()))?;

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.len() > KERNEL_PREFIX.len() && n.starts_with(KERNEL_PREFIX))
        .collect();
    names.sort();

    let name = names
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::KernelNotFound(boot_dir.clone()))?;

    Ok(InstalledKernel {
        version: name[KERNEL_PREFIX.len()..].to_string(),
        image_path: format!("/boot/{}", name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::config_error;
    use tempfile::TempDir;

    #[test]
    fn test_first_sorted_kernel_wins() {
        let root = TempDir::new().unwrap();
        let boot = root.path().join("boot");
        fs::create_dir_all(&boot).unwrap();
        fs::write(boot.join("vmlinuz-6.6.2"), b"").unwrap();
        fs::write(boot.join("vmlinuz-6.6.1"), b"").unwrap();
        fs::write(boot.join("config-6.6.1"), b"").unwrap();

        let k = find_kernel(root.path()).unwrap();
        assert_eq!(k.version, "6.6.1");
        assert_eq!(k.image_path, "/boot/vmlinuz-6.6.1");
        assert_eq!(k.initramfs_path(), "/boot/initramfs-6.6.1.img");
    }

    #[test]
    fn test_missing_kernel() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("boot")).unwrap();
        let err = find_kernel(root.path()).unwrap_err();
        assert!(matches!(config_error(&err), Some(ConfigError::KernelNotFound(_))));
    }
}
