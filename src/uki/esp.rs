//! EFI System Partition layout for systemd-boot and UKIs.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::common::{copy_file_with_dirs, host_path};

pub const ESP_DIR: &str = "/boot/efi";
/// UKIs are discovered by systemd-boot here.
pub const UKI_DIR: &str = "/boot/efi/EFI/Linux";
/// Firmware fallback boot path.
pub const EFI_BOOT_DIR: &str = "/boot/efi/EFI/BOOT";
pub const UKI_PATH: &str = "/boot/efi/EFI/Linux/linux.efi";
pub const BOOT_STUB_PATH: &str = "/boot/efi/EFI/BOOT/BOOTX64.EFI";
/// systemd-boot EFI binary shipped by the image's systemd package.
pub const BOOT_STUB_SOURCE: &str = "/usr/lib/systemd/boot/efi/systemd-bootx64.efi";

/// Remove everything on the ESP and recreate the canonical skeleton.
///
/// The ESP mount point itself is kept.
pub fn prepare(install_root: &Path) -> Result<()> {
    let esp = host_path(install_root, ESP_DIR);
    fs::create_dir_all(&esp).with_context(|| format!("failed to create {}", esp.display()))?;

    for entry in fs::read_dir(&esp).with_context(|| format!("failed to read {}", esp.display()))? {
        let path = entry?.path();
        let removed = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("failed to remove {}", path.display()))?;
    }

    for dir in [UKI_DIR, EFI_BOOT_DIR] {
        let dir = host_path(install_root, dir);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    debug!("Prepared ESP layout under {}", esp.display());
    Ok(())
}

/// Copy the systemd-boot binary to the firmware fallback path.
pub fn install_boot_stub(install_root: &Path) -> Result<PathBuf> {
    let src = host_path(install_root, BOOT_STUB_SOURCE);
    let dst = host_path(install_root, BOOT_STUB_PATH);
    copy_file_with_dirs(&src, &dst).context("failed to copy bootloader EFI stub")?;
    Ok(dst)
}
