//! GRUB2 (EFI) installation.
//!
//! The shim and grub EFI binaries are laid down by package installation.
//! This module writes the ESP-side `grub.cfg` that chains to the real
//! configuration, the grub environment block, and regenerates
//! `/boot/grub2/grub.cfg` with `grub2-mkconfig` inside the image.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::common::{copy_file_with_dirs, host_path, set_mode};
use crate::partition::BootContext;
use crate::process::{Cmd, Executor};

use super::params::grub_cfg_values;

/// grub.cfg asset, relative to the config-asset directory.
pub const GRUB_CFG_ASSET: &str = "image/efi/grub/grub.cfg";
/// `/etc/default/grub` asset.
pub const DEFAULT_GRUB_ASSET: &str = "image/grub2/grub";
/// grub environment block asset.
pub const GRUBENV_ASSET: &str = "image/grub2/grubenv";

/// ESP-side grub configuration, inside the image.
pub const EFI_GRUB_CFG: &str = "/boot/efi/boot/grub2/grub.cfg";
pub const DEFAULT_GRUB: &str = "/etc/default/grub";
pub const GRUBENV: &str = "/boot/grub2/grubenv";
/// Final configuration generated by `grub2-mkconfig`.
pub const GRUB_CFG: &str = "/boot/grub2/grub.cfg";

/// Owner-only access for the directory holding the ESP grub.cfg.
const GRUB_DIR_MODE: u32 = 0o700;
/// grub.cfg may carry verity arguments; owner read-only.
const GRUB_CFG_MODE: u32 = 0o400;

/// Write the ESP grub.cfg and lock down its permissions.
pub fn install_efi_config(assets: &Path, install_root: &Path, ctx: &BootContext) -> Result<PathBuf> {
    info!("Installing GRUB2 bootloader configuration (EFI mode)");

    let src = assets.join(GRUB_CFG_ASSET);
    let dst = host_path(install_root, EFI_GRUB_CFG);
    grub_cfg_values(ctx)
        .render_to(&src, &dst)
        .context("failed to write grub EFI configuration")?;

    if let Some(dir) = dst.parent() {
        restrict_tree(dir, GRUB_DIR_MODE)
            .context("failed to set permissions for grub configuration directory")?;
    }
    set_mode(&dst, GRUB_CFG_MODE).context("failed to set permissions for grub configuration file")?;

    Ok(dst)
}

/// `chmod -R <mode>` over `dir`.
fn restrict_tree(dir: &Path, mode: u32) -> Result<()> {
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        set_mode(entry.path(), mode)?;
    }
    Ok(())
}

/// Copy the grub environment block into the image.
pub fn install_grubenv(assets: &Path, install_root: &Path) -> Result<()> {
    copy_file_with_dirs(&assets.join(GRUBENV_ASSET), &host_path(install_root, GRUBENV))
        .context("failed to copy grubenv file")
}

/// Regenerate `/boot/grub2/grub.cfg` inside the image.
pub fn regenerate_config(exec: &dyn Executor, install_root: &Path) -> Result<()> {
    Cmd::new("grub2-mkconfig")
        .args(["-o", GRUB_CFG])
        .in_chroot(install_root)
        .error_msg("failed to update grub configuration")
        .run(exec)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn ctx(prefix: &str) -> BootContext {
        BootContext {
            boot_device: "/dev/sda1".into(),
            boot_uuid: "1111-2222".into(),
            boot_prefix: prefix.into(),
            root_device: "/dev/sda1".into(),
            root_dev_id: "PARTUUID=abc".into(),
            verity: None,
        }
    }

    fn assets() -> TempDir {
        let dir = TempDir::new().unwrap();
        let cfg = dir.path().join(GRUB_CFG_ASSET);
        fs::create_dir_all(cfg.parent().unwrap()).unwrap();
        fs::write(
            &cfg,
            "search --fs-uuid --set=root {{.BootUUID}}\n{{.CryptoMountCommand}}\nset prefix=($root){{.PrefixPath}}\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_efi_config_contents_and_modes() {
        let assets = assets();
        let root = TempDir::new().unwrap();

        let cfg = install_efi_config(assets.path(), root.path(), &ctx("/boot")).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&cfg), 0o400);
        assert_eq!(mode(cfg.parent().unwrap()), 0o700);

        let text = fs::read_to_string(&cfg).unwrap();
        assert!(text.contains("--set=root 1111-2222"));
        assert!(text.contains("set prefix=($root)/boot/grub2"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_separate_boot_prefix() {
        let assets = assets();
        let root = TempDir::new().unwrap();
        let cfg = install_efi_config(assets.path(), root.path(), &ctx("")).unwrap();
        let text = fs::read_to_string(&cfg).unwrap();
        assert!(text.contains("set prefix=($root)/grub2"));
    }
}
