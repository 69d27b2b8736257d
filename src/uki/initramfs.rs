//! Initramfs regeneration with dracut inside the image.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::process::{Cmd, Executor};

use super::kernel::InstalledKernel;

/// Target OS whose stock initramfs lacks `cut`, which its boot scripts need.
pub const CUT_REQUIRING_OS: &str = "edge-microvisor-toolkit";
const CUT_BINARY: &str = "/usr/bin/cut";

/// dracut modules without which a verity root cannot be activated.
const VERITY_MODULES: [&str; 3] = ["systemd-veritysetup", "dm", "crypt"];

/// Inputs that shape the dracut invocation.
#[derive(Debug, Clone, Default)]
pub struct InitramfsOptions<'a> {
    pub immutable: bool,
    pub target_os: &'a str,
    /// Space separated extra driver modules; may be empty.
    pub extra_drivers: &'a str,
}

/// dracut arguments for `kernel`.
pub fn dracut_args(kernel: &InstalledKernel, opts: &InitramfsOptions<'_>) -> Vec<String> {
    let mut args: Vec<String> = ["--force", "--no-hostonly", "--verbose"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if opts.immutable {
        for module in VERITY_MODULES {
            args.push("--add".into());
            args.push(module.into());
        }
    }
    if opts.target_os == CUT_REQUIRING_OS {
        args.push("--install".into());
        args.push(CUT_BINARY.into());
    }

    args.push("--add".into());
    args.push("systemd".into());

    if !opts.extra_drivers.is_empty() {
        args.push("--add-drivers".into());
        args.push(opts.extra_drivers.to_string());
    }

    args.push("--kver".into());
    args.push(kernel.version.clone());
    args.push(kernel.initramfs_path());
    args
}

/// Rebuild the initramfs for `kernel` inside `install_root`.
pub fn rebuild(
    exec: &dyn Executor,
    install_root: &Path,
    kernel: &InstalledKernel,
    opts: &InitramfsOptions<'_>,
) -> Result<String> {
    info!("Rebuilding initramfs for kernel {}", kernel.version);
    Cmd::new("dracut")
        .args(dracut_args(kernel, opts))
        .in_chroot(install_root)
        .error_msg(format!("failed to build initramfs for kernel {}", kernel.version))
        .run(exec)?;
    Ok(kernel.initramfs_path())
}
