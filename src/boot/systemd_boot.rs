//! systemd-boot (EFI only).
//!
//! Only the kernel command line is written here. The UKI builder later reads
//! it back, resolves the root hash and embeds it into the UKI.

use std::path::{Path, PathBuf};

use crate::common::host_path;

/// Boot-parameter asset, relative to the config-asset directory.
pub const BOOT_PARAMS_ASSET: &str = "image/efi/bootParams.conf";

/// Kernel command line file consumed by the UKI builder.
pub const CMDLINE_CONF: &str = "/boot/cmdline.conf";

/// Host path of the command line file inside `install_root`.
pub fn cmdline_path(install_root: &Path) -> PathBuf {
    host_path(install_root, CMDLINE_CONF)
}
