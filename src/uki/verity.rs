//! dm-verity root hash computation.
//!
//! `veritysetup format` writes the hash tree onto the hash device, so it is
//! run exactly once per build and never retried.

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::cmdline::{RootHash, RootHashPlaceholder};
use crate::process::{Cmd, Executor};

const ROOT_HASH_LABEL: &str = "Root hash:";

/// Remount the data device read-only so its content cannot change under the hash tree.
pub fn remount_read_only(exec: &dyn Executor, install_root: &Path, data_device: &Path) -> Result<()> {
    debug!("Remounting {} read-only", data_device.display());
    Cmd::new("mount")
        .args(["-o", "remount,ro"])
        .arg_path(data_device)
        .in_chroot(install_root)
        .error_msg(format!("failed to remount {} as read-only", data_device.display()))
        .run(exec)?;
    Ok(())
}

/// Format the hash device and return the root hash.
///
/// `chroot` selects where veritysetup runs; `None` runs it on the host.
pub fn format(
    exec: &dyn Executor,
    chroot: Option<&Path>,
    devices: &RootHashPlaceholder,
) -> Result<RootHash> {
    info!(
        "Computing dm-verity root hash for {} (hash device {})",
        devices.data_device().display(),
        devices.hash_device().display()
    );

    let mut cmd = Cmd::new("veritysetup")
        .arg("format")
        .arg_path(devices.data_device())
        .arg_path(devices.hash_device())
        .error_msg("failed to run veritysetup format");
    if let Some(root) = chroot {
        cmd = cmd.in_chroot(root);
    }

    let result = cmd.run(exec)?;
    parse_root_hash(&result.stdout)
}

/// Pull the root hash out of `veritysetup format` output.
pub fn parse_root_hash(output: &str) -> Result<RootHash> {
    let value = output
        .lines()
        .filter(|line| line.contains(ROOT_HASH_LABEL))
        .find_map(|line| line.split_whitespace().nth(2))
        .ok_or_else(|| anyhow!("root hash not found in veritysetup output"))?;
    RootHash::parse(value)
}
