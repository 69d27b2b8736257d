//! Ordered mounting of the image partitions into the install root.
//!
//! Partitions are mounted in ascending order of their absolute mountpoint
//! string. Plain string order already puts a parent before its children
//! (`/` < `/boot` < `/boot/efi`), so no mount tree is needed. `/proc` is
//! mounted last for package post-install scripts and released first.
//!
//! A [`MountSet`] owns everything that was mounted. Releasing it unmounts in
//! exact reverse order, continuing past failures; dropping it without an
//! explicit release still unmounts.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::host_path;
use crate::error::{combine, with_cleanup_errors, ConfigError};
use crate::partition::{PartitionDescriptor, ESP_MOUNTPOINT};
use crate::process::{Cmd, Executor};

/// File-mode mask for the EFI System Partition; FAT has no permissions of its own.
pub const ESP_UMASK: &str = "umask=0077";

/// Filesystem-type driven mount arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountFlags {
    pub fs_type: String,
    pub options: Option<String>,
}

impl MountFlags {
    pub fn for_partition(partition: &PartitionDescriptor) -> Self {
        let fs_type = mount_fs_type(&partition.fs_type).to_string();
        let options = if partition.mount_point == ESP_MOUNTPOINT {
            Some(ESP_UMASK.to_string())
        } else {
            None
        };
        Self { fs_type, options }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.fs_type.clone()];
        if let Some(options) = &self.options {
            args.push("-o".to_string());
            args.push(options.clone());
        }
        args
    }
}

/// Kernel filesystem name for a template filesystem type.
pub fn mount_fs_type(fs_type: &str) -> &str {
    match fs_type {
        "fat12" | "fat16" | "fat32" | "vfat" => "vfat",
        other => other,
    }
}

/// One partition mount under the install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDescriptor {
    pub id: String,
    pub device: PathBuf,
    /// Absolute host path under the install root.
    pub mount_point: PathBuf,
    pub flags: MountFlags,
}

/// Build the mount plan: mountable partitions sorted by mountpoint path.
pub fn plan_mounts(install_root: &Path, partitions: &[PartitionDescriptor]) -> Vec<MountDescriptor> {
    let mut plan: Vec<MountDescriptor> = partitions
        .iter()
        .filter(|p| p.is_mountable())
        .map(|p| MountDescriptor {
            id: p.id.clone(),
            device: p.device.clone(),
            mount_point: host_path(install_root, &p.mount_point),
            flags: MountFlags::for_partition(p),
        })
        .collect();
    plan.sort_by(|a, b| a.mount_point.as_os_str().cmp(b.mount_point.as_os_str()));
    plan
}

pub struct MountOrchestrator<'a> {
    exec: &'a dyn Executor,
}

impl<'a> MountOrchestrator<'a> {
    pub fn new(exec: &'a dyn Executor) -> Self {
        Self { exec }
    }

    /// Mount every partition, then `/proc`.
    ///
    /// Stops at the first failure; whatever was already mounted is unmounted
    /// before returning, with unmount failures appended to the mount error.
    pub fn mount_all(
        &self,
        install_root: &Path,
        partitions: &[PartitionDescriptor],
    ) -> Result<MountSet<'a>> {
        if !install_root.is_dir() {
            return Err(ConfigError::InstallRootMissing(install_root.to_path_buf()).into());
        }

        let plan = plan_mounts(install_root, partitions);
        if plan.is_empty() {
            return Err(ConfigError::NoMountablePartitions.into());
        }

        let mut set = MountSet {
            exec: self.exec,
            mounted: Vec::with_capacity(plan.len()),
            proc_mount: None,
            released: false,
        };

        for desc in plan {
            if let Err(err) = mount_partition(self.exec, &desc) {
                return Err(set.abort(err));
            }
            set.mounted.push(desc);
        }

        let proc_dir = install_root.join("proc");
        if let Err(err) = mount_proc(self.exec, &proc_dir) {
            return Err(set.abort(err));
        }
        set.proc_mount = Some(proc_dir);

        info!("Mounted {} partition(s) under {}", set.mounted.len(), install_root.display());
        Ok(set)
    }
}

/// Everything mounted for one run.
pub struct MountSet<'a> {
    exec: &'a dyn Executor,
    mounted: Vec<MountDescriptor>,
    proc_mount: Option<PathBuf>,
    released: bool,
}

impl MountSet<'_> {
    pub fn descriptors(&self) -> &[MountDescriptor] {
        &self.mounted
    }

    /// Unmount `/proc`, then every partition in reverse mount order.
    ///
    /// Every unmount is attempted even if an earlier one fails; all failures
    /// are reported together.
    pub fn unmount_all(mut self) -> Result<()> {
        match combine(self.release()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn release(&mut self) -> Vec<anyhow::Error> {
        self.released = true;
        let mut errors = Vec::new();

        if let Some(proc_dir) = self.proc_mount.take() {
            if let Err(e) = unmount_path(self.exec, &proc_dir) {
                errors.push(e);
            }
        }

        while let Some(desc) = self.mounted.pop() {
            if let Err(e) = unmount_path(self.exec, &desc.mount_point) {
                errors.push(e);
            }
        }
        errors
    }

    fn abort(&mut self, err: anyhow::Error) -> anyhow::Error {
        let cleanup = self.release();
        with_cleanup_errors(err, cleanup)
    }
}

impl Drop for MountSet<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for err in self.release() {
            warn!("unmount during drop failed: {:#}", err);
        }
    }
}

fn mount_partition(exec: &dyn Executor, desc: &MountDescriptor) -> Result<()> {
    fs::create_dir_all(&desc.mount_point).with_context(|| {
        format!("failed to create mount point {}", desc.mount_point.display())
    })?;

    let flags = desc.flags.args();
    Cmd::new("mount")
        .args(&flags)
        .arg_path(&desc.device)
        .arg_path(&desc.mount_point)
        .error_msg(format!(
            "failed to mount {} to {} with flags '{}'",
            desc.device.display(),
            desc.mount_point.display(),
            flags.join(" ")
        ))
        .run(exec)?;

    debug!("Mounted {} at {}", desc.device.display(), desc.mount_point.display());
    Ok(())
}

fn mount_proc(exec: &dyn Executor, proc_dir: &Path) -> Result<()> {
    fs::create_dir_all(proc_dir)
        .with_context(|| format!("failed to create {}", proc_dir.display()))?;
    Cmd::new("mount")
        .args(["-t", "proc", "proc"])
        .arg_path(proc_dir)
        .error_msg(format!("failed to mount proc at {}", proc_dir.display()))
        .run(exec)?;
    Ok(())
}

/// Unmount `path`, falling back to a lazy unmount if the normal one fails.
pub fn unmount_path(exec: &dyn Executor, path: &Path) -> Result<()> {
    let first = Cmd::new("umount").arg_path(path).allow_fail().run(exec)?;
    if first.success() {
        debug!("Unmounted {}", path.display());
        return Ok(());
    }

    let lazy = Cmd::new("umount").arg("-l").arg_path(path).allow_fail().run(exec)?;
    if lazy.success() {
        warn!("{} was busy; lazily unmounted", path.display());
        return Ok(());
    }

    Err(anyhow!(
        "failed to unmount {}: {}",
        path.display(),
        if lazy.stderr_trimmed().is_empty() {
            first.stderr_trimmed().to_string()
        } else {
            lazy.stderr_trimmed().to_string()
        }
    ))
}
