//! `/etc/fstab` generation for the image partitions.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use crate::blkid::{partuuid_ref, BlockDevices};
use crate::common::{append_to_file, host_path};
use crate::partition::{PartitionDescriptor, ROOT_MOUNTPOINT, UNMOUNTED_MOUNTPOINT};

pub const FSTAB: &str = "/etc/fstab";

/// One fstab line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    /// Entry for `partition` identified by its PARTUUID. None for the verity hash partition.
    pub fn for_partition(partition: &PartitionDescriptor, part_uuid: &str) -> Option<Self> {
        if partition.is_verity_hash() {
            return None;
        }

        let source = partuuid_ref(part_uuid);
        if partition.is_swap() {
            return Some(Self {
                source,
                mount_point: UNMOUNTED_MOUNTPOINT.to_string(),
                fs_type: "swap".to_string(),
                options: "sw".to_string(),
                dump: 0,
                pass: 0,
            });
        }

        let fs_type = match partition.fs_type.as_str() {
            "fat16" | "fat32" => "vfat".to_string(),
            other => other.to_string(),
        };
        let options = if partition.mount_options.trim().is_empty() {
            "defaults".to_string()
        } else {
            partition.mount_options.trim().to_string()
        };
        let pass = if partition.mount_point == ROOT_MOUNTPOINT { 1 } else { 2 };

        Some(Self {
            source,
            mount_point: partition.mount_point.clone(),
            fs_type,
            options,
            dump: 0,
            pass,
        })
    }

    pub fn line(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.source, self.mount_point, self.fs_type, self.options, self.dump, self.pass
        )
    }
}

/// Append an entry for every partition to the image's `/etc/fstab`.
pub fn update_fstab(
    blk: &dyn BlockDevices,
    install_root: &Path,
    partitions: &[PartitionDescriptor],
) -> Result<()> {
    let mut content = String::new();
    for partition in partitions {
        if partition.is_verity_hash() {
            continue;
        }
        let part_uuid = blk.part_uuid(&partition.device).with_context(|| {
            format!("failed to get partition UUID for {}", partition.device.display())
        })?;
        if let Some(entry) = FstabEntry::for_partition(partition, &part_uuid) {
            debug!("fstab: {}", entry.line());
            content.push_str(&entry.line());
            content.push('\n');
        }
    }

    if content.is_empty() {
        return Ok(());
    }
    append_to_file(host_path(install_root, FSTAB), content).context("failed to update fstab")
}
