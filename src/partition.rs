//! Partition resolution: template partitions joined with real device paths.
//!
//! The partitioning stage hands over a map of partition id to device path.
//! Joining it with the template's disk layout gives one
//! [`PartitionDescriptor`] per partition, from which the boot topology
//! ([`BootContext`]) is derived.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::blkid::{partuuid_ref, BlockDevices};
use crate::cmdline::RootHashPlaceholder;
use crate::error::ConfigError;
use crate::template::ImageTemplate;

pub const ROOT_MOUNTPOINT: &str = "/";
pub const BOOT_MOUNTPOINT: &str = "/boot";
pub const ESP_MOUNTPOINT: &str = "/boot/efi";
/// Mountpoint of partitions that are never mounted (dm-verity hash, swap).
pub const UNMOUNTED_MOUNTPOINT: &str = "none";

/// Partition id to device path, produced by the partitioning stage.
pub type PartitionMap = BTreeMap<String, PathBuf>;

/// A template partition bound to its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub id: String,
    pub device: PathBuf,
    pub mount_point: String,
    pub fs_type: String,
    pub mount_options: String,
}

impl PartitionDescriptor {
    pub fn is_swap(&self) -> bool {
        self.fs_type == "swap"
    }

    /// Only absolute mountpoints are mounted into the install root.
    pub fn is_mountable(&self) -> bool {
        self.mount_point.starts_with('/') && !self.is_swap()
    }

    /// The dm-verity hash partition: mountpoint `none`, not swap.
    pub fn is_verity_hash(&self) -> bool {
        self.mount_point == UNMOUNTED_MOUNTPOINT && !self.is_swap()
    }
}

/// Boot topology derived once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootContext {
    /// Partition holding the bootloader configuration.
    pub boot_device: PathBuf,
    /// Filesystem UUID of `boot_device`.
    pub boot_uuid: String,
    /// Empty when `/boot` is its own partition, `/boot` when it lives on root.
    pub boot_prefix: String,
    pub root_device: PathBuf,
    /// `PARTUUID=<id>` of the root partition.
    pub root_dev_id: String,
    /// Present if and only if immutability is enabled.
    pub verity: Option<VerityTarget>,
}

/// dm-verity devices for an immutable root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerityTarget {
    pub hash_device: PathBuf,
    /// `PARTUUID=<id>` of the hash partition.
    pub hash_dev_id: String,
    pub placeholder: RootHashPlaceholder,
}

impl BootContext {
    pub fn has_separate_boot(&self) -> bool {
        self.boot_prefix.is_empty()
    }
}

pub struct PartitionResolver {
    partitions: Vec<PartitionDescriptor>,
}

impl PartitionResolver {
    /// Join template partitions with the device map, in template order.
    ///
    /// Partitions absent from the map are skipped; they were not created by
    /// the partitioning stage.
    pub fn new(template: &ImageTemplate, devices: &PartitionMap) -> Self {
        let partitions = template
            .partitions()
            .iter()
            .filter_map(|p| {
                devices.get(&p.id).map(|device| PartitionDescriptor {
                    id: p.id.clone(),
                    device: device.clone(),
                    mount_point: p.mount_point.clone(),
                    fs_type: p.fs_type.clone(),
                    mount_options: p.mount_options.clone(),
                })
            })
            .collect();
        Self { partitions }
    }

    pub fn partitions(&self) -> &[PartitionDescriptor] {
        &self.partitions
    }

    /// Device path of the partition mounted at `mount_point`.
    pub fn device_by_mountpoint(&self, mount_point: &str) -> Option<&Path> {
        self.partitions
            .iter()
            .find(|p| p.mount_point == mount_point)
            .map(|p| p.device.as_path())
    }

    pub fn root_device(&self) -> Result<&Path> {
        self.device_by_mountpoint(ROOT_MOUNTPOINT)
            .ok_or_else(|| ConfigError::RootPartitionNotFound.into())
    }

    pub fn hash_device(&self) -> Result<&Path> {
        self.partitions
            .iter()
            .find(|p| p.is_verity_hash())
            .map(|p| p.device.as_path())
            .ok_or_else(|| ConfigError::HashPartitionNotFound.into())
    }

    /// Resolve boot device, prefix and identifiers.
    ///
    /// With `immutable`, the hash partition must resolve as well; that happens
    /// here so a missing hash partition fails before any boot file exists.
    pub fn boot_context(&self, blk: &dyn BlockDevices, immutable: bool) -> Result<BootContext> {
        let root_device = self.root_device()?.to_path_buf();

        let (boot_device, boot_prefix) = match self.device_by_mountpoint(BOOT_MOUNTPOINT) {
            Some(dev) => (dev.to_path_buf(), String::new()),
            None => (root_device.clone(), BOOT_MOUNTPOINT.to_string()),
        };

        let boot_uuid = blk.uuid(&boot_device).with_context(|| {
            format!("failed to get UUID for boot partition {}", boot_device.display())
        })?;

        let root_part_uuid = blk.part_uuid(&root_device).with_context(|| {
            format!(
                "failed to get partition UUID for root partition {}",
                root_device.display()
            )
        })?;

        let verity = if immutable {
            let hash_device = self.hash_device()?.to_path_buf();
            let hash_part_uuid = blk.part_uuid(&hash_device).with_context(|| {
                format!(
                    "failed to get partition UUID for dm-verity hash partition {}",
                    hash_device.display()
                )
            })?;
            Some(VerityTarget {
                placeholder: RootHashPlaceholder::new(&root_device, &hash_device),
                hash_dev_id: partuuid_ref(&hash_part_uuid),
                hash_device,
            })
        } else {
            None
        };

        debug!(
            boot = %boot_device.display(),
            prefix = %boot_prefix,
            verity = verity.is_some(),
            "resolved boot context"
        );

        Ok(BootContext {
            boot_device,
            boot_uuid,
            boot_prefix,
            root_device,
            root_dev_id: partuuid_ref(&root_part_uuid),
            verity,
        })
    }
}
