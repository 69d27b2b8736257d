//! Image template: the declarative, read-only input to the boot pipeline.
//!
//! Only the parts of the template the boot pipeline consumes are modelled.
//! Templates are loaded from JSON with camelCase keys:
//!
//! ```json
//! {
//!   "image": { "name": "edge-raw" },
//!   "target": { "os": "edge-microvisor-toolkit", "dist": "emt3", "arch": "x86_64" },
//!   "disk": { "partitions": [
//!     { "id": "rootfs", "mountPoint": "/", "fsType": "ext4" }
//!   ] },
//!   "systemConfig": {
//!     "name": "default",
//!     "bootloader": { "provider": "systemd-boot", "bootType": "efi" },
//!     "kernel": { "cmdline": "console=ttyS0" },
//!     "immutability": { "enabled": false }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageTemplate {
    pub image: ImageInfo,
    pub target: TargetInfo,
    pub disk: DiskConfig,
    pub system_config: SystemConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetInfo {
    pub os: String,
    pub dist: String,
    pub arch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskConfig {
    pub partitions: Vec<PartitionInfo>,
}

/// One partition of the disk layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartitionInfo {
    pub id: String,
    pub mount_point: String,
    pub fs_type: String,
    pub mount_options: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemConfig {
    pub name: String,
    pub bootloader: BootloaderConfig,
    pub kernel: KernelConfig,
    pub immutability: ImmutabilityConfig,
}

/// Raw provider/boot-type strings; validated by the bootloader dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootloaderConfig {
    pub provider: String,
    pub boot_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelConfig {
    pub cmdline: String,
    /// Space separated driver modules added to the initramfs.
    pub enable_extra_modules: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImmutabilityConfig {
    pub enabled: bool,
    pub secure_boot_db_key: Option<PathBuf>,
    pub secure_boot_db_crt: Option<PathBuf>,
    pub secure_boot_db_cer: Option<PathBuf>,
}

impl ImageTemplate {
    /// Load a template from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read image template {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse image template {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn image_name(&self) -> &str {
        &self.image.name
    }

    pub fn partitions(&self) -> &[PartitionInfo] {
        &self.disk.partitions
    }

    pub fn bootloader(&self) -> &BootloaderConfig {
        &self.system_config.bootloader
    }

    pub fn is_immutability_enabled(&self) -> bool {
        self.system_config.immutability.enabled
    }

    pub fn kernel_cmdline(&self) -> &str {
        &self.system_config.kernel.cmdline
    }

    pub fn extra_modules(&self) -> &str {
        self.system_config.kernel.enable_extra_modules.trim()
    }

    pub fn target_os(&self) -> &str {
        &self.target.os
    }

    pub fn system_config_name(&self) -> &str {
        &self.system_config.name
    }

    /// `<os>-<dist>-<arch>`, the per-target directory name under the work dir.
    pub fn provider_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.target.os, self.target.dist, self.target.arch
        )
    }

    pub fn secure_boot_key(&self) -> Option<&Path> {
        self.system_config.immutability.secure_boot_db_key.as_deref()
    }

    pub fn secure_boot_crt(&self) -> Option<&Path> {
        self.system_config.immutability.secure_boot_db_crt.as_deref()
    }

    pub fn secure_boot_cer(&self) -> Option<&Path> {
        self.system_config.immutability.secure_boot_db_cer.as_deref()
    }
}
