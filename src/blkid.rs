//! Block-device identity lookups (filesystem UUID and partition PARTUUID).
//!
//! Failures here are structural (a missing or unformatted partition), so
//! nothing is retried; the error names the device.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::process::{Cmd, Executor};

/// Stable identifiers of a block device.
pub trait BlockDevices {
    /// Filesystem UUID of `device`.
    fn uuid(&self, device: &Path) -> Result<String>;
    /// Partition-table UUID of `device`.
    fn part_uuid(&self, device: &Path) -> Result<String>;
}

/// [`BlockDevices`] backed by `blkid`.
pub struct Blkid<'a> {
    exec: &'a dyn Executor,
}

impl<'a> Blkid<'a> {
    pub fn new(exec: &'a dyn Executor) -> Self {
        Self { exec }
    }

    fn query(&self, device: &Path, tag: &str) -> Result<String> {
        let result = Cmd::new("blkid")
            .arg_path(device)
            .args(["-s", tag, "-o", "value"])
            .run(self.exec)
            .with_context(|| format!("failed to get {} for {}", tag, device.display()))?;

        let value = result.stdout_trimmed();
        if value.is_empty() {
            bail!("blkid reported no {} for {}", tag, device.display());
        }
        Ok(value.to_string())
    }
}

impl BlockDevices for Blkid<'_> {
    fn uuid(&self, device: &Path) -> Result<String> {
        self.query(device, "UUID")
    }

    fn part_uuid(&self, device: &Path) -> Result<String> {
        self.query(device, "PARTUUID")
    }
}

/// `PARTUUID=<id>` reference for kernel command lines and fstab.
pub fn partuuid_ref(part_uuid: &str) -> String {
    format!("PARTUUID={}", part_uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partuuid_ref() {
        assert_eq!(partuuid_ref("1234-abcd"), "PARTUUID=1234-abcd");
    }
}
