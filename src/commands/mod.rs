//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `assemble` - Run the whole boot pipeline
//! - `stage` - Run one exposed operation against a mounted install root
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod assemble;
mod preflight;
pub mod show;
pub mod stage;

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use imgboot::partition::PartitionMap;
use imgboot::template::ImageTemplate;

pub use assemble::cmd_assemble;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use stage::{cmd_boot, cmd_security, cmd_sign, cmd_uki};

/// Parse one `--partition ID=DEVICE` argument.
pub fn parse_partition(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((id, dev)) if !id.is_empty() && dev.starts_with('/') => {
            Ok((id.to_string(), PathBuf::from(dev)))
        }
        _ => Err(format!("expected ID=/dev/DEVICE, got '{}'", arg)),
    }
}

/// Build the partition map, rejecting duplicate ids.
pub fn partition_map(entries: Vec<(String, PathBuf)>) -> Result<PartitionMap> {
    let mut map = PartitionMap::new();
    for (id, dev) in entries {
        if let Some(previous) = map.insert(id.clone(), dev) {
            bail!(
                "partition '{}' given twice (first {})",
                id,
                previous.display()
            );
        }
    }
    Ok(map)
}

/// Load the template and check the install root exists.
fn load_inputs(install_root: &Path, template: &Path) -> Result<ImageTemplate> {
    if !install_root.is_dir() {
        bail!("Install root not found: {}", install_root.display());
    }
    ImageTemplate::load(template)
}
