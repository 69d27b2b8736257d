//! Single-operation commands against an already mounted install root.

use anyhow::Result;
use std::path::Path;

use imgboot::blkid::Blkid;
use imgboot::boot::BootloaderInstaller;
use imgboot::config::Config;
use imgboot::partition::PartitionMap;
use imgboot::process::HostExecutor;
use imgboot::security::config_image_security;
use imgboot::sign::SecureBootSigner;
use imgboot::uki::VerityUkiBuilder;

use super::load_inputs;

/// Install and configure the bootloader.
pub fn cmd_boot(
    config: &Config,
    install_root: &Path,
    template: &Path,
    devices: &PartitionMap,
) -> Result<()> {
    let template = load_inputs(install_root, template)?;
    let exec = HostExecutor;
    let blkid = Blkid::new(&exec);

    let ctx = BootloaderInstaller::new(&exec, &blkid, &config.config_dir)
        .install_image_boot(install_root, devices, &template)?;

    println!("Bootloader installed ({})", template.bootloader().provider);
    println!("  Boot device: {} (UUID {})", ctx.boot_device.display(), ctx.boot_uuid);
    println!("  Root:        {}", ctx.root_dev_id);
    if let Some(verity) = &ctx.verity {
        println!("  Verity hash: {}", verity.hash_dev_id);
    }
    Ok(())
}

/// Configure the overlay root for immutable images.
pub fn cmd_security(install_root: &Path, template: &Path) -> Result<()> {
    let template = load_inputs(install_root, template)?;
    if !template.is_immutability_enabled() {
        println!("Immutability disabled, nothing to do.");
        return Ok(());
    }
    config_image_security(&HostExecutor, install_root, &template)?;
    println!("Overlay root configured.");
    Ok(())
}

/// Build the UKI for systemd-boot images.
pub fn cmd_uki(install_root: &Path, template: &Path) -> Result<()> {
    let template = load_inputs(install_root, template)?;
    VerityUkiBuilder::new(&HostExecutor).build_image_uki(install_root, &template)?;
    println!("UKI step complete.");
    Ok(())
}

/// Secure Boot sign the UKI and boot stub.
pub fn cmd_sign(config: &Config, install_root: &Path, template: &Path) -> Result<()> {
    let template = load_inputs(install_root, template)?;
    let signer = SecureBootSigner::new(&HostExecutor, &config.work_dir);
    signer.sign_image(install_root, &template)?;
    println!("Signing step complete.");
    Ok(())
}
