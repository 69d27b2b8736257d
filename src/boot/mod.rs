//! Bootloader installation.
//!
//! The provider and boot type from the template select one route from
//! [`DISPATCH`]. The route is chosen before anything is resolved or written,
//! so rejected combinations leave the install root untouched.
//!
//! | provider     | efi                 | legacy                  |
//! |--------------|---------------------|-------------------------|
//! | grub         | grub.cfg + mkconfig | not implemented         |
//! | systemd-boot | cmdline.conf        | rejected (EFI only)     |

pub mod grub;
pub mod params;
pub mod systemd_boot;

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, info_span, warn};

use crate::blkid::BlockDevices;
use crate::common::host_path;
use crate::error::ConfigError;
use crate::partition::{BootContext, PartitionMap, PartitionResolver};
use crate::process::Executor;
use crate::template::ImageTemplate;

use params::boot_param_values;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Grub,
    SystemdBoot,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Grub => "grub",
            Provider::SystemdBoot => "systemd-boot",
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grub" => Ok(Provider::Grub),
            "systemd-boot" => Ok(Provider::SystemdBoot),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootType {
    Efi,
    Legacy,
}

impl FromStr for BootType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "efi" => Ok(BootType::Efi),
            "legacy" => Ok(BootType::Legacy),
            other => Err(ConfigError::UnsupportedBootType(other.to_string())),
        }
    }
}

/// An installable bootloader setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    GrubEfi,
    SystemdBootEfi,
}

/// What a provider/boot-type combination does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Install(Target),
    LegacyNotImplemented,
    EfiOnly,
}

/// Every provider/boot-type combination. New providers add rows here.
pub const DISPATCH: [(Provider, BootType, Route); 4] = [
    (Provider::Grub, BootType::Efi, Route::Install(Target::GrubEfi)),
    (Provider::Grub, BootType::Legacy, Route::LegacyNotImplemented),
    (Provider::SystemdBoot, BootType::Efi, Route::Install(Target::SystemdBootEfi)),
    (Provider::SystemdBoot, BootType::Legacy, Route::EfiOnly),
];

/// Look up the installable target for the template's bootloader settings.
pub fn dispatch(provider: &str, boot_type: &str) -> Result<Target> {
    let provider: Provider = provider.parse()?;
    let boot_type: BootType = boot_type.parse()?;

    let route = DISPATCH
        .iter()
        .find(|(p, b, _)| *p == provider && *b == boot_type)
        .map(|(_, _, r)| *r)
        .ok_or_else(|| ConfigError::UnsupportedProvider(provider.to_string()))?;

    match route {
        Route::Install(target) => Ok(target),
        Route::LegacyNotImplemented => Err(ConfigError::LegacyBootNotImplemented.into()),
        Route::EfiOnly => Err(ConfigError::SystemdBootEfiOnly.into()),
    }
}

pub struct BootloaderInstaller<'a> {
    exec: &'a dyn Executor,
    blk: &'a dyn BlockDevices,
    assets: PathBuf,
}

impl<'a> BootloaderInstaller<'a> {
    /// `assets` is the config-asset directory holding `image/...` templates.
    pub fn new(exec: &'a dyn Executor, blk: &'a dyn BlockDevices, assets: &Path) -> Self {
        Self {
            exec,
            blk,
            assets: assets.to_path_buf(),
        }
    }

    /// Install and configure the bootloader for `template`.
    ///
    /// Not idempotent: grub.cfg ends up read-only.
    pub fn install_image_boot(
        &self,
        install_root: &Path,
        devices: &PartitionMap,
        template: &ImageTemplate,
    ) -> Result<BootContext> {
        let span = info_span!("boot_install", root = %install_root.display());
        let _enter = span.enter();

        info!("Installing image bootloader for: {}", template.image_name());

        let bootloader = template.bootloader();
        let target = dispatch(&bootloader.provider, &bootloader.boot_type)?;

        let immutable = template.is_immutability_enabled();
        let resolver = PartitionResolver::new(template, devices);
        let ctx = resolver.boot_context(self.blk, immutable)?;

        match target {
            Target::GrubEfi => self.install_grub_efi(install_root, &ctx, template)?,
            Target::SystemdBootEfi => self.install_systemd_boot(install_root, &ctx, template)?,
        }

        Ok(ctx)
    }

    fn install_grub_efi(
        &self,
        install_root: &Path,
        ctx: &BootContext,
        template: &ImageTemplate,
    ) -> Result<()> {
        grub::install_efi_config(&self.assets, install_root, ctx)
            .context("failed to install GRUB bootloader with EFI mode")?;

        if template.is_immutability_enabled() {
            warn!("grub does not embed dm-verity arguments; only the root device is switched to the verity mapping");
        }
        let values = boot_param_values(ctx, template.is_immutability_enabled(), None, template.kernel_cmdline());
        values
            .render_to(
                &self.assets.join(grub::DEFAULT_GRUB_ASSET),
                &host_path(install_root, grub::DEFAULT_GRUB),
            )
            .context("failed to update boot configuration")?;

        grub::install_grubenv(&self.assets, install_root)?;
        grub::regenerate_config(self.exec, install_root)
    }

    fn install_systemd_boot(
        &self,
        install_root: &Path,
        ctx: &BootContext,
        template: &ImageTemplate,
    ) -> Result<()> {
        info!("Installing systemd-boot bootloader");

        let values = boot_param_values(
            ctx,
            template.is_immutability_enabled(),
            ctx.verity.as_ref(),
            template.kernel_cmdline(),
        );
        values
            .render_to(
                &self.assets.join(systemd_boot::BOOT_PARAMS_ASSET),
                &systemd_boot::cmdline_path(install_root),
            )
            .context("failed to update boot configuration")
    }
}
