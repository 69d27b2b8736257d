//! Unified Kernel Image build for systemd-boot images.
//!
//! Steps, each depending on the previous one:
//! 1. find the installed kernel
//! 2. rebuild its initramfs
//! 3. reset the ESP layout
//! 4. with immutability, compute the dm-verity root hash and resolve the
//!    command line (inside scoped tmpfs scratch space)
//! 5. run ukify
//! 6. install the systemd-boot binary at the firmware fallback path

pub mod esp;
pub mod initramfs;
pub mod kernel;
pub mod scratch;
pub mod verity;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, info_span};

use crate::boot::{systemd_boot, Provider};
use crate::cmdline::{ResolvedCmdline, RootHashPlaceholder, UnresolvedCmdline};
use crate::common::{host_path, sha256_file};
use crate::error::{with_cleanup_errors, ConfigError};
use crate::process::{exists_in_root, Cmd, Executor};
use crate::template::ImageTemplate;

use initramfs::InitramfsOptions;
use kernel::InstalledKernel;
use scratch::ScratchMounts;

const UKIFY: &str = "ukify";
const OS_RELEASE: &str = "/etc/os-release";

/// Where ukify runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolLocation {
    /// Inside the image, with image paths.
    Image,
    /// On the build host, with host paths.
    Host,
}

pub struct VerityUkiBuilder<'a> {
    exec: &'a dyn Executor,
}

impl<'a> VerityUkiBuilder<'a> {
    pub fn new(exec: &'a dyn Executor) -> Self {
        Self { exec }
    }

    /// Build `/boot/efi/EFI/Linux/linux.efi`. No-op unless the provider is systemd-boot.
    pub fn build_image_uki(&self, install_root: &Path, template: &ImageTemplate) -> Result<()> {
        if template.bootloader().provider != Provider::SystemdBoot.as_str() {
            info!(
                "Skipping UKI build for bootloader provider '{}'",
                template.bootloader().provider
            );
            return Ok(());
        }

        let span = info_span!("uki_build", root = %install_root.display());
        let _enter = span.enter();

        let kernel = kernel::find_kernel(install_root)?;
        info!("Building UKI for kernel {}", kernel.version);

        let opts = InitramfsOptions {
            immutable: template.is_immutability_enabled(),
            target_os: template.target_os(),
            extra_drivers: template.extra_modules(),
        };
        initramfs::rebuild(self.exec, install_root, &kernel, &opts)?;

        esp::prepare(install_root).context("failed to prepare ESP directories")?;

        let cmdline = UnresolvedCmdline::read(&systemd_boot::cmdline_path(install_root))?;
        let location = if exists_in_root(self.exec, install_root, UKIFY) {
            ToolLocation::Image
        } else {
            info!("ukify not found in image, running it from the host");
            ToolLocation::Host
        };

        if template.is_immutability_enabled() {
            self.build_verity_uki(install_root, &kernel, cmdline, location)?;
        } else {
            let resolved = cmdline.into_resolved()?;
            self.run_ukify(install_root, &kernel, &resolved, location, false)
                .context("failed to build UKI")?;
        }

        let uki = host_path(install_root, esp::UKI_PATH);
        info!("UKI built: {} (sha256 {})", uki.display(), sha256_file(&uki)?);

        esp::install_boot_stub(install_root)?;
        Ok(())
    }

    /// Resolve the root hash and run ukify inside tmpfs scratch space.
    ///
    /// The scratch mounts are released whether or not the build succeeds.
    fn build_verity_uki(
        &self,
        install_root: &Path,
        kernel: &InstalledKernel,
        cmdline: UnresolvedCmdline,
        location: ToolLocation,
    ) -> Result<()> {
        let devices = cmdline
            .placeholder()
            .ok_or(ConfigError::RootHashPlaceholderMissing)?;

        verity::remount_read_only(self.exec, install_root, devices.data_device())?;

        let scratch = ScratchMounts::acquire(self.exec, install_root)?;

        let built = self.hash_and_build(install_root, kernel, cmdline, &devices, location);

        match (built, scratch.release()) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => Err(with_cleanup_errors(err, vec![cleanup])),
        }
    }

    fn hash_and_build(
        &self,
        install_root: &Path,
        kernel: &InstalledKernel,
        cmdline: UnresolvedCmdline,
        devices: &RootHashPlaceholder,
        location: ToolLocation,
    ) -> Result<()> {
        let chroot = match location {
            ToolLocation::Image => Some(install_root),
            ToolLocation::Host => None,
        };
        let hash = verity::format(self.exec, chroot, devices)?;
        info!("dm-verity root hash: {}", hash);

        let resolved = cmdline.resolve(&hash)?;
        self.run_ukify(install_root, kernel, &resolved, location, true)
            .context("failed to build UKI with veritysetup")
    }

    fn run_ukify(
        &self,
        install_root: &Path,
        kernel: &InstalledKernel,
        cmdline: &ResolvedCmdline,
        location: ToolLocation,
        use_scratch_tmp: bool,
    ) -> Result<()> {
        let initrd = kernel.initramfs_path();
        let mut cmd = Cmd::new(UKIFY).arg("build");

        cmd = match location {
            ToolLocation::Image => cmd
                .args(["--linux", kernel.image_path.as_str()])
                .args(["--initrd", initrd.as_str()])
                .args(["--cmdline", cmdline.as_str()])
                .args(["--output", esp::UKI_PATH])
                .in_chroot(install_root),
            ToolLocation::Host => {
                let os_release = format!("@{}", host_path(install_root, OS_RELEASE).display());
                cmd.arg("--linux")
                    .arg_path(&host_path(install_root, &kernel.image_path))
                    .arg("--initrd")
                    .arg_path(&host_path(install_root, &initrd))
                    .args(["--cmdline", cmdline.as_str()])
                    .args(["--os-release", os_release.as_str()])
                    .arg("--output")
                    .arg_path(&host_path(install_root, esp::UKI_PATH))
            }
        };
        if use_scratch_tmp {
            cmd = cmd.env("TMPDIR", "/tmp");
        }

        cmd.run(self.exec)?;
        Ok(())
    }
}
