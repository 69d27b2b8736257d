//! Image assembly: every boot pipeline stage around package installation.
//!
//! Partitions are mounted once; every later stage runs against the mounted
//! install root. Whatever happens after mounting, the partitions are
//! unmounted on the way out and unmount failures are appended to the
//! original error rather than replacing it.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

use crate::blkid::BlockDevices;
use crate::boot::{dispatch, BootloaderInstaller};
use crate::error::{with_cleanup_errors, Stage};
use crate::fstab::update_fstab;
use crate::mount::MountOrchestrator;
use crate::partition::{PartitionMap, PartitionResolver};
use crate::process::{Cmd, Executor};
use crate::security::config_image_security;
use crate::sign::SecureBootSigner;
use crate::template::ImageTemplate;
use crate::timing::Timer;
use crate::uki::VerityUkiBuilder;

/// Installs the image's packages into the mounted install root.
pub trait PackageInstaller {
    fn install(&self, install_root: &Path, template: &ImageTemplate) -> Result<()>;
}

/// For install roots whose content is already in place.
pub struct NoopInstaller;

impl PackageInstaller for NoopInstaller {
    fn install(&self, _install_root: &Path, _template: &ImageTemplate) -> Result<()> {
        info!("No package installer configured, using install root content as is");
        Ok(())
    }
}

/// Runs a host shell command with `INSTALL_ROOT` and `IMAGE_NAME` set.
pub struct ShellInstaller<'a> {
    exec: &'a dyn Executor,
    command: String,
}

impl<'a> ShellInstaller<'a> {
    pub fn new(exec: &'a dyn Executor, command: impl Into<String>) -> Self {
        Self {
            exec,
            command: command.into(),
        }
    }
}

impl PackageInstaller for ShellInstaller<'_> {
    fn install(&self, install_root: &Path, template: &ImageTemplate) -> Result<()> {
        info!("Installing packages: {}", self.command);
        Cmd::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("INSTALL_ROOT", install_root.to_string_lossy())
            .env("IMAGE_NAME", template.image_name())
            .error_msg("package installation command failed")
            .run(self.exec)?;
        Ok(())
    }
}

pub struct ImageAssemblyPipeline<'a> {
    exec: &'a dyn Executor,
    blk: &'a dyn BlockDevices,
    packages: &'a dyn PackageInstaller,
    config_dir: PathBuf,
    work_dir: PathBuf,
}

impl<'a> ImageAssemblyPipeline<'a> {
    pub fn new(
        exec: &'a dyn Executor,
        blk: &'a dyn BlockDevices,
        packages: &'a dyn PackageInstaller,
        config_dir: &Path,
        work_dir: &Path,
    ) -> Self {
        Self {
            exec,
            blk,
            packages,
            config_dir: config_dir.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Produce a bootable image in `install_root`.
    pub fn assemble(
        &self,
        install_root: &Path,
        devices: &PartitionMap,
        template: &ImageTemplate,
    ) -> Result<()> {
        let span = info_span!("assemble", image = %template.image_name(), root = %install_root.display());
        let _enter = span.enter();

        let resolver = PartitionResolver::new(template, devices);
        check_required_partitions(&resolver, template).map_err(|e| Stage::Resolve.wrap(e))?;

        let timer = Timer::start(Stage::Mount.as_str());
        let mounts = MountOrchestrator::new(self.exec)
            .mount_all(install_root, resolver.partitions())
            .map_err(|e| Stage::Mount.wrap(e))?;
        timer.finish();

        let result = self.run_stages(install_root, devices, template, &resolver);

        let unmounted = mounts.unmount_all().map_err(|e| Stage::Unmount.wrap(e));
        match (result, unmounted) {
            (Ok(()), Ok(())) => {
                info!("Image assembled: {}", template.image_name());
                Ok(())
            }
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => Err(with_cleanup_errors(err, vec![cleanup])),
        }
    }

    fn run_stages(
        &self,
        install_root: &Path,
        devices: &PartitionMap,
        template: &ImageTemplate,
        resolver: &PartitionResolver,
    ) -> Result<()> {
        stage(Stage::Packages, || self.packages.install(install_root, template))?;
        stage(Stage::Fstab, || update_fstab(self.blk, install_root, resolver.partitions()))?;
        stage(Stage::BootInstall, || {
            BootloaderInstaller::new(self.exec, self.blk, &self.config_dir)
                .install_image_boot(install_root, devices, template)
                .map(|_| ())
        })?;
        stage(Stage::Security, || config_image_security(self.exec, install_root, template))?;
        stage(Stage::UkiBuild, || {
            VerityUkiBuilder::new(self.exec).build_image_uki(install_root, template)
        })?;
        stage(Stage::Signing, || {
            SecureBootSigner::new(self.exec, &self.work_dir).sign_image(install_root, template)
        })
    }
}

/// Run one stage with timing and its name attached to any error.
fn stage(name: Stage, f: impl FnOnce() -> Result<()>) -> Result<()> {
    info!("Stage: {}", name);
    let timer = Timer::start(name.as_str());
    f().map_err(|e| name.wrap(e))?;
    timer.finish();
    Ok(())
}

/// Fail before anything is mounted if a required partition is missing or the
/// bootloader settings cannot be installed.
fn check_required_partitions(resolver: &PartitionResolver, template: &ImageTemplate) -> Result<()> {
    let bootloader = template.bootloader();
    dispatch(&bootloader.provider, &bootloader.boot_type)?;
    resolver.root_device()?;
    if template.is_immutability_enabled() {
        resolver.hash_device()?;
    }
    Ok(())
}
