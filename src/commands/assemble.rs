//! Assemble command - runs the whole boot pipeline.

use anyhow::Result;
use std::path::Path;

use imgboot::blkid::Blkid;
use imgboot::config::Config;
use imgboot::partition::PartitionMap;
use imgboot::pipeline::{ImageAssemblyPipeline, NoopInstaller, PackageInstaller, ShellInstaller};
use imgboot::process::HostExecutor;
use imgboot::timing::Timer;

use super::load_inputs;

/// Execute the assemble command.
pub fn cmd_assemble(
    config: &Config,
    install_root: &Path,
    template: &Path,
    devices: &PartitionMap,
    install_cmd: Option<&str>,
) -> Result<()> {
    let template = load_inputs(install_root, template)?;

    let exec = HostExecutor;
    let blkid = Blkid::new(&exec);
    let shell;
    let packages: &dyn PackageInstaller = match install_cmd {
        Some(cmd) => {
            shell = ShellInstaller::new(&exec, cmd);
            &shell
        }
        None => &NoopInstaller,
    };

    println!("=== Assembling {} ===", template.image_name());
    println!("  Install root: {}", install_root.display());
    println!("  Partitions:   {}", devices.len());

    let timer = Timer::start("assemble");
    ImageAssemblyPipeline::new(&exec, &blkid, packages, &config.config_dir, &config.work_dir)
        .assemble(install_root, devices, &template)?;
    let elapsed = timer.finish();

    println!(
        "\n=== Image assembled in {} ===",
        imgboot::timing::format_duration(elapsed)
    );
    Ok(())
}
