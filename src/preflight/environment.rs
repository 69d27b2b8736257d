//! Environment checks (boot assets, work directory).

use std::fs;
use std::path::Path;

use crate::boot::{grub, systemd_boot};
use crate::config::Config;

use super::{Check, Outcome};

/// Check the config-asset directory and the work directory.
pub fn check_environment(config: &Config) -> Vec<Check> {
    let mut checks: Vec<Check> = [
        grub::GRUB_CFG_ASSET,
        grub::DEFAULT_GRUB_ASSET,
        grub::GRUBENV_ASSET,
        systemd_boot::BOOT_PARAMS_ASSET,
    ]
    .into_iter()
    .map(|asset| {
        let path = config.config_dir.join(asset);
        if path.is_file() {
            Check::new(asset, Outcome::Ready, path.display().to_string())
        } else {
            Check::new(asset, Outcome::Blocking, format!("no boot asset at {}", path.display()))
        }
    })
    .collect();

    checks.push(check_work_dir(&config.work_dir));
    checks
}

fn check_work_dir(work_dir: &Path) -> Check {
    const NAME: &str = "work dir";

    if let Err(e) = fs::create_dir_all(work_dir) {
        return Check::new(NAME, Outcome::Blocking, format!("cannot create {}: {}", work_dir.display(), e));
    }
    let marker = work_dir.join(".preflight-test");
    match fs::write(&marker, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            Check::new(NAME, Outcome::Ready, work_dir.display().to_string())
        }
        Err(e) => Check::new(NAME, Outcome::Blocking, format!("cannot write to {}: {}", work_dir.display(), e)),
    }
}
