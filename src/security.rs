//! Writable overlay on top of a read-only (dm-verity) root.
//!
//! `/etc` becomes an overlayfs whose upper layer lives under `/opt/overlay`;
//! the other overlay directories are bind mounts of `/opt/<dir>`. `/opt`
//! itself is expected to be a separate writable partition (`opt.mount`).

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, info_span};

use crate::common::{append_to_file, host_path, write_file_mode, write_file_with_dirs};
use crate::fstab::FSTAB;
use crate::process::{Cmd, Executor};
use crate::template::ImageTemplate;

/// Directories that stay writable on an immutable image.
pub const OVERLAY_DIRS: [&str; 3] = ["/etc", "/home", "/var"];

const ETC: &str = "/etc";
const ETC_UPPER: &str = "/opt/overlay/etc/upper";
const ETC_WORK: &str = "/opt/overlay/etc/work";
const ETC_LOWER: &str = "/ro/etc";

pub const OVERLAY_SCRIPT: &str = "/usr/local/bin/setup-overlay.sh";
pub const OVERLAY_SERVICE: &str = "/etc/systemd/system/setup-overlay.service";
const OVERLAY_SERVICE_NAME: &str = "setup-overlay.service";

const OVERLAY_UNIT: &str = "\
[Unit]
Description=Set up OverlayFS for /etc
Requires=opt.mount
After=opt.mount

[Service]
Type=oneshot
ExecStart=/usr/local/bin/setup-overlay.sh
RemainAfterExit=true

[Install]
WantedBy=multi-user.target
";

/// Persistent directories bind-mounted from `/opt`.
fn bind_dirs() -> impl Iterator<Item = &'static str> {
    OVERLAY_DIRS.into_iter().filter(|d| *d != ETC)
}

fn opt_path(dir: &str) -> String {
    format!("/opt/{}", dir.trim_start_matches('/'))
}

/// Lines appended to `/etc/fstab`.
pub fn fstab_lines() -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "tmpfs /tmp tmpfs mode=1777,nosuid,nodev 0 0".to_string(),
        "tmpfs /run tmpfs mode=0755,nosuid,nodev 0 0".to_string(),
    ];
    lines.extend(bind_dirs().map(|d| format!("{} {} none bind 0 0", opt_path(d), d)));
    lines
}

/// Boot-time script assembling the overlays.
pub fn overlay_script() -> String {
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        String::new(),
    ];
    for required in [ETC_UPPER, ETC_LOWER] {
        lines.push(format!("if [ ! -d {} ]; then", required));
        lines.push(format!("    echo \"Missing {}\"", required));
        lines.push("    exit 1".to_string());
        lines.push("fi".to_string());
        lines.push(String::new());
    }
    lines.push("# Bind mount rootfs /etc to lowerdir".to_string());
    lines.push(format!("mount --bind {} {}", ETC, ETC_LOWER));
    lines.push(String::new());
    lines.push("# Mount overlay".to_string());
    lines.push(format!(
        "mount -t overlay overlay -o lowerdir={},upperdir={},workdir={} {}",
        ETC_LOWER, ETC_UPPER, ETC_WORK, ETC
    ));
    lines.push(String::new());
    lines.push("# Bind-mount persistent directories".to_string());
    lines.extend(bind_dirs().map(|d| format!("mount --bind {} {}", opt_path(d), d)));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Configure the overlay root. No-op unless immutability is enabled.
pub fn config_image_security(
    exec: &dyn Executor,
    install_root: &Path,
    template: &ImageTemplate,
) -> Result<()> {
    if !template.is_immutability_enabled() {
        return Ok(());
    }

    let span = info_span!("image_security", root = %install_root.display());
    let _enter = span.enter();
    info!("Configuring overlay for read-only root filesystem");

    prepare_overlay_dirs(install_root).context("failed to prepare overlay directories")?;

    let mut fstab = fstab_lines().join("\n");
    fstab.push('\n');
    append_to_file(host_path(install_root, FSTAB), fstab).context("failed to update fstab")?;
    debug!("Updated fstab with overlay settings");

    write_file_mode(host_path(install_root, OVERLAY_SCRIPT), overlay_script(), 0o755)
        .context("failed to write overlay mounting script")?;
    write_file_with_dirs(host_path(install_root, OVERLAY_SERVICE), OVERLAY_UNIT)
        .context("failed to write overlay mounting service")?;

    Cmd::new("systemctl")
        .args(["enable", OVERLAY_SERVICE_NAME])
        .in_chroot(install_root)
        .error_msg("failed to enable overlay mounting service")
        .run(exec)?;

    info!("Overlay root configured");
    Ok(())
}

fn prepare_overlay_dirs(install_root: &Path) -> Result<()> {
    let mut dirs: Vec<String> = vec![ETC_UPPER.into(), ETC_WORK.into(), ETC_LOWER.into()];
    dirs.extend(bind_dirs().map(opt_path));

    for dir in dirs {
        let path = host_path(install_root, &dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }
    Ok(())
}
