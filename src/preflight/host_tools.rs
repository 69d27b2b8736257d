//! Host tool availability checks.

use crate::process;

use super::{Check, Outcome};

/// Tools the pipeline cannot run without: (tool, package, purpose).
pub const REQUIRED_TOOLS: [(&str, &str, &str); 4] = [
    ("mount", "util-linux", "Required to mount image partitions"),
    ("umount", "util-linux", "Required to release image partitions"),
    ("chroot", "coreutils", "Required to run tools inside the image"),
    ("blkid", "util-linux", "Required to look up partition UUIDs"),
];

/// Tools only some configurations need.
pub const OPTIONAL_TOOLS: [(&str, &str, &str); 3] = [
    ("veritysetup", "cryptsetup", "Required for immutable images when the image lacks ukify"),
    ("ukify", "systemd-ukify", "Required for systemd-boot images when the image lacks ukify"),
    ("sbsign", "sbsigntools", "Required to Secure Boot sign immutable images"),
];

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<Check> {
    let required = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, true));
    let optional = OPTIONAL_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, false));
    required.chain(optional).collect()
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> Check {
    match process::which(tool) {
        Some(path) => Check::new(tool, Outcome::Ready, path),
        None => {
            let outcome = if required {
                Outcome::Blocking
            } else {
                Outcome::Advisory
            };
            Check::new(
                tool,
                outcome,
                format!("not found, install '{}'. {}", package, purpose),
            )
        }
    }
}
