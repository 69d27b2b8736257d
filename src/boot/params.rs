//! Boot configuration templating.
//!
//! Asset files carry `{{.Name}}` placeholders. Substitution is a single pass
//! over the asset text, so substituted values are inserted verbatim and never
//! rescanned. An asset placeholder with no value is rejected instead of being
//! written.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::common::write_file_with_dirs;
use crate::error::ConfigError;
use crate::partition::{BootContext, VerityTarget};

/// Boot-time root device when the root is protected by dm-verity.
pub const VERITY_ROOT_DEVICE: &str = "/dev/mapper/root";

/// Initramfs auto-assembly switch, always enabled.
pub const RD_AUTO: &str = "rd.auto=1";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.?([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder pattern"))
}

/// Placeholders still present in `text`, in order of appearance.
pub fn unsubstituted(text: &str) -> Vec<String> {
    placeholder_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Boot-parameter fields for features that are not supported yet.
///
/// The shared boot-parameter template format carries them, so they are
/// always rendered, currently as empty strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedHook {
    LuksUuid,
    Lvm,
    ImaPolicy,
    SeLinux,
    Fips,
    CGroup,
    EncryptionBootUuid,
}

impl ReservedHook {
    pub const ALL: [ReservedHook; 7] = [
        ReservedHook::LuksUuid,
        ReservedHook::Lvm,
        ReservedHook::ImaPolicy,
        ReservedHook::SeLinux,
        ReservedHook::Fips,
        ReservedHook::CGroup,
        ReservedHook::EncryptionBootUuid,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ReservedHook::LuksUuid => "LuksUUID",
            ReservedHook::Lvm => "LVM",
            ReservedHook::ImaPolicy => "IMAPolicy",
            ReservedHook::SeLinux => "SELinux",
            ReservedHook::Fips => "FIPS",
            ReservedHook::CGroup => "CGroup",
            ReservedHook::EncryptionBootUuid => "EncryptionBootUUID",
        }
    }

    /// Rendered value. Not yet supported, so always empty.
    pub fn value(&self) -> &'static str {
        ""
    }
}

/// An ordered set of placeholder substitutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValues {
    values: Vec<(String, String)>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `{{.key}}` to `value`, replacing an earlier value for the same key.
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.values.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    /// Substitute every known placeholder in `text`.
    pub fn apply(&self, text: &str) -> String {
        self.substitute(text).0
    }

    /// Substituted text plus the placeholders of `text` that have no value.
    fn substitute(&self, text: &str) -> (String, Vec<String>) {
        let mut unknown = Vec::new();
        let rendered = placeholder_regex().replace_all(text, |caps: &Captures| {
            match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => {
                    unknown.push(caps[0].to_string());
                    caps[0].to_string()
                }
            }
        });
        (rendered.into_owned(), unknown)
    }

    /// Render the asset at `src` into `dst`.
    ///
    /// Nothing is written if a placeholder in the asset has no value.
    pub fn render_to(&self, src: &Path, dst: &Path) -> Result<()> {
        let text = fs::read_to_string(src)
            .with_context(|| format!("failed to read boot configuration asset {}", src.display()))?;
        let (rendered, leftover) = self.substitute(&text);

        if !leftover.is_empty() {
            return Err(ConfigError::UnsubstitutedPlaceholder {
                path: dst.to_path_buf(),
                placeholders: leftover.join(", "),
            }
            .into());
        }

        write_file_with_dirs(dst, rendered)
            .with_context(|| format!("failed to write boot configuration {}", dst.display()))
    }
}

/// Values for the grub EFI configuration (`grub.cfg`).
pub fn grub_cfg_values(ctx: &BootContext) -> TemplateValues {
    TemplateValues::new()
        .set("BootUUID", &ctx.boot_uuid)
        // Disk encryption is not supported, so grub never unlocks a volume.
        .set("CryptoMountCommand", "")
        .set("PrefixPath", format!("{}/grub2", ctx.boot_prefix))
}

/// Values for the kernel boot-parameter file (`/etc/default/grub` or `/boot/cmdline.conf`).
///
/// With `immutable`, the root is the verity-mapped device. The verity
/// arguments and the root-hash placeholder are only rendered when a
/// `verity` target is given.
pub fn boot_param_values(
    ctx: &BootContext,
    immutable: bool,
    verity: Option<&VerityTarget>,
    extra_cmdline: &str,
) -> TemplateValues {
    let root_partition = if immutable {
        VERITY_ROOT_DEVICE.to_string()
    } else {
        ctx.root_dev_id.clone()
    };

    let (systemd_verity, root_hash) = match verity {
        Some(v) if immutable => (verity_args(&ctx.root_dev_id, &v.hash_dev_id), v.placeholder.token()),
        _ => (String::new(), String::new()),
    };

    let mut values = TemplateValues::new()
        .set("BootUUID", &ctx.boot_uuid)
        .set("BootPrefix", &ctx.boot_prefix)
        .set("RootPartition", root_partition)
        .set("SystemdVerity", systemd_verity)
        .set("RootHash", root_hash)
        .set("ExtraCommandLine", extra_cmdline)
        .set("rdAuto", RD_AUTO);

    for hook in ReservedHook::ALL {
        values = values.set(hook.key(), hook.value());
    }
    values
}

/// systemd-veritysetup generator arguments for the root device pair.
pub fn verity_args(root_dev_id: &str, hash_dev_id: &str) -> String {
    format!(
        "systemd.verity_name=root systemd.verity_root_data={} systemd.verity_root_hash={}",
        root_dev_id, hash_dev_id
    )
}
