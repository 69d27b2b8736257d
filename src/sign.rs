//! Secure Boot signing of the UKI and the systemd-boot binary.
//!
//! Each binary is signed to a `.signed` sibling and renamed over the original.
//! A failure after an earlier binary was already signed is reported as is;
//! signed files are not rolled back.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

use crate::common::{copy_file_with_dirs, host_path, sha256_file};
use crate::process::{Cmd, Executor};
use crate::template::ImageTemplate;
use crate::uki::esp;

/// Certificate file name handed to downstream enrollment.
pub const DB_CERT_NAME: &str = "DB.cer";

/// Secure Boot DB key material. Only constructed when all three files exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningMaterial {
    pub key: PathBuf,
    pub cert: PathBuf,
    /// DER certificate for UEFI enrollment.
    pub uefi_cert: PathBuf,
}

impl SigningMaterial {
    /// Collect the template's signing material.
    ///
    /// Every entry is checked on its own so each missing file is reported;
    /// any gap yields None.
    pub fn from_template(template: &ImageTemplate) -> Option<Self> {
        let entries = [
            ("secure boot key", template.secure_boot_key()),
            ("secure boot certificate", template.secure_boot_crt()),
            ("secure boot UEFI certificate", template.secure_boot_cer()),
        ];

        let mut found = Vec::with_capacity(entries.len());
        for (label, path) in entries {
            match path {
                None => warn!("{} is not configured", label),
                Some(p) if !p.is_file() => warn!("{} file not found at {}", label, p.display()),
                Some(p) => found.push(p.to_path_buf()),
            }
        }

        match <[PathBuf; 3]>::try_from(found) {
            Ok([key, cert, uefi_cert]) => Some(Self {
                key,
                cert,
                uefi_cert,
            }),
            Err(_) => None,
        }
    }
}

pub struct SecureBootSigner<'a> {
    exec: &'a dyn Executor,
    work_dir: PathBuf,
}

impl<'a> SecureBootSigner<'a> {
    /// `work_dir` is the build working directory receiving the DB certificate.
    pub fn new(exec: &'a dyn Executor, work_dir: &Path) -> Self {
        Self {
            exec,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Where the UEFI certificate is copied for `template`.
    pub fn cert_destination(&self, template: &ImageTemplate) -> PathBuf {
        self.work_dir
            .join(template.provider_id())
            .join("imagebuild")
            .join(template.system_config_name())
            .join(DB_CERT_NAME)
    }

    /// Sign the UKI and the boot stub.
    ///
    /// No-op unless immutability is enabled and all signing material exists.
    pub fn sign_image(&self, install_root: &Path, template: &ImageTemplate) -> Result<()> {
        if !template.is_immutability_enabled() {
            return Ok(());
        }
        let Some(material) = SigningMaterial::from_template(template) else {
            info!("Secure Boot signing material incomplete, skipping signing");
            return Ok(());
        };

        let span = info_span!("signing", root = %install_root.display());
        let _enter = span.enter();

        let uki = host_path(install_root, esp::UKI_PATH);
        self.sign_in_place(&material, &uki).context("failed to sign UKI")?;
        info!("Signed UKI: {} (sha256 {})", uki.display(), sha256_file(&uki)?);

        let stub = host_path(install_root, esp::BOOT_STUB_PATH);
        self.sign_in_place(&material, &stub)
            .context("failed to sign bootloader")?;
        info!("Signed bootloader: {}", stub.display());

        let cert_dst = self.cert_destination(template);
        copy_file_with_dirs(&material.uefi_cert, &cert_dst)
            .context("failed to copy certificate file")?;
        info!("Secure Boot DB certificate: {}", cert_dst.display());
        Ok(())
    }

    fn sign_in_place(&self, material: &SigningMaterial, target: &Path) -> Result<()> {
        let mut signed = target.as_os_str().to_owned();
        signed.push(".signed");
        let signed = PathBuf::from(signed);

        Cmd::new("sbsign")
            .arg("--key")
            .arg_path(&material.key)
            .arg("--cert")
            .arg_path(&material.cert)
            .arg("--output")
            .arg_path(&signed)
            .arg_path(target)
            .run(self.exec)?;

        fs::rename(&signed, target).with_context(|| {
            format!("failed to replace {} with signed version", target.display())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn template_with(key: Option<PathBuf>, crt: Option<PathBuf>, cer: Option<PathBuf>) -> ImageTemplate {
        let mut t = ImageTemplate::default();
        t.system_config.immutability.enabled = true;
        t.system_config.immutability.secure_boot_db_key = key;
        t.system_config.immutability.secure_boot_db_crt = crt;
        t.system_config.immutability.secure_boot_db_cer = cer;
        t
    }

    #[test]
    fn test_material_requires_all_three() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("db.key");
        let crt = dir.path().join("db.crt");
        let cer = dir.path().join("db.cer");
        fs::write(&key, b"k").unwrap();
        fs::write(&crt, b"c").unwrap();

        let t = template_with(Some(key.clone()), Some(crt.clone()), Some(cer.clone()));
        assert!(SigningMaterial::from_template(&t).is_none());

        fs::write(&cer, b"d").unwrap();
        let m = SigningMaterial::from_template(&t).unwrap();
        assert_eq!(m.key, key);
        assert_eq!(m.cert, crt);
        assert_eq!(m.uefi_cert, cer);
    }

    #[test]
    fn test_material_unset_path() {
        let t = template_with(None, None, None);
        assert!(SigningMaterial::from_template(&t).is_none());
    }

    #[test]
    fn test_cert_destination() {
        let mut t = ImageTemplate::default();
        t.target.os = "emt".into();
        t.target.dist = "3".into();
        t.target.arch = "x86_64".into();
        t.system_config.name = "edge".into();
        let exec = crate::process::HostExecutor;
        let signer = SecureBootSigner::new(&exec, Path::new("/work"));
        assert_eq!(
            signer.cert_destination(&t),
            PathBuf::from("/work/emt-3-x86_64/imagebuild/edge/DB.cer")
        );
    }
}
