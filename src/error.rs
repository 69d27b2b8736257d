//! Error taxonomy shared by the boot pipeline.
//!
//! External-tool failures stay plain `anyhow` errors carrying command context.
//! Configuration errors get a typed [`ConfigError`] so callers can tell a bad
//! template apart from a failing tool.

use anyhow::Error;
use std::fmt;
use std::path::PathBuf;

/// Structural problems with the template or the partition map. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("install root does not exist: {0}")]
    InstallRootMissing(PathBuf),

    #[error("failed to find root partition for mount point '/'")]
    RootPartitionNotFound,

    #[error("hash partition not found: immutability requires a dm-verity hash partition (mountpoint 'none')")]
    HashPartitionNotFound,

    #[error("no mountable partitions found for the provided partition map")]
    NoMountablePartitions,

    #[error("unsupported bootloader provider: {0}")]
    UnsupportedProvider(String),

    #[error("unsupported boot type: {0}")]
    UnsupportedBootType(String),

    #[error("grub legacy boot mode is not implemented yet")]
    LegacyBootNotImplemented,

    #[error("systemd-boot is only supported in EFI mode")]
    SystemdBootEfiOnly,

    #[error("boot configuration {path} still contains unsubstituted placeholder(s): {placeholders}")]
    UnsubstitutedPlaceholder { path: PathBuf, placeholders: String },

    #[error("kernel image (vmlinuz-*) not found in {0}")]
    KernelNotFound(PathBuf),

    #[error("kernel command line has no roothash= placeholder but immutability is enabled")]
    RootHashPlaceholderMissing,

    #[error("kernel command line still carries a roothash= placeholder but immutability is disabled")]
    UnexpectedRootHashPlaceholder,
}

/// Named pipeline stage, used as the one-line description on every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Mount,
    Packages,
    Fstab,
    BootInstall,
    Security,
    UkiBuild,
    Signing,
    Unmount,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "partition resolution",
            Stage::Mount => "mount",
            Stage::Packages => "package installation",
            Stage::Fstab => "fstab update",
            Stage::BootInstall => "boot install",
            Stage::Security => "image security",
            Stage::UkiBuild => "UKI build",
            Stage::Signing => "signing",
            Stage::Unmount => "unmount",
        }
    }

    /// Wrap `err` with this stage's name.
    pub fn wrap(self, err: Error) -> Error {
        err.context(format!("{} stage failed", self))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation failed and releasing its resources failed too.
///
/// Displays the original error first; the cleanup failures are appended.
#[derive(Debug)]
pub struct CleanupFailed {
    original: Error,
    cleanup: Vec<Error>,
}

impl CleanupFailed {
    pub fn original(&self) -> &Error {
        &self.original
    }

    pub fn cleanup_errors(&self) -> &[Error] {
        &self.cleanup
    }
}

impl fmt::Display for CleanupFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}; cleanup errors: ", self.original)?;
        for (i, err) in self.cleanup.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{:#}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let original: &(dyn std::error::Error + 'static) = &*self.original;
        Some(original)
    }
}

/// Attach cleanup failures to `original` without replacing it.
pub fn with_cleanup_errors(original: Error, cleanup: Vec<Error>) -> Error {
    if cleanup.is_empty() {
        original
    } else {
        Error::new(CleanupFailed { original, cleanup })
    }
}

/// Fold several release failures into a single error.
pub fn combine(mut errors: Vec<Error>) -> Option<Error> {
    match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => {
            let first = errors.remove(0);
            Some(with_cleanup_errors(first, errors))
        }
    }
}

/// Find the [`ConfigError`] anywhere in an error chain.
pub fn config_error(err: &Error) -> Option<&ConfigError> {
    err.chain().find_map(|e| e.downcast_ref::<ConfigError>())
}
