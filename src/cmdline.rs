//! Two-phase kernel command line.
//!
//! When immutability is enabled the boot configuration is written before the
//! root filesystem content is final, so the dm-verity root hash is not known
//! yet. The command line then carries a structurally valid placeholder,
//! `roothash=<data-device>-<hash-device>`, that names the two devices the
//! hash will be computed from. After package installation the hash is
//! computed and the placeholder is replaced in place.
//!
//! [`UnresolvedCmdline`] and [`ResolvedCmdline`] keep those two states apart:
//! only a `ResolvedCmdline` can be handed to the UKI builder, and the only
//! ways to obtain one check the placeholder state.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::ConfigError;

pub const ROOT_HASH_KEY: &str = "roothash=";

fn root_hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)roothash=(\S*)").expect("valid roothash pattern"))
}

/// Byte range of the first `roothash=` token's value.
fn root_hash_value_range(cmdline: &str) -> Option<std::ops::Range<usize>> {
    root_hash_regex()
        .captures(cmdline)
        .and_then(|c| c.get(1))
        .map(|m| m.range())
}

/// Extract the `roothash=` value with dashes normalized to spaces.
///
/// `roothash=/dev/sda1-/dev/sda3` yields `"/dev/sda1 /dev/sda3"`. The
/// normalization is one way; [`substitute_root_hash`] writes values verbatim.
pub fn extract_root_hash(cmdline: &str) -> Option<String> {
    root_hash_value_range(cmdline).map(|r| cmdline[r].replace('-', " "))
}

/// Replace the `roothash=` value in place, leaving every other byte untouched.
///
/// Returns None if the command line has no `roothash=` token.
pub fn substitute_root_hash(cmdline: &str, value: &str) -> Option<String> {
    let range = root_hash_value_range(cmdline)?;
    let mut out = String::with_capacity(cmdline.len() + value.len());
    out.push_str(&cmdline[..range.start]);
    out.push_str(value);
    out.push_str(&cmdline[range.end..]);
    Some(out)
}

/// The data/hash device pair a verity root hash will be computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHashPlaceholder {
    data_device: PathBuf,
    hash_device: PathBuf,
}

impl RootHashPlaceholder {
    pub fn new(data_device: &Path, hash_device: &Path) -> Self {
        Self {
            data_device: data_device.to_path_buf(),
            hash_device: hash_device.to_path_buf(),
        }
    }

    /// Parse a raw placeholder value (`<data>-<hash>`).
    ///
    /// Both halves are absolute device paths, so the split point is the `-/`
    /// boundary; dashes inside a device name survive.
    pub fn parse(value: &str) -> Option<Self> {
        let (data, hash) = value.split_once("-/")?;
        if data.is_empty() || hash.is_empty() {
            return None;
        }
        Some(Self {
            data_device: PathBuf::from(data),
            hash_device: PathBuf::from(format!("/{}", hash)),
        })
    }

    pub fn data_device(&self) -> &Path {
        &self.data_device
    }

    pub fn hash_device(&self) -> &Path {
        &self.hash_device
    }

    /// The full `roothash=<data>-<hash>` token.
    pub fn token(&self) -> String {
        format!(
            "{}{}-{}",
            ROOT_HASH_KEY,
            self.data_device.display(),
            self.hash_device.display()
        )
    }
}

/// A computed dm-verity root hash (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHash(String);

impl RootHash {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid dm-verity root hash: '{}'", value);
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command line as written by the bootloader installer; may carry a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedCmdline {
    text: String,
}

impl UnresolvedCmdline {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read cmdline file {}", path.display()))?;
        Ok(Self::new(text))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn has_placeholder(&self) -> bool {
        root_hash_value_range(&self.text).is_some()
    }

    /// Devices named by the `roothash=` placeholder, if present and well formed.
    pub fn placeholder(&self) -> Option<RootHashPlaceholder> {
        let range = root_hash_value_range(&self.text)?;
        RootHashPlaceholder::parse(&self.text[range])
    }

    /// Replace the placeholder with the computed hash.
    pub fn resolve(self, hash: &RootHash) -> Result<ResolvedCmdline> {
        match substitute_root_hash(&self.text, hash.as_str()) {
            Some(text) => Ok(ResolvedCmdline::normalized(&text)),
            None => Err(ConfigError::RootHashPlaceholderMissing.into()),
        }
    }

    /// Accept the command line as final; fails if a placeholder is still present.
    pub fn into_resolved(self) -> Result<ResolvedCmdline> {
        if self.has_placeholder() {
            return Err(ConfigError::UnexpectedRootHashPlaceholder.into());
        }
        Ok(ResolvedCmdline::normalized(&self.text))
    }
}

/// A final command line, safe to embed in a UKI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCmdline(String);

impl ResolvedCmdline {
    /// Collapse whitespace (including newlines from the config file) to single spaces.
    fn normalized(text: &str) -> Self {
        Self(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedCmdline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
