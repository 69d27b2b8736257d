//! imgboot library exports.
//!
//! The boot provisioning pipeline, one module per component. The binary and
//! the integration tests in `tests/` both build on these.

pub mod blkid;
pub mod boot;
pub mod cmdline;
pub mod common;
pub mod config;
pub mod error;
pub mod fstab;
pub mod mount;
pub mod partition;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod security;
pub mod sign;
pub mod template;
pub mod timing;
pub mod uki;

pub use error::{ConfigError, Stage};
