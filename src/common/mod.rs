//! Shared filesystem helpers for working inside an install root.

pub mod files;
pub mod paths;

pub use files::{
    append_to_file, copy_file_with_dirs, set_mode, sha256_file, write_file_mode, write_file_with_dirs,
};
pub use paths::{ensure_parent_exists, host_path};
