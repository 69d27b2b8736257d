//! Scoped tmpfs scratch space for veritysetup and ukify.
//!
//! ukify's Python tempfile handling needs a writable `/tmp`, and veritysetup
//! needs scratch space on the ESP side. Both are memory-backed while the root
//! is read-only. [`ScratchMounts`] owns the mounts: [`ScratchMounts::release`]
//! reports failures, dropping it still releases and only logs.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::common::{host_path, set_mode};
use crate::error::{combine, with_cleanup_errors};
use crate::mount::unmount_path;
use crate::process::{Cmd, Executor};

/// Scratch locations inside the image, mounted in this order.
pub const SCRATCH_DIRS: [&str; 2] = ["/tmp", "/boot/efi/tmp"];

const STICKY_WORLD_WRITABLE: u32 = 0o1777;

struct ScratchMount {
    path: PathBuf,
    /// The directory did not exist before; remove it on release.
    created: bool,
}

pub struct ScratchMounts<'a> {
    exec: &'a dyn Executor,
    mounts: Vec<ScratchMount>,
    released: bool,
}

impl<'a> ScratchMounts<'a> {
    /// Mount a tmpfs at every [`SCRATCH_DIRS`] entry under `install_root`.
    ///
    /// On failure, whatever was mounted is released before returning.
    pub fn acquire(exec: &'a dyn Executor, install_root: &Path) -> Result<Self> {
        let mut scratch = Self {
            exec,
            mounts: Vec::with_capacity(SCRATCH_DIRS.len()),
            released: false,
        };

        for dir in SCRATCH_DIRS {
            let path = host_path(install_root, dir);
            if let Err(err) = scratch.mount_one(path) {
                let cleanup = scratch.release_all();
                return Err(with_cleanup_errors(err, cleanup));
            }
        }
        Ok(scratch)
    }

    fn mount_one(&mut self, path: PathBuf) -> Result<()> {
        let created = !path.exists();
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {} directory", path.display()))?;

        let mounted = Cmd::new("mount")
            .args(["-t", "tmpfs", "tmpfs"])
            .arg_path(&path)
            .error_msg(format!("failed to mount tmpfs on {}", path.display()))
            .run(self.exec);
        if let Err(err) = mounted {
            if created {
                if let Err(e) = fs::remove_dir(&path) {
                    let cleanup = anyhow::Error::new(e).context(format!(
                        "failed to remove scratch directory {}",
                        path.display()
                    ));
                    return Err(with_cleanup_errors(err, vec![cleanup]));
                }
            }
            return Err(err);
        }

        self.mounts.push(ScratchMount {
            path: path.clone(),
            created,
        });
        set_mode(&path, STICKY_WORLD_WRITABLE)
            .with_context(|| format!("failed to chmod 1777 on {}", path.display()))?;
        debug!("Mounted scratch tmpfs at {}", path.display());
        Ok(())
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.mounts.iter().map(|m| m.path.as_path()).collect()
    }

    /// Unmount in reverse order and remove directories created by [`acquire`](Self::acquire).
    pub fn release(mut self) -> Result<()> {
        match combine(self.release_all()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn release_all(&mut self) -> Vec<anyhow::Error> {
        self.released = true;
        let mut errors = Vec::new();
        while let Some(mount) = self.mounts.pop() {
            if let Err(e) = unmount_path(self.exec, &mount.path) {
                errors.push(e);
                continue;
            }
            if mount.created {
                if let Err(e) = fs::remove_dir_all(&mount.path) {
                    errors.push(anyhow::Error::new(e).context(format!(
                        "failed to remove scratch directory {}",
                        mount.path.display()
                    )));
                }
            }
        }
        errors
    }
}

impl Drop for ScratchMounts<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for err in self.release_all() {
            warn!("scratch cleanup failed: {:#}", err);
        }
    }
}
