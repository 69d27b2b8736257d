//! Shared test utilities for imgboot tests.
//!
//! Nothing here touches real block devices: commands go to a
//! [`RecordingExecutor`] and device identities come from [`FakeBlockDevices`].

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use anyhow::{bail, Result};
use imgboot::blkid::BlockDevices;
use imgboot::common::host_path;
use imgboot::partition::PartitionMap;
use imgboot::process::{Cmd, CommandResult, Executor};
use imgboot::template::{ImageTemplate, PartitionInfo};

pub const BOOT_DEV: &str = "/dev/loop0p1";
pub const ROOT_DEV: &str = "/dev/loop0p2";
pub const HASH_DEV: &str = "/dev/loop0p3";
pub const GRUB_BOOT_DEV: &str = "/dev/loop0p4";

pub const ROOT_HASH: &str = "4f2b6c0d1e8a9b7c3d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4";

/// Test environment: an empty install root and a work directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub install_root: PathBuf,
    pub work_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let install_root = temp_dir.path().join("root");
        let work_dir = temp_dir.path().join("work");
        fs::create_dir_all(&install_root).expect("Failed to create install root");
        fs::create_dir_all(&work_dir).expect("Failed to create work dir");

        Self {
            _temp_dir: temp_dir,
            install_root,
            work_dir,
        }
    }

    /// Host path of an image path inside the install root.
    pub fn path(&self, image_path: &str) -> PathBuf {
        host_path(&self.install_root, image_path)
    }

    pub fn write(&self, image_path: &str, content: &str) {
        let path = self.path(image_path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, image_path: &str) -> String {
        let path = self.path(image_path);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
    }

    /// Number of files and directories under the install root.
    pub fn entry_count(&self) -> usize {
        walkdir::WalkDir::new(&self.install_root)
            .min_depth(1)
            .into_iter()
            .count()
    }

    /// Lay down what package installation would: a kernel and the systemd-boot binary.
    pub fn install_kernel_and_stub(&self) {
        self.write("/boot/vmlinuz-6.6.30", "kernel");
        self.write("/usr/lib/systemd/boot/efi/systemd-bootx64.efi", "MZ-stub");
        self.write("/etc/os-release", "NAME=Edge\n");
    }

    /// Secure Boot key material under the work directory.
    pub fn signing_files(&self) -> (PathBuf, PathBuf, PathBuf) {
        let keys = self.work_dir.join("keys");
        fs::create_dir_all(&keys).unwrap();
        let key = keys.join("db.key");
        let crt = keys.join("db.crt");
        let cer = keys.join("db.cer");
        fs::write(&key, "key").unwrap();
        fs::write(&crt, "crt").unwrap();
        fs::write(&cer, "cer").unwrap();
        (key, crt, cer)
    }
}

/// The boot assets shipped with the crate.
pub fn assets_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("assets")
}

// =============================================================================
// Recording executor
// =============================================================================

/// One command seen by the executor.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub line: String,
    pub chroot: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

type Responder = Box<dyn Fn(&Cmd) -> CommandResult>;

/// Records every command and answers from scripted rules.
///
/// Rules match on the command-line prefix; the first match wins. Commands
/// without a rule succeed with empty output.
pub struct RecordingExecutor {
    calls: RefCell<Vec<Recorded>>,
    rules: Vec<(String, Responder)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            rules: Vec::new(),
        }
    }

    /// Answer commands starting with `prefix` with `result`.
    pub fn respond(self, prefix: &str, result: CommandResult) -> Self {
        self.on(prefix, move |_| result.clone())
    }

    /// Answer commands starting with `prefix` by calling `f`.
    pub fn on(mut self, prefix: &str, f: impl Fn(&Cmd) -> CommandResult + 'static) -> Self {
        self.rules.push((prefix.to_string(), Box::new(f)));
        self
    }

    /// Fail commands starting with `prefix`.
    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.respond(prefix, CommandResult::failed(1, stderr))
    }

    /// Standard fakes for the tools the UKI build drives.
    pub fn with_uki_tools(self) -> Self {
        self.respond(
            "veritysetup format",
            CommandResult::ok(format!(
                "VERITY header information for {}\nHash type:              1\nRoot hash:              {}\n",
                HASH_DEV, ROOT_HASH
            )),
        )
        .on("ukify build", |cmd| {
            touch(&output_path(cmd, "--output"), "UKI");
            CommandResult::ok("")
        })
        .on("sbsign", |cmd| {
            let target = resolve(cmd, cmd.arguments().last().unwrap());
            let mut signed = fs::read(&target).unwrap();
            signed.extend_from_slice(b"+signed");
            fs::write(output_path(cmd, "--output"), signed).unwrap();
            CommandResult::ok("")
        })
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.line.clone()).collect()
    }

    /// Command lines starting with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<Recorded> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.line.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.matching(prefix).len()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let line = cmd.command_line();
        self.calls.borrow_mut().push(Recorded {
            line: line.clone(),
            chroot: cmd.chroot().map(Path::to_path_buf),
            envs: cmd.envs().to_vec(),
        });

        for (prefix, responder) in &self.rules {
            if line.starts_with(prefix.as_str()) {
                return Ok(responder(cmd));
            }
        }
        Ok(CommandResult::ok(""))
    }
}

/// Host path of a path argument, honouring the command's chroot.
fn resolve(cmd: &Cmd, arg: &str) -> PathBuf {
    match cmd.chroot() {
        Some(root) => host_path(root, arg),
        None => PathBuf::from(arg),
    }
}

fn output_path(cmd: &Cmd, flag: &str) -> PathBuf {
    let args = cmd.arguments();
    let pos = args
        .iter()
        .position(|a| a == flag)
        .unwrap_or_else(|| panic!("{} missing from '{}'", flag, cmd.command_line()));
    resolve(cmd, &args[pos + 1])
}

fn touch(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

// =============================================================================
// Fake block devices
// =============================================================================

/// Derives identities from the device name: `/dev/loop0p2` has UUID
/// `uuid-loop0p2` and PARTUUID `pu-loop0p2`.
#[derive(Default)]
pub struct FakeBlockDevices {
    missing: BTreeSet<PathBuf>,
    queries: RefCell<usize>,
}

impl FakeBlockDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make lookups for `device` fail.
    pub fn without(mut self, device: &str) -> Self {
        self.missing.insert(PathBuf::from(device));
        self
    }

    pub fn queries(&self) -> usize {
        *self.queries.borrow()
    }

    fn lookup(&self, device: &Path, prefix: &str) -> Result<String> {
        *self.queries.borrow_mut() += 1;
        if self.missing.contains(device) {
            bail!("blkid reported nothing for {}", device.display());
        }
        let name = device.file_name().unwrap().to_string_lossy();
        Ok(format!("{}-{}", prefix, name))
    }
}

impl BlockDevices for FakeBlockDevices {
    fn uuid(&self, device: &Path) -> Result<String> {
        self.lookup(device, "uuid")
    }

    fn part_uuid(&self, device: &Path) -> Result<String> {
        self.lookup(device, "pu")
    }
}

// =============================================================================
// Templates
// =============================================================================

fn partition(id: &str, mount_point: &str, fs_type: &str) -> PartitionInfo {
    PartitionInfo {
        id: id.to_string(),
        mount_point: mount_point.to_string(),
        fs_type: fs_type.to_string(),
        mount_options: String::new(),
    }
}

/// ESP, root and, with `immutable`, a dm-verity hash partition.
pub fn template(provider: &str, boot_type: &str, immutable: bool) -> ImageTemplate {
    let mut t = ImageTemplate::default();
    t.image.name = "edge-raw".into();
    t.target.os = "edge-microvisor-toolkit".into();
    t.target.dist = "emt3".into();
    t.target.arch = "x86_64".into();
    t.system_config.name = "edge".into();
    t.system_config.bootloader.provider = provider.into();
    t.system_config.bootloader.boot_type = boot_type.into();
    t.system_config.kernel.cmdline = "console=ttyS0,115200".into();
    t.system_config.immutability.enabled = immutable;

    t.disk.partitions.push(partition("boot", "/boot/efi", "fat32"));
    t.disk.partitions.push(partition("rootfs", "/", "ext4"));
    if immutable {
        t.disk.partitions.push(partition("roothash", "none", "ext4"));
    }
    t
}

/// Device map matching [`template`], plus a `/boot` device used by some tests.
pub fn devices() -> PartitionMap {
    let mut map = PartitionMap::new();
    map.insert("boot".into(), PathBuf::from(BOOT_DEV));
    map.insert("rootfs".into(), PathBuf::from(ROOT_DEV));
    map.insert("roothash".into(), PathBuf::from(HASH_DEV));
    map.insert("grubboot".into(), PathBuf::from(GRUB_BOOT_DEV));
    map
}

/// Add a separate `/boot` partition to `t`.
pub fn with_separate_boot(mut t: ImageTemplate) -> ImageTemplate {
    t.disk.partitions.push(partition("grubboot", "/boot", "ext4"));
    t
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}
