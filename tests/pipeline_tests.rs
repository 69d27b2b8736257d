//! End-to-end assembly tests with a recording executor.
//!
//! Mounts are never real: the install root is a plain directory and the
//! executor only records the mount and umount commands.

mod helpers;

use helpers::*;
use std::fs;

use imgboot::error::{config_error, ConfigError};
use imgboot::pipeline::{ImageAssemblyPipeline, NoopInstaller, PackageInstaller, ShellInstaller};
use imgboot::process::CommandResult;
use imgboot::template::ImageTemplate;

fn assemble(
    env: &TestEnv,
    exec: &RecordingExecutor,
    blk: &FakeBlockDevices,
    template: &ImageTemplate,
) -> anyhow::Result<()> {
    let assets = assets_dir();
    ImageAssemblyPipeline::new(exec, blk, &NoopInstaller, &assets, &env.work_dir).assemble(
        &env.install_root,
        &devices(),
        template,
    )
}

#[test]
fn test_missing_root_partition_mounts_nothing() {
    let env = TestEnv::new();
    let exec = RecordingExecutor::new();
    let blk = FakeBlockDevices::new();

    let mut template = template("grub", "efi", false);
    template.disk.partitions.retain(|p| p.mount_point != "/");

    let err = assemble(&env, &exec, &blk, &template).unwrap_err();
    assert!(matches!(config_error(&err), Some(ConfigError::RootPartitionNotFound)));
    assert!(err.to_string().contains("partition resolution"));
    assert_eq!(exec.count("mount"), 0);
    assert_eq!(env.entry_count(), 0);
}

#[test]
fn test_missing_install_root() {
    let env = TestEnv::new();
    let exec = RecordingExecutor::new();
    let blk = FakeBlockDevices::new();
    fs::remove_dir(&env.install_root).unwrap();

    let err = assemble(&env, &exec, &blk, &template("grub", "efi", false)).unwrap_err();
    assert!(matches!(config_error(&err), Some(ConfigError::InstallRootMissing(_))));
    assert!(exec.lines().is_empty());
}

#[test]
fn test_immutable_without_hash_partition_fails_before_mount() {
    let env = TestEnv::new();
    let exec = RecordingExecutor::new();
    let blk = FakeBlockDevices::new();

    let mut template = template("systemd-boot", "efi", true);
    template.disk.partitions.retain(|p| p.id != "roothash");

    let err = assemble(&env, &exec, &blk, &template).unwrap_err();
    assert!(matches!(config_error(&err), Some(ConfigError::HashPartitionNotFound)));
    assert_eq!(exec.count("mount"), 0);
    assert!(!env.path("/boot/cmdline.conf").exists());
}

#[test]
fn test_unsupported_bootloader_fails_before_mount() {
    for (provider, boot_type) in [("grub", "legacy"), ("systemd-boot", "legacy"), ("lilo", "efi")] {
        let env = TestEnv::new();
        let exec = RecordingExecutor::new();
        let blk = FakeBlockDevices::new();

        let err = assemble(&env, &exec, &blk, &template(provider, boot_type, false)).unwrap_err();

        assert!(config_error(&err).is_some(), "{}/{}: {:#}", provider, boot_type, err);
        assert!(err.to_string().contains("partition resolution"), "{}", err);
        assert_eq!(exec.count("mount"), 0, "{}/{} mounted", provider, boot_type);
        assert!(!env.path("/etc/fstab").exists());
        assert_eq!(env.entry_count(), 0);
        assert_eq!(blk.queries(), 0);
    }
}

#[test]
fn test_grub_image_mount_order_and_cleanup() {
    let env = TestEnv::new();
    let exec = RecordingExecutor::new();
    let blk = FakeBlockDevices::new();
    let template = with_separate_boot(template("grub", "efi", false));

    assemble(&env, &exec, &blk, &template).unwrap();

    let root = env.install_root.display().to_string();
    let mounts: Vec<String> = exec.matching("mount ").into_iter().map(|c| c.line).collect();
    assert_eq!(
        mounts,
        vec![
            format!("mount -t ext4 {} {}", ROOT_DEV, root),
            format!("mount -t ext4 {} {}/boot", GRUB_BOOT_DEV, root),
            format!("mount -t vfat -o umask=0077 {} {}/boot/efi", BOOT_DEV, root),
            format!("mount -t proc proc {}/proc", root),
        ]
    );

    let unmounts: Vec<String> = exec.matching("umount").into_iter().map(|c| c.line).collect();
    assert_eq!(
        unmounts,
        vec![
            format!("umount {}/proc", root),
            format!("umount {}/boot/efi", root),
            format!("umount {}/boot", root),
            format!("umount {}", root),
        ]
    );

    let fstab = env.read("/etc/fstab");
    assert!(fstab.contains("PARTUUID=pu-loop0p2 / ext4 defaults 0 1"));
    assert!(fstab.contains("PARTUUID=pu-loop0p4 /boot ext4 defaults 0 2"));
    assert!(fstab.contains("PARTUUID=pu-loop0p1 /boot/efi vfat defaults 0 2"));

    // grub images get no UKI and no overlay
    assert_eq!(exec.count("ukify"), 0);
    assert_eq!(exec.count("systemctl"), 0);
    assert_eq!(exec.count("grub2-mkconfig"), 1);
}

#[test]
fn test_stage_failure_still_unmounts() {
    let env = TestEnv::new();
    let exec = RecordingExecutor::new().fail("grub2-mkconfig", "no grub modules");
    let blk = FakeBlockDevices::new();

    let err = assemble(&env, &exec, &blk, &template("grub", "efi", false)).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("boot install stage failed"), "{}", msg);
    assert!(msg.contains("no grub modules"), "{}", msg);

    // Every mount was released
    assert_eq!(exec.count("umount"), exec.count("mount "));
}

#[test]
fn test_unmount_failure_is_appended_to_stage_error() {
    let env = TestEnv::new();
    let root = env.install_root.display().to_string();
    let exec = RecordingExecutor::new()
        .fail("grub2-mkconfig", "no grub modules")
        .fail(&format!("umount {}/boot/efi", root), "target is busy")
        .fail(&format!("umount -l {}/boot/efi", root), "target is busy");
    let blk = FakeBlockDevices::new();

    let err = assemble(&env, &exec, &blk, &template("grub", "efi", false)).unwrap_err();
    let msg = err.to_string();

    // The stage error comes first; the unmount failure is appended
    assert!(msg.starts_with("boot install stage failed"), "{}", msg);
    assert!(msg.contains("cleanup errors: unmount stage failed"), "{}", msg);
    assert!(msg.contains("target is busy"), "{}", msg);

    // The root was still unmounted after the ESP failed
    assert_eq!(exec.count(&format!("umount {}", root)), 3);
    assert!(exec.lines().contains(&format!("umount {}", root)));
}

#[test]
fn test_busy_mount_falls_back_to_lazy_unmount() {
    let env = TestEnv::new();
    let root = env.install_root.display().to_string();
    let exec = RecordingExecutor::new().fail(&format!("umount {}/proc", root), "target is busy");
    let blk = FakeBlockDevices::new();

    assemble(&env, &exec, &blk, &template("grub", "efi", false)).unwrap();
    assert!(exec.lines().contains(&format!("umount -l {}/proc", root)));
}

#[test]
fn test_mount_failure_releases_earlier_mounts() {
    let env = TestEnv::new();
    let root = env.install_root.display().to_string();
    let exec = RecordingExecutor::new().fail("mount -t vfat", "bad superblock");
    let blk = FakeBlockDevices::new();

    let err = assemble(&env, &exec, &blk, &template("grub", "efi", false)).unwrap_err();
    assert!(format!("{:#}", err).contains("mount stage failed"));

    // Root was mounted before the ESP failed; only it is released
    assert_eq!(exec.matching("umount").len(), 1);
    assert_eq!(exec.matching("umount")[0].line, format!("umount {}", root));
    assert_eq!(exec.count("grub2-mkconfig"), 0);
}

#[test]
fn test_shell_installer_environment() {
    let env = TestEnv::new();
    let exec = RecordingExecutor::new();
    let installer = ShellInstaller::new(&exec, "tdnf install -y kernel");

    installer
        .install(&env.install_root, &template("grub", "efi", false))
        .unwrap();

    let calls = exec.matching("sh -c tdnf install -y kernel");
    assert_eq!(calls.len(), 1);
    assert!(calls[0]
        .envs
        .contains(&("INSTALL_ROOT".to_string(), env.install_root.display().to_string())));
    assert!(calls[0]
        .envs
        .contains(&("IMAGE_NAME".to_string(), "edge-raw".to_string())));
}

#[test]
fn test_immutable_systemd_boot_image() {
    let env = TestEnv::new();
    env.install_kernel_and_stub();
    let (key, crt, cer) = env.signing_files();

    let exec = RecordingExecutor::new().with_uki_tools();
    let blk = FakeBlockDevices::new();
    let mut template = template("systemd-boot", "efi", true);
    template.system_config.immutability.secure_boot_db_key = Some(key);
    template.system_config.immutability.secure_boot_db_crt = Some(crt);
    template.system_config.immutability.secure_boot_db_cer = Some(cer);

    assemble(&env, &exec, &blk, &template).unwrap();

    // The hash partition is never mounted
    assert!(!exec
        .matching("mount ")
        .iter()
        .any(|c| c.line.contains(HASH_DEV) && !c.line.contains("remount")));

    // Overlay configured and enabled
    assert_file_contains(&env.path("/etc/fstab"), "/opt/var /var none bind 0 0");
    assert_eq!(exec.count("systemctl enable setup-overlay.service"), 1);

    // UKI built from the resolved command line, then signed
    let ukify = exec.matching("ukify build");
    assert_eq!(ukify.len(), 1);
    assert!(ukify[0].line.contains(&format!("roothash={}", ROOT_HASH)));
    assert!(!ukify[0].line.contains("roothash=/dev"));
    assert_eq!(exec.count("sbsign"), 2);

    let uki = fs::read_to_string(env.path("/boot/efi/EFI/Linux/linux.efi")).unwrap();
    assert_eq!(uki, "UKI+signed");
    let stub = fs::read_to_string(env.path("/boot/efi/EFI/BOOT/BOOTX64.EFI")).unwrap();
    assert_eq!(stub, "MZ-stub+signed");

    let cert = env
        .work_dir
        .join("edge-microvisor-toolkit-emt3-x86_64/imagebuild/edge/DB.cer");
    assert_eq!(fs::read_to_string(cert).unwrap(), "cer");

    // Partitions and scratch space are all released
    assert_eq!(exec.count("umount"), exec.count("mount -t"));
}

#[test]
fn test_veritysetup_failure_reports_stage() {
    let env = TestEnv::new();
    env.install_kernel_and_stub();
    // Rules match in order, so the failing veritysetup goes first
    let exec = RecordingExecutor::new()
        .on("veritysetup", |_| CommandResult::failed(2, "Device /dev/loop0p3 is too small"))
        .with_uki_tools();
    let blk = FakeBlockDevices::new();

    let err = assemble(&env, &exec, &blk, &template("systemd-boot", "efi", true)).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("UKI build stage failed"), "{}", msg);
    assert!(msg.contains("too small"), "{}", msg);
    assert_eq!(exec.count("ukify"), 0);
    assert_eq!(exec.count("sbsign"), 0);
    assert_eq!(exec.count("umount"), exec.count("mount -t"));
}
