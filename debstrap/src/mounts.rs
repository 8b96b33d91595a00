use core::fmt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use debstrap_fstab::{FstabEntry, MountTable};
use log::{debug, info, trace};
use nix::errno::Errno;
use sys_mount::{unmount, FilesystemType, Mount, MountFlags, UnmountFlags};
use types::DebstrapError;

use crate::context::{Context, Outcome};

/// Mounts and unmounts filesystems
pub(crate) trait Mounter: fmt::Debug {
    fn is_mounted(&self, target: &Path) -> Result<bool, DebstrapError>;

    fn mount(&mut self, device: &str, target: &Path, fstype: &str) -> Result<(), DebstrapError>;

    fn bind(&mut self, source: &Path, target: &Path) -> Result<(), DebstrapError>;

    /// Detaches the filesystem mounted on `target`
    fn unmount_lazy(&mut self, target: &Path) -> Result<(), DebstrapError>;
}

/// Mounts filesystems on the machine we're running on
#[derive(Debug, Default)]
pub(crate) struct SysMounter;

impl Mounter for SysMounter {
    fn is_mounted(&self, target: &Path) -> Result<bool, DebstrapError> {
        let target = target
            .canonicalize()
            .unwrap_or_else(|_err| target.to_path_buf());

        Ok(MountTable::current()?.is_mounted(&target))
    }

    fn mount(&mut self, device: &str, target: &Path, fstype: &str) -> Result<(), DebstrapError> {
        debug!("Mounting {device} ({fstype}) on {}", target.display());

        Mount::builder()
            .fstype(FilesystemType::Manual(fstype))
            .mount(device, target)
            .map(drop)
            .map_err(|err| DebstrapError::Mount {
                device: device.to_owned(),
                target: target.to_path_buf(),
                err,
            })
    }

    fn bind(&mut self, source: &Path, target: &Path) -> Result<(), DebstrapError> {
        debug!("Bind-mounting {} on {}", source.display(), target.display());

        Mount::builder()
            .flags(MountFlags::BIND)
            .mount(source, target)
            .map(drop)
            .map_err(|err| DebstrapError::Mount {
                device: source.display().to_string(),
                target: target.to_path_buf(),
                err,
            })
    }

    fn unmount_lazy(&mut self, target: &Path) -> Result<(), DebstrapError> {
        debug!("Unmounting {}", target.display());

        match unmount(target, UnmountFlags::DETACH) {
            Ok(()) => Ok(()),
            // Someone beat us to it
            Err(e) if e.raw_os_error() == Some(Errno::EINVAL as i32) => {
                trace!("{} wasn't mounted anymore", target.display());
                Ok(())
            }
            Err(err) => Err(DebstrapError::Mount {
                device: String::from("<unmount>"),
                target: target.to_path_buf(),
                err,
            }),
        }
    }
}

fn create_mount_point(target: &Path) -> Result<(), DebstrapError> {
    if !target.is_dir() {
        trace!("Creating mount point {}", target.display());
        fs::create_dir_all(target)?;
    }

    Ok(())
}

fn entry_targets(ctx: &Context, entries: Vec<&FstabEntry>) -> Vec<(FstabEntry, PathBuf)> {
    entries
        .into_iter()
        .map(|e| (e.clone(), e.target_in(ctx.target())))
        .collect()
}

/// Mounts the filesystems of the generated table below the target
/// directory, parents first
pub(crate) fn mount_fstab(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let entries = entry_targets(ctx, ctx.fstab()?.mount_order());

    for (entry, target) in entries {
        create_mount_point(&target)?;

        if ctx.mounter().is_mounted(&target)? {
            outcome.msg(format!("{} is already mounted", target.display()));
            continue;
        }

        // tmpfs has no device, so the source is just a name
        let device = if entry.is_tmpfs() {
            entry.fstype.as_str()
        } else {
            entry.device.as_str()
        };

        ctx.mounter().mount(device, &target, &entry.fstype)?;
        outcome.change(format!("Mounted {} on {}", entry.device, target.display()));
    }

    info!("Target filesystems mounted");

    Ok(())
}

/// Unmounts the filesystems of the generated table, children first
pub(crate) fn unmount_fstab(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let entries = entry_targets(ctx, ctx.fstab()?.unmount_order());

    for (entry, target) in entries {
        if !ctx.mounter().is_mounted(&target)? {
            trace!("{} isn't mounted, skipping", target.display());
            continue;
        }

        ctx.mounter().unmount_lazy(&target)?;
        outcome.change(format!("Unmounted {} from {}", entry.device, target.display()));
    }

    info!("Target filesystems unmounted");

    Ok(())
}

#[cfg(test)]
mod mounts_test {
    use std::fs;

    use test_log::test;

    use super::{mount_fstab, unmount_fstab};
    use crate::{context::Outcome, testing::TestEnv};

    const FSTAB: &str = "\
# generated by setup-storage
/dev/vg0/log\t/var/log\text4\trw\t0\t2
/dev/sda1\t/boot\text4\trw\t0\t2
/dev/vg0/root\t/\text4\trw\t0\t1
/dev/vg0/swap\tnone\tswap\tsw\t0\t0
tmpfs\t/tmp\ttmpfs\tnosuid\t0\t0
";

    #[test]
    fn test_mount_order() {
        let env = TestEnv::new();
        env.write_fstab(FSTAB);
        let mut ctx = env.context();

        let mut outcome = Outcome::default();
        mount_fstab(&mut ctx, &mut outcome).unwrap();
        assert!(outcome.changed);

        let target = env.target();
        assert_eq!(
            env.mounter.state().mounts,
            vec![
                format!("/dev/vg0/root ext4 {}", target.display()),
                format!("/dev/sda1 ext4 {}", target.join("boot").display()),
                format!("tmpfs tmpfs {}", target.join("tmp").display()),
                format!("/dev/vg0/log ext4 {}", target.join("var/log").display()),
            ]
        );
        assert!(target.join("var/log").is_dir());
    }

    #[test]
    fn test_mount_idempotent() {
        let env = TestEnv::new();
        env.write_fstab(FSTAB);
        let mut ctx = env.context();

        mount_fstab(&mut ctx, &mut Outcome::default()).unwrap();
        let mut outcome = Outcome::default();
        mount_fstab(&mut ctx, &mut outcome).unwrap();

        assert!(!outcome.changed);
        assert_eq!(env.mounter.state().mounts.len(), 4);
    }

    #[test]
    fn test_mount_failure() {
        let env = TestEnv::new();
        env.write_fstab(FSTAB);
        env.mounter.state_mut().fail_on = Some(env.target().join("boot"));
        let mut ctx = env.context();

        let mut outcome = Outcome::default();
        mount_fstab(&mut ctx, &mut outcome).unwrap_err();
        assert_eq!(env.mounter.state().mounts.len(), 1);
        assert!(outcome.changed);
    }

    #[test]
    fn test_unmount_reverse_order() {
        let env = TestEnv::new();
        env.write_fstab(FSTAB);
        let mut ctx = env.context();

        mount_fstab(&mut ctx, &mut Outcome::default()).unwrap();
        let mut outcome = Outcome::default();
        unmount_fstab(&mut ctx, &mut outcome).unwrap();
        assert!(outcome.changed);

        let target = env.target();
        assert_eq!(
            env.mounter.state().unmounts,
            vec![
                target.join("var/log"),
                target.join("tmp"),
                target.join("boot"),
                target.clone(),
            ]
        );
        assert!(env.mounter.state().mounted.is_empty());
    }

    #[test]
    fn test_unmount_skips_unmounted() {
        let env = TestEnv::new();
        env.write_fstab(FSTAB);
        let mut ctx = env.context();

        let mut outcome = Outcome::default();
        unmount_fstab(&mut ctx, &mut outcome).unwrap();

        assert!(!outcome.changed);
        assert!(env.mounter.state().unmounts.is_empty());
    }

    #[test]
    fn test_fstab_parsed_once() {
        let env = TestEnv::new();
        env.write_fstab(FSTAB);
        let mut ctx = env.context();

        mount_fstab(&mut ctx, &mut Outcome::default()).unwrap();
        fs::remove_file(env.config.fstab_path()).unwrap();

        unmount_fstab(&mut ctx, &mut Outcome::default()).unwrap();
        assert_eq!(env.mounter.state().unmounts.len(), 4);
    }

    #[test]
    fn test_missing_fstab() {
        let env = TestEnv::new();
        let mut ctx = env.context();

        mount_fstab(&mut ctx, &mut Outcome::default()).unwrap_err();
    }
}
