use std::{
    fs::{self, Permissions},
    os::unix::fs::PermissionsExt as _,
    path::Path,
};

use log::info;
use types::DebstrapError;

use crate::context::{Context, Outcome};

/// Kernel filesystems the tools running in the chroot need, parents first
const PSEUDO_FILESYSTEMS: [&str; 3] = ["proc", "dev", "dev/pts"];

const POLICY_PATH: &str = "usr/sbin/policy-rc.d";

/// Where a policy file already in the target waits for us to be done
const POLICY_SAVED_PATH: &str = "usr/sbin/policy-rc.d.debstrap-saved";

/// invoke-rc.d won't start any service if this exits with 101
const POLICY_SCRIPT: &str = "#!/bin/sh\nexit 101\n";

/// Prepares the target for commands running inside it: the pseudo
/// filesystems are bound from the host, and services are kept from
/// starting.
pub(crate) fn enter(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let target = ctx.target().to_path_buf();

    for fs_name in PSEUDO_FILESYSTEMS {
        let dest = target.join(fs_name);
        fs::create_dir_all(&dest)?;

        if ctx.mounter().is_mounted(&dest)? {
            outcome.msg(format!("{} is already mounted", dest.display()));
            continue;
        }

        ctx.mounter().bind(&Path::new("/").join(fs_name), &dest)?;
        outcome.change(format!("Mounted /{fs_name} on {}", dest.display()));
    }

    let policy = target.join(POLICY_PATH);
    if let Some(parent) = policy.parent() {
        fs::create_dir_all(parent)?;
    }

    let saved = target.join(POLICY_SAVED_PATH);
    if is_foreign_policy(&policy) && !saved.exists() {
        fs::rename(&policy, &saved)?;
        outcome.msg(format!("Saved {} to {}", policy.display(), saved.display()));
    }

    fs::write(&policy, POLICY_SCRIPT)?;
    fs::set_permissions(&policy, Permissions::from_mode(0o755))?;
    info!("Service startup disabled in {}", target.display());

    Ok(())
}

// A policy file we didn't write
fn is_foreign_policy(policy: &Path) -> bool {
    fs::read(policy).is_ok_and(|content| content != POLICY_SCRIPT.as_bytes())
}

/// Reverts [`enter`]
pub(crate) fn leave(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let target = ctx.target().to_path_buf();

    let policy = target.join(POLICY_PATH);
    let saved = target.join(POLICY_SAVED_PATH);
    if saved.exists() {
        fs::rename(&saved, &policy)?;
        outcome.msg(format!("Restored {}", policy.display()));
    } else if policy.exists() && !is_foreign_policy(&policy) {
        fs::remove_file(&policy)?;
        info!("Service startup enabled in {}", target.display());
    }

    for fs_name in PSEUDO_FILESYSTEMS.iter().rev() {
        let dest = target.join(fs_name);

        if !ctx.mounter().is_mounted(&dest)? {
            continue;
        }

        ctx.mounter().unmount_lazy(&dest)?;
        outcome.change(format!("Unmounted {}", dest.display()));
    }

    Ok(())
}
