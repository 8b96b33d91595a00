use std::{fs, path::Path};

use log::info;
use types::DebstrapError;

use crate::{
    cmd::Cmd,
    context::{Context, Outcome},
};

const INTERFACES_PATH: &str = "etc/network/interfaces";
const FSTAB_PATH: &str = "etc/fstab";

/// Sets the password of the root account of the target
pub(crate) fn set_root_password(
    ctx: &mut Context,
    password: &str,
    outcome: &mut Outcome,
) -> Result<(), DebstrapError> {
    let cmd = Cmd::new("chpasswd")
        .stdin(&format!("root:{password}\n"))
        .chroot(ctx.target());
    ctx.run(&cmd, outcome)?;

    outcome.change("Root password set");

    Ok(())
}

fn render_interfaces(interface: &str) -> String {
    format!(
        "\
# This file describes the network interfaces available on your system
# and how to activate them. For more information, see interfaces(5).

source /etc/network/interfaces.d/*

# The loopback network interface
auto lo
iface lo inet loopback

# The primary network interface
allow-hotplug {interface}
iface {interface} inet dhcp
"
    )
}

/// Writes `content` to `path` unless it's already there. Returns true if
/// the file was written.
fn write_if_changed(path: &Path, content: &str) -> Result<bool, DebstrapError> {
    if fs::read_to_string(path).is_ok_and(|current| current == content) {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, content)?;
    Ok(true)
}

/// Writes the network configuration of the target
pub(crate) fn write_interfaces(ctx: &Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let path = ctx.target().join(INTERFACES_PATH);

    if write_if_changed(&path, &render_interfaces(&ctx.params().interface))? {
        outcome.change(format!("Wrote {}", path.display()));
    } else {
        outcome.msg(format!("{} is up to date", path.display()));
    }

    Ok(())
}

/// Writes the filesystem table of the target, from the one generated when
/// partitioning
pub(crate) fn write_fstab(ctx: &Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let path = ctx.target().join(FSTAB_PATH);

    if write_if_changed(&path, &ctx.fstab()?.render())? {
        outcome.change(format!("Wrote {}", path.display()));
    } else {
        outcome.msg(format!("{} is up to date", path.display()));
    }

    Ok(())
}

/// Reboots the machine in a minute, to leave us time to report back
pub(crate) fn schedule_reboot(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    info!("Scheduling a reboot");
    ctx.run(&Cmd::new("shutdown").args(["-r", "+1"]), outcome)?;
    outcome.change("Reboot scheduled");

    Ok(())
}
