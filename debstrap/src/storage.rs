use debstrap_layout::LayoutRequest;
use log::info;
use types::DebstrapError;

use crate::{
    cmd::Cmd,
    context::{Context, Outcome},
    inventory,
};

/// Lists the names printed by an LVM reporting command, one per line
fn lvm_names(ctx: &mut Context, cmd: &Cmd, outcome: &mut Outcome) -> Result<Vec<String>, DebstrapError> {
    let output = ctx.run(cmd, outcome)?;

    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Removes every logical volume, then every physical volume. The disk
/// layout tool can't cope with an existing LVM setup.
fn remove_lvm(ctx: &mut Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let volumes = lvm_names(
        ctx,
        &Cmd::new("lvs").args(["--noheadings", "-o", "lv_path"]),
        outcome,
    )?;

    if volumes.is_empty() {
        outcome.msg("No logical volume to remove");
    } else {
        ctx.run(&Cmd::new("lvremove").args(["-f", "-y"]).args(&volumes), outcome)?;
        outcome.change(format!("Removed logical volumes {}", volumes.join(", ")));
    }

    let physical = lvm_names(
        ctx,
        &Cmd::new("pvs").args(["--noheadings", "-o", "pv_name"]),
        outcome,
    )?;

    if physical.is_empty() {
        outcome.msg("No physical volume to remove");
    } else {
        ctx.run(&Cmd::new("pvremove").args(["-ff", "-y"]).args(&physical), outcome)?;
        outcome.change(format!("Removed physical volumes {}", physical.join(", ")));
    }

    Ok(())
}

/// Partitions and formats the drives according to the requested layout
pub(crate) fn partition(
    ctx: &mut Context,
    request: &LayoutRequest,
    outcome: &mut Outcome,
) -> Result<(), DebstrapError> {
    let drives = inventory::drives(ctx, outcome)?;
    let table = ctx.config().threshold_table();
    let layout = request.resolve(&drives, &table)?.to_owned();

    let descriptor = ctx.config().layouts_dir.join(&layout);
    if !descriptor.is_file() {
        return Err(DebstrapError::Custom(format!(
            "Partition layout {layout} not found at {}",
            descriptor.display()
        )));
    }

    info!("Using partition layout {layout} ({})", descriptor.display());

    remove_lvm(ctx, outcome)?;

    let disklist = drives
        .iter()
        .map(|d| d.name())
        .collect::<Vec<_>>()
        .join(" ");

    let cmd = Cmd::new("setup-storage")
        .args(["-X", "-f"])
        .arg(&descriptor)
        .env("LC_ALL", "C")
        .env("LOGDIR", &ctx.config().fai_log_dir)
        .env("disklist", disklist);

    ctx.run(&cmd, outcome)?;
    outcome.change(format!("Partitioned the drives with layout {layout}"));

    Ok(())
}
