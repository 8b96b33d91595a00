use debstrap_layout::{parse_drive_names, Drive};
use log::info;
use types::DebstrapError;

use crate::{
    cmd::Cmd,
    context::{Context, Outcome},
};

/// Lists the drives of the machine, in the order the disk inventory helper
/// reports them
pub(crate) fn drives(ctx: &mut Context, outcome: &mut Outcome) -> Result<Vec<Drive>, DebstrapError> {
    let cmd = Cmd::new(&ctx.config().disk_info);
    let output = ctx.run(&cmd, outcome)?;

    let sysfs = ctx.config().sysfs_block.clone();
    let drives = parse_drive_names(&output.stdout)
        .iter()
        .map(|name| Drive::from_sysfs(&sysfs, name))
        .collect::<Result<Vec<_>, _>>()?;

    for drive in &drives {
        info!(
            "Found drive {}: {} sectors of {} bytes, {} bytes",
            drive.name(),
            drive.sectors(),
            drive.sector_size(),
            drive.size()
        );
    }

    Ok(drives)
}
