use std::fs;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use types::{Architecture, DebstrapError};

use crate::{
    cmd::Cmd,
    context::{Context, Outcome},
    diskvars,
    packages::{self, Scope},
};

const GRUB_MKCONFIG: &str = "usr/sbin/grub-mkconfig";
const GRUB_CONFIG: &str = "/boot/grub/grub.cfg";

const UBUNTU_SUITES: &[&str] = &[
    "bionic", "focal", "jammy", "noble", "oracular", "plucky", "questing",
];

static STRICT_MODE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)set -e([ \t]*)$"));

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Family {
    Debian,
    Ubuntu,
}

impl Family {
    fn from_suite(suite: &str) -> Self {
        if UBUNTU_SUITES.contains(&suite) {
            Self::Ubuntu
        } else {
            Self::Debian
        }
    }
}

fn bootloader_package(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Amd64 | Architecture::I386 => "grub-pc",
        Architecture::Arm64 => "grub-efi-arm64",
        Architecture::Armhf => "grub-efi-arm",
    }
}

fn debian_kernel_flavour(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Amd64 => "amd64",
        Architecture::Arm64 => "arm64",
        Architecture::Armhf => "armmp",
        Architecture::I386 => "686-pae",
    }
}

/// The packages making the target bootable
fn kernel_packages(suite: &str, arch: Architecture) -> Vec<String> {
    let mut packages: Vec<String> = match Family::from_suite(suite) {
        Family::Debian => ["initramfs-tools", "firmware-linux-free", "lvm2"]
            .map(String::from)
            .to_vec(),
        Family::Ubuntu => ["linux-image-generic", "linux-firmware", "initramfs-tools", "lvm2"]
            .map(String::from)
            .to_vec(),
    };

    packages.push(String::from(bootloader_package(arch)));

    if Family::from_suite(suite) == Family::Debian {
        packages.push(format!("linux-image-{}", debian_kernel_flavour(arch)));
    }

    packages
}

/// Turns off `set -e` in a shell script. Returns `None` if there was nothing
/// to change.
pub(crate) fn neutralize_strict_mode(script: &str) -> Result<Option<String>, DebstrapError> {
    let regex = STRICT_MODE
        .as_ref()
        .map_err(|e| DebstrapError::Regex(e.clone()))?;

    if !regex.is_match(script) {
        return Ok(None);
    }

    Ok(Some(regex.replace_all(script, "${1}set +e${2}").into_owned()))
}

// grub-mkconfig gives up on the first grub-probe error, and there's plenty
// of them when the live system runs from a tmpfs.
fn patch_grub_mkconfig(ctx: &Context, outcome: &mut Outcome) -> Result<(), DebstrapError> {
    let path = ctx.target().join(GRUB_MKCONFIG);
    let script = fs::read_to_string(&path)?;

    match neutralize_strict_mode(&script)? {
        Some(patched) => {
            fs::write(&path, patched)?;
            outcome.change(format!("Disabled strict mode in {}", path.display()));
        }
        None => debug!("{} already patched", path.display()),
    }

    Ok(())
}

/// Installs the kernel, and the bootloader if we partitioned the drives
pub(crate) fn install(
    ctx: &mut Context,
    partitioned: bool,
    outcome: &mut Outcome,
) -> Result<(), DebstrapError> {
    let kernel = kernel_packages(&ctx.params().distribution, ctx.params().arch);
    packages::ensure_installed(ctx, &kernel, Scope::Target, false, outcome)?;

    if !partitioned {
        outcome.msg("Existing root filesystem, leaving the bootloader alone");
        return Ok(());
    }

    patch_grub_mkconfig(ctx, outcome)?;

    let target = ctx.target().to_path_buf();
    let cmd = Cmd::new("grub-mkconfig")
        .args(["-o", GRUB_CONFIG])
        .chroot(&target);
    ctx.run(&cmd, outcome)?;
    outcome.change(format!("Generated {GRUB_CONFIG}"));

    let device = diskvars::boot_device(&ctx.config().disk_vars_path())?;
    info!("Installing the bootloader on {device}");

    let cmd = Cmd::new("grub-install").arg(&device).chroot(&target);
    ctx.run(&cmd, outcome)?;
    outcome.change(format!("Bootloader installed on {device}"));

    Ok(())
}
