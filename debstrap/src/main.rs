#![allow(clippy::multiple_crate_versions)]
#![doc = include_str!("../../README.md")]

extern crate alloc;

use core::str::FromStr as _;
use std::{path::PathBuf, process::ExitCode};

use anyhow::{bail, Context as _};
use clap::Parser;
use debstrap_layout::LayoutRequest;
use log::{debug, error, info};
use nix::unistd::Uid;

mod bootloader;
mod bootstrap;
mod chroot;
mod cmd;
mod config;
mod context;
mod diskvars;
mod finalize;
mod inventory;
mod logging;
mod mounts;
mod packages;
mod params;
mod report;
mod storage;

#[cfg(test)]
mod testing;

use crate::{
    cmd::SystemRunner,
    config::{Config, DEFAULT_CONFIG_PATH},
    context::{Context, Outcome},
    mounts::SysMounter,
    packages::Scope,
    params::Params,
    report::Report,
};

#[derive(Parser)]
#[command(version, about = "Bare Machine Debian Installer")]
struct Cli {
    #[arg(help = "JSON Arguments File, overrides the other options")]
    args_file: Option<PathBuf>,

    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, help = "Configuration File")]
    config: PathBuf,

    #[command(flatten)]
    params: Params,
}

fn preflight() -> Result<(), anyhow::Error> {
    if !Uid::effective().is_root() {
        bail!("{} must run as root", env!("CARGO_CRATE_NAME"));
    }

    Ok(())
}

fn setup(cli: Cli) -> Result<Context, anyhow::Error> {
    let config = Config::load(&cli.config);
    let log_file = config
        .as_ref()
        .map_or_else(|_| Config::default().log_file, |c| c.log_file.clone());
    logging::init(&log_file);

    info!(
        "Running {} {}",
        env!("CARGO_CRATE_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = config.with_context(|| format!("Couldn't load {}", cli.config.display()))?;

    let params = if let Some(path) = &cli.args_file {
        Params::from_args_file(path)
            .with_context(|| format!("Couldn't load arguments from {}", path.display()))?
    } else {
        cli.params
    };

    debug!("Parameters {params:?}");

    preflight()?;

    Ok(Context::new(
        params,
        config,
        Box::new(SystemRunner),
        Box::new(SysMounter),
    ))
}

/// Runs every installation step, in order. The first failure stops
/// everything, and leaves the system as it is.
fn run(ctx: &mut Context, summary: &mut Outcome) -> Result<(), anyhow::Error> {
    let request = ctx
        .params()
        .partition
        .as_deref()
        .map(LayoutRequest::from_str)
        .transpose()?;
    let partitioned = request.is_some();

    let mut host_tools = vec!["debootstrap"];
    if partitioned {
        host_tools.extend(["fai-setup-storage", "lvm2"]);
    }

    packages::ensure_installed(ctx, &host_tools, Scope::Host, false, summary)
        .context("Couldn't install the host tools")?;

    if let Some(request) = &request {
        info!("Partitioning with layout {request}");

        storage::partition(ctx, request, summary).context("Couldn't partition the drives")?;
        mounts::mount_fstab(ctx, summary).context("Couldn't mount the target filesystems")?;
    }

    bootstrap::bootstrap(ctx, summary).context("Couldn't bootstrap the base system")?;
    chroot::enter(ctx, summary).context("Couldn't prepare the target for chroot")?;

    let extra = ctx.params().packages.clone();
    if !extra.is_empty() {
        packages::ensure_installed(ctx, &extra, Scope::Target, true, summary)
            .context("Couldn't install the additional packages")?;
    }

    if ctx.params().kernel {
        bootloader::install(ctx, partitioned, summary)
            .context("Couldn't install the kernel and bootloader")?;
    }

    if let Some(password) = ctx.params().root_password.clone() {
        finalize::set_root_password(ctx, &password, summary)
            .context("Couldn't set the root password")?;
    } else {
        summary.msg("No root password given, leaving it alone");
    }

    finalize::write_interfaces(ctx, summary)
        .context("Couldn't write the network configuration")?;

    if partitioned {
        finalize::write_fstab(ctx, summary).context("Couldn't write the filesystem table")?;
    }

    chroot::leave(ctx, summary).context("Couldn't clean up the chroot")?;

    if ctx.params().reboot {
        if partitioned {
            mounts::unmount_fstab(ctx, summary)
                .context("Couldn't unmount the target filesystems")?;
        }

        finalize::schedule_reboot(ctx, summary).context("Couldn't schedule the reboot")?;
    }

    info!("Done");

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut summary = Outcome::default();

    let res = setup(cli).and_then(|mut ctx| run(&mut ctx, &mut summary));

    let (report, code) = match &res {
        Ok(()) => (Report::success(summary), ExitCode::SUCCESS),
        Err(e) => {
            error!("{e:#}");
            (Report::failure(summary, e), ExitCode::FAILURE)
        }
    };

    if let Err(e) = report.write() {
        error!("Couldn't write the report: {e}");
        return ExitCode::FAILURE;
    }

    code
}

#[cfg(test)]
mod pipeline_test {
    use std::fs;

    use test_log::test;

    use super::run;
    use crate::{context::Outcome, report::Report, testing::TestEnv};

    const FSTAB: &str = "\
# generated by setup-storage
/dev/sda1\t/boot\text4\trw\t0\t2
/dev/sda2\t/\text4\terrors=remount-ro\t0\t1
tmpfs\t/\ttmpfs\tdefaults\t0\t0
";

    const GRUB_MKCONFIG: &str = "#!/bin/sh\nset -e\n";

    fn partitioned_env() -> TestEnv {
        let mut env = TestEnv::new();
        env.params.partition = Some(String::from("auto"));
        env.params.root_password = Some(String::from("hunter2"));
        env.params.packages = vec![String::from("openssh-server")];
        env.params.reboot = true;

        env.add_drive("sda", 512, 1 << 20);
        env.write_layout("small");
        env.write_fstab(FSTAB);
        env.write_disk_vars("BOOT_DEVICE=${BOOT_DEVICE:-\"/dev/sda\"}\n");

        let sbin = env.target().join("usr/sbin");
        fs::create_dir_all(&sbin).unwrap();
        fs::write(sbin.join("grub-mkconfig"), GRUB_MKCONFIG).unwrap();

        env
    }

    #[test]
    fn test_existing_root() {
        let env = TestEnv::new();
        let mut ctx = env.context();
        let mut summary = Outcome::default();

        run(&mut ctx, &mut summary).unwrap();

        let programs = env.runner.programs();
        assert!(programs.contains(&String::from("debootstrap")));
        assert!(!programs.iter().any(|p| p == "setup-storage" || p.starts_with("grub")));
        assert!(!programs.iter().any(|p| p == "shutdown" || p == "chpasswd"));

        let target = env.target();
        assert!(target.join("etc/network/interfaces").exists());
        assert!(!target.join("etc/fstab").exists());
        assert!(!target.join("usr/sbin/policy-rc.d").exists());
        assert!(env.mounter.state().mounted.is_empty());
        assert!(summary.changed);
    }

    #[test]
    fn test_partitioned() {
        let env = partitioned_env();
        let mut ctx = env.context();
        let mut summary = Outcome::default();

        run(&mut ctx, &mut summary).unwrap();

        let programs = env.runner.programs();
        let position = |name: &str| programs.iter().position(|p| p == name).unwrap();
        assert!(position("setup-storage") < position("debootstrap"));
        assert!(position("debootstrap") < position("grub-mkconfig"));
        assert!(position("grub-install") < position("chpasswd"));
        assert_eq!(programs.last().map(String::as_str), Some("shutdown"));

        let target = env.target();
        let fstab = fs::read_to_string(target.join("etc/fstab")).unwrap();
        assert!(!fstab.contains("tmpfs"));
        assert!(fstab.contains("/dev/sda1\t/boot\text4\trw\t0\t2\n"));

        let state = env.mounter.state();
        assert!(state.mounted.is_empty());
        assert_eq!(state.unmounts.last(), Some(&target));
        assert_eq!(env.runner.count("apt-get", "update"), 1);
    }

    #[test]
    fn test_rerun() {
        let mut env = partitioned_env();
        env.params.reboot = false;
        env.params.root_password = None;

        let mut ctx = env.context();
        run(&mut ctx, &mut Outcome::default()).unwrap();
        let installs = env.runner.count("apt-get", "install");

        env.populate_target();
        run(&mut ctx, &mut Outcome::default()).unwrap();

        assert_eq!(env.runner.count("apt-get", "install"), installs);
        let bootstraps = env.runner.programs().iter().filter(|p| *p == "debootstrap").count();
        assert_eq!(bootstraps, 1);
    }

    #[test]
    fn test_invalid_layout_name() {
        let mut env = TestEnv::new();
        env.params.partition = Some(String::from(" "));
        let mut ctx = env.context();

        run(&mut ctx, &mut Outcome::default()).unwrap_err();
        assert!(env.runner.programs().is_empty());
    }

    #[test]
    fn test_failure_stops() {
        let env = partitioned_env();
        env.runner
            .state_mut()
            .failing
            .push(String::from("grub-install"));
        let mut ctx = env.context();
        let mut summary = Outcome::default();

        let err = run(&mut ctx, &mut summary).unwrap_err();
        assert!(format!("{err:#}").starts_with("Couldn't install the kernel and bootloader"));
        assert!(summary.changed);
        assert!(!env.runner.programs().iter().any(|p| p == "chpasswd"));

        // Nothing gets cleaned up
        assert!(env.target().join("usr/sbin/policy-rc.d").exists());
        assert!(!env.mounter.state().mounted.is_empty());
    }

    #[test]
    fn test_partial_step_reported() {
        let env = partitioned_env();
        for package in ["debootstrap", "fai-setup-storage", "lvm2"] {
            env.runner.install(false, package);
        }
        {
            let mut state = env.runner.state_mut();
            state
                .outputs
                .insert(String::from("lvs"), String::from("  /dev/vg0/root\n"));
            state.outputs.insert(
                String::from("lvremove"),
                String::from("Logical volume \"root\" successfully removed.\n"),
            );
            state.failing.push(String::from("setup-storage"));
        }
        let mut ctx = env.context();
        let mut summary = Outcome::default();

        let err = run(&mut ctx, &mut summary).unwrap_err();
        assert!(env.runner.programs().ends_with(&[
            String::from("lvs"),
            String::from("lvremove"),
            String::from("pvs"),
            String::from("setup-storage"),
        ]));

        let report = Report::failure(summary, &err);
        assert!(report.changed);
        assert!(report.stdout.contains("successfully removed"));
        assert!(report.stderr.ends_with("setup-storage failed\n"));
    }
}
