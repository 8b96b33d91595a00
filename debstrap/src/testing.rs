use alloc::rc::Rc;
use core::cell::{Ref, RefCell, RefMut};
use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use types::DebstrapError;

use crate::{
    cmd::{Cmd, CmdOutput, Runner},
    config::Config,
    context::Context,
    mounts::Mounter,
    params::Params,
};

#[derive(Debug, Default)]
pub(crate) struct RunnerState {
    pub(crate) commands: Vec<Cmd>,

    /// Installed packages, and whether they are in the chroot
    pub(crate) installed: BTreeSet<(bool, String)>,

    /// Programs exiting with an error
    pub(crate) failing: Vec<String>,

    /// Standard output of the programs, by name
    pub(crate) outputs: HashMap<String, String>,
}

/// Records the commands and simulates a package database
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeRunner(Rc<RefCell<RunnerState>>);

impl FakeRunner {
    pub(crate) fn state(&self) -> Ref<'_, RunnerState> {
        self.0.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, RunnerState> {
        self.0.borrow_mut()
    }

    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.state().commands.iter().map(ToString::to_string).collect()
    }

    pub(crate) fn programs(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .map(|c| c.program().into_owned())
            .collect()
    }

    pub(crate) fn count(&self, program: &str, arg: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.program() == program && c.argv().iter().any(|a| a == arg))
            .count()
    }

    pub(crate) fn install(&self, chroot: bool, package: &str) {
        self.state_mut()
            .installed
            .insert((chroot, package.to_owned()));
    }
}

impl Runner for FakeRunner {
    fn run(&mut self, cmd: &Cmd) -> Result<CmdOutput, DebstrapError> {
        let mut state = self.0.borrow_mut();
        state.commands.push(cmd.clone());

        let program = cmd.program().into_owned();
        let argv: Vec<String> = cmd.argv().into_iter().map(|a| a.into_owned()).collect();
        let chroot = cmd.root().is_some();

        if state.failing.contains(&program) {
            return Ok(CmdOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{program} failed\n"),
            });
        }

        match program.as_str() {
            "dpkg-query" => {
                let package = argv.last().cloned().unwrap_or_default();

                if state.installed.contains(&(chroot, package.clone())) {
                    return Ok(CmdOutput {
                        code: Some(0),
                        stdout: String::from("install ok installed\t1.0-1\n"),
                        stderr: String::new(),
                    });
                }

                return Ok(CmdOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: format!("dpkg-query: no packages found matching {package}\n"),
                });
            }
            "apt-get" if argv.first().map(String::as_str) == Some("install") => {
                for package in argv.iter().skip(1).filter(|a| !a.starts_with('-')) {
                    state.installed.insert((chroot, package.clone()));
                }
            }
            _ => {}
        }

        Ok(CmdOutput {
            code: Some(0),
            stdout: state.outputs.get(&program).cloned().unwrap_or_default(),
            stderr: String::new(),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct MountState {
    /// Currently mounted directories
    pub(crate) mounted: Vec<PathBuf>,

    /// `device fstype target` of every mount, in order
    pub(crate) mounts: Vec<String>,

    /// `source target` of every bind mount, in order
    pub(crate) binds: Vec<String>,

    pub(crate) unmounts: Vec<PathBuf>,

    /// A mount point that can't be mounted
    pub(crate) fail_on: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FakeMounter(Rc<RefCell<MountState>>);

impl FakeMounter {
    pub(crate) fn state(&self) -> Ref<'_, MountState> {
        self.0.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, MountState> {
        self.0.borrow_mut()
    }

    fn check(&self, device: &str, target: &Path) -> Result<(), DebstrapError> {
        if self.state().fail_on.as_deref() == Some(target) {
            return Err(DebstrapError::Mount {
                device: device.to_owned(),
                target: target.to_path_buf(),
                err: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }

        Ok(())
    }
}

impl Mounter for FakeMounter {
    fn is_mounted(&self, target: &Path) -> Result<bool, DebstrapError> {
        Ok(self.state().mounted.iter().any(|m| m == target))
    }

    fn mount(&mut self, device: &str, target: &Path, fstype: &str) -> Result<(), DebstrapError> {
        self.check(device, target)?;

        let mut state = self.state_mut();
        state.mounted.push(target.to_path_buf());
        state
            .mounts
            .push(format!("{device} {fstype} {}", target.display()));

        Ok(())
    }

    fn bind(&mut self, source: &Path, target: &Path) -> Result<(), DebstrapError> {
        self.check(&source.display().to_string(), target)?;

        let mut state = self.state_mut();
        state.mounted.push(target.to_path_buf());
        state
            .binds
            .push(format!("{} {}", source.display(), target.display()));

        Ok(())
    }

    fn unmount_lazy(&mut self, target: &Path) -> Result<(), DebstrapError> {
        let mut state = self.state_mut();
        state.mounted.retain(|m| m != target);
        state.unmounts.push(target.to_path_buf());

        Ok(())
    }
}

/// A scratch directory holding the target root and the tool directories
#[derive(Debug)]
pub(crate) struct TestEnv {
    pub(crate) dir: TempDir,
    pub(crate) params: Params,
    pub(crate) config: Config,
    pub(crate) runner: FakeRunner,
    pub(crate) mounter: FakeMounter,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        for sub in ["target", "fai", "layouts", "sys/block"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }

        let params = Params {
            target: root.join("target"),
            ..Params::default()
        };

        let config = Config {
            layouts_dir: root.join("layouts"),
            fai_log_dir: root.join("fai"),
            disk_info: PathBuf::from("disk-info"),
            sysfs_block: root.join("sys/block"),
            log_file: root.join("debstrap.log"),
            ..Config::default()
        };

        Self {
            dir,
            params,
            config,
            runner: FakeRunner::default(),
            mounter: FakeMounter::default(),
        }
    }

    pub(crate) fn target(&self) -> PathBuf {
        self.params.target.clone()
    }

    pub(crate) fn write_fstab(&self, content: &str) {
        fs::write(self.config.fstab_path(), content).unwrap();
    }

    pub(crate) fn write_disk_vars(&self, content: &str) {
        fs::write(self.config.disk_vars_path(), content).unwrap();
    }

    pub(crate) fn write_layout(&self, name: &str) {
        fs::write(self.config.layouts_dir.join(name), "disk_config disk1\n").unwrap();
    }

    /// Fakes a sysfs entry for a drive
    pub(crate) fn add_drive(&self, name: &str, sector_size: u64, sectors: u64) {
        let dev = self.config.sysfs_block.join(name);
        fs::create_dir_all(dev.join("queue")).unwrap();
        fs::write(dev.join("queue/hw_sector_size"), format!("{sector_size}\n")).unwrap();
        fs::write(dev.join("size"), format!("{sectors}\n")).unwrap();

        let mut state = self.runner.state_mut();
        let names = state.outputs.entry(String::from("disk-info")).or_default();
        names.push_str(name);
        names.push('\n');
    }

    /// Pretends the base system is already there
    pub(crate) fn populate_target(&self) {
        let bin = self.target().join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("bash"), "").unwrap();
    }

    pub(crate) fn context(&self) -> Context {
        Context::new(
            self.params.clone(),
            self.config.clone(),
            Box::new(self.runner.clone()),
            Box::new(self.mounter.clone()),
        )
    }
}
