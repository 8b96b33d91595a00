use std::path::Path;

use debstrap_fstab::{Fstab, ParseMode};
use log::debug;
use once_cell::unsync::OnceCell;
use types::DebstrapError;

use crate::{
    cmd::{Cmd, CmdOutput, Runner},
    config::Config,
    mounts::Mounter,
    params::Params,
};

/// What the steps did so far
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) changed: bool,
    pub(crate) msgs: Vec<String>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl Outcome {
    pub(crate) fn msg(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!("{msg}");
        self.msgs.push(msg);
    }

    /// Records a change to the system, along with its description
    pub(crate) fn change(&mut self, msg: impl Into<String>) {
        self.changed = true;
        self.msg(msg);
    }

    pub(crate) fn record(&mut self, output: &CmdOutput) {
        self.stdout.push_str(&output.stdout);
        self.stderr.push_str(&output.stderr);
    }
}

/// Everything a step needs to know about the current run
#[derive(Debug)]
pub(crate) struct Context {
    params: Params,
    config: Config,
    runner: Box<dyn Runner>,
    mounter: Box<dyn Mounter>,
    fstab: OnceCell<Fstab>,
}

impl Context {
    pub(crate) fn new(
        params: Params,
        config: Config,
        runner: Box<dyn Runner>,
        mounter: Box<dyn Mounter>,
    ) -> Self {
        Self {
            params,
            config,
            runner,
            mounter,
            fstab: OnceCell::new(),
        }
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// The root directory of the system we install
    pub(crate) fn target(&self) -> &Path {
        &self.params.target
    }

    pub(crate) fn mounter(&mut self) -> &mut dyn Mounter {
        self.mounter.as_mut()
    }

    /// Runs a command and records its output, whatever its exit status
    pub(crate) fn run_unchecked(
        &mut self,
        cmd: &Cmd,
        outcome: &mut Outcome,
    ) -> Result<CmdOutput, DebstrapError> {
        let output = self.runner.run(cmd)?;
        outcome.record(&output);

        Ok(output)
    }

    /// Runs a command and records its output. A non-zero exit is an error.
    pub(crate) fn run(
        &mut self,
        cmd: &Cmd,
        outcome: &mut Outcome,
    ) -> Result<CmdOutput, DebstrapError> {
        self.run_unchecked(cmd, outcome)?.check(cmd)
    }

    /// Returns the table generated by the disk layout tool. It's only
    /// parsed the first time.
    pub(crate) fn fstab(&self) -> Result<&Fstab, DebstrapError> {
        self.fstab.get_or_try_init(|| {
            let mode = if self.params.strict_fstab {
                ParseMode::Strict
            } else {
                ParseMode::Lenient
            };

            Fstab::from_file(&self.config.fstab_path(), mode)
        })
    }
}
