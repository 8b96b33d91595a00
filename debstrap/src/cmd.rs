use alloc::borrow::Cow;
use core::fmt;
use std::{
    ffi::{OsStr, OsString},
    io::{self, Write as _},
    os::unix::ffi::OsStrExt as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, trace};
use types::DebstrapError;

/// An external command to run, either on the host or inside a chroot
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    stdin: Option<String>,
    root: Option<PathBuf>,
}

impl Cmd {
    pub(crate) fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            ..Self::default()
        }
    }

    pub(crate) fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub(crate) fn env(mut self, key: impl AsRef<OsStr>, val: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), val.as_ref().to_os_string()));
        self
    }

    pub(crate) fn envs(mut self, envs: &[(&str, &str)]) -> Self {
        for (key, val) in envs {
            self = self.env(key, val);
        }
        self
    }

    /// Data written to the command standard input. It's never part of the
    /// displayed command line.
    pub(crate) fn stdin(mut self, data: &str) -> Self {
        self.stdin = Some(data.to_owned());
        self
    }

    /// Runs the command with its root directory set to `root`
    pub(crate) fn chroot(mut self, root: &Path) -> Self {
        self.root = Some(root.to_path_buf());
        self
    }

    /// Runs the command inside `root` if there's one, on the host otherwise
    pub(crate) fn maybe_chroot(self, root: Option<&Path>) -> Self {
        match root {
            Some(r) => self.chroot(r),
            None => self,
        }
    }

    pub(crate) fn program(&self) -> Cow<'_, str> {
        self.program.to_string_lossy()
    }

    #[cfg(test)]
    pub(crate) fn argv(&self) -> Vec<Cow<'_, str>> {
        self.args.iter().map(|a| a.to_string_lossy()).collect()
    }

    #[cfg(test)]
    pub(crate) fn env_value(&self, key: &str) -> Option<Cow<'_, str>> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.to_string_lossy())
    }

    pub(crate) fn stdin_data(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub(crate) fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn to_command(&self) -> Command {
        let mut command = if let Some(root) = self.root() {
            let mut command = Command::new("chroot");
            command.arg(root).arg(&self.program);
            command
        } else {
            Command::new(&self.program)
        };

        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        command
    }
}

/// Writes a word the way a POSIX shell would parse it back. Plain words
/// are left alone.
fn write_quoted(f: &mut fmt::Formatter<'_>, word: &OsStr) -> fmt::Result {
    if let Some(s) = word.to_str() {
        if !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"-_./:=+,@%".contains(&b))
        {
            return f.write_str(s);
        }
    }

    match shlex::bytes::try_quote(word.as_bytes()) {
        Ok(quoted) => f.write_str(&String::from_utf8_lossy(&quoted)),
        // Only NUL bytes can't be quoted, and exec would refuse them anyway
        Err(_err) => write!(f, "{word:?}"),
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, val) in &self.envs {
            write!(f, "{}=", key.to_string_lossy())?;
            write_quoted(f, val)?;
            f.write_str(" ")?;
        }

        if let Some(root) = self.root() {
            f.write_str("chroot ")?;
            write_quoted(f, root.as_os_str())?;
            f.write_str(" ")?;
        }

        write_quoted(f, &self.program)?;

        for arg in &self.args {
            f.write_str(" ")?;
            write_quoted(f, arg)?;
        }

        Ok(())
    }
}

/// What's left of a command once it has run
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct CmdOutput {
    /// The exit code, or `None` if the command was killed by a signal
    pub(crate) code: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl CmdOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub(crate) fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => String::from("terminated by signal"),
        }
    }

    /// Turns a non-zero exit into an error carrying the command line and
    /// its output
    pub(crate) fn check(self, cmd: &Cmd) -> Result<Self, DebstrapError> {
        if self.success() {
            return Ok(self);
        }

        Err(DebstrapError::CommandFailed {
            command: cmd.to_string(),
            status: self.status(),
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Executes external commands
pub(crate) trait Runner: fmt::Debug {
    /// Runs the command to completion and captures its output. A non-zero
    /// exit isn't an error at this level.
    fn run(&mut self, cmd: &Cmd) -> Result<CmdOutput, DebstrapError>;
}

/// Runs the commands on the machine we're running on
#[derive(Debug, Default)]
pub(crate) struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&mut self, cmd: &Cmd) -> Result<CmdOutput, DebstrapError> {
        debug!("Running {cmd}");

        let mut child = cmd.to_command().spawn().map_err(|e| {
            DebstrapError::Io(io::Error::new(
                e.kind(),
                format!("Couldn't start {}: {e}", cmd.program()),
            ))
        })?;

        if let Some(data) = cmd.stdin_data() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;

        let output = CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        trace!("{} finished with {}", cmd.program(), output.status());

        Ok(output)
    }
}
