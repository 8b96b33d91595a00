use std::io::{self, Write as _};

use serde::Serialize;
use types::DebstrapError;

use crate::context::Outcome;

/// The result of a run, as expected by the orchestration tool
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) changed: bool,
    pub(crate) failed: bool,
    pub(crate) msg: String,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl Report {
    pub(crate) fn success(outcome: Outcome) -> Self {
        Self {
            changed: outcome.changed,
            failed: false,
            msg: outcome.msgs.join("\n"),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        }
    }

    /// The output of the failed command is already part of the outcome,
    /// since every command records it before its status is checked.
    pub(crate) fn failure(outcome: Outcome, err: &anyhow::Error) -> Self {
        Self {
            changed: outcome.changed,
            failed: true,
            msg: format!("{err:#}"),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        }
    }

    /// Writes the report on stdout, as a single JSON document
    pub(crate) fn write(&self) -> Result<(), DebstrapError> {
        let mut out = io::stdout().lock();

        serde_json::to_writer(&mut out, self)?;
        writeln!(out)?;
        out.flush()?;

        Ok(())
    }
}
