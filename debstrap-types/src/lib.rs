#![doc = include_str!("../README.md")]
#![allow(clippy::multiple_crate_versions)]

extern crate alloc;

use alloc::fmt;
use core::str::FromStr;
use std::{env::consts, io, path::PathBuf};

use serde::Deserialize;

/// Representation of a Debian architecture
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, clap::ValueEnum)]
#[clap(rename_all = "lower")]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// ARM's AARCH32 Architecture, hard-float ABI
    Armhf,

    /// ARM's AARCH64 Architecture
    Arm64,

    /// Intel's x86 Architecture
    I386,

    /// Intel's X86-64 Architecture
    Amd64,
}

impl Architecture {
    /// Creates our architecture enum from the Rust architecture name
    ///
    /// # Errors
    ///
    /// If the given architecture is unknown
    pub fn from_rust_str(s: &str) -> Result<Self, DebstrapError> {
        Ok(match s {
            "aarch64" => Self::Arm64,
            "arm" => Self::Armhf,
            "x86_64" => Self::Amd64,
            "x86" => Self::I386,
            _ => {
                return Err(DebstrapError::Custom(format!(
                    "Unknown architecture: {s}"
                )))
            }
        })
    }

    /// Returns the Debian architecture name, as used by dpkg and debootstrap
    #[must_use]
    pub fn as_deb_str(self) -> &'static str {
        match self {
            Self::Armhf => "armhf",
            Self::Arm64 => "arm64",
            Self::I386 => "i386",
            Self::Amd64 => "amd64",
        }
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture::from_rust_str(consts::ARCH).unwrap_or(Self::Amd64)
    }
}

impl FromStr for Architecture {
    type Err = DebstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "armhf" => Self::Armhf,
            "arm64" => Self::Arm64,
            "i386" => Self::I386,
            "amd64" => Self::Amd64,
            _ => {
                return Err(DebstrapError::Custom(format!(
                    "Unknown Debian architecture: {s}"
                )))
            }
        })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_deb_str())
    }
}

/// Our Error Type
#[derive(thiserror::Error, Debug)]
pub enum DebstrapError {
    /// An error has occurred when accessing the local filesystem or files
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    /// An error has occurred when parsing JSON data
    #[error("JSON Parsing Failure: {0}")]
    Json(#[from] serde_json::Error),

    /// An error has occurred when parsing TOML configuration files
    #[error("Configuration File Format Error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A line parsing expression failed to build
    #[error("Invalid Regular Expression: {0}")]
    Regex(#[from] regex::Error),

    /// An external command exited with a non-zero status
    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// The full command line
        command: String,

        /// The exit status, as reported by the OS
        status: String,

        /// Captured standard output
        stdout: String,

        /// Captured standard error
        stderr: String,
    },

    /// A required key is missing from a generated file
    #[error("Key {key} not found in {}", file.display())]
    MissingKey {
        /// The key we looked for
        key: String,

        /// The file it was supposed to be in
        file: PathBuf,
    },

    /// No partition layout threshold matches the drive size
    #[error("No automatic partition found for a drive of {size} bytes")]
    NoAutomaticLayout {
        /// Physical size of the drive, in bytes
        size: u64,
    },

    /// A line didn't match the expected table format
    #[error("Malformed line {line_no}: {line}")]
    MalformedLine {
        /// 1-based line number in the source text
        line_no: usize,

        /// The offending line
        line: String,
    },

    /// A mount or unmount operation failed
    #[error("Couldn't mount {device} on {}: {err}", target.display())]
    Mount {
        /// The mounted device or filesystem name
        device: String,

        /// The mount point
        target: PathBuf,

        /// The underlying OS error
        err: io::Error,
    },

    /// An unknown error occurred
    #[error("Error: {0}")]
    Custom(String),
}
