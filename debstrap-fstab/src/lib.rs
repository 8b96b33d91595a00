#![doc = include_str!("../README.md")]

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use types::DebstrapError;

/// Directory used by entries that aren't mounted, like swap
pub const NO_MOUNT_POINT: &str = "none";

const TMPFS: &str = "tmpfs";

const FSTAB_HEADER: &str = "# <file system>\t<mount point>\t<type>\t<options>\t<dump>\t<pass>";

static FSTAB_LINE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\d+)\s+(\d+)$"));

fn fstab_line_regex() -> Result<&'static Regex, DebstrapError> {
    FSTAB_LINE.as_ref().map_err(|e| DebstrapError::Regex(e.clone()))
}

/// How to deal with lines that don't follow the six fields format
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ParseMode {
    /// Malformed lines are logged and dropped
    #[default]
    Lenient,

    /// Malformed lines are an error
    Strict,
}

/// A single line of the table
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FstabEntry {
    /// The block device, label, UUID or pseudo filesystem name
    pub device: String,

    /// The mount point, or `none`
    pub dir: String,

    /// The filesystem type
    pub fstype: String,

    /// Comma-separated mount options
    pub options: String,

    /// The dump(8) flag
    pub dump: String,

    /// The fsck(8) pass number
    pub pass: String,
}

impl FstabEntry {
    /// Creates a new entry
    #[must_use]
    pub fn new(
        device: &str,
        dir: &str,
        fstype: &str,
        options: &str,
        dump: &str,
        pass: &str,
    ) -> Self {
        Self {
            device: device.to_owned(),
            dir: dir.to_owned(),
            fstype: fstype.to_owned(),
            options: options.to_owned(),
            dump: dump.to_owned(),
            pass: pass.to_owned(),
        }
    }

    /// Returns true if the entry needs to be mounted somewhere
    #[must_use]
    pub fn has_mount_point(&self) -> bool {
        self.dir != NO_MOUNT_POINT
    }

    /// Returns true if the entry is a tmpfs, which gets mounted by type
    #[must_use]
    pub fn is_tmpfs(&self) -> bool {
        self.fstype == TMPFS
    }

    /// Returns true if the entry is a root filesystem in RAM. Those come from
    /// a live system and must not end up in an installed system.
    #[must_use]
    pub fn is_tmpfs_root(&self) -> bool {
        self.device == TMPFS && self.dir == "/" && self.fstype == TMPFS
    }

    /// Returns the mount point, relative to the given root directory
    #[must_use]
    pub fn target_in(&self, root: &Path) -> PathBuf {
        let relative = self.dir.trim_start_matches('/');

        if relative.is_empty() {
            root.to_path_buf()
        } else {
            root.join(relative)
        }
    }

    fn render(&self) -> String {
        [
            self.device.as_str(),
            self.dir.as_str(),
            self.fstype.as_str(),
            self.options.as_str(),
            self.dump.as_str(),
            self.pass.as_str(),
        ]
        .join("\t")
    }
}

/// A parsed filesystem table, in the order of the original file
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Fstab {
    entries: Vec<FstabEntry>,
}

impl Fstab {
    /// Parses the table text
    ///
    /// Empty lines and comments are skipped.
    ///
    /// # Errors
    ///
    /// If a line is malformed and the mode is [`ParseMode::Strict`]
    pub fn parse(text: &str, mode: ParseMode) -> Result<Self, DebstrapError> {
        let regex = fstab_line_regex()?;
        let mut entries = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(caps) = regex.captures(line) else {
                match mode {
                    ParseMode::Lenient => {
                        warn!("Ignoring malformed table line {}: {line}", idx + 1);
                        continue;
                    }
                    ParseMode::Strict => {
                        return Err(DebstrapError::MalformedLine {
                            line_no: idx + 1,
                            line: line.to_owned(),
                        })
                    }
                }
            };

            let entry = FstabEntry::new(&caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]);
            trace!("Found entry {entry:?}");

            entries.push(entry);
        }

        debug!("Parsed {} table entries", entries.len());

        Ok(Self { entries })
    }

    /// Reads and parses a table file
    ///
    /// # Errors
    ///
    /// If the file can't be read, or if [`Fstab::parse`] fails
    pub fn from_file(path: &Path, mode: ParseMode) -> Result<Self, DebstrapError> {
        debug!("Parsing table {}", path.display());

        Self::parse(&fs::read_to_string(path)?, mode)
    }

    /// Returns the entries, in the order they were found
    #[must_use]
    pub fn entries(&self) -> &[FstabEntry] {
        &self.entries
    }

    /// Returns the entries to mount, parents before their children
    #[must_use]
    pub fn mount_order(&self) -> Vec<&FstabEntry> {
        let mut entries: Vec<&FstabEntry> =
            self.entries.iter().filter(|e| e.has_mount_point()).collect();

        entries.sort_by(|a, b| Path::new(&a.dir).cmp(Path::new(&b.dir)));
        entries
    }

    /// Returns the entries to unmount, children before their parents
    #[must_use]
    pub fn unmount_order(&self) -> Vec<&FstabEntry> {
        let mut entries = self.mount_order();
        entries.reverse();
        entries
    }

    /// Renders the table to install in the target system
    ///
    /// The root filesystems in RAM are left out.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(FSTAB_HEADER);
        out.push('\n');

        for entry in &self.entries {
            if entry.is_tmpfs_root() {
                debug!("Skipping tmpfs root entry");
                continue;
            }

            out.push_str(&entry.render());
            out.push('\n');
        }

        out
    }
}

// Spaces, tabs, newlines and backslashes are octal-escaped by the kernel
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] == b'\\' {
            if let Some(v) = field
                .get(idx + 1..idx + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(v);
                idx += 4;
                continue;
            }
        }

        out.push(bytes[idx]);
        idx += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// The mount points currently in use
#[derive(Clone, Debug, Default)]
pub struct MountTable {
    targets: Vec<PathBuf>,
}

impl MountTable {
    /// Location of the mount table of the current process
    pub const PROC_MOUNTS: &'static str = "/proc/self/mounts";

    /// Parses a mount table, in the `/proc/self/mounts` format
    ///
    /// # Errors
    ///
    /// If the line expression can't be built
    pub fn parse(text: &str) -> Result<Self, DebstrapError> {
        let table = Fstab::parse(text, ParseMode::Lenient)?;

        Ok(Self {
            targets: table
                .entries
                .iter()
                .map(|e| PathBuf::from(unescape_mount_field(&e.dir)))
                .collect(),
        })
    }

    /// Reads the mount table of the current process
    ///
    /// # Errors
    ///
    /// If the mount table can't be read
    pub fn current() -> Result<Self, DebstrapError> {
        Self::parse(&fs::read_to_string(Self::PROC_MOUNTS)?)
    }

    /// Returns true if something is mounted on the given directory
    #[must_use]
    pub fn is_mounted(&self, path: &Path) -> bool {
        self.targets.iter().any(|t| t == path)
    }
}

#[cfg(test)]
use {tempfile as _, test_log as _};
