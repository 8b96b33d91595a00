#![doc = include_str!("../README.md")]

use core::{fmt, str::FromStr};
use std::{fs, io, path::Path};

use log::{debug, trace};
use serde::Deserialize;
use types::DebstrapError;

/// Sector size assumed when the kernel doesn't report one
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// The layout name that requests an automatic selection
pub const AUTO_LAYOUT: &str = "auto";

const GIB: u64 = 1 << 30;

/// A block device found by the disk inventory
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Drive {
    name: String,
    sector_size: u64,
    sectors: u64,
}

impl Drive {
    /// Creates a new drive, using the default sector size and a zero
    /// sector count for any unknown attribute.
    #[must_use]
    pub fn new(name: &str, sector_size: Option<u64>, sectors: Option<u64>) -> Self {
        Self {
            name: name.to_owned(),
            sector_size: sector_size.unwrap_or(DEFAULT_SECTOR_SIZE),
            sectors: sectors.unwrap_or(0),
        }
    }

    /// Reads the drive attributes from sysfs
    ///
    /// `sysfs_block` is the directory holding one entry per block device,
    /// usually `/sys/block`. Missing attributes fall back to their defaults.
    ///
    /// # Errors
    ///
    /// If an attribute exists but can't be read or isn't a number
    pub fn from_sysfs(sysfs_block: &Path, name: &str) -> Result<Self, DebstrapError> {
        let dev_dir = sysfs_block.join(name);

        let sector_size = read_sysfs_u64(&dev_dir.join("queue").join("hw_sector_size"))?;
        let sectors = read_sysfs_u64(&dev_dir.join("size"))?;

        debug!(
            "Drive {name}: sector size {:?}, {:?} sectors",
            sector_size, sectors
        );

        Ok(Self::new(name, sector_size, sectors))
    }

    /// Returns the kernel name of the drive (`sda`, `nvme0n1`, ...)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the size of a sector, in bytes
    #[must_use]
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Returns the number of sectors
    #[must_use]
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    /// Returns the physical size of the drive, in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.sector_size.saturating_mul(self.sectors)
    }
}

fn read_sysfs_u64(path: &Path) -> Result<Option<u64>, DebstrapError> {
    let content = match fs::read_to_string(path) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!("Attribute {} not found", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    content.trim().parse::<u64>().map(Some).map_err(|_err| {
        DebstrapError::Custom(format!(
            "Invalid numeric attribute in {}: {}",
            path.display(),
            content.trim()
        ))
    })
}

/// Parses the output of the disk inventory helper into a list of drive names
///
/// The helper prints the drive names separated by whitespace, usually one per line.
#[must_use]
pub fn parse_drive_names(output: &str) -> Vec<String> {
    output.split_whitespace().map(str::to_owned).collect()
}

/// A capacity threshold, associated to a layout descriptor name
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PartitionThreshold {
    /// Minimum physical size of the drive, in bytes
    pub min_size: u64,

    /// Name of the layout descriptor to use
    pub layout: String,
}

impl PartitionThreshold {
    /// Creates a new threshold
    #[must_use]
    pub fn new(min_size: u64, layout: &str) -> Self {
        Self {
            min_size,
            layout: layout.to_owned(),
        }
    }
}

/// An ordered table of capacity thresholds
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdTable {
    thresholds: Vec<PartitionThreshold>,
}

impl ThresholdTable {
    /// Creates a new table. The thresholds can be given in any order.
    #[must_use]
    pub fn new(mut thresholds: Vec<PartitionThreshold>) -> Self {
        thresholds.sort_by(|a, b| b.min_size.cmp(&a.min_size));

        Self { thresholds }
    }

    /// Returns the thresholds, largest first
    #[must_use]
    pub fn thresholds(&self) -> &[PartitionThreshold] {
        &self.thresholds
    }

    /// Selects the layout for a drive of the given size
    ///
    /// # Errors
    ///
    /// If no threshold is lower than or equal to the size
    pub fn select(&self, size: u64) -> Result<&str, DebstrapError> {
        self.thresholds
            .iter()
            .find(|t| {
                trace!("Threshold {} for layout {}", t.min_size, t.layout);
                t.min_size <= size
            })
            .map(|t| {
                debug!("Drive of {size} bytes uses layout {}", t.layout);
                t.layout.as_str()
            })
            .ok_or(DebstrapError::NoAutomaticLayout { size })
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::new(vec![
            PartitionThreshold::new(250 * GIB, "large"),
            PartitionThreshold::new(32 * GIB, "medium"),
            PartitionThreshold::new(0, "small"),
        ])
    }
}

/// The partition layout requested by the user
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LayoutRequest {
    /// Pick the layout from the first drive capacity
    Auto,

    /// Use the layout descriptor with this name
    Named(String),
}

impl LayoutRequest {
    /// Resolves the request into a layout descriptor name
    ///
    /// # Errors
    ///
    /// If the selection is automatic and either no drive was found or no
    /// threshold matches the first drive.
    pub fn resolve<'a>(
        &'a self,
        drives: &[Drive],
        table: &'a ThresholdTable,
    ) -> Result<&'a str, DebstrapError> {
        match self {
            Self::Named(name) => Ok(name.as_str()),
            Self::Auto => {
                let drive = drives.first().ok_or(DebstrapError::Custom(String::from(
                    "No drive found for automatic partitioning",
                )))?;

                debug!(
                    "Selecting layout for drive {} ({} bytes)",
                    drive.name(),
                    drive.size()
                );

                table.select(drive.size())
            }
        }
    }
}

impl FromStr for LayoutRequest {
    type Err = DebstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err(DebstrapError::Custom(String::from(
                "Empty partition layout name",
            )));
        }

        // Layouts are files of the layouts directory, nothing else
        if s.contains('/') || s == "." || s == ".." {
            return Err(DebstrapError::Custom(format!(
                "Invalid partition layout name: {s}"
            )));
        }

        Ok(if s == AUTO_LAYOUT {
            Self::Auto
        } else {
            Self::Named(s.to_owned())
        })
    }
}

impl fmt::Display for LayoutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str(AUTO_LAYOUT),
            Self::Named(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
use {tempfile as _, test_log as _, toml as _};
