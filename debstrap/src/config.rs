use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use debstrap_layout::{PartitionThreshold, ThresholdTable};
use log::debug;
use serde::Deserialize;
use types::DebstrapError;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/debstrap/config.toml";

/// Site configuration, shared by every run on a machine
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    /// Directory holding the disk layout descriptors
    pub(crate) layouts_dir: PathBuf,

    /// Directory the disk layout tool writes its tables to
    pub(crate) fai_log_dir: PathBuf,

    /// Helper listing the drives of the machine
    pub(crate) disk_info: PathBuf,

    pub(crate) sysfs_block: PathBuf,

    pub(crate) log_file: PathBuf,

    #[serde(rename = "threshold")]
    pub(crate) thresholds: Vec<PartitionThreshold>,
}

impl Config {
    /// Loads the configuration file. A missing file means the built-in
    /// defaults.
    pub(crate) fn load(path: &Path) -> Result<Self, DebstrapError> {
        let content = match fs::read_to_string(path) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No configuration file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(toml::from_str(&content)?)
    }

    pub(crate) fn threshold_table(&self) -> ThresholdTable {
        ThresholdTable::new(self.thresholds.clone())
    }

    /// The table of filesystems generated by the disk layout tool
    pub(crate) fn fstab_path(&self) -> PathBuf {
        self.fai_log_dir.join("fstab")
    }

    /// The shell variables generated by the disk layout tool
    pub(crate) fn disk_vars_path(&self) -> PathBuf {
        self.fai_log_dir.join("disk_var.sh")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layouts_dir: PathBuf::from("/etc/debstrap/layouts"),
            fai_log_dir: PathBuf::from("/tmp/fai"),
            disk_info: PathBuf::from("/usr/lib/fai/disk-info"),
            sysfs_block: PathBuf::from("/sys/block"),
            log_file: PathBuf::from("/var/log/debstrap.log"),
            thresholds: ThresholdTable::default().thresholds().to_vec(),
        }
    }
}
