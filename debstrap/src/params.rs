use std::{fs::File, io::BufReader, path::{Path, PathBuf}};

use clap::{ArgAction, Args};
use log::debug;
use serde::Deserialize;
use types::{Architecture, DebstrapError};

pub(crate) const DEFAULT_TARGET: &str = "/target";
pub(crate) const DEFAULT_DISTRIBUTION: &str = "bookworm";
pub(crate) const DEFAULT_MIRROR: &str = "http://deb.debian.org/debian";
pub(crate) const DEFAULT_INTERFACE: &str = "eth0";

/// What to install, and where
#[derive(Args, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    #[arg(long, default_value = DEFAULT_TARGET, help = "Target Root Directory")]
    pub(crate) target: PathBuf,

    #[arg(long, value_enum, default_value_t, help = "Target Architecture")]
    pub(crate) arch: Architecture,

    #[arg(long, default_value = DEFAULT_DISTRIBUTION, help = "Distribution Suite")]
    pub(crate) distribution: String,

    #[arg(long, default_value = DEFAULT_MIRROR, help = "Package Repository URL")]
    pub(crate) mirror: String,

    #[arg(long, help = "Partition Layout Name, or \"auto\"")]
    pub(crate) partition: Option<String>,

    #[arg(long, default_value_t = true, action = ArgAction::Set, help = "Install a Kernel and Bootloader")]
    pub(crate) kernel: bool,

    #[arg(long = "package", value_delimiter = ',', help = "Additional Packages")]
    pub(crate) packages: Vec<String>,

    #[arg(long, help = "Root Password")]
    pub(crate) root_password: Option<String>,

    #[arg(long, default_value = DEFAULT_INTERFACE, help = "Primary Network Interface")]
    pub(crate) interface: String,

    #[arg(long, help = "Reboot Once Done")]
    pub(crate) reboot: bool,

    #[arg(long, help = "Reject Malformed Filesystem Table Lines")]
    pub(crate) strict_fstab: bool,
}

impl Params {
    /// Loads the parameters from a JSON arguments file
    pub(crate) fn from_args_file(path: &Path) -> Result<Self, DebstrapError> {
        debug!("Loading arguments from {}", path.display());

        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            target: PathBuf::from(DEFAULT_TARGET),
            arch: Architecture::default(),
            distribution: String::from(DEFAULT_DISTRIBUTION),
            mirror: String::from(DEFAULT_MIRROR),
            partition: None,
            kernel: true,
            packages: Vec::new(),
            root_password: None,
            interface: String::from(DEFAULT_INTERFACE),
            reboot: false,
            strict_fstab: false,
        }
    }
}

// The root password must never end up in the logs
impl core::fmt::Debug for Params {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Params")
            .field("target", &self.target)
            .field("arch", &self.arch)
            .field("distribution", &self.distribution)
            .field("mirror", &self.mirror)
            .field("partition", &self.partition)
            .field("kernel", &self.kernel)
            .field("packages", &self.packages)
            .field("root_password", &self.root_password.as_ref().map(|_| "********"))
            .field("interface", &self.interface)
            .field("reboot", &self.reboot)
            .field("strict_fstab", &self.strict_fstab)
            .finish()
    }
}
