use std::{collections::HashMap, fs, path::Path};

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use types::DebstrapError;

pub(crate) const BOOT_DEVICE_KEY: &str = "BOOT_DEVICE";

// NAME=${NAME:-"value"}, with optional quotes
static ASSIGNMENT: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r#"^([A-Za-z_][A-Za-z0-9_]*)=\$\{[A-Za-z_][A-Za-z0-9_]*:-"?([^"}]*)"?\}$"#)
});

/// Parses the shell variables written by the disk layout tool
pub(crate) fn parse(text: &str) -> Result<HashMap<String, String>, DebstrapError> {
    let regex = ASSIGNMENT
        .as_ref()
        .map_err(|e| DebstrapError::Regex(e.clone()))?;

    Ok(text
        .lines()
        .filter_map(|line| {
            let caps = regex.captures(line.trim())?;
            trace!("Variable {} = {}", &caps[1], &caps[2]);

            Some((caps[1].to_owned(), caps[2].to_owned()))
        })
        .collect())
}

/// Returns the drive the bootloader has to be installed on
pub(crate) fn boot_device(path: &Path) -> Result<String, DebstrapError> {
    let vars = parse(&fs::read_to_string(path)?)?;

    let device = vars
        .get(BOOT_DEVICE_KEY)
        .cloned()
        .ok_or(DebstrapError::MissingKey {
            key: String::from(BOOT_DEVICE_KEY),
            file: path.to_path_buf(),
        })?;

    debug!("Boot device is {device}");

    Ok(device)
}
