use std::{fs::OpenOptions, io::Write as _, path::Path};

use env_logger::{Builder, Env, Target};
use jiff::Timestamp;
use log::warn;

/// Sets up the logger. Stdout belongs to the report, so the logs go to the
/// log file, or to stderr if it can't be opened.
pub(crate) fn init(log_file: &Path) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            Timestamp::now(),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let file = OpenOptions::new().create(true).append(true).open(log_file);
    let open_error = match file {
        Ok(f) => {
            builder.target(Target::Pipe(Box::new(f)));
            None
        }
        Err(e) => {
            builder.target(Target::Stderr);
            Some(e)
        }
    };

    builder.init();

    if let Some(e) = open_error {
        warn!("Couldn't open {}: {e}", log_file.display());
    }
}
