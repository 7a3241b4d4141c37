//! Logging setup: human-readable stderr output plus a plain log file

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Install the global subscriber. The log file is truncated on every start;
/// if it cannot be opened only stderr logging is set up.
pub fn init(verbose: bool, log_dir: &Path) {
    let console_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };

    let file_layer = open_log_file(log_dir).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::DEBUG)
    });

    let registry = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_level),
        )
        .with(file_layer);

    if let Err(e) = registry.try_init() {
        eprintln!("Logging already initialized: {}", e);
    }
}

fn open_log_file(log_dir: &Path) -> Option<File> {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Warning: cannot create log directory {:?}: {}", log_dir, e);
        return None;
    }
    let path = log_dir.join(super::paths::LOG_FILE_NAME);
    match File::create(&path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: cannot open log file {:?}: {}", path, e);
            None
        }
    }
}
