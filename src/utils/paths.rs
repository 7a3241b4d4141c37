//! Per-user path resolution
//!
//! All paths are resolved from the user's home directory, never relative
//! to the working directory, so they stay correct however the program is
//! launched.

use std::path::PathBuf;
use tracing::{debug, warn};

/// Directory name under the home directory holding settings and logs
pub const CONFIG_DIR_NAME: &str = ".blackbox_dhq_phoenix_v3";
pub const SETTINGS_FILE_NAME: &str = "app_settings.json";
pub const LOG_FILE_NAME: &str = "phoenix.log";

/// Default download folder name
const OUTPUT_DIR_NAME: &str = "BlackBox_Phoenix_Downloads";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using temp dir");
        std::env::temp_dir()
    })
}

/// Returns: `$HOME/.blackbox_dhq_phoenix_v3/`
pub fn config_dir() -> PathBuf {
    let dir = home_dir().join(CONFIG_DIR_NAME);
    debug!("Config directory: {:?}", dir);
    dir
}

/// Returns: `$HOME/.blackbox_dhq_phoenix_v3/app_settings.json`
pub fn settings_file_path() -> PathBuf {
    config_dir().join(SETTINGS_FILE_NAME)
}

/// Returns: `$HOME/.blackbox_dhq_phoenix_v3/logs/`
pub fn log_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Returns: `$HOME/Desktop/BlackBox_Phoenix_Downloads`, or the Downloads
/// folder when there is no desktop directory
pub fn default_output_dir() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| home_dir().join("Downloads"))
        .join(OUTPUT_DIR_NAME)
}
