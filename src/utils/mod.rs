//! Utility modules for error handling, paths and configuration

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

// Re-export for convenience
pub use config::{AppSettings, SettingsStore};
pub use error::PhoenixError;
pub use paths::{config_dir, default_output_dir, log_dir, settings_file_path};
