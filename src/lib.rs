//! Phoenix library: a bounded-concurrency download queue driving yt-dlp

pub mod cli;
pub mod downloader;
pub mod queue;
pub mod utils;

// Re-export main types for easier use
pub use downloader::{DownloadTask, QualityProfile, TaskStatus, ToolCommand};
pub use queue::{Downloader, DownloaderConfig, UpdateEvent, UpdateKind};
pub use utils::{AppSettings, PhoenixError, SettingsStore};
