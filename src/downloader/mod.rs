//! Download engine: task model, quality profiles and the per-task yt-dlp executor

pub mod command;
pub mod executor;
pub mod process;
pub mod profile;
pub mod progress;
pub mod task;

// Re-export for convenience
pub use command::{DownloadOptions, ToolCommand};
pub use executor::{CancelHandle, ExecutionContext, TaskReporter};
pub use profile::{suggest_profile, ContentType, QualityProfile, QUALITY_PROFILES};
pub use progress::{parse_progress_line, ProgressLine};
pub use task::{CancelReason, DownloadTask, FailureKind, TaskStatus};
