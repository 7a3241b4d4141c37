//! Download task model and its lifecycle state machine

use crate::utils::error::PhoenixError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Shown in place of the output file when yt-dlp never reported one we could find.
pub const UNKNOWN_FILENAME: &str = "unknown";

/// One user-requested download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: String,
    pub url: String,
    pub quality_profile_key: String,
    pub output_dir: PathBuf,
    pub status: TaskStatus,
    pub progress_str: String,
    pub progress_val: f64,
    pub speed_str: String,
    pub eta_str: String,
    pub final_filename: Option<PathBuf>,
    pub error_message: Option<String>,
    /// Pid of the running yt-dlp process, cleared once it exits
    pub pid: Option<u32>,
    pub added_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Create a new download task
    pub fn new(
        url: impl Into<String>,
        quality_profile_key: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            quality_profile_key: quality_profile_key.into(),
            output_dir: output_dir.into(),
            status: TaskStatus::Waiting,
            progress_str: "0.0%".to_string(),
            progress_val: 0.0,
            speed_str: String::new(),
            eta_str: String::new(),
            final_filename: None,
            error_message: None,
            pid: None,
            added_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), PhoenixError> {
        if !self.status.can_transition_to(&next) {
            return Err(PhoenixError::InvalidTransition {
                from: self.status.clone(),
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Reset progress fields ahead of a fresh run
    pub fn reset_progress(&mut self) {
        self.progress_str = "0.0%".to_string();
        self.progress_val = 0.0;
        self.clear_transfer_info();
    }

    pub fn clear_transfer_info(&mut self) {
        self.speed_str.clear();
        self.eta_str.clear();
    }

    /// Output file for display
    pub fn display_filename(&self) -> String {
        self.final_filename
            .as_deref()
            .map(Path::to_string_lossy)
            .map(|name| name.into_owned())
            .unwrap_or_else(|| UNKNOWN_FILENAME.to_string())
    }
}

/// Task status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Waiting,
    Queued,
    Preparing,
    Downloading,
    Completed,
    Failed(FailureKind),
    Cancelled(CancelReason),
}

/// Why a task failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// yt-dlp exited with a non-zero code
    ToolExit,
    /// yt-dlp (or ffmpeg) could not be launched at all
    ToolMissing,
    /// Anything else that went wrong inside the executor
    Internal,
}

/// Who asked for the cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    User,
    Shutdown,
}

impl TaskStatus {
    /// Transition table. Terminal states accept nothing.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Waiting, Queued) => true,
            (Queued, Preparing) => true,
            (Preparing, Downloading) => true,
            (Downloading, Completed) => true,
            (Queued | Preparing | Downloading, Failed(_)) => true,
            (Waiting | Queued | Preparing | Downloading, Cancelled(_)) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed(_) | TaskStatus::Cancelled(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskStatus::Cancelled(_))
    }

    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "Waiting",
            TaskStatus::Queued => "Queued",
            TaskStatus::Preparing => "Preparing...",
            TaskStatus::Downloading => "Downloading...",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed(FailureKind::ToolExit) => "Failed",
            TaskStatus::Failed(FailureKind::ToolMissing) => "Critical error",
            TaskStatus::Failed(FailureKind::Internal) => "Program error",
            TaskStatus::Cancelled(CancelReason::User) => "Cancelled (user)",
            TaskStatus::Cancelled(CancelReason::Shutdown) => "Cancelled (shutdown)",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
