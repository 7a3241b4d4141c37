//! Update events flowing from the download queue to its owner

use crate::downloader::task::DownloadTask;
use serde::Serialize;
use tokio::sync::mpsc;

/// Kind of update, mirrors what a presentation layer renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateKind {
    StatusUpdate,
    ProgressUpdate,
    LogMessage,
    DownloadComplete,
    /// Failures and cancellations alike
    DownloadError,
    /// Queue-wide notice, carries no task
    GeneralStatusUpdate,
}

/// One update: a snapshot of the task plus optional text payload
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEvent {
    pub kind: UpdateKind,
    pub task: Option<DownloadTask>,
    pub data: Option<String>,
}

impl UpdateEvent {
    pub fn for_task(task: &DownloadTask, kind: UpdateKind, data: Option<String>) -> Self {
        Self {
            kind,
            task: Some(task.clone()),
            data,
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::GeneralStatusUpdate,
            task: None,
            data: Some(message.into()),
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task.as_ref().map(|t| t.id.as_str())
    }
}

pub type UpdateSender = mpsc::UnboundedSender<UpdateEvent>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<UpdateEvent>;

/// Create the update channel a `Downloader` reports into
pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}
