//! Terminal front end: consumes queue updates on a single task and prints them

use crate::downloader::task::TaskStatus;
use crate::queue::events::{UpdateEvent, UpdateKind, UpdateReceiver};
use std::collections::HashSet;
use std::io::Write;

/// How updates are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One readable line per interesting event
    Human { show_log: bool },
    /// Every event as one JSON object per line
    Json,
}

/// Final tally once every tracked task has finished
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Format one update for humans. `None` means the event is not worth a line.
pub fn format_event(event: &UpdateEvent, show_log: bool) -> Option<String> {
    let Some(task) = &event.task else {
        return event.data.as_ref().map(|msg| format!("[queue] {}", msg));
    };
    let short_id: String = task.id.chars().take(8).collect();

    match event.kind {
        UpdateKind::StatusUpdate => Some(format!("[{}] {} {}", short_id, task.status, task.url)),
        UpdateKind::ProgressUpdate => Some(format!(
            "[{}] {:>6} ETA {} at {}",
            short_id, task.progress_str, task.eta_str, task.speed_str
        )),
        UpdateKind::LogMessage if show_log => event
            .data
            .as_ref()
            .map(|line| format!("[{}] {}", short_id, line)),
        UpdateKind::LogMessage => None,
        UpdateKind::DownloadComplete => Some(format!(
            "[{}] Completed -> {}",
            short_id,
            task.display_filename()
        )),
        UpdateKind::DownloadError => Some(format!(
            "[{}] {}: {}",
            short_id,
            task.status,
            task.error_message.as_deref().unwrap_or("unknown error")
        )),
        UpdateKind::GeneralStatusUpdate => event.data.clone(),
    }
}

/// Drain updates until every id in `expected` reached a terminal state or
/// the channel closes.
pub async fn render_until_done(
    mut rx: UpdateReceiver,
    expected: HashSet<String>,
    mode: OutputMode,
) -> Summary {
    let mut remaining = expected;
    let mut summary = Summary::default();
    let stdout = std::io::stdout();

    while !remaining.is_empty() {
        let Some(event) = rx.recv().await else {
            break;
        };

        let line = match mode {
            OutputMode::Json => serde_json::to_string(&event).ok(),
            OutputMode::Human { show_log } => format_event(&event, show_log),
        };
        if let Some(line) = line {
            let mut out = stdout.lock();
            let _ = writeln!(out, "{}", line);
        }

        let Some(task) = &event.task else {
            continue;
        };
        if task.status.is_terminal() && remaining.remove(&task.id) {
            match task.status {
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed(_) => summary.failed += 1,
                _ => summary.cancelled += 1,
            }
        }
    }

    summary
}
