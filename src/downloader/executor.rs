//! Per-task execution: runs one yt-dlp process to completion
//!
//! The executor owns its `DownloadTask` for the whole run and publishes
//! every change through a [`TaskReporter`]. It never returns an error:
//! every path ends with the task in a terminal state and a final
//! `DownloadComplete` or `DownloadError` report.

use crate::downloader::command::{
    build_download_args, display_command, DownloadOptions, ToolCommand, FFMPEG_EXECUTABLE,
    YT_DLP_EXECUTABLE,
};
use crate::downloader::process::{spawn_tool, terminate, TERMINATE_GRACE};
use crate::downloader::profile::resolve_profile;
use crate::downloader::progress::{classify_line, OutputLine};
use crate::downloader::task::{CancelReason, DownloadTask, FailureKind, TaskStatus};
use crate::queue::events::UpdateKind;
use crate::utils::error::PhoenixError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for stderr once stdout has closed
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest url fragment used to tag log lines
const LOG_LABEL_LEN: usize = 20;

/// Receives every state change the executor makes
#[async_trait]
pub trait TaskReporter: Send + Sync {
    async fn report(&self, task: &DownloadTask, kind: UpdateKind, data: Option<String>);
}

/// Cancellation token plus the reason it was fired
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    by_system: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        if reason == CancelReason::Shutdown {
            self.by_system.store(true, Ordering::SeqCst);
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn reason(&self) -> CancelReason {
        if self.by_system.load(Ordering::SeqCst) {
            CancelReason::Shutdown
        } else {
            CancelReason::User
        }
    }
}

/// Everything an executor needs besides the task itself
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub tool: ToolCommand,
    pub options: DownloadOptions,
}

/// Run `task` to a terminal state
pub async fn run_download(
    task: &mut DownloadTask,
    ctx: &ExecutionContext,
    cancel: &CancelHandle,
    reporter: &dyn TaskReporter,
) {
    let result = execute(task, ctx, cancel, reporter).await;
    task.pid = None;

    let Err(err) = result else {
        return;
    };

    if cancel.is_cancelled() {
        finish_cancelled(task, cancel.reason(), reporter).await;
        return;
    }

    match err {
        PhoenixError::ToolNotFound => {
            let message = format!("{} or {} not found.", YT_DLP_EXECUTABLE, FFMPEG_EXECUTABLE);
            error!("[{}] {}", task.id, message);
            finish_failed(task, FailureKind::ToolMissing, message, reporter).await;
        }
        other => {
            error!("[{}] Unexpected error while downloading: {:?}", task.id, other);
            finish_failed(task, FailureKind::Internal, other.to_string(), reporter).await;
        }
    }
}

async fn execute(
    task: &mut DownloadTask,
    ctx: &ExecutionContext,
    cancel: &CancelHandle,
    reporter: &dyn TaskReporter,
) -> Result<(), PhoenixError> {
    if cancel.is_cancelled() {
        info!("[{}] Skipped, cancelled before start", task.id);
        task.error_message = Some("Cancelled before start.".to_string());
        finish_cancelled(task, cancel.reason(), reporter).await;
        return Ok(());
    }

    task.transition(TaskStatus::Preparing)?;
    task.reset_progress();
    reporter.report(task, UpdateKind::StatusUpdate, None).await;

    tokio::fs::create_dir_all(&task.output_dir).await?;

    let profile = resolve_profile(&task.quality_profile_key);
    let args = build_download_args(&task.url, profile, &task.output_dir, &ctx.options);
    info!("[{}] Launching: {}", task.id, display_command(&ctx.tool, &args));

    task.transition(TaskStatus::Downloading)?;
    reporter.report(task, UpdateKind::StatusUpdate, None).await;

    let mut child = spawn_tool(&ctx.tool, &args).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PhoenixError::ToolNotFound,
        _ => PhoenixError::SpawnError(e.to_string()),
    })?;
    task.pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PhoenixError::OperationFailed("yt-dlp stdout not captured".to_string()))?;
    let stderr_handle = child.stderr.take().map(collect_lines);

    let label = log_label(&task.url);
    let mut captured_filename: Option<String> = None;
    let mut lines = BufReader::new(stdout).split(b'\n');
    let mut cancelled = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            line = next_text_line(&mut lines) => match line? {
                Some(line) => {
                    handle_stdout_line(task, &line, &label, &mut captured_filename, reporter).await;
                }
                None => break,
            }
        }
    }

    if cancelled {
        info!("[{}] Cancellation requested, stopping yt-dlp", task.id);
        if let Some(handle) = stderr_handle {
            handle.abort();
        }
        if let Err(e) = terminate(&mut child, TERMINATE_GRACE).await {
            warn!("[{}] Failed to terminate yt-dlp: {}", task.id, e);
        }
        task.pid = None;
        finish_cancelled(task, cancel.reason(), reporter).await;
        return Ok(());
    }

    let status = child.wait().await?;
    task.pid = None;

    let stderr_lines = match stderr_handle {
        Some(handle) => match timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(lines)) => lines,
            Ok(Err(e)) => {
                warn!("[{}] stderr reader failed: {}", task.id, e);
                Vec::new()
            }
            Err(_) => {
                warn!("[{}] Timed out draining stderr", task.id);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    for line in &stderr_lines {
        error!("[{}] yt-dlp stderr: {}", task.id, line);
        reporter
            .report(
                task,
                UpdateKind::LogMessage,
                Some(format!("[{}] ERROR: {}", label, line)),
            )
            .await;
    }

    // a cancel that raced with process exit still wins
    if cancel.is_cancelled() {
        finish_cancelled(task, cancel.reason(), reporter).await;
        return Ok(());
    }

    if status.success() {
        task.transition(TaskStatus::Completed)?;
        task.progress_str = "100.0%".to_string();
        task.progress_val = 100.0;
        task.clear_transfer_info();
        task.final_filename =
            resolve_final_filename(&task.output_dir, captured_filename.as_deref());
        if task.final_filename.is_none() {
            warn!("[{}] Could not determine the final file name", task.id);
        }
        info!("[{}] Completed: {}", task.id, task.display_filename());
        reporter.report(task, UpdateKind::DownloadComplete, None).await;
    } else {
        let stderr_text = stderr_lines.join("\n");
        let message = if stderr_text.trim().is_empty() {
            match status.code() {
                Some(code) => format!("{} exited with code {}", YT_DLP_EXECUTABLE, code),
                None => format!("{} was terminated by a signal", YT_DLP_EXECUTABLE),
            }
        } else {
            stderr_text.trim().to_string()
        };
        finish_failed(task, FailureKind::ToolExit, message, reporter).await;
    }

    Ok(())
}

async fn handle_stdout_line(
    task: &mut DownloadTask,
    raw: &str,
    label: &str,
    captured_filename: &mut Option<String>,
    reporter: &dyn TaskReporter,
) {
    let line = raw.trim();
    if line.is_empty() {
        return;
    }
    debug!("[{}] yt-dlp: {}", task.id, line);
    reporter
        .report(task, UpdateKind::LogMessage, Some(format!("[{}] {}", label, line)))
        .await;

    match classify_line(line) {
        OutputLine::Progress(progress) => {
            task.progress_str = progress.percent_str;
            if let Some(value) = progress.percent {
                task.progress_val = value;
            }
            task.eta_str = progress.eta;
            task.speed_str = progress.speed;
            if captured_filename.is_none() {
                if let Some(name) = progress.filename {
                    info!("[{}] File name from progress: {}", task.id, name);
                    *captured_filename = Some(name);
                }
            }
            reporter.report(task, UpdateKind::ProgressUpdate, None).await;
        }
        // later destinations (the merger runs last) win
        OutputLine::Destination(name) => *captured_filename = Some(name),
        OutputLine::Other => {}
    }
}

fn collect_lines<R>(reader: R) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = Vec::new();
        let mut lines = BufReader::new(reader).split(b'\n');
        loop {
            match next_text_line(&mut lines).await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        collected.push(line.to_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Reading yt-dlp stderr failed: {}", e);
                    break;
                }
            }
        }
        collected
    })
}

/// Next output line with invalid UTF-8 replaced by U+FFFD
async fn next_text_line<R>(lines: &mut Split<BufReader<R>>) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    Ok(lines.next_segment().await?.map(|raw| {
        let raw = raw.strip_suffix(b"\r").unwrap_or(&raw);
        String::from_utf8_lossy(raw).into_owned()
    }))
}

async fn finish_cancelled(
    task: &mut DownloadTask,
    reason: CancelReason,
    reporter: &dyn TaskReporter,
) {
    if let Err(e) = task.transition(TaskStatus::Cancelled(reason)) {
        warn!("[{}] {}", task.id, e);
        return;
    }
    if task.error_message.is_none() {
        task.error_message = Some("Download cancelled.".to_string());
    }
    task.clear_transfer_info();
    info!("[{}] Cancelled ({:?})", task.id, reason);
    reporter.report(task, UpdateKind::DownloadError, None).await;
}

async fn finish_failed(
    task: &mut DownloadTask,
    kind: FailureKind,
    message: String,
    reporter: &dyn TaskReporter,
) {
    if let Err(e) = task.transition(TaskStatus::Failed(kind)) {
        warn!("[{}] {}", task.id, e);
        return;
    }
    task.error_message = Some(message);
    task.clear_transfer_info();
    reporter.report(task, UpdateKind::DownloadError, None).await;
}

/// Turn a captured name into a path that exists, or `None`
pub fn resolve_final_filename(output_dir: &Path, captured: Option<&str>) -> Option<PathBuf> {
    let captured = Path::new(captured?);
    let candidate = if captured.is_absolute() {
        captured.to_path_buf()
    } else {
        output_dir.join(captured.file_name()?)
    };

    if candidate.exists() {
        Some(candidate)
    } else {
        warn!("Reported file {:?} does not exist", candidate);
        None
    }
}

/// Short tag for log lines: the last url segment, truncated
fn log_label(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.chars().take(LOG_LABEL_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<(UpdateKind, TaskStatus, Option<String>)>>,
    }

    #[async_trait]
    impl TaskReporter for RecordingReporter {
        async fn report(&self, task: &DownloadTask, kind: UpdateKind, data: Option<String>) {
            self.events.lock().await.push((kind, task.status.clone(), data));
        }
    }

    fn queued_task(dir: &Path) -> DownloadTask {
        let mut task = DownloadTask::new("https://example.com/watch/abc", "Video - 720p MP4", dir);
        task.transition(TaskStatus::Queued).unwrap();
        task
    }

    #[test]
    fn test_log_label() {
        assert_eq!(log_label("https://example.com/watch/abc"), "abc");
        assert_eq!(log_label("https://example.com/a/"), "a");
        assert_eq!(
            log_label("https://example.com/averyveryverylongsegmentname").len(),
            LOG_LABEL_LEN
        );
    }

    #[test]
    fn test_resolve_relative_name_against_output_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        let resolved = resolve_final_filename(dir.path(), Some("somewhere/else/clip.mp4"));
        assert_eq!(resolved, Some(dir.path().join("clip.mp4")));
    }

    #[test]
    fn test_resolve_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_final_filename(dir.path(), Some("ghost.mp4")), None);
        assert_eq!(resolve_final_filename(dir.path(), None), None);
    }

    #[test]
    fn test_cancel_handle_reason() {
        let user = CancelHandle::new();
        user.cancel(CancelReason::User);
        assert!(user.is_cancelled());
        assert_eq!(user.reason(), CancelReason::User);

        let system = CancelHandle::new();
        system.cancel(CancelReason::Shutdown);
        assert_eq!(system.reason(), CancelReason::Shutdown);
    }

    #[tokio::test]
    async fn test_next_text_line_replaces_invalid_utf8() {
        let input: &[u8] = b"[youtube] caf\xe9 title\r\nplain\n";
        let mut lines = BufReader::new(input).split(b'\n');

        let first = next_text_line(&mut lines).await.unwrap().unwrap();
        assert_eq!(first, "[youtube] caf\u{FFFD} title");
        assert_eq!(next_text_line(&mut lines).await.unwrap().as_deref(), Some("plain"));
        assert_eq!(next_text_line(&mut lines).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_spawns() {
        let dir = TempDir::new().unwrap();
        let mut task = queued_task(dir.path());
        let cancel = CancelHandle::new();
        cancel.cancel(CancelReason::User);
        let reporter = RecordingReporter::default();
        let ctx = ExecutionContext {
            tool: ToolCommand::new("/definitely/not/here/yt-dlp"),
            options: DownloadOptions::default(),
        };

        run_download(&mut task, &ctx, &cancel, &reporter).await;

        assert_eq!(task.status, TaskStatus::Cancelled(CancelReason::User));
        let events = reporter.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, UpdateKind::DownloadError);
    }

    #[tokio::test]
    async fn test_missing_tool_is_critical_failure() {
        let dir = TempDir::new().unwrap();
        let mut task = queued_task(dir.path());
        let reporter = RecordingReporter::default();
        let ctx = ExecutionContext {
            tool: ToolCommand::new("/definitely/not/here/yt-dlp"),
            options: DownloadOptions::default(),
        };

        run_download(&mut task, &ctx, &CancelHandle::new(), &reporter).await;

        assert_eq!(task.status, TaskStatus::Failed(FailureKind::ToolMissing));
        assert!(task.error_message.as_deref().unwrap().contains("not found"));
        let events = reporter.events.lock().await;
        let kinds: Vec<_> = events.iter().map(|e| e.0).collect();
        assert_eq!(
            kinds,
            vec![
                UpdateKind::StatusUpdate,
                UpdateKind::StatusUpdate,
                UpdateKind::DownloadError
            ]
        );
        assert_eq!(events[0].1, TaskStatus::Preparing);
        assert_eq!(events[1].1, TaskStatus::Downloading);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_and_completion_from_fake_tool() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let file = out.join("clip.mp4");
        std::fs::write(&file, b"data").unwrap();

        let script = format!(
            "echo 'download-cli:42.0% ETA:00:10 Speed:1.2MiB/s'\n\
             echo '[Merger] Merging formats into \"{}\"'\n",
            file.display()
        );
        let ctx = ExecutionContext {
            tool: ToolCommand::new("/bin/sh").with_leading_args(["-c", script.as_str(), "yt-dlp"]),
            options: DownloadOptions::default(),
        };
        let mut task = queued_task(&out);
        let reporter = RecordingReporter::default();

        run_download(&mut task, &ctx, &CancelHandle::new(), &reporter).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.final_filename, Some(file));
        assert_eq!(task.progress_val, 100.0);

        let events = reporter.events.lock().await;
        let progress: Vec<_> = events
            .iter()
            .filter(|e| e.0 == UpdateKind::ProgressUpdate)
            .collect();
        assert_eq!(progress.len(), 1);
        let progress_line = "download-cli:42.0% ETA:00:10 Speed:1.2MiB/s";
        assert!(events.iter().any(|e| e.0 == UpdateKind::LogMessage
            && e.2.as_deref().unwrap().ends_with(progress_line)));
        assert_eq!(events.last().unwrap().0, UpdateKind::DownloadComplete);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_still_completes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cafe.mp4");
        std::fs::write(&file, b"data").unwrap();

        let script = format!(
            "printf '[youtube] caf\\351 title\\n'\n\
             printf 'WARNING: caf\\351\\n' >&2\n\
             echo '[download] Destination: {}'\n",
            file.display()
        );
        let ctx = ExecutionContext {
            tool: ToolCommand::new("/bin/sh").with_leading_args(["-c", script.as_str(), "yt-dlp"]),
            options: DownloadOptions::default(),
        };
        let mut task = queued_task(dir.path());
        let reporter = RecordingReporter::default();

        run_download(&mut task, &ctx, &CancelHandle::new(), &reporter).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.final_filename, Some(file));

        let events = reporter.events.lock().await;
        let logs: Vec<_> = events
            .iter()
            .filter(|e| e.0 == UpdateKind::LogMessage)
            .filter_map(|e| e.2.as_deref())
            .collect();
        assert!(logs.iter().any(|l| l.ends_with("[youtube] caf\u{FFFD} title")));
        assert!(logs.iter().any(|l| l.ends_with("ERROR: WARNING: caf\u{FFFD}")));
    }
}
