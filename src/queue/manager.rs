//! Download queue manager with bounded concurrent downloads
//!
//! One dispatch loop moves tasks from the pending queue into the active
//! set while there is a free slot, and spawns one executor per task. All
//! queue state lives behind a single mutex:
//!
//! - `pending` and `tasks` entries of a queued task are written only here,
//!   by the public API;
//! - once a task is active its `tasks` entry is written only by its executor
//!   (through the reporter);
//! - `active` entries are inserted only by the dispatch loop and removed only
//!   by the executor teardown, so the active count is always `active.len()`.

use crate::downloader::command::{DownloadOptions, ToolCommand};
use crate::downloader::executor::{run_download, CancelHandle, ExecutionContext, TaskReporter};
use crate::downloader::task::{CancelReason, DownloadTask, FailureKind, TaskStatus};
use crate::queue::events::{UpdateEvent, UpdateKind, UpdateSender};
use crate::utils::config::AppSettings;
use crate::utils::error::PhoenixError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long the dispatch loop sleeps when nothing wakes it
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on waiting for executors and the dispatch loop at shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Queue configuration
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub max_concurrent: usize,
    pub tool: ToolCommand,
    pub options: DownloadOptions,
}

impl DownloaderConfig {
    pub fn from_settings(settings: &AppSettings, tool: ToolCommand) -> Self {
        Self {
            max_concurrent: settings.max_concurrent_downloads,
            tool,
            options: DownloadOptions::from(settings),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            tool: ToolCommand::default(),
            options: DownloadOptions::default(),
        }
    }
}

/// Download queue with a single dispatch loop and one executor per running task
pub struct Downloader {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Wakes the dispatch loop when work arrives or a slot frees up
    wakeup: Notify,
    /// Fired whenever an executor tears down
    finished: Notify,
    stopping: AtomicBool,
    ctx: ExecutionContext,
    events: UpdateSender,
}

struct QueueState {
    pending: VecDeque<String>,
    tasks: HashMap<String, DownloadTask>,
    active: HashMap<String, CancelHandle>,
    max_concurrent: usize,
}

impl Downloader {
    /// Create new queue. Needs a Tokio runtime once tasks are added.
    pub fn new(config: DownloaderConfig, events: UpdateSender) -> Self {
        let shared = Shared {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                tasks: HashMap::new(),
                active: HashMap::new(),
                max_concurrent: config.max_concurrent.max(1),
            }),
            wakeup: Notify::new(),
            finished: Notify::new(),
            stopping: AtomicBool::new(false),
            ctx: ExecutionContext {
                tool: config.tool,
                options: config.options,
            },
            events,
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    /// Add task to queue, starting the worker if needed
    pub async fn add_task(&self, mut task: DownloadTask) -> Result<String> {
        let task_id = task.id.clone();
        info!("Adding task {} to queue: {}", task_id, task.url);

        task.transition(TaskStatus::Queued)?;

        {
            let mut state = self.shared.state.lock().await;
            if state.tasks.contains_key(&task_id) {
                return Err(PhoenixError::OperationFailed(format!(
                    "Task {} is already tracked",
                    task_id
                ))
                .into());
            }
            state.tasks.insert(task_id.clone(), task.clone());
            state.pending.push_back(task_id.clone());
        }

        self.shared.emit(UpdateEvent::for_task(&task, UpdateKind::StatusUpdate, None));
        self.shared.wakeup.notify_one();

        if !self.is_running().await {
            self.start().await;
        }

        Ok(task_id)
    }

    /// Start the dispatch loop if it is not running
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Download worker already running");
                return;
            }
        }

        self.shared.stopping.store(false, Ordering::SeqCst);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(Arc::clone(&self.shared), stop.clone()));
        *worker = Some(Worker { stop, handle });
        info!("Download worker started");

        let pending = self.pending_count().await;
        if pending > 0 {
            self.shared
                .emit(UpdateEvent::general(format!("{} tasks in queue...", pending)));
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel a task at the user's request.
    ///
    /// A queued task is cancelled on the spot and never spawns a process.
    /// An active task is only signalled; its executor stops yt-dlp and
    /// reports the final `Cancelled` state. Returns `false` for unknown or
    /// already finished tasks.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        self.cancel_with_reason(task_id, CancelReason::User).await
    }

    async fn cancel_with_reason(&self, task_id: &str, reason: CancelReason) -> bool {
        let snapshot = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;

            let Some(task) = state.tasks.get_mut(task_id) else {
                warn!("Attempt to cancel unknown task {}", task_id);
                return false;
            };
            info!("Cancelling task {} (status: {})", task_id, task.status);

            if let Some(handle) = state.active.get(task_id) {
                handle.cancel(reason);
                return true;
            }

            if task.status.is_terminal() {
                debug!("Task {} already finished", task_id);
                return false;
            }

            state.pending.retain(|id| id != task_id);
            if let Err(e) = task.transition(TaskStatus::Cancelled(reason)) {
                warn!("{}", e);
                return false;
            }
            task.error_message = Some("Download cancelled.".to_string());
            task.clear_transfer_info();
            task.clone()
        };

        self.shared
            .emit(UpdateEvent::for_task(&snapshot, UpdateKind::DownloadError, None));
        true
    }

    /// Forget a task. An active task is cancelled first and its executor
    /// finishes in the background. Unknown ids are ignored.
    pub async fn remove_task(&self, task_id: &str) -> bool {
        let mut state = self.shared.state.lock().await;
        let removed = state.tasks.remove(task_id).is_some();
        state.pending.retain(|id| id != task_id);
        if let Some(handle) = state.active.get(task_id) {
            handle.cancel(CancelReason::User);
        }

        if removed {
            info!("Task {} removed from queue", task_id);
        } else {
            debug!("Ignoring removal of untracked task {}", task_id);
        }
        removed
    }

    pub async fn get_task(&self, task_id: &str) -> Option<DownloadTask> {
        self.shared.state.lock().await.tasks.get(task_id).cloned()
    }

    /// All tracked tasks, newest first
    pub async fn get_all_tasks(&self) -> Vec<DownloadTask> {
        let state = self.shared.state.lock().await;
        let mut tasks: Vec<_> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        tasks
    }

    pub async fn active_count(&self) -> usize {
        self.shared.state.lock().await.active.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    pub async fn max_concurrent(&self) -> usize {
        self.shared.state.lock().await.max_concurrent
    }

    /// Change the concurrency ceiling; running tasks are left alone
    pub async fn set_max_concurrent(&self, max_concurrent: usize) {
        self.shared.state.lock().await.max_concurrent = max_concurrent.max(1);
        self.shared.wakeup.notify_one();
    }

    /// Stop everything: cancel active tasks, drain the queue, join the worker.
    pub async fn shutdown(&self) {
        info!("Stopping all downloads");
        self.shared.stopping.store(true, Ordering::SeqCst);
        let worker = self.worker.lock().await.take();
        if let Some(worker) = &worker {
            worker.stop.cancel();
        }

        let drained = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            for handle in state.active.values() {
                handle.cancel(CancelReason::Shutdown);
            }

            let mut drained = Vec::new();
            while let Some(id) = state.pending.pop_front() {
                let Some(task) = state.tasks.get_mut(&id) else {
                    continue;
                };
                if task.transition(TaskStatus::Cancelled(CancelReason::Shutdown)).is_ok() {
                    task.error_message = Some("Download cancelled.".to_string());
                    drained.push(task.clone());
                }
            }
            drained
        };

        for task in &drained {
            self.shared
                .emit(UpdateEvent::for_task(task, UpdateKind::StatusUpdate, None));
        }

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        if !self.shared.wait_idle(deadline).await {
            warn!("Active downloads did not stop in time");
        }

        if let Some(worker) = worker {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, worker.handle).await {
                Ok(Ok(())) => info!("Download worker stopped"),
                Ok(Err(e)) => error!("Download worker ended abnormally: {}", e),
                Err(_) => warn!("Download worker did not stop in time"),
            }
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.stop.cancel();
        }
        if let Ok(state) = self.shared.state.try_lock() {
            for handle in state.active.values() {
                handle.cancel(CancelReason::Shutdown);
            }
        }
    }
}

impl Shared {
    fn emit(&self, event: UpdateEvent) {
        // the receiver going away just means nobody is listening anymore
        let _ = self.events.send(event);
    }

    /// Pop the next runnable task if a slot is free and register it as active
    async fn next_ready(&self) -> Option<(DownloadTask, CancelHandle)> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        while state.active.len() < state.max_concurrent {
            let id = state.pending.pop_front()?;

            let Some(task) = state.tasks.get(&id) else {
                info!("Skipping task {}: removed", id);
                continue;
            };
            if task.status != TaskStatus::Queued {
                info!("Skipping task {}: {}", id, task.status);
                continue;
            }
            if state.active.contains_key(&id) {
                warn!("Task {} is already active, skipping", id);
                continue;
            }

            let task = task.clone();
            let cancel = CancelHandle::new();
            state.active.insert(id.clone(), cancel.clone());
            info!("Starting task {} (active: {})", id, state.active.len());
            return Some((task, cancel));
        }

        None
    }

    /// Executor teardown: free the slot, publish the final state and wake the dispatcher
    async fn finish_active(&self, task_id: &str) {
        let (active, idle, snapshot) = {
            let mut state = self.state.lock().await;
            state.active.remove(task_id);
            (
                state.active.len(),
                state.active.is_empty() && state.pending.is_empty(),
                state.tasks.get(task_id).cloned(),
            )
        };

        info!("Task {} finished (active: {})", task_id, active);
        if let Some(task) = snapshot {
            self.emit(UpdateEvent::for_task(&task, UpdateKind::StatusUpdate, None));
        }
        self.wakeup.notify_one();
        self.finished.notify_waiters();

        if idle && !self.stopping.load(Ordering::SeqCst) {
            info!("All tasks processed, worker waiting");
            self.emit(UpdateEvent::general("Queue is empty."));
        }
    }

    async fn mark_internal_failure(&self, task_id: &str, message: String) {
        let snapshot = {
            let mut state = self.state.lock().await;
            match state.tasks.get_mut(task_id) {
                Some(task) => {
                    if let Err(e) = task.transition(TaskStatus::Failed(FailureKind::Internal)) {
                        warn!("[{}] {}", task_id, e);
                        None
                    } else {
                        task.error_message = Some(message);
                        task.clear_transfer_info();
                        task.pid = None;
                        Some(task.clone())
                    }
                }
                None => None,
            }
        };

        if let Some(task) = snapshot {
            self.emit(UpdateEvent::for_task(&task, UpdateKind::DownloadError, None));
        }
    }

    /// Wait until no task is active. Returns `false` if `deadline` passed first.
    async fn wait_idle(&self, deadline: Instant) -> bool {
        loop {
            let finished = self.finished.notified();
            if self.state.lock().await.active.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::select! {
                _ = finished => {}
                _ = sleep(Duration::from_millis(25)) => {}
            }
        }
    }
}

/// Writes executor snapshots back into the task map and forwards events
struct SharedReporter {
    shared: Arc<Shared>,
}

#[async_trait]
impl TaskReporter for SharedReporter {
    async fn report(&self, task: &DownloadTask, kind: UpdateKind, data: Option<String>) {
        {
            let mut state = self.shared.state.lock().await;
            if let Some(entry) = state.tasks.get_mut(&task.id) {
                *entry = task.clone();
            }
        }
        self.shared.emit(UpdateEvent::for_task(task, kind, data));
    }
}

async fn dispatch_loop(shared: Arc<Shared>, stop: CancellationToken) {
    loop {
        if stop.is_cancelled() {
            break;
        }

        while let Some((task, cancel)) = shared.next_ready().await {
            spawn_executor(Arc::clone(&shared), task, cancel);
            if stop.is_cancelled() {
                break;
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = shared.wakeup.notified() => {}
            _ = sleep(POLL_INTERVAL) => {}
        }
    }
    debug!("Dispatch loop finished");
}

fn spawn_executor(shared: Arc<Shared>, task: DownloadTask, cancel: CancelHandle) {
    tokio::spawn(async move {
        let task_id = task.id.clone();
        let reporter = SharedReporter {
            shared: Arc::clone(&shared),
        };
        let ctx = shared.ctx.clone();

        let run = tokio::spawn(async move {
            let mut task = task;
            run_download(&mut task, &ctx, &cancel, &reporter).await;
            task
        });

        match run.await {
            Ok(task) => debug!("Task {} ended as {}", task_id, task.status),
            Err(e) => {
                error!("Executor for task {} crashed: {}", task_id, e);
                shared
                    .mark_internal_failure(&task_id, format!("Executor crashed: {}", e))
                    .await;
            }
        }

        shared.finish_active(&task_id).await;
    });
}
