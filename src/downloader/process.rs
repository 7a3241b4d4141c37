//! Child process handling for yt-dlp

use crate::downloader::command::ToolCommand;
use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command as AsyncCommand};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Time a child gets to exit after the graceful signal before it is killed
pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Spawn yt-dlp with piped stdout/stderr
pub fn spawn_tool(tool: &ToolCommand, args: &[OsString]) -> io::Result<Child> {
    let mut cmd = AsyncCommand::new(&tool.program);
    cmd.args(&tool.leading_args)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.spawn()
}

/// Ask the child to stop, then kill it if it is still running after `grace`
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    send_graceful_signal(child);

    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Process {:?} ignored termination request, killing it",
                child.id()
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &Child) {
    if let Some(pid) = child.id() {
        debug!("Sending SIGTERM to {}", pid);
        // SAFETY: plain syscall on a pid we spawned and have not reaped yet
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &mut Child) {
    // No graceful signal on this platform; start_kill is the closest equivalent
    if let Err(e) = child.start_kill() {
        debug!("start_kill failed: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> (ToolCommand, Vec<OsString>) {
        (
            ToolCommand::new("/bin/sh"),
            vec!["-c".into(), script.into()],
        )
    }

    #[tokio::test]
    async fn test_terminate_running_child() {
        let (tool, args) = sh("exec sleep 30");
        let mut child = spawn_tool(&tool, &args).expect("spawn sh");
        let status = terminate(&mut child, TERMINATE_GRACE).await.expect("terminate");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_kill_after_ignored_sigterm() {
        let (tool, args) = sh("trap '' TERM; while true; do sleep 1; done");
        let mut child = spawn_tool(&tool, &args).expect("spawn sh");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = terminate(&mut child, Duration::from_millis(200))
            .await
            .expect("terminate");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_exited_child_returns_status() {
        let (tool, args) = sh("exit 3");
        let mut child = spawn_tool(&tool, &args).expect("spawn sh");
        child.wait().await.unwrap();
        let status = terminate(&mut child, TERMINATE_GRACE).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let tool = ToolCommand::new("/definitely/not/here/yt-dlp");
            let err = spawn_tool(&tool, &[]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::NotFound);
        });
    }
}
