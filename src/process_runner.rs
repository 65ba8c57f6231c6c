use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::command::CommandLine;
use crate::error::{ToolError, ToolErrorCode, ToolResult};

/// Exit code reported when the child ended without one (killed by a signal).
pub const SIGNAL_EXIT_CODE: i64 = -1;

const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Cooperative cancellation shared between the transport and a running tool call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled and wakes pending waiters.
    pub fn cancel(&self) {
        let already_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !already_cancelled {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel() is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i64,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl ProcessOutcome {
    /// stdout, a newline, then stderr, with surrounding whitespace trimmed.
    pub fn raw_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr).trim().to_owned()
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &CommandLine,
        cancel: &CancellationToken,
    ) -> ToolResult<ProcessOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandExecutor;

#[async_trait]
impl CommandExecutor for TokioCommandExecutor {
    async fn execute(
        &self,
        command: &CommandLine,
        cancel: &CancellationToken,
    ) -> ToolResult<ProcessOutcome> {
        let started = Instant::now();
        let mut cmd = Command::new(&command.binary);
        cmd.args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(binary = %command.binary, args = ?command.args, "spawning test runner");
        let mut child = cmd.spawn().map_err(|err| {
            ToolError::new(
                ToolErrorCode::SpawnFailed,
                format!(
                    "failed spawning {} in {}: {err}",
                    command.binary,
                    command.cwd.display()
                ),
            )
        })?;

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let (status, cancelled) = match finished {
            Some(status) => (status, false),
            None => {
                warn!(binary = %command.binary, "cancellation requested, killing test runner");
                if let Err(err) = child.start_kill() {
                    warn!("failed killing test runner: {err}");
                }
                (child.wait().await, true)
            }
        };
        let status = status.map_err(|err| {
            ToolError::new(
                ToolErrorCode::SpawnFailed,
                format!("failed waiting for {}: {err}", command.binary),
            )
        })?;

        let (stdout, stderr) = if cancelled {
            // A killed runner may leave grandchildren holding the pipes open.
            let joined = tokio::time::timeout(DRAIN_GRACE, async {
                (stdout_task.await, stderr_task.await)
            })
            .await;
            match joined {
                Ok((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
                Err(_) => (Vec::new(), Vec::new()),
            }
        } else {
            (
                stdout_task.await.unwrap_or_default(),
                stderr_task.await.unwrap_or_default(),
            )
        };

        let (exit_code, signal) = exit_code_of(&status);
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(exit_code, ?signal, duration_ms, cancelled, "test runner exited");

        Ok(ProcessOutcome {
            exit_code,
            signal,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration_ms,
            cancelled,
        })
    }
}

async fn drain<R>(reader: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let Some(mut reader) = reader else {
        return buffer;
    };
    let mut chunk = [0_u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
        }
    }
    buffer
}

fn exit_code_of(status: &ExitStatus) -> (i64, Option<i32>) {
    if let Some(code) = status.code() {
        return (i64::from(code), None);
    }
    (SIGNAL_EXIT_CODE, termination_signal(status))
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::{CancellationToken, CommandExecutor, TokioCommandExecutor, SIGNAL_EXIT_CODE};
    use crate::command::CommandLine;
    use crate::env_profile::EnvMap;
    use crate::error::ToolErrorCode;

    fn shell(script: &str, env: EnvMap) -> CommandLine {
        CommandLine {
            binary: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
            env,
            cwd: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn captures_both_streams_and_nonzero_exit() {
        let outcome = TokioCommandExecutor
            .execute(
                &shell("echo out; echo err 1>&2; exit 3", EnvMap::new()),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.signal, None);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.raw_output(), "out\n\nerr");
    }

    #[tokio::test]
    async fn environment_overlay_reaches_child() {
        let env = EnvMap::from([("MCP_RUNNER_OVERLAY".to_owned(), "overlay".to_owned())]);
        let outcome = TokioCommandExecutor
            .execute(
                &shell("printf '%s' \"$MCP_RUNNER_OVERLAY\"", env),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(outcome.stdout, "overlay");
    }

    #[tokio::test]
    async fn signal_termination_uses_negative_sentinel() {
        let outcome = TokioCommandExecutor
            .execute(&shell("kill -9 $$", EnvMap::new()), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, SIGNAL_EXIT_CODE);
        assert_eq!(outcome.signal, Some(9));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            TokioCommandExecutor.execute(&shell("echo started; exec sleep 30", EnvMap::new()), &token),
        )
        .await
        .expect("cancelled run finishes promptly")
        .expect("run");
        assert!(outcome.cancelled);
        assert_eq!(outcome.exit_code, SIGNAL_EXIT_CODE);
        assert_eq!(outcome.raw_output(), "started");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let command = CommandLine {
            binary: "definitely-not-a-real-binary-for-mcp".to_owned(),
            args: Vec::new(),
            env: EnvMap::new(),
            cwd: std::env::temp_dir(),
        };
        let err = TokioCommandExecutor
            .execute(&command, &CancellationToken::new())
            .await
            .expect_err("spawn must fail");
        assert_eq!(err.code, ToolErrorCode::SpawnFailed);
    }

    #[tokio::test]
    async fn already_cancelled_token_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("already cancelled");
        assert!(token.is_cancelled());
    }
}
