//! Runner: execute one command to completion, log it, and notify.
//!
//! The sequence for a run is fixed: create the log row, spawn the shell,
//! wait for it, complete the log row, notify. Storage and notification
//! failures are logged and skipped; only the command's own exit code
//! matters to the caller.

pub mod detach;
pub mod shell;

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::capture::{self, Capture};
use crate::config::AppConfig;
use crate::notify::{Notifier, NotifyReport, RunReport};
use crate::storage::{CompleteOutcome, RunId, RunStore};

/// Exit code recorded when the shell could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

/// How long output is still collected after the shell exits. Background
/// jobs started by the command can hold the pipes open indefinitely.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What a finished run looked like from the runner's side.
#[derive(Debug)]
pub struct RunOutcome {
    /// `None` if the run could not be written to the store.
    pub run_id: Option<RunId>,
    pub shell: String,
    pub exit_code: i32,
    pub stdout: Capture,
    pub stderr: Capture,
    pub notifications: NotifyReport,
}

/// Map an exit status to a single integer; signals become 128+N.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    SPAWN_FAILURE_EXIT_CODE
}

struct Executed {
    exited_at: DateTime<Utc>,
    exit_code: i32,
    stdout: Capture,
    stderr: Capture,
}

pub struct Runner {
    config: AppConfig,
    notifier: Notifier,
}

impl Runner {
    pub fn new(config: AppConfig) -> Self {
        let notifier = Notifier::from_config(&config);
        Self { config, notifier }
    }

    pub fn with_notifier(config: AppConfig, notifier: Notifier) -> Self {
        Self { config, notifier }
    }

    fn open_store(&self) -> Option<RunStore> {
        match RunStore::open(&self.config.database) {
            Ok(store) => Some(store),
            Err(e) => {
                error!(
                    path = %self.config.database.display(),
                    error = %e,
                    "Run store unavailable, continuing without logging"
                );
                None
            }
        }
    }

    /// Run `command` to completion in the current process.
    ///
    /// This is the body of the detached worker. It never fails: every
    /// problem ends up in the returned exit code, the log, or both.
    pub async fn execute(&self, command: &str) -> RunOutcome {
        let shell = shell::resolve_from_env(self.config.shell.as_deref());
        let cwd = std::env::current_dir()
            .ok()
            .map(|p| p.display().to_string());

        let store = self.open_store();
        let created = store.as_ref().and_then(|s| {
            s.create(command, &shell.path, cwd.as_deref())
                .map_err(|e| error!(error = %e, "Failed to record run start"))
                .ok()
        });
        let run_id = created.as_ref().map(|r| r.id);
        let started_at = created.as_ref().map(|r| r.started_at).unwrap_or_else(Utc::now);

        info!(
            run_id = ?run_id,
            shell = %shell.path,
            shell_source = ?shell.source,
            %command,
            "Starting command"
        );
        let executed = self.spawn_and_wait(command, &shell.path).await;
        info!(run_id = ?run_id, exit_code = executed.exit_code, "Command finished");

        let mut finished_at = executed.exited_at.max(started_at);
        if let (Some(store), Some(id)) = (&store, run_id) {
            match store.complete(
                id,
                executed.exited_at,
                executed.exit_code,
                &executed.stdout,
                &executed.stderr,
            ) {
                Ok(CompleteOutcome::Completed(record)) => {
                    if let Some(at) = record.finished_at() {
                        finished_at = at;
                    }
                }
                Ok(CompleteOutcome::AlreadyCompleted) => {
                    warn!(run_id = %id, "Run was already completed");
                }
                Err(e) => error!(run_id = %id, error = %e, "Failed to record run completion"),
            }
        }

        let report = RunReport {
            run_id,
            command,
            shell: &shell.path,
            started_at,
            finished_at,
            exit_code: executed.exit_code,
            stdout: &executed.stdout,
            stderr: &executed.stderr,
        };
        let notifications = self.notifier.notify(&report).await;

        if executed.exit_code != 0 {
            warn!(run_id = ?run_id, exit_code = executed.exit_code, "Command exited with non-zero status");
        }

        RunOutcome {
            run_id,
            shell: shell.path,
            exit_code: executed.exit_code,
            stdout: executed.stdout,
            stderr: executed.stderr,
            notifications,
        }
    }

    async fn spawn_and_wait(&self, command: &str, shell: &str) -> Executed {
        let limit = self.config.capture_limit_bytes;

        let mut cmd = Command::new(shell);
        cmd.arg(shell::shell_flag(self.config.interactive_shell))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Failed to execute command: could not start {shell}: {e}");
                error!(%shell, error = %e, "Spawn failed");
                return Executed {
                    exited_at: Utc::now(),
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    stdout: Capture::default(),
                    stderr: Capture::from_text(&message, limit),
                };
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_stop = stop_rx.clone();
        let stdout_task = tokio::spawn(async move {
            match stdout {
                Some(s) => capture::read_bounded(s, limit, stdout_stop).await,
                None => Ok(Capture::default()),
            }
        });
        let stderr_task = tokio::spawn(async move {
            match stderr {
                Some(s) => capture::read_bounded(s, limit, stop_rx).await,
                None => Ok(Capture::default()),
            }
        });

        let exit_code = match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                error!(error = %e, "Failed to wait for command");
                SPAWN_FAILURE_EXIT_CODE
            }
        };
        let exited_at = Utc::now();

        let drained = async { (stdout_task.await, stderr_task.await) };
        tokio::pin!(drained);
        let (stdout_joined, stderr_joined) =
            match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut drained).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        grace = ?OUTPUT_DRAIN_GRACE,
                        "Output still open after the command exited, keeping what was captured"
                    );
                    let _ = stop_tx.send(true);
                    drained.await
                }
            };

        let collect = |joined: Result<std::io::Result<Capture>, tokio::task::JoinError>, stream: &str| {
            match joined {
                Ok(Ok(capture)) => capture,
                Ok(Err(e)) => {
                    warn!(stream, error = %e, "Output capture failed");
                    Capture::default()
                }
                Err(e) => {
                    warn!(stream, error = %e, "Output capture task failed");
                    Capture::default()
                }
            }
        };

        Executed {
            exited_at,
            exit_code,
            stdout: collect(stdout_joined, "stdout"),
            stderr: collect(stderr_joined, "stderr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_exit_code_of_signal() {
        use std::os::unix::process::ExitStatusExt;
        // Raw wait status for "killed by SIGKILL".
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
        // Raw wait status for "exited with 7".
        assert_eq!(exit_code_of(ExitStatus::from_raw(7 << 8)), 7);
    }
}
