//! Process detachment.
//!
//! The foreground invocation re-executes its own binary in worker mode,
//! in a new session with no controlling terminal. The worker's stdin and
//! stdout go to the null device; its stderr is appended to the diagnostic
//! log so tracing output from the worker survives.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::info;

/// Hidden CLI flag that puts the binary in worker mode.
pub const WORKER_FLAG: &str = "--worker";

/// Everything the worker needs to pick the run back up.
#[derive(Debug, Clone)]
pub struct DetachRequest<'a> {
    pub program: PathBuf,
    pub config_path: &'a Path,
    pub command: &'a str,
    pub log_file: &'a Path,
}

impl<'a> DetachRequest<'a> {
    /// Re-run the currently executing binary.
    pub fn current_exe(config_path: &'a Path, command: &'a str, log_file: &'a Path) -> Result<Self> {
        let program = std::env::current_exe().context("failed to locate the napy executable")?;
        Ok(Self {
            program,
            config_path,
            command,
            log_file,
        })
    }

    fn to_command(&self) -> Result<Command> {
        if let Some(parent) = self.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file)
            .with_context(|| format!("failed to open log file {}", self.log_file.display()))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(WORKER_FLAG)
            .arg("--config")
            .arg(self.config_path)
            .arg("--")
            .arg(self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: setsid is async-signal-safe and touches no parent state.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        Ok(cmd)
    }
}

/// Start the detached worker and return its pid.
///
/// Returns once the worker process exists; it does not wait for the run.
pub fn spawn_detached(request: &DetachRequest<'_>) -> Result<u32> {
    let mut cmd = request.to_command()?;
    let child = cmd
        .spawn()
        .with_context(|| format!("failed to start worker {}", request.program.display()))?;
    let pid = child.id();
    info!(pid, command = %request.command, "Detached worker started");
    Ok(pid)
}
