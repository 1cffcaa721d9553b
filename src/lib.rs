//! napy -- run a shell command in the background, log it, get notified.
//!
//! The foreground invocation detaches a worker process and returns at
//! once. The worker runs the command through a shell, records the run in
//! a local SQLite log, and sends a completion report over the configured
//! notification channels.

pub mod capture;
pub mod config;
pub mod notify;
pub mod runner;
pub mod storage;

use anyhow::Result;
use std::path::Path;

pub use config::AppConfig;
pub use runner::{RunOutcome, Runner};

/// Start a detached worker for `command` and return its pid.
pub fn dispatch(config_path: &Path, config: &AppConfig, command: &str) -> Result<u32> {
    let request = runner::detach::DetachRequest::current_exe(config_path, command, &config.log_file)?;
    runner::detach::spawn_detached(&request)
}
