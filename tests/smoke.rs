//! Smoke tests -- verify the binary runs, handles a missing config, and
//! that a detached run ends up in the log.

use std::path::Path;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use napy::storage::RunStore;
use predicates::prelude::*;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, "shell = \"/bin/sh\"\n").unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("napy")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Run a shell command in the background"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("napy")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("napy"));
}

#[test]
fn test_missing_config_writes_template() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["echo", "hi"])
        .assert()
        .code(2)
        .stderr(predicates::str::contains("template was written"));

    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains("[telegram]"));
    assert!(written.contains("[email]"));
    // Nothing ran, so no database was created.
    assert!(!dir.path().join("nested").join("napy.db").exists());
}

#[test]
fn test_command_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn test_foreground_run_returns_command_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--foreground", "exit", "7"])
        .assert()
        .code(7);

    let store = RunStore::open(&dir.path().join("napy.db")).unwrap();
    let runs = store.recent(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].command, "exit 7");
    assert_eq!(runs[0].exit_code(), Some(7));
}

#[cfg(unix)]
#[test]
fn test_detached_run_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    // The foreground returns before the command has finished.
    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["sleep", "0.2", "&&", "echo", "detached"])
        .assert()
        .success();

    let db = dir.path().join("napy.db");
    let deadline = Instant::now() + Duration::from_secs(20);
    let record = loop {
        if db.exists() {
            if let Ok(store) = RunStore::open(&db) {
                if let Some(run) = store.recent(1).unwrap_or_default().pop() {
                    if !run.is_running() {
                        break run;
                    }
                }
            }
        }
        assert!(Instant::now() < deadline, "detached run never completed");
        std::thread::sleep(Duration::from_millis(100));
    };

    assert_eq!(record.command, "sleep 0.2 && echo detached");
    assert_eq!(record.exit_code(), Some(0));
    assert_eq!(record.stdout.text, "detached\n");
    assert!(dir.path().join("napy.log").exists());
}

#[cfg(unix)]
#[test]
fn test_recent_lists_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--foreground", "true"])
        .assert()
        .success();

    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--recent", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("true").and(predicate::str::contains("Exit")));

    Command::cargo_bin("napy")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"exit_code\": 0"));
}
