//! Execution log store -- one SQLite row per run, created at spawn and
//! completed exactly once when the command exits.

pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capture::Capture;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("run store at {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("run store connection failed: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("run store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("run {0} not found")]
    NotFound(RunId),
}

/// Identifier of a run, unique for the lifetime of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(pub i64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// End-of-run fields. Present as a unit or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub finished_at: DateTime<Utc>,
    pub exit_code: i32,
}

/// One logged run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: RunId,
    pub command: String,
    pub shell: String,
    pub cwd: Option<String>,
    pub started_at: DateTime<Utc>,
    /// `None` while the command is still running.
    pub completion: Option<Completion>,
    pub stdout: Capture,
    pub stderr: Capture,
}

impl RunRecord {
    pub fn is_running(&self) -> bool {
        self.completion.is_none()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.completion.as_ref().map(|c| c.exit_code)
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completion.as_ref().map(|c| c.finished_at)
    }
}

/// Result of [`RunStore::complete`].
#[derive(Debug)]
pub enum CompleteOutcome {
    Completed(RunRecord),
    /// The run already had an end time; nothing was changed.
    AlreadyCompleted,
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool, StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StorageError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .max_size(2)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

const RUN_COLUMNS: &str = "id, command, shell, cwd, started_at, finished_at, exit_code, \
                           stdout, stdout_bytes, stderr, stderr_bytes";

fn map_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let finished_at = match row.get::<_, Option<String>>(5)? {
        Some(_) => Some(parse_ts(row, 5)?),
        None => None,
    };
    let exit_code: Option<i32> = row.get(6)?;
    let completion = match (finished_at, exit_code) {
        (Some(finished_at), Some(exit_code)) => Some(Completion {
            finished_at,
            exit_code,
        }),
        _ => None,
    };

    Ok(RunRecord {
        id: RunId(row.get(0)?),
        command: row.get(1)?,
        shell: row.get(2)?,
        cwd: row.get(3)?,
        started_at: parse_ts(row, 4)?,
        completion,
        stdout: Capture {
            text: row.get(7)?,
            total_bytes: row.get::<_, i64>(8)?.max(0) as u64,
        },
        stderr: Capture {
            text: row.get(9)?,
            total_bytes: row.get::<_, i64>(10)?.max(0) as u64,
        },
    })
}

/// Durable store of run records shared by every worker of an installation.
#[derive(Clone)]
pub struct RunStore {
    pool: Pool,
}

impl RunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        debug!(path = %path.display(), "Opening run store");
        Ok(Self::new(open_pool(path)?))
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }

    /// Insert a new run with `started_at` set to now and no completion.
    pub fn create(
        &self,
        command: &str,
        shell: &str,
        cwd: Option<&str>,
    ) -> Result<RunRecord, StorageError> {
        let conn = self.pool.get()?;
        let started_at = Utc::now();

        conn.execute(
            "INSERT INTO runs (command, shell, cwd, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![command, shell, cwd, format_ts(&started_at)],
        )?;
        let id = RunId(conn.last_insert_rowid());

        Ok(RunRecord {
            id,
            command: command.to_string(),
            shell: shell.to_string(),
            cwd: cwd.map(str::to_string),
            started_at,
            completion: None,
            stdout: Capture::default(),
            stderr: Capture::default(),
        })
    }

    /// Record the end of a run together with its captured output.
    ///
    /// `exited_at` is when the subprocess exited. The stored `finished_at`
    /// is never earlier than `started_at`, even if the wall clock stepped
    /// backwards while the command ran.
    pub fn complete(
        &self,
        id: RunId,
        exited_at: DateTime<Utc>,
        exit_code: i32,
        stdout: &Capture,
        stderr: &Capture,
    ) -> Result<CompleteOutcome, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = tx
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id.0],
                map_run,
            )
            .optional()?
            .ok_or(StorageError::NotFound(id))?;

        if !current.is_running() {
            warn!(run_id = %id, "Run already completed, ignoring second completion");
            return Ok(CompleteOutcome::AlreadyCompleted);
        }

        let finished_at = exited_at.max(current.started_at);
        tx.execute(
            "UPDATE runs
             SET finished_at = ?1, exit_code = ?2,
                 stdout = ?3, stdout_bytes = ?4, stderr = ?5, stderr_bytes = ?6
             WHERE id = ?7 AND finished_at IS NULL",
            params![
                format_ts(&finished_at),
                exit_code,
                stdout.text,
                stdout.total_bytes as i64,
                stderr.text,
                stderr.total_bytes as i64,
                id.0
            ],
        )?;
        tx.commit()?;

        Ok(CompleteOutcome::Completed(RunRecord {
            completion: Some(Completion {
                finished_at,
                exit_code,
            }),
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            ..current
        }))
    }

    pub fn get(&self, id: RunId) -> Result<RunRecord, StorageError> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
            params![id.0],
            map_run,
        )
        .optional()?
        .ok_or(StorageError::NotFound(id))
    }

    /// Newest runs first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_run)?;

        let mut runs = Vec::new();
        for r in rows {
            runs.push(r?);
        }
        Ok(runs)
    }
}
