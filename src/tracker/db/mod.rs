//! SQLite-backed entity store.
//!
//! Each entity gets the same contract: `list_*` in insertion order,
//! `get_*` returning `Option`, `create_*` returning the stored record,
//! `update_*` applying a shallow patch (`None` = not found) and `delete_*`
//! returning whether a row was removed. Entity-specific methods live in the
//! submodules as further `impl TrackerDb` blocks.

mod comments;
mod filters;
mod issues;
mod projects;
mod sprints;
mod tokens;
mod users;

pub use comments::NewComment;
pub use filters::{FilterPatch, NewFilter};
pub use issues::{IssueMove, IssuePatch, NewIssue, Page};
pub use projects::{NewProject, ProjectPatch};
pub use sprints::{NewSprint, SprintCompletion, SprintPatch};
pub use tokens::NewApiToken;
pub use users::{NewUser, UserPatch};

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Deserializer};

use crate::errors::{TrackerError, TrackerResult};

/// Async-safe handle to the tracker database.
///
/// Wraps `TrackerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TrackerDb>>,
}

impl DbHandle {
    pub fn new(db: TrackerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> TrackerResult<R>
    where
        F: FnOnce(&TrackerDb) -> TrackerResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| TrackerError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only;
    /// never from an async request path.
    pub fn lock_sync(&self) -> TrackerResult<std::sync::MutexGuard<'_, TrackerDb>> {
        self.inner.lock().map_err(|_| TrackerError::LockPoisoned)
    }
}

pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'developer',
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    key TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL DEFAULT '',
                    lead_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    issue_seq INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workflows (
                    project_id INTEGER PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
                    statuses TEXT NOT NULL,
                    transitions TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sprints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    goal TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'planned',
                    start_date TEXT,
                    end_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    key TEXT NOT NULL UNIQUE,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    summary TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    issue_type TEXT NOT NULL DEFAULT 'task',
                    status TEXT NOT NULL,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    reporter_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    sprint_id INTEGER REFERENCES sprints(id) ON DELETE SET NULL,
                    story_points INTEGER,
                    labels TEXT NOT NULL DEFAULT '[]',
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                    author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS api_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    token_hash TEXT NOT NULL UNIQUE,
                    prefix TEXT NOT NULL,
                    permissions TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    last_used_at TEXT,
                    expires_at TEXT
                );

                CREATE TABLE IF NOT EXISTS saved_filters (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    project_id INTEGER REFERENCES projects(id) ON DELETE CASCADE,
                    query TEXT NOT NULL DEFAULT '{}',
                    shared INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
                CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(project_id, status);
                CREATE INDEX IF NOT EXISTS idx_issues_sprint ON issues(sprint_id);
                CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee_id);
                CREATE INDEX IF NOT EXISTS idx_sprints_project ON sprints(project_id);
                CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);
                CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_sprints_one_active
                    ON sprints(project_id) WHERE status = 'active';
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `f` atomically inside a SAVEPOINT. Savepoints nest, so an
    /// atomic operation may call other atomic operations.
    pub(crate) fn atomic<R>(
        &self,
        f: impl FnOnce(&Connection) -> TrackerResult<R>,
    ) -> TrackerResult<R> {
        self.conn.execute_batch("SAVEPOINT kartavya_atomic")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE kartavya_atomic")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO kartavya_atomic; RELEASE kartavya_atomic")
                {
                    tracing::error!(error = %rollback, "Failed to roll back savepoint");
                }
                Err(e)
            }
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────

/// Map a stored enum string back to its type, reporting corrupt rows as
/// database errors rather than panicking.
pub(crate) fn parse_column<T>(value: &str, column: &str) -> TrackerResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| TrackerError::Database(anyhow::anyhow!("Corrupt {} column: {}", column, e)))
}

pub(crate) fn parse_json_column<T: serde::de::DeserializeOwned>(
    value: &str,
    column: &str,
) -> TrackerResult<T> {
    serde_json::from_str(value).map_err(|e| {
        TrackerError::Database(anyhow::anyhow!("Corrupt {} column: {}", column, e))
    })
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> TrackerResult<String> {
    serde_json::to_string(value).map_err(|e| TrackerError::Other(e.into()))
}

pub(crate) fn require_non_empty(value: &str, field: &str) -> TrackerResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Deserialize a field that distinguishes "absent" (`None`) from explicit
/// `null` (`Some(None)`). Use with `#[serde(default, deserialize_with = ...)]`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
