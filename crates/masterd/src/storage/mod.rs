//! SQLite persistence for the Master daemon.
//!
//! Implements the Task Store (C3) and Asset Store (C4) (the latter
//! including the `etl_errors` rows backing DLQ & Replay, C10) from
//! Section 4. Split across submodules by the component it backs, all
//! sharing one connection pool and one error type. The DLQ's `replayAll`
//! orchestration lives in `crate::dlq`, one level up, since it pushes
//! into the Result Queue rather than touching storage alone.

mod asset_store;
mod audit;
mod task_store;

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("stage not found: {0}")]
    StageNotFound(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("etl error row not found: {0}")]
    EtlErrorNotFound(String),
    #[error("asset host not found: {0}")]
    HostNotFound(String),
    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage backend for the daemon. Cheap to clone: `Pool` is a
/// reference-counted handle, so every component holds its own `Storage`
/// rather than passing `&Storage` around.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    /// Open (creating if absent) the SQLite database at `db_path`.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Open an in-memory database, for unit tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded migrations. Idempotent: safe to call on every
    /// startup, including against an already-migrated database.
    pub async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [include_str!("../../../../migrations/0001_init.sql")];

        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    match sqlx::query(trimmed).execute(&self.pool).await {
                        Ok(_) => {}
                        Err(e) => {
                            let msg = e.to_string();
                            if !msg.contains("duplicate column") && !msg.contains("already exists")
                            {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) struct TestStorage {
    pub storage: Storage,
    _dir: tempfile::TempDir,
}

#[cfg(test)]
impl TestStorage {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        Self {
            storage,
            _dir: dir,
        }
    }
}
