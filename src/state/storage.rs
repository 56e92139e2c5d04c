/// Persistent run history
///
/// The engine writes every finished run through [`HistoryStorage`]. The SQLite
/// implementation keeps the whole record as JSON next to the columns it is
/// queried by, and prunes each workflow down to a retention window on save.

use crate::state::HistoryRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::path::Path;

/// Storage collaborator for finished runs
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Insert or replace a record
    async fn save(&self, record: &HistoryRecord) -> Result<()>;

    /// Most recent records of a workflow first
    async fn list(&self, workflow_id: &str, limit: usize) -> Result<Vec<HistoryRecord>>;
}

/// SQLite-backed history (data/history.db)
#[derive(Debug, Clone)]
pub struct SqliteHistoryStorage {
    pool: SqlitePool,
    /// Records kept per workflow
    retain: usize,
}

impl SqliteHistoryStorage {
    /// Open (or create) the database file and initialise its schema
    pub async fn connect(path: impl AsRef<Path>, retain: usize) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("🗄️ Opening history database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::with_pool(pool, retain).await
    }

    /// Use an existing pool (in-memory databases in tests)
    pub async fn with_pool(pool: SqlitePool, retain: usize) -> Result<Self> {
        let storage = Self {
            pool,
            retain: retain.max(1),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_history (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                record JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_workflow ON execution_history(workflow_id, started_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch one record by run id
    pub async fn get(&self, id: &str) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query("SELECT record FROM execution_history WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("record");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Drop everything but the `retain` most recent records of a workflow
    async fn prune(&self, workflow_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM execution_history
            WHERE workflow_id = ?
              AND id NOT IN (
                  SELECT id FROM execution_history
                  WHERE workflow_id = ?
                  ORDER BY started_at DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(workflow_id)
        .bind(workflow_id)
        .bind(self.retain as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl HistoryStorage for SqliteHistoryStorage {
    async fn save(&self, record: &HistoryRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO execution_history (id, workflow_id, status, started_at, completed_at, record)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                record = excluded.record
            "#,
        )
        .bind(&record.id)
        .bind(&record.workflow_id)
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(record.completed_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)))
        .bind(json)
        .execute(&self.pool)
        .await?;

        let pruned = self.prune(&record.workflow_id).await?;
        if pruned > 0 {
            tracing::debug!("🧹 Pruned {} history records for '{}'", pruned, record.workflow_id);
        }

        tracing::debug!("💾 Saved history record {} ({})", record.id, record.status.as_str());
        Ok(())
    }

    async fn list(&self, workflow_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT record FROM execution_history WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let json: String = row.get("record");
                serde_json::from_str(&json).map_err(anyhow::Error::from)
            })
            .collect()
    }
}
