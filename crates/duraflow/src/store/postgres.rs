//! PostgreSQL store implementation.

use serde_json::Value;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use super::WorkflowStore;
use crate::error::{Error, Result};
use crate::workflow::{EventType, HistoryEvent, WorkflowId, WorkflowRecord, WorkflowStatus};

/// Schema bootstrap, applied by [`PgStore::ensure_schema`].
const SCHEMA: &str = r#"
CREATE SCHEMA IF NOT EXISTS duraflow;

CREATE TABLE IF NOT EXISTS duraflow.workflows (
    id           TEXT PRIMARY KEY,
    class        TEXT NOT NULL,
    args         JSONB NOT NULL,
    status       TEXT NOT NULL DEFAULT 'running',
    wake_up_time TIMESTAMPTZ,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS duraflow.history (
    workflow_id TEXT NOT NULL REFERENCES duraflow.workflows (id) ON DELETE CASCADE,
    seq         BIGINT NOT NULL,
    event_type  TEXT NOT NULL,
    result      JSONB,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (workflow_id, seq)
);

CREATE INDEX IF NOT EXISTS workflows_due_idx
    ON duraflow.workflows (wake_up_time)
    WHERE status = 'sleeping';
"#;

/// PostgreSQL-backed store for production use.
///
/// Timestamps are computed in the database (`now()`) so that multiple
/// workers sharing one store agree on the clock regardless of host skew.
/// The wake claim ([`try_wake`](WorkflowStore::try_wake)) is a guarded
/// `UPDATE` so that concurrent workers cannot both re-enter the same
/// sleeping workflow.
///
/// # Example
///
/// ```ignore
/// use duraflow::PgStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// let store = PgStore::new(pool);
/// store.ensure_schema().await?;
/// ```
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PostgreSQL store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `duraflow` schema and tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowRecord> {
        let status: String = row.try_get("status")?;
        Ok(WorkflowRecord {
            id: WorkflowId::new(row.try_get::<String, _>("id")?),
            class: row.try_get("class")?,
            args: row.try_get("args")?,
            status: status.parse()?,
            wake_up_time: row.try_get("wake_up_time")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl WorkflowStore for PgStore {
    async fn create(&self, id: &WorkflowId, class: &str, args: Value) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO duraflow.workflows (id, class, args) VALUES ($1, $2, $3)"#,
        )
        .bind(id.as_str())
        .bind(class)
        .bind(args)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::WorkflowAlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query(
            r#"SELECT id, class, args, status, wake_up_time, created_at, updated_at
               FROM duraflow.workflows
               WHERE id = $1"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn append_event(
        &self,
        id: &WorkflowId,
        event_type: EventType,
        result: Option<Value>,
    ) -> Result<()> {
        // One orchestrator per workflow is guaranteed upstream, so the
        // max(seq) subquery cannot race with itself for the same stream.
        let outcome = sqlx::query(
            r#"INSERT INTO duraflow.history (workflow_id, seq, event_type, result)
               SELECT $1, COALESCE(MAX(seq), 0) + 1, $2, $3
               FROM duraflow.history
               WHERE workflow_id = $1"#,
        )
        .bind(id.as_str())
        .bind(event_type.as_str())
        .bind(result)
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(Error::WorkflowNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn history(&self, id: &WorkflowId) -> Result<Vec<HistoryEvent>> {
        let rows = sqlx::query(
            r#"SELECT workflow_id, seq, event_type, result, created_at
               FROM duraflow.history
               WHERE workflow_id = $1
               ORDER BY seq ASC"#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let event_type: String = row.try_get("event_type")?;
                Ok(HistoryEvent {
                    workflow_id: WorkflowId::new(row.try_get::<String, _>("workflow_id")?),
                    seq: row.try_get("seq")?,
                    event_type: event_type.parse()?,
                    result: row.try_get("result")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn update_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        wake_up_time: Option<OffsetDateTime>,
    ) -> Result<()> {
        let query = if wake_up_time.is_some() {
            r#"UPDATE duraflow.workflows
               SET status = $2, wake_up_time = $3, updated_at = now()
               WHERE id = $1"#
        } else if status != WorkflowStatus::Sleeping {
            r#"UPDATE duraflow.workflows
               SET status = $2, wake_up_time = NULL, updated_at = now()
               WHERE id = $1"#
        } else {
            r#"UPDATE duraflow.workflows
               SET status = $2, updated_at = now()
               WHERE id = $1"#
        };

        let mut q = sqlx::query(query).bind(id.as_str()).bind(status.as_str());
        if let Some(wake) = wake_up_time {
            q = q.bind(wake);
        }
        let result = q.execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(Error::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn try_wake(&self, id: &WorkflowId) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE duraflow.workflows
               SET status = 'running', wake_up_time = NULL, updated_at = now()
               WHERE id = $1 AND status = 'sleeping'"#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn poll_ready(&self, limit: usize) -> Result<Vec<WorkflowId>> {
        let rows = sqlx::query(
            r#"SELECT id
               FROM duraflow.workflows
               WHERE status = 'sleeping' AND wake_up_time <= now()
               ORDER BY wake_up_time ASC
               LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(WorkflowId::new(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn now(&self) -> Result<OffsetDateTime> {
        let now = sqlx::query_scalar::<_, OffsetDateTime>("SELECT now()")
            .fetch_one(&self.pool)
            .await?;
        Ok(now)
    }
}
