//! PostgreSQL implementation of CheckpointStore
//!
//! One row per live checkpoint in `saved_workflows`, keyed by execution id.
//! Taking a checkpoint deletes the row in the same statement that reads it,
//! so two resumes of the same execution can never both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::Accumulator;

/// PostgreSQL implementation of CheckpointStore
///
/// # Example
///
/// ```ignore
/// use fleetrun_durable::PostgresCheckpointStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/fleetrun").await?;
/// let store = PostgresCheckpointStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("checkpoint store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self, checkpoint), fields(execution_id = %checkpoint.execution_id))]
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let accumulator = serde_json::Value::Object(checkpoint.accumulator);

        sqlx::query(
            r#"
            INSERT INTO saved_workflows
                (workflow_execution_id, workflow_id, action_id, accumulator, app_instances, saved_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (workflow_execution_id) DO UPDATE SET
                workflow_id = EXCLUDED.workflow_id,
                action_id = EXCLUDED.action_id,
                accumulator = EXCLUDED.accumulator,
                app_instances = EXCLUDED.app_instances,
                saved_at = EXCLUDED.saved_at
            "#,
        )
        .bind(checkpoint.execution_id)
        .bind(checkpoint.workflow_id)
        .bind(checkpoint.action_id)
        .bind(&accumulator)
        .bind(&checkpoint.instance_state)
        .bind(checkpoint.saved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save checkpoint: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!("saved checkpoint");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn take_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM saved_workflows
            WHERE workflow_execution_id = $1
            RETURNING workflow_execution_id, workflow_id, action_id, accumulator, app_instances, saved_at
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to take checkpoint: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    #[instrument(skip(self))]
    async fn get_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_execution_id, workflow_id, action_id, accumulator, app_instances, saved_at
            FROM saved_workflows
            WHERE workflow_execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get checkpoint: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("checkpoint store pool closed");
    }
}

fn row_to_checkpoint(row: &PgRow) -> Result<Checkpoint, StoreError> {
    let db_err = |e: sqlx::Error| StoreError::Database(e.to_string());

    let accumulator = match row.try_get::<serde_json::Value, _>("accumulator").map_err(db_err)? {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => Accumulator::new(),
        other => {
            return Err(StoreError::Serialization(format!(
                "accumulator is not an object: {}",
                other
            )))
        }
    };

    Ok(Checkpoint {
        execution_id: row.try_get("workflow_execution_id").map_err(db_err)?,
        workflow_id: row.try_get("workflow_id").map_err(db_err)?,
        action_id: row.try_get::<Option<Uuid>, _>("action_id").map_err(db_err)?,
        accumulator,
        instance_state: row.try_get::<Vec<u8>, _>("app_instances").map_err(db_err)?,
        saved_at: row
            .try_get::<DateTime<Utc>, _>("saved_at")
            .map_err(db_err)?,
    })
}
