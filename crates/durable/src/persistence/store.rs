//! CheckpointStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::workflow::Accumulator;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has been closed
    #[error("store is closed")]
    Closed,

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable snapshot of a suspended run
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    /// Action that was executing when the run suspended
    pub action_id: Option<Uuid>,
    pub accumulator: Accumulator,
    /// App instance state, opaque to the worker
    pub instance_state: Vec<u8>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time
    pub fn new(
        execution_id: Uuid,
        workflow_id: Uuid,
        action_id: Option<Uuid>,
        accumulator: Accumulator,
        instance_state: Vec<u8>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            action_id,
            accumulator,
            instance_state,
            saved_at: Utc::now(),
        }
    }
}

/// Store for checkpoints of suspended runs
///
/// There is at most one live checkpoint per execution id. A checkpoint is
/// retired when it is taken for a resume and cannot be taken again.
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Persist a checkpoint, replacing any live one for the same execution
    ///
    /// Returns only once the checkpoint is durable.
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    /// Read and retire the checkpoint for an execution in one step
    async fn take_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Read the checkpoint for an execution without retiring it
    async fn get_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Drop any cached view so the next read sees writes from other processes
    async fn expire_cache(&self) {}

    /// Release the underlying persistence handle
    async fn close(&self) {}
}
