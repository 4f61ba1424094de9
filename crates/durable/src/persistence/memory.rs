//! In-memory implementation of CheckpointStore for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// In-memory implementation of CheckpointStore
///
/// This is primarily for testing. It stores all data in memory and
/// provides the same semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use fleetrun_durable::InMemoryCheckpointStore;
///
/// let store = InMemoryCheckpointStore::new();
/// assert_eq!(store.checkpoint_count(), 0);
/// ```
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
    closed: AtomicBool,
}

impl InMemoryCheckpointStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the number of live checkpoints
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().len()
    }

    /// Check if a live checkpoint exists for an execution
    pub fn contains(&self, execution_id: Uuid) -> bool {
        self.checkpoints.read().contains_key(&execution_id)
    }

    /// Whether [`close`](CheckpointStore::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.checkpoints.write().clear();
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.checkpoints
            .write()
            .insert(checkpoint.execution_id, checkpoint);
        Ok(())
    }

    async fn take_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        self.ensure_open()?;
        Ok(self.checkpoints.write().remove(&execution_id))
    }

    async fn get_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        self.ensure_open()?;
        Ok(self.checkpoints.read().get(&execution_id).cloned())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
