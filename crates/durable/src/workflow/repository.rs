//! Workflow definition lookup
//!
//! A repository hands out a fresh run instance per lookup, so concurrent runs
//! of the same definition never share engine state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::WorkflowEngine;
use crate::persistence::StoreError;

/// Factory function for creating run instances
pub type WorkflowFactory = Arc<dyn Fn() -> Arc<dyn WorkflowEngine> + Send + Sync>;

/// Source of workflow definitions
#[async_trait]
pub trait WorkflowRepository: Send + Sync + 'static {
    /// Drop any cached view of persisted definitions
    ///
    /// Called before every lookup so a worker never runs a definition that
    /// another process has since changed.
    async fn expire_all(&self) {}

    /// Create a run instance of the workflow, or `None` if it does not exist
    async fn load_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<Arc<dyn WorkflowEngine>>, StoreError>;
}

/// In-memory repository backed by registered factories
///
/// # Example
///
/// ```ignore
/// let repository = InMemoryWorkflowRepository::new();
/// repository.register(workflow_id, move || Arc::new(MyEngine::new(definition.clone())));
/// ```
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    factories: RwLock<HashMap<Uuid, WorkflowFactory>>,
}

impl InMemoryWorkflowRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a workflow id, replacing any previous one
    pub fn register<F>(&self, workflow_id: Uuid, factory: F)
    where
        F: Fn() -> Arc<dyn WorkflowEngine> + Send + Sync + 'static,
    {
        self.factories.write().insert(workflow_id, Arc::new(factory));
    }

    /// Remove a workflow
    pub fn unregister(&self, workflow_id: Uuid) -> bool {
        self.factories.write().remove(&workflow_id).is_some()
    }

    /// Check if a workflow is registered
    pub fn contains(&self, workflow_id: Uuid) -> bool {
        self.factories.read().contains_key(&workflow_id)
    }

    /// Number of registered workflows
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Check if the repository is empty
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl fmt::Debug for InMemoryWorkflowRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryWorkflowRepository")
            .field("workflows", &self.factories.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn load_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<Arc<dyn WorkflowEngine>>, StoreError> {
        // Clone the factory out so it never runs under the lock
        let factory = self.factories.read().get(&workflow_id).cloned();
        Ok(factory.map(|factory| factory()))
    }
}
