//! Workflow engine contract
//!
//! The graph traversal itself lives outside this workspace. A worker only
//! needs to start a run, steer it (pause/abort) and read the state that goes
//! into a checkpoint.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Argument, ExecutionEvent};
use crate::persistence::StoreError;

/// Intermediate results of one run, keyed by producer
pub type Accumulator = serde_json::Map<String, serde_json::Value>;

/// Identity of one run, passed explicitly through the call chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
}

/// Error type for engine failures
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested start node is not part of the workflow
    #[error("start node not found: {0}")]
    StartNotFound(Uuid),

    /// Start arguments did not validate
    #[error("invalid start arguments: {0}")]
    InvalidArguments(String),

    /// The observer refused an event the engine could not continue without
    #[error("observer error: {0}")]
    Observer(#[from] ObserverError),

    /// Any other engine failure
    #[error("engine error: {0}")]
    Internal(String),
}

/// Error returned by an observer
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Writing the suspend checkpoint failed; the event was not delivered
    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] StoreError),

    /// The event could not be handed to the results channel
    #[error("event delivery failed: {0}")]
    Delivery(String),
}

/// Receives every event of one run
///
/// Injected into [`WorkflowEngine::execute`]; the engine awaits each call
/// before moving on, so work done inside `on_event` is ordered before the
/// engine's next step.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_event(&self, event: ExecutionEvent) -> Result<(), ObserverError>;
}

/// A stateful run instance of one workflow definition
///
/// `pause` and `abort` are called from other tasks while `execute` is in
/// flight. Both are cooperative: they only set state the engine observes
/// between its own steps.
#[async_trait]
pub trait WorkflowEngine: Send + Sync + 'static {
    /// Id of the workflow definition
    fn workflow_id(&self) -> Uuid;

    /// Human readable workflow name
    fn name(&self) -> &str;

    /// Start node declared by the workflow definition
    fn start_node(&self) -> Uuid;

    /// Run the workflow until it completes, pauses or aborts
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        observer: Arc<dyn ExecutionObserver>,
        start: Uuid,
        arguments: Vec<Argument>,
        resume: bool,
    ) -> Result<(), EngineError>;

    /// Request a pause at the next step boundary
    fn pause(&self);

    /// Request an abort at the next step boundary
    fn abort(&self);

    /// Id of the action currently executing, if any
    fn executing_action_id(&self) -> Option<Uuid>;

    /// Snapshot of the accumulator
    fn accumulator(&self) -> Accumulator;

    /// Snapshot of app instance state, opaque to the worker
    fn instance_state(&self) -> Vec<u8>;

    /// Restore state captured by [`accumulator`](Self::accumulator) and
    /// [`instance_state`](Self::instance_state)
    fn restore(&self, accumulator: Accumulator, instance_state: Vec<u8>);
}
