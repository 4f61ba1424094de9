//! # Durable Execution Contracts
//!
//! The worker-facing side of a workflow run: what a worker needs from the
//! workflow engine, and where suspended runs are parked until they resume.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WorkflowRepository                        │
//! │  (looks up a definition, hands out a fresh run instance)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowEngine                           │
//! │  (execute / pause / abort, emits ExecutionEvents to the     │
//! │   ExecutionObserver injected by the caller)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ suspend
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CheckpointStore                          │
//! │  (PostgreSQL: saved_workflows, one row per execution id)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use fleetrun_durable::prelude::*;
//!
//! let store = InMemoryCheckpointStore::new();
//! store.save_checkpoint(checkpoint).await?;
//!
//! // Later, on a resume request
//! let checkpoint = store
//!     .take_checkpoint(execution_id)
//!     .await?
//!     .ok_or_else(|| anyhow::anyhow!("no checkpoint for {execution_id}"))?;
//! engine.restore(checkpoint.accumulator, checkpoint.instance_state);
//! ```

pub mod persistence;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::persistence::{
        Checkpoint, CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore, StoreError,
    };
    pub use crate::workflow::{
        Accumulator, ActionEventKind, ActionSender, AppScoped, Argument, ArgumentSource,
        ArgumentValue, ElementEventKind, EngineError, ExecutionContext, ExecutionElement,
        ExecutionEvent, ExecutionObserver, InMemoryWorkflowRepository, ObserverError,
        UserMessage, WorkflowEngine, WorkflowEventKind, WorkflowRepository,
    };
}

// Re-export key types at crate root
pub use persistence::{
    Checkpoint, CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore, StoreError,
};
pub use workflow::{
    Accumulator, ActionEventKind, ActionSender, AppScoped, Argument, ArgumentSource,
    ArgumentValue, ElementEventKind, EngineError, ExecutionContext, ExecutionElement,
    ExecutionEvent, ExecutionObserver, InMemoryWorkflowRepository, ObserverError, UserMessage,
    WorkflowEngine, WorkflowEventKind, WorkflowFactory, WorkflowRepository,
};
