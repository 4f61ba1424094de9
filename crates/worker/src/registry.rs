//! In-flight run registry
//!
//! Execution tasks register their run for as long as the engine is executing
//! it. The control listener looks runs up by execution id to deliver PAUSE and
//! ABORT; a signal for an execution that is not registered is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fleetrun_durable::WorkflowEngine;
use tracing::debug;
use uuid::Uuid;

/// One registered run
#[derive(Clone)]
pub struct RegisteredRun {
    pub engine: Arc<dyn WorkflowEngine>,
    /// Task executing the run, when registered from inside a tokio task
    pub task_id: Option<tokio::task::Id>,
    registration: u64,
}

/// Concurrent index of in-flight runs keyed by execution id
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<Uuid, RegisteredRun>>,
    next_registration: Arc<AtomicU64>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run until the returned guard is dropped
    pub fn register(&self, execution_id: Uuid, engine: Arc<dyn WorkflowEngine>) -> RunGuard {
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let task_id = tokio::task::try_id();

        if self
            .runs
            .insert(
                execution_id,
                RegisteredRun {
                    engine,
                    task_id,
                    registration,
                },
            )
            .is_some()
        {
            debug!(execution_id = %execution_id, "replaced an in-flight run with the same execution id");
        }

        RunGuard {
            registry: self.clone(),
            execution_id,
            registration,
        }
    }

    /// Engine of the in-flight run for an execution
    pub fn get(&self, execution_id: Uuid) -> Option<Arc<dyn WorkflowEngine>> {
        // Clone out so the engine is never called under a shard lock
        self.runs
            .get(&execution_id)
            .map(|run| Arc::clone(&run.engine))
    }

    /// Task executing the run for an execution
    pub fn task_id(&self, execution_id: Uuid) -> Option<tokio::task::Id> {
        self.runs.get(&execution_id).and_then(|run| run.task_id)
    }

    /// Ask a run to pause; returns whether the run was found
    pub fn pause(&self, execution_id: Uuid) -> bool {
        match self.get(execution_id) {
            Some(engine) => {
                engine.pause();
                true
            }
            None => false,
        }
    }

    /// Ask a run to abort; returns whether the run was found
    pub fn abort(&self, execution_id: Uuid) -> bool {
        match self.get(execution_id) {
            Some(engine) => {
                engine.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, execution_id: Uuid) -> bool {
        self.runs.contains_key(&execution_id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Deregisters its run when dropped
///
/// Only removes the entry it created, so a later registration of the same
/// execution id survives the earlier guard.
#[must_use = "the run is deregistered as soon as the guard is dropped"]
pub struct RunGuard {
    registry: RunRegistry,
    execution_id: Uuid,
    registration: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry
            .runs
            .remove_if(&self.execution_id, |_, run| {
                run.registration == self.registration
            });
    }
}
