// Workflow execution task
// Decision: One task per execution request, run on the worker's task pool
// Decision: Task failures stay local; they are logged and never reported on the results channel

use std::sync::Arc;

use fleetrun_durable::{
    CheckpointStore, EngineError, ExecutionContext, StoreError, WorkflowRepository,
};
use fleetrun_internal_protocol::ExecutionRequest;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::observer::SuspendCheckpointer;
use crate::registry::RunRegistry;
use crate::transport::ResultsChannel;

/// Errors that end one execution task
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Resume requested but no live checkpoint exists, or it was already used
    #[error("no checkpoint to resume execution {0}")]
    CheckpointMissing(Uuid),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Everything an execution task needs besides its request
#[derive(Clone)]
pub struct ExecutionServices {
    pub repository: Arc<dyn WorkflowRepository>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub results: Arc<dyn ResultsChannel>,
    pub registry: RunRegistry,
}

/// Run one workflow execution to completion, pause or abort
#[instrument(
    skip_all,
    fields(
        workflow_id = %request.workflow_id,
        execution_id = %request.execution_id,
        resume = request.resume
    )
)]
pub async fn execute_workflow(
    services: &ExecutionServices,
    request: ExecutionRequest,
) -> Result<(), TaskError> {
    // Other processes may have written definitions or checkpoints since the last lookup
    services.repository.expire_all().await;
    services.checkpoints.expire_cache().await;

    let engine = services
        .repository
        .load_workflow(request.workflow_id)
        .await?
        .ok_or(TaskError::WorkflowNotFound(request.workflow_id))?;

    let ctx = ExecutionContext {
        execution_id: request.execution_id,
        workflow_id: request.workflow_id,
        workflow_name: engine.name().to_string(),
    };

    if request.resume {
        let checkpoint = services
            .checkpoints
            .take_checkpoint(ctx.execution_id)
            .await?
            .ok_or(TaskError::CheckpointMissing(ctx.execution_id))?;
        debug!(action_id = ?checkpoint.action_id, "Restoring checkpoint");
        engine.restore(checkpoint.accumulator, checkpoint.instance_state);
    }

    let _registration = services.registry.register(ctx.execution_id, engine.clone());

    let start = request.start.unwrap_or_else(|| engine.start_node());
    let observer = Arc::new(SuspendCheckpointer::new(
        ctx.clone(),
        engine.clone(),
        services.checkpoints.clone(),
        services.results.clone(),
    ));

    debug!(start = %start, "Executing workflow");
    engine
        .execute(&ctx, observer, start, request.arguments, request.resume)
        .await?;

    Ok(())
}

/// Pool entry point: execute and log the outcome
pub async fn run_task(services: ExecutionServices, request: ExecutionRequest) {
    let workflow_id = request.workflow_id;
    let execution_id = request.execution_id;

    match execute_workflow(&services, request).await {
        Ok(()) => info!(
            workflow_id = %workflow_id,
            execution_id = %execution_id,
            "Workflow execution returned"
        ),
        Err(e) => error!(
            workflow_id = %workflow_id,
            execution_id = %execution_id,
            error = %e,
            "Workflow execution failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use fleetrun_durable::{
        Accumulator, Argument, Checkpoint, ExecutionObserver, InMemoryCheckpointStore,
        InMemoryWorkflowRepository, WorkflowEngine,
    };
    use parking_lot::Mutex;

    use super::*;
    use crate::transport::memory::InMemoryResultsChannel;

    /// Records what the task did to it
    #[derive(Default)]
    struct RecordingEngine {
        declared_start: Uuid,
        started_at: Mutex<Option<Uuid>>,
        restored: Mutex<Option<(Accumulator, Vec<u8>)>>,
        registered_during_execute: Mutex<Option<bool>>,
        registry: Mutex<Option<RunRegistry>>,
    }

    #[async_trait]
    impl WorkflowEngine for RecordingEngine {
        fn workflow_id(&self) -> Uuid {
            Uuid::nil()
        }

        fn name(&self) -> &str {
            "recording"
        }

        fn start_node(&self) -> Uuid {
            self.declared_start
        }

        async fn execute(
            &self,
            ctx: &ExecutionContext,
            _observer: Arc<dyn ExecutionObserver>,
            start: Uuid,
            _arguments: Vec<Argument>,
            _resume: bool,
        ) -> Result<(), EngineError> {
            *self.started_at.lock() = Some(start);
            let registered = self
                .registry
                .lock()
                .as_ref()
                .map(|registry| registry.contains(ctx.execution_id));
            *self.registered_during_execute.lock() = registered;
            Ok(())
        }

        fn pause(&self) {}

        fn abort(&self) {}

        fn executing_action_id(&self) -> Option<Uuid> {
            None
        }

        fn accumulator(&self) -> Accumulator {
            Accumulator::new()
        }

        fn instance_state(&self) -> Vec<u8> {
            vec![]
        }

        fn restore(&self, accumulator: Accumulator, instance_state: Vec<u8>) {
            *self.restored.lock() = Some((accumulator, instance_state));
        }
    }

    struct Fixture {
        services: ExecutionServices,
        checkpoints: Arc<InMemoryCheckpointStore>,
        engine: Arc<RecordingEngine>,
        workflow_id: Uuid,
    }

    fn fixture() -> Fixture {
        let registry = RunRegistry::new();
        let engine = Arc::new(RecordingEngine {
            declared_start: Uuid::now_v7(),
            ..Default::default()
        });
        *engine.registry.lock() = Some(registry.clone());

        let workflow_id = Uuid::now_v7();
        let repository = Arc::new(InMemoryWorkflowRepository::new());
        let shared = engine.clone();
        repository.register(workflow_id, move || shared.clone() as Arc<dyn WorkflowEngine>);

        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let services = ExecutionServices {
            repository,
            checkpoints: checkpoints.clone(),
            results: Arc::new(InMemoryResultsChannel::new()),
            registry,
        };

        Fixture {
            services,
            checkpoints,
            engine,
            workflow_id,
        }
    }

    fn request(workflow_id: Uuid, resume: bool) -> ExecutionRequest {
        ExecutionRequest {
            workflow_id,
            execution_id: Uuid::now_v7(),
            start: None,
            arguments: vec![],
            resume,
        }
    }

    #[tokio::test]
    async fn test_uses_declared_start_without_override() {
        let fixture = fixture();

        execute_workflow(&fixture.services, request(fixture.workflow_id, false))
            .await
            .unwrap();

        assert_eq!(
            *fixture.engine.started_at.lock(),
            Some(fixture.engine.declared_start)
        );
        assert!(fixture.engine.restored.lock().is_none());
    }

    #[tokio::test]
    async fn test_explicit_start_overrides_declared_start() {
        let fixture = fixture();
        let start = Uuid::now_v7();
        let mut request = request(fixture.workflow_id, false);
        request.start = Some(start);

        execute_workflow(&fixture.services, request).await.unwrap();

        assert_eq!(*fixture.engine.started_at.lock(), Some(start));
    }

    #[tokio::test]
    async fn test_run_is_registered_only_while_executing() {
        let fixture = fixture();
        let request = request(fixture.workflow_id, false);
        let execution_id = request.execution_id;

        execute_workflow(&fixture.services, request).await.unwrap();

        assert_eq!(*fixture.engine.registered_during_execute.lock(), Some(true));
        assert!(!fixture.services.registry.contains(execution_id));
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails_task() {
        let fixture = fixture();
        let missing = Uuid::now_v7();

        let result = execute_workflow(&fixture.services, request(missing, false)).await;

        assert!(matches!(result, Err(TaskError::WorkflowNotFound(id)) if id == missing));
        assert!(fixture.services.registry.is_empty());
    }

    #[tokio::test]
    async fn test_resume_restores_and_retires_checkpoint() {
        let fixture = fixture();
        let request = request(fixture.workflow_id, true);
        let mut accumulator = Accumulator::new();
        accumulator.insert("a1".to_string(), serde_json::json!("done"));
        fixture
            .checkpoints
            .save_checkpoint(Checkpoint::new(
                request.execution_id,
                fixture.workflow_id,
                None,
                accumulator.clone(),
                vec![9],
            ))
            .await
            .unwrap();
        let execution_id = request.execution_id;

        execute_workflow(&fixture.services, request).await.unwrap();

        assert_eq!(
            fixture.engine.restored.lock().clone(),
            Some((accumulator, vec![9]))
        );
        assert!(!fixture.checkpoints.contains(execution_id));

        // The checkpoint is gone, so a second resume must fail
        let mut again = self::request(fixture.workflow_id, true);
        again.execution_id = execution_id;
        let result = execute_workflow(&fixture.services, again).await;
        assert!(matches!(result, Err(TaskError::CheckpointMissing(_))));
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_does_not_execute() {
        let fixture = fixture();

        let result = execute_workflow(&fixture.services, request(fixture.workflow_id, true)).await;

        assert!(matches!(result, Err(TaskError::CheckpointMissing(_))));
        assert!(fixture.engine.started_at.lock().is_none());
    }
}
