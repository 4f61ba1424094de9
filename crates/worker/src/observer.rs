//! Per-run observer that checkpoints suspended runs
//!
//! Every event of a run goes through [`SuspendCheckpointer::on_event`]. For a
//! suspending event (workflow paused, trigger awaiting data) the checkpoint is
//! written first and the event is only handed to the results channel once the
//! write has returned. A resume that the dispatcher issues after seeing the
//! event therefore always finds its checkpoint.

use std::sync::Arc;

use async_trait::async_trait;
use fleetrun_durable::{
    Checkpoint, CheckpointStore, ExecutionContext, ExecutionEvent, ExecutionObserver,
    ObserverError, WorkflowEngine,
};
use tracing::{debug, error, warn};

use crate::encoder::encode_event;
use crate::transport::ResultsChannel;

pub struct SuspendCheckpointer {
    ctx: ExecutionContext,
    engine: Arc<dyn WorkflowEngine>,
    checkpoints: Arc<dyn CheckpointStore>,
    results: Arc<dyn ResultsChannel>,
}

impl SuspendCheckpointer {
    pub fn new(
        ctx: ExecutionContext,
        engine: Arc<dyn WorkflowEngine>,
        checkpoints: Arc<dyn CheckpointStore>,
        results: Arc<dyn ResultsChannel>,
    ) -> Self {
        Self {
            ctx,
            engine,
            checkpoints,
            results,
        }
    }

    /// Snapshot the run's current state
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(
            self.ctx.execution_id,
            self.ctx.workflow_id,
            self.engine.executing_action_id(),
            self.engine.accumulator(),
            self.engine.instance_state(),
        )
    }
}

#[async_trait]
impl ExecutionObserver for SuspendCheckpointer {
    async fn on_event(&self, event: ExecutionEvent) -> Result<(), ObserverError> {
        if event.is_suspend() {
            if let Err(e) = self.checkpoints.save_checkpoint(self.checkpoint()).await {
                error!(
                    execution_id = %self.ctx.execution_id,
                    event = event.name(),
                    error = %e,
                    "Failed to checkpoint suspended run, event not reported"
                );
                return Err(ObserverError::Checkpoint(e));
            }
            debug!(
                execution_id = %self.ctx.execution_id,
                event = event.name(),
                "Checkpoint saved"
            );
        }

        let message = encode_event(&self.ctx, &event);
        self.results.send(message).await.map_err(|e| {
            warn!(
                execution_id = %self.ctx.execution_id,
                event = event.name(),
                error = %e,
                "Failed to report event"
            );
            ObserverError::Delivery(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use fleetrun_durable::{
        Accumulator, Argument, EngineError, InMemoryCheckpointStore, WorkflowEventKind,
    };
    use uuid::Uuid;

    use super::*;
    use crate::transport::memory::InMemoryResultsChannel;

    struct SnapshotEngine {
        action: Uuid,
    }

    #[async_trait]
    impl WorkflowEngine for SnapshotEngine {
        fn workflow_id(&self) -> Uuid {
            Uuid::nil()
        }

        fn name(&self) -> &str {
            "snapshot"
        }

        fn start_node(&self) -> Uuid {
            Uuid::nil()
        }

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _observer: Arc<dyn ExecutionObserver>,
            _start: Uuid,
            _arguments: Vec<Argument>,
            _resume: bool,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        fn pause(&self) {}

        fn abort(&self) {}

        fn executing_action_id(&self) -> Option<Uuid> {
            Some(self.action)
        }

        fn accumulator(&self) -> Accumulator {
            let mut accumulator = Accumulator::new();
            accumulator.insert("step".to_string(), serde_json::json!(3));
            accumulator
        }

        fn instance_state(&self) -> Vec<u8> {
            vec![7, 7]
        }

        fn restore(&self, _accumulator: Accumulator, _instance_state: Vec<u8>) {}
    }

    fn observer(
        checkpoints: Arc<InMemoryCheckpointStore>,
        results: Arc<InMemoryResultsChannel>,
        action: Uuid,
    ) -> (ExecutionContext, SuspendCheckpointer) {
        let ctx = ExecutionContext {
            execution_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "snapshot".to_string(),
        };
        let observer = SuspendCheckpointer::new(
            ctx.clone(),
            Arc::new(SnapshotEngine { action }),
            checkpoints,
            results,
        );
        (ctx, observer)
    }

    #[tokio::test]
    async fn test_pause_writes_checkpoint_and_reports() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let results = Arc::new(InMemoryResultsChannel::new());
        let action = Uuid::now_v7();
        let (ctx, observer) = observer(checkpoints.clone(), results.clone(), action);

        observer
            .on_event(ExecutionEvent::Workflow {
                kind: WorkflowEventKind::Paused,
                data: None,
            })
            .await
            .unwrap();

        let saved = checkpoints
            .get_checkpoint(ctx.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.workflow_id, ctx.workflow_id);
        assert_eq!(saved.action_id, Some(action));
        assert_eq!(saved.accumulator["step"], serde_json::json!(3));
        assert_eq!(saved.instance_state, vec![7, 7]);
        assert_eq!(results.event_names(), vec!["WorkflowPaused"]);
    }

    #[tokio::test]
    async fn test_other_events_do_not_checkpoint() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let results = Arc::new(InMemoryResultsChannel::new());
        let (_, observer) = observer(checkpoints.clone(), results.clone(), Uuid::now_v7());

        observer
            .on_event(ExecutionEvent::Workflow {
                kind: WorkflowEventKind::ExecutionStart,
                data: None,
            })
            .await
            .unwrap();

        assert_eq!(checkpoints.checkpoint_count(), 0);
        assert_eq!(results.event_names(), vec!["WorkflowExecutionStart"]);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_suppresses_event() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let results = Arc::new(InMemoryResultsChannel::new());
        let (_, observer) = observer(checkpoints.clone(), results.clone(), Uuid::now_v7());
        checkpoints.close().await;

        let result = observer
            .on_event(ExecutionEvent::Workflow {
                kind: WorkflowEventKind::Paused,
                data: None,
            })
            .await;

        assert!(matches!(result, Err(ObserverError::Checkpoint(_))));
        assert!(results.messages().is_empty());
    }

    #[tokio::test]
    async fn test_closed_results_channel_is_a_delivery_error() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let results = Arc::new(InMemoryResultsChannel::new());
        let (_, observer) = observer(checkpoints, results.clone(), Uuid::now_v7());
        results.close().await;

        let result = observer
            .on_event(ExecutionEvent::Workflow {
                kind: WorkflowEventKind::Resumed,
                data: None,
            })
            .await;

        assert!(matches!(result, Err(ObserverError::Delivery(_))));
    }
}
