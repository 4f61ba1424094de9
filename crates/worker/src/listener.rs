//! Control-signal listener
//!
//! Runs for the lifetime of the worker, receiving [`ControlSignal`]s:
//! - PAUSE / ABORT are delivered to the matching in-flight run, or dropped
//!   when no run with that execution id is registered
//! - EXIT stops the listener and asks the worker to shut down
//!
//! Receive errors are transient; the listener backs off briefly and retries.

use std::sync::Arc;
use std::time::Duration;

use fleetrun_internal_protocol::{decode_control_signal, ControlSignal};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::RunRegistry;
use crate::transport::ControlChannel;

/// Delay before receiving again after a receive error
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct ControlListener {
    control: Arc<dyn ControlChannel>,
    registry: RunRegistry,
    exit: Arc<Notify>,
    retry_backoff: Duration,
}

impl ControlListener {
    /// Create a listener; `exit` is notified when an EXIT signal arrives
    pub fn new(control: Arc<dyn ControlChannel>, registry: RunRegistry, exit: Arc<Notify>) -> Self {
        Self {
            control,
            registry,
            exit,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Deliver a PAUSE or ABORT to its run; returns whether a run received it
    pub fn route(&self, signal: ControlSignal) -> bool {
        let (delivered, execution_id) = match signal {
            ControlSignal::Pause(id) => (self.registry.pause(id), id),
            ControlSignal::Abort(id) => (self.registry.abort(id), id),
            ControlSignal::Exit => return false,
        };

        if delivered {
            info!(execution_id = %execution_id, signal = ?signal, "Delivered control signal");
        } else {
            debug!(
                execution_id = %execution_id,
                signal = ?signal,
                "No in-flight run for control signal, dropping"
            );
        }
        delivered
    }

    /// Start listening on a background task
    pub fn spawn(self) -> ListenerHandle {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(stopped));
        ListenerHandle { stop, task }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        debug!("Control listener started");

        loop {
            let received = tokio::select! {
                biased;
                _ = stop.changed() => break,
                received = self.control.recv() => received,
            };

            match received {
                Ok(Some(packet)) => match decode_control_signal(&packet) {
                    Ok(ControlSignal::Exit) => {
                        info!("Received EXIT, stopping control listener");
                        self.exit.notify_one();
                        break;
                    }
                    Ok(signal) => {
                        self.route(signal);
                    }
                    Err(e) => warn!(error = %e, "Discarding undecodable control packet"),
                },
                Ok(None) => {
                    info!("Control channel closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Control channel receive failed, retrying");
                    tokio::select! {
                        biased;
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        self.control.close().await;
        debug!("Control listener stopped");
    }
}

/// Handle to a running [`ControlListener`]
pub struct ListenerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the listener to stop after its current receive
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait up to `timeout` for the listener to finish; returns whether it did
    ///
    /// The listener is not cancelled when the timeout elapses.
    pub async fn join(self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Control listener task failed");
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fleetrun_durable::{
        Accumulator, Argument, EngineError, ExecutionContext, ExecutionObserver, WorkflowEngine,
    };
    use fleetrun_internal_protocol::{encode_control_signal, proto};
    use uuid::Uuid;

    use super::*;
    use crate::transport::memory::InMemoryControlChannel;
    use crate::transport::TransportError;

    #[derive(Default)]
    struct PausableEngine {
        pauses: AtomicUsize,
        aborts: AtomicUsize,
    }

    #[async_trait]
    impl WorkflowEngine for PausableEngine {
        fn workflow_id(&self) -> Uuid {
            Uuid::nil()
        }

        fn name(&self) -> &str {
            "pausable"
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

        fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }

        fn executing_action_id(&self) -> Option<Uuid> {
            None
        }

        fn accumulator(&self) -> Accumulator {
            Accumulator::new()
        }

        fn instance_state(&self) -> Vec<u8> {
            vec![]
        }

        fn restore(&self, _accumulator: Accumulator, _instance_state: Vec<u8>) {}
    }

    /// Fails every other receive, then yields the scripted packets
    struct FlakyControlChannel {
        packets: tokio::sync::Mutex<Vec<proto::CommunicationPacket>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ControlChannel for FlakyControlChannel {
        async fn recv(&self) -> Result<Option<proto::CommunicationPacket>, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Err(TransportError::Connect("connection reset".to_string()));
            }
            let mut packets = self.packets.lock().await;
            if packets.is_empty() {
                return Ok(None);
            }
            Ok(Some(packets.remove(0)))
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_routes_pause_and_abort() {
        let (sender, control) = InMemoryControlChannel::new();
        let registry = RunRegistry::new();
        let engine = Arc::new(PausableEngine::default());
        let execution_id = Uuid::now_v7();
        let _guard = registry.register(execution_id, engine.clone());
        let exit = Arc::new(Notify::new());

        let handle = ControlListener::new(Arc::new(control), registry, exit.clone()).spawn();

        sender
            .send(encode_control_signal(ControlSignal::Pause(execution_id)))
            .unwrap();
        sender
            .send(encode_control_signal(ControlSignal::Abort(execution_id)))
            .unwrap();
        sender.send(encode_control_signal(ControlSignal::Exit)).unwrap();

        exit.notified().await;
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(engine.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(engine.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_signal_for_unknown_run_is_dropped() {
        let (_sender, control) = InMemoryControlChannel::new();
        let listener =
            ControlListener::new(Arc::new(control), RunRegistry::new(), Arc::new(Notify::new()));

        assert!(!listener.route(ControlSignal::Pause(Uuid::now_v7())));
        assert!(!listener.route(ControlSignal::Abort(Uuid::now_v7())));
    }

    #[tokio::test]
    async fn test_receive_errors_are_retried() {
        let registry = RunRegistry::new();
        let engine = Arc::new(PausableEngine::default());
        let execution_id = Uuid::now_v7();
        let _guard = registry.register(execution_id, engine.clone());
        let exit = Arc::new(Notify::new());

        let control = FlakyControlChannel {
            packets: tokio::sync::Mutex::new(vec![
                encode_control_signal(ControlSignal::Pause(execution_id)),
                encode_control_signal(ControlSignal::Exit),
            ]),
            calls: AtomicUsize::new(0),
        };

        let handle = ControlListener::new(Arc::new(control), registry, exit.clone())
            .with_retry_backoff(Duration::from_millis(1))
            .spawn();

        exit.notified().await;
        assert!(handle.join(Duration::from_secs(1)).await);
        assert_eq!(engine.pauses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_control_channel() {
        let (_sender, control) = InMemoryControlChannel::new();
        let control = Arc::new(control);

        let handle = ControlListener::new(
            control.clone(),
            RunRegistry::new(),
            Arc::new(Notify::new()),
        )
        .spawn();

        handle.stop();
        assert!(handle.join(Duration::from_secs(1)).await);
        assert!(control.is_closed());
    }
}
