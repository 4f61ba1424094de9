// Worker process core
// Decision: Requests are received one at a time; only execution runs in parallel, on the task pool
// Decision: Shutdown steps are attempted in order regardless of how earlier steps went
// Decision: Pool drain has no timeout; a task that never returns blocks shutdown

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleetrun_durable::{CheckpointStore, WorkflowRepository};
use fleetrun_internal_protocol::{decode_execution_request, proto};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::listener::{ControlListener, ListenerHandle};
use crate::pool::TaskPool;
use crate::registry::RunRegistry;
use crate::task::{run_task, ExecutionServices};
use crate::transport::{ControlChannel, RequestChannel, ResultsChannel};

/// The three dispatcher channels of one worker
#[derive(Clone)]
pub struct WorkerChannels {
    pub requests: Arc<dyn RequestChannel>,
    pub control: Arc<dyn ControlChannel>,
    pub results: Arc<dyn ResultsChannel>,
}

/// Why a worker stopped serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal was received
    Signal,
    /// The dispatcher sent EXIT
    Exit,
    /// The request channel ended or failed
    RequestsClosed,
}

type EnvironmentSetup = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Worker serving execution requests until shutdown
pub struct Worker {
    config: WorkerConfig,
    channels: WorkerChannels,
    services: ExecutionServices,
    pool: TaskPool,
    setup: Mutex<Option<EnvironmentSetup>>,
    terminating: watch::Sender<bool>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        channels: WorkerChannels,
        repository: Arc<dyn WorkflowRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let services = ExecutionServices {
            repository,
            checkpoints,
            results: channels.results.clone(),
            registry: RunRegistry::new(),
        };
        let pool = TaskPool::new(config.threads_per_process);
        let (terminating, _) = watch::channel(false);

        Self {
            config,
            channels,
            services,
            pool,
            setup: Mutex::new(None),
            terminating,
        }
    }

    /// Run `setup` once before the worker announces readiness
    ///
    /// A failing setup skips readiness; [`run`](Self::run) still shuts down
    /// and closes every channel before returning the error.
    pub fn with_environment_setup<F, Fut>(mut self, setup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        *self.setup.get_mut() = Some(Box::new(move || Box::pin(setup())));
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Registry of the runs currently executing on this worker
    pub fn registry(&self) -> RunRegistry {
        self.services.registry.clone()
    }

    pub fn pool(&self) -> TaskPool {
        self.pool.clone()
    }

    /// Becomes `true` once shutdown has started
    pub fn termination(&self) -> watch::Receiver<bool> {
        self.terminating.subscribe()
    }

    /// Serve requests until `shutdown_signal` resolves, EXIT arrives or the
    /// request channel ends, then shut down
    pub async fn run<S>(mut self, shutdown_signal: S) -> Result<ShutdownReason>
    where
        S: Future<Output = ()> + Send,
    {
        info!(
            worker_id = %self.config.worker_id,
            threads = self.pool.size(),
            "Starting worker"
        );

        let setup = self.setup.get_mut().take();

        let exit = Arc::new(Notify::new());
        let listener = ControlListener::new(
            self.channels.control.clone(),
            self.services.registry.clone(),
            exit.clone(),
        )
        .spawn();

        let result = self.start_serving(setup, shutdown_signal, &exit).await;

        self.shutdown(listener).await;
        result
    }

    async fn start_serving<S>(
        &self,
        setup: Option<EnvironmentSetup>,
        shutdown_signal: S,
        exit: &Notify,
    ) -> Result<ShutdownReason>
    where
        S: Future<Output = ()> + Send,
    {
        if let Some(setup) = setup {
            setup().await.context("worker environment setup failed")?;
        }

        self.channels
            .requests
            .announce_ready()
            .await
            .context("failed to announce readiness")?;
        info!(identity = %self.config.identity(), "Announced readiness");

        Ok(self.serve(shutdown_signal, exit).await)
    }

    async fn serve<S>(&self, shutdown_signal: S, exit: &Notify) -> ShutdownReason
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_signal => {
                    info!("Received termination signal");
                    return ShutdownReason::Signal;
                }
                _ = exit.notified() => {
                    info!("Received EXIT from dispatcher");
                    return ShutdownReason::Exit;
                }
                received = self.channels.requests.recv() => match received {
                    Ok(Some(message)) => self.dispatch(message),
                    Ok(None) => {
                        info!("Request channel closed by dispatcher");
                        return ShutdownReason::RequestsClosed;
                    }
                    Err(e) => {
                        error!(error = %e, "Request channel failed");
                        return ShutdownReason::RequestsClosed;
                    }
                },
            }
        }
    }

    fn dispatch(&self, message: proto::ExecuteWorkflowMessage) {
        let request = match decode_execution_request(&message) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable execution request");
                return;
            }
        };

        debug!(
            workflow_id = %request.workflow_id,
            execution_id = %request.execution_id,
            resume = request.resume,
            "Received execution request"
        );

        let execution_id = request.execution_id;
        if let Err(e) = self
            .pool
            .submit(run_task(self.services.clone(), request))
        {
            warn!(execution_id = %execution_id, error = %e, "Execution request not accepted");
        }
    }

    async fn shutdown(&self, listener: ListenerHandle) {
        self.terminating.send_replace(true);
        info!(
            active = self.pool.active(),
            pending = self.pool.pending(),
            "Shutting down worker"
        );

        self.pool.close_and_drain().await;

        listener.stop();
        if !listener.join(self.config.listener_join_timeout).await {
            warn!(
                timeout_ms = self.config.listener_join_timeout.as_millis() as u64,
                "Control listener did not stop in time, continuing shutdown"
            );
        }

        self.channels.requests.close().await;
        self.channels.results.close().await;
        self.channels.control.close().await;
        self.services.checkpoints.close().await;

        info!(worker_id = %self.config.worker_id, "Worker shutdown complete");
    }
}
