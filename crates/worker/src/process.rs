//! Worker process entry point
//!
//! Connects the worker to the dispatcher and the checkpoint database, serves
//! until a termination signal or EXIT, and ends the process. Binaries embed
//! a worker with:
//!
//! ```ignore
//! fn main() -> ! {
//!     let repository = Arc::new(MyWorkflowRepository::new());
//!     fleetrun_worker::run_worker_process(repository)
//! }
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use fleetrun_durable::{PostgresCheckpointStore, WorkflowRepository};
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::credentials::Credentials;
use crate::telemetry::{init_telemetry, TelemetryConfig};
use crate::transport::grpc::GrpcChannels;
use crate::worker::{ShutdownReason, Worker, WorkerChannels};

/// Resolves on SIGINT, SIGTERM or SIGABRT (SIGINT only off unix)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for interrupt signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        // SIGABRT; tokio has no named kind for it
        let abort = async {
            match signal(SignalKind::from_raw(6)) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGABRT");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
            _ = abort => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Connect everything from the environment and serve until shutdown
pub async fn serve(repository: Arc<dyn WorkflowRepository>) -> Result<ShutdownReason> {
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    info!(
        worker_id = %config.worker_id,
        threads = config.threads_per_process,
        keys_path = %config.keys_path.display(),
        "Starting fleetrun worker"
    );

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set for the checkpoint store")?;
    let credentials =
        Credentials::load(&config.keys_path).context("Failed to load worker credentials")?;
    let channels = GrpcChannels::connect(&config, &credentials)
        .await
        .context("Failed to connect to dispatcher")?;

    let checkpoints = match PostgresCheckpointStore::connect(&database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            channels.close().await;
            return Err(anyhow::Error::new(e).context("Failed to connect to checkpoint database"));
        }
    };

    let migrations = checkpoints.clone();
    let worker = Worker::new(
        config,
        WorkerChannels {
            requests: Arc::new(channels.requests),
            control: Arc::new(channels.control),
            results: Arc::new(channels.results),
        },
        repository,
        checkpoints,
    )
    .with_environment_setup(move || async move {
        migrations
            .migrate()
            .await
            .context("Failed to migrate checkpoint database")
    });

    worker.run(shutdown_signal()).await
}

/// Run a worker process to completion and exit
///
/// Exits with status 0 after a completed shutdown and 1 when the worker could
/// not start.
pub fn run_worker_process(repository: Arc<dyn WorkflowRepository>) -> ! {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {e}");
        }
    }

    let telemetry_guard = init_telemetry(TelemetryConfig::from_env());

    let code = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => match runtime.block_on(serve(repository)) {
            Ok(reason) => {
                info!(reason = ?reason, "Worker process exiting");
                0
            }
            Err(e) => {
                error!(error = ?e, "Worker process failed");
                1
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to build tokio runtime");
            1
        }
    };

    // Flush spans before the process ends
    drop(telemetry_guard);
    std::process::exit(code)
}
