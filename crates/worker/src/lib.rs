//! # Fleetrun Worker
//!
//! Executes workflow runs dispatched by the control plane.
//!
//! A worker connects on three channels: it announces readiness and receives
//! execution requests on the request channel, receives PAUSE / ABORT / EXIT
//! on the control channel, and reports execution events on the results
//! channel. Runs execute on a bounded [`TaskPool`]; suspended runs are
//! checkpointed before their suspend event is reported.

pub mod config;
pub mod credentials;
pub mod encoder;
pub mod listener;
pub mod observer;
pub mod pool;
pub mod process;
pub mod registry;
pub mod task;
pub mod telemetry;
pub mod transport;
pub mod worker;

// Re-export main types
pub use config::{ConfigError, WorkerConfig};
pub use credentials::{CredentialError, Credentials};
pub use encoder::{encode_argument, encode_event};
pub use listener::{ControlListener, ListenerHandle};
pub use observer::SuspendCheckpointer;
pub use pool::{PoolError, PoolStatus, TaskPool};
pub use process::{run_worker_process, serve, shutdown_signal};
pub use registry::{RegisteredRun, RunGuard, RunRegistry};
pub use task::{execute_workflow, run_task, ExecutionServices, TaskError};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use transport::{ControlChannel, RequestChannel, ResultsChannel, TransportError};
pub use worker::{ShutdownReason, Worker, WorkerChannels};
