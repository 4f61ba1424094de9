// Worker configuration
// Decision: Every setting comes from the environment, with defaults for local development
// Decision: Pool size is fixed for the process lifetime, never adapted at runtime

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be used
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for a worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID, part of the identity announced on every channel
    pub worker_id: String,
    /// Address of the request channel
    pub requests_address: String,
    /// Address of the control channel
    pub control_address: String,
    /// Address of the results channel
    pub results_address: String,
    /// Directory holding client.pem, client.key and server.pem
    pub keys_path: PathBuf,
    /// Name the dispatcher's certificate must be issued for
    pub tls_domain: String,
    /// Number of workflows run concurrently
    pub threads_per_process: usize,
    /// How long shutdown waits for the control listener
    pub listener_join_timeout: Duration,
    /// Checkpoint store connection string
    pub database_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: Uuid::now_v7().to_string(),
            requests_address: "127.0.0.1:5555".to_string(),
            control_address: "127.0.0.1:5557".to_string(),
            results_address: "127.0.0.1:5556".to_string(),
            keys_path: PathBuf::from(".certificates"),
            tls_domain: "localhost".to_string(),
            threads_per_process: 4,
            listener_join_timeout: Duration::from_secs(2),
            database_url: None,
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_ID`: Worker ID (default: a fresh UUID)
    /// - `REQUESTS_ADDRESS`, `CONTROL_ADDRESS`, `RESULTS_ADDRESS`: channel addresses
    /// - `KEYS_PATH`: credential directory
    /// - `TLS_DOMAIN`: expected dispatcher certificate name
    /// - `THREADS_PER_PROCESS`: concurrent workflows (default: 4)
    /// - `LISTENER_JOIN_TIMEOUT_MS`: listener join timeout (default: 2000)
    /// - `DATABASE_URL`: checkpoint store
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let threads_per_process = match parse_var::<usize, _>(&lookup, "THREADS_PER_PROCESS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    name: "THREADS_PER_PROCESS",
                    value: "0".to_string(),
                    reason: "must be at least 1".to_string(),
                })
            }
            Some(threads) => threads,
            None => defaults.threads_per_process,
        };

        let listener_join_timeout = parse_var::<u64, _>(&lookup, "LISTENER_JOIN_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.listener_join_timeout);

        Ok(Self {
            worker_id: lookup("WORKER_ID").unwrap_or(defaults.worker_id),
            requests_address: lookup("REQUESTS_ADDRESS").unwrap_or(defaults.requests_address),
            control_address: lookup("CONTROL_ADDRESS").unwrap_or(defaults.control_address),
            results_address: lookup("RESULTS_ADDRESS").unwrap_or(defaults.results_address),
            keys_path: lookup("KEYS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.keys_path),
            tls_domain: lookup("TLS_DOMAIN").unwrap_or(defaults.tls_domain),
            threads_per_process,
            listener_join_timeout,
            database_url: lookup("DATABASE_URL"),
        })
    }

    /// Identity announced on every channel: `Worker-<id>`
    pub fn identity(&self) -> String {
        format!("Worker-{}", self.worker_id)
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the number of concurrent workflows
    pub fn with_threads_per_process(mut self, threads: usize) -> Self {
        self.threads_per_process = threads.max(1);
        self
    }

    /// Set the listener join timeout
    pub fn with_listener_join_timeout(mut self, timeout: Duration) -> Self {
        self.listener_join_timeout = timeout;
        self
    }

    /// Set the credential directory
    pub fn with_keys_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_path = path.into();
        self
    }

    /// Set the checkpoint store connection string
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
