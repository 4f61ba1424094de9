//! Bounded task pool
//!
//! Runs at most `size` workflow tasks at once. Submissions beyond that wait
//! for a permit in submission order. Closing the pool refuses new work;
//! draining waits for everything already submitted, with no timeout.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Task pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Accepting tasks
    Running,
    /// Closed, tasks still running or waiting
    Draining,
    /// Closed and empty
    Stopped,
}

/// Task pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool no longer accepts tasks
    #[error("task pool is closed")]
    Closed,
}

/// Fixed-size pool of concurrently running tasks
#[derive(Clone)]
pub struct TaskPool {
    size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    active: Arc<AtomicUsize>,
}

impl TaskPool {
    /// Create a pool running at most `size` tasks at once (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a task; it starts once a permit is free
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(PoolError::Closed);
        }

        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let _active = ActiveTask::start(active);
            task.await;
        });

        Ok(())
    }

    /// Refuse new tasks and wait for every submitted task to finish
    pub async fn close_and_drain(&self) {
        self.tracker.close();
        info!(
            active = self.active(),
            pending = self.pending(),
            "Draining task pool"
        );
        self.tracker.wait().await;
        debug!("Task pool drained");
    }

    /// Maximum number of concurrently running tasks
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks currently running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of submitted tasks not yet finished, running or waiting
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn status(&self) -> PoolStatus {
        match (self.tracker.is_closed(), self.tracker.is_empty()) {
            (false, _) => PoolStatus::Running,
            (true, false) => PoolStatus::Draining,
            (true, true) => PoolStatus::Stopped,
        }
    }
}

/// Counts a task as active while alive, including when the task panics
struct ActiveTask(Arc<AtomicUsize>);

impl ActiveTask {
    fn start(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
