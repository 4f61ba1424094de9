//! Persistence layer for suspended runs
//!
//! This module provides:
//! - [`CheckpointStore`] trait for checkpoint persistence
//! - [`InMemoryCheckpointStore`] for testing
//! - [`PostgresCheckpointStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryCheckpointStore;
pub use postgres::PostgresCheckpointStore;
pub use store::{Checkpoint, CheckpointStore, StoreError};
