//! Workflow engine contract and types
//!
//! This module contains what a worker consumes from the workflow engine:
//! - [`WorkflowEngine`] trait for a stateful run instance
//! - [`ExecutionObserver`] injected into every run to receive its events
//! - [`ExecutionEvent`] enum for everything a run reports
//! - [`Argument`] for named start and action arguments
//! - [`WorkflowRepository`] for looking up workflow definitions

mod argument;
mod engine;
mod event;
mod repository;

pub use argument::{Argument, ArgumentSource, ArgumentValue};
pub use engine::{
    Accumulator, EngineError, ExecutionContext, ExecutionObserver, ObserverError, WorkflowEngine,
};
pub use event::{
    ActionEventKind, ActionSender, AppScoped, ElementEventKind, ExecutionElement, ExecutionEvent,
    UserMessage, WorkflowEventKind,
};
pub use repository::{InMemoryWorkflowRepository, WorkflowFactory, WorkflowRepository};
