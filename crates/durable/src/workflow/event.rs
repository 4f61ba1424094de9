//! Events emitted by a running workflow
//!
//! Every event carries its own sender, so an event can never be paired with
//! a sender of the wrong category.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::Argument;

/// Workflow-level event identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowEventKind {
    ExecutionStart,
    /// The run paused; triggers a checkpoint
    Paused,
    Resumed,
    Shutdown,
    Aborted,
    ArgumentsValidated,
    ArgumentsInvalid,
}

impl WorkflowEventKind {
    /// Event name as reported on the wire
    pub fn name(self) -> &'static str {
        match self {
            Self::ExecutionStart => "WorkflowExecutionStart",
            Self::Paused => "WorkflowPaused",
            Self::Resumed => "WorkflowResumed",
            Self::Shutdown => "WorkflowShutdown",
            Self::Aborted => "WorkflowAborted",
            Self::ArgumentsValidated => "WorkflowArgumentsValidated",
            Self::ArgumentsInvalid => "WorkflowArgumentsInvalid",
        }
    }
}

/// Action-level event identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionEventKind {
    Started,
    ExecutionSuccess,
    ExecutionError,
    ArgumentsInvalid,
    /// A trigger action is waiting for external data; triggers a checkpoint
    TriggerAwaitingData,
    TriggerTaken,
    TriggerNotTaken,
}

impl ActionEventKind {
    /// Event name as reported on the wire
    pub fn name(self) -> &'static str {
        match self {
            Self::Started => "ActionStarted",
            Self::ExecutionSuccess => "ActionExecutionSuccess",
            Self::ExecutionError => "ActionExecutionError",
            Self::ArgumentsInvalid => "ActionArgumentsInvalid",
            Self::TriggerAwaitingData => "TriggerActionAwaitingData",
            Self::TriggerTaken => "TriggerActionTaken",
            Self::TriggerNotTaken => "TriggerActionNotTaken",
        }
    }
}

/// Event identities for branches, conditions, transforms and conditional expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementEventKind {
    BranchTaken,
    BranchNotTaken,
    ConditionSuccess,
    ConditionError,
    TransformSuccess,
    TransformError,
    ConditionalExpressionTrue,
    ConditionalExpressionFalse,
    ConditionalExpressionError,
}

impl ElementEventKind {
    /// Event name as reported on the wire
    pub fn name(self) -> &'static str {
        match self {
            Self::BranchTaken => "BranchTaken",
            Self::BranchNotTaken => "BranchNotTaken",
            Self::ConditionSuccess => "ConditionSuccess",
            Self::ConditionError => "ConditionError",
            Self::TransformSuccess => "TransformSuccess",
            Self::TransformError => "TransformError",
            Self::ConditionalExpressionTrue => "ConditionalExpressionTrue",
            Self::ConditionalExpressionFalse => "ConditionalExpressionFalse",
            Self::ConditionalExpressionError => "ConditionalExpressionError",
        }
    }
}

/// Capability of elements that belong to an app
pub trait AppScoped {
    fn app_name(&self) -> &str;
}

/// A branch, condition, transform or conditional expression
///
/// Only app-scoped elements (conditions and transforms, typically) expose an
/// app name, through [`app_scope`](ExecutionElement::app_scope).
pub trait ExecutionElement: fmt::Debug + Send + Sync {
    fn id(&self) -> Uuid;

    fn app_scope(&self) -> Option<&dyn AppScoped> {
        None
    }
}

/// The action that emitted an action event
#[derive(Debug, Clone)]
pub struct ActionSender {
    pub name: String,
    pub id: Uuid,
    /// Id of this particular execution of the action
    pub execution_id: Uuid,
    pub app_name: String,
    pub action_name: String,
    pub device_id: Option<i64>,
    pub arguments: Vec<Argument>,
}

/// A message sent to users by a running workflow
#[derive(Debug, Clone, Default)]
pub struct UserMessage {
    pub subject: Option<String>,
    pub body: serde_json::Value,
    pub users: Option<Vec<i64>>,
    pub roles: Option<Vec<i64>>,
    pub requires_reauth: Option<bool>,
}

/// An event reported by a running workflow to its observer
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Emitted by the workflow itself
    Workflow {
        kind: WorkflowEventKind,
        data: Option<serde_json::Value>,
    },

    /// Emitted by an action
    Action {
        kind: ActionEventKind,
        sender: ActionSender,
        data: Option<serde_json::Value>,
    },

    /// An action sent a message to users
    MessageSent(UserMessage),

    /// Emitted by a branch, condition, transform or conditional expression
    Element {
        kind: ElementEventKind,
        sender: Arc<dyn ExecutionElement>,
    },
}

impl ExecutionEvent {
    /// Event name as reported on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Workflow { kind, .. } => kind.name(),
            Self::Action { kind, .. } => kind.name(),
            Self::MessageSent(_) => "SendMessage",
            Self::Element { kind, .. } => kind.name(),
        }
    }

    /// Whether this event suspends the run
    ///
    /// Suspending events must be checkpointed before anyone downstream can
    /// observe them.
    pub fn is_suspend(&self) -> bool {
        matches!(
            self,
            Self::Workflow {
                kind: WorkflowEventKind::Paused,
                ..
            } | Self::Action {
                kind: ActionEventKind::TriggerAwaitingData,
                ..
            }
        )
    }
}
