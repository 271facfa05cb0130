//! # Execution Error Types
//!
//! `ExecutorError` is reserved for programming and configuration faults.
//! Business failures inside a workflow are `ExecutionResult`s, never errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::events::PublishError;

/// Executor faults surfaced to the caller of `admit`/`execute`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Execution already registered: {execution_id}")]
    DuplicateExecution { execution_id: Uuid },

    #[error("Executor at capacity ({capacity} running); check is_at_capacity before admitting")]
    AtCapacity { capacity: usize },

    #[error("Event channel closed; executions cannot report events")]
    EventChannelClosed,
}

impl From<PublishError> for ExecutorError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::ChannelClosed => ExecutorError::EventChannelClosed,
        }
    }
}

/// Failure raised by a single action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("No handler registered for '{handler}'")]
    UnknownHandler { handler: String },

    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("{message}")]
    Failed { message: String },
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn invalid_argument(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            reason: reason.into(),
        }
    }
}

/// Why an execution ended `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Aborted,
    ActionFailed { action: String, message: String },
    ActionPanicked { action: String },
    UnknownWorkflow,
    UnknownResumePoint { action: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => write!(f, "aborted"),
            Self::ActionFailed { action, message } => {
                write!(f, "action '{action}' failed: {message}")
            }
            Self::ActionPanicked { action } => write!(f, "action '{action}' panicked"),
            Self::UnknownWorkflow => write!(f, "unknown workflow"),
            Self::UnknownResumePoint { action } => {
                write!(f, "resume point '{action}' is not an action of this workflow")
            }
        }
    }
}
