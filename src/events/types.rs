//! # Execution Event Types
//!
//! Lifecycle events emitted by running executions. Event types are a closed
//! set and travel as kebab-case strings (`workflow-success`), which is also
//! the `status` field of outbound result records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle event emitted by a running execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Execution admitted and about to run its first action
    Started,
    ActionStarted,
    ActionSuccess,
    ActionFailure,
    /// Execution suspended at a safe point
    Paused,
    Resumed,
    /// Execution observed an abort signal and ended
    Aborted,
    WorkflowSuccess,
    WorkflowFailure,
}

impl EventType {
    /// Every event type, in lifecycle order
    pub const ALL: [EventType; 9] = [
        EventType::Started,
        EventType::ActionStarted,
        EventType::ActionSuccess,
        EventType::ActionFailure,
        EventType::Paused,
        EventType::Resumed,
        EventType::Aborted,
        EventType::WorkflowSuccess,
        EventType::WorkflowFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::ActionStarted => "action-started",
            Self::ActionSuccess => "action-success",
            Self::ActionFailure => "action-failure",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Aborted => "aborted",
            Self::WorkflowSuccess => "workflow-success",
            Self::WorkflowFailure => "workflow-failure",
        }
    }

    /// Check if this event ends an execution (exactly one per execution)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::WorkflowSuccess | Self::WorkflowFailure
        )
    }

    /// Check if this event is attributed to an action rather than the workflow
    pub fn is_action_event(&self) -> bool {
        matches!(
            self,
            Self::ActionStarted | Self::ActionSuccess | Self::ActionFailure
        )
    }

    /// Map a result record `status` string back to its event type
    pub fn from_status(status: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == status)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_status(s).ok_or_else(|| format!("Invalid event type: {s}"))
    }
}

/// One lifecycle event of one execution
///
/// `sender` is the execution id for workflow-level events and the action id
/// for action events; subscriptions match on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub sender: String,
    pub event_type: EventType,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        sender: impl Into<String>,
        event_type: EventType,
        data: Value,
    ) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            sender: sender.into(),
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}
