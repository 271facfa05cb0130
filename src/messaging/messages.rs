//! # Wire Messages
//!
//! JSON payloads exchanged with the dispatcher:
//!
//! - [`WorkflowTask`]: dispatch channel, dispatcher → worker
//! - [`ControlEnvelope`]: control channel, dispatcher → worker(s)
//! - [`ResultRecord`]: results channel, worker → dispatcher/UI tier

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use crate::events::{EventType, ExecutionEvent};

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> MessagingResult<T> {
    serde_json::from_slice(bytes).map_err(|e| MessagingError::message_deserialization(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> MessagingResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| MessagingError::message_serialization(e.to_string()))
}

/// Execution request from the dispatcher; consumed exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowTask {
    pub execution_id: Uuid,
    pub workflow_id: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
    /// Action id to resume from; earlier actions are skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<String>,
}

impl WorkflowTask {
    /// Create a task with a fresh execution id
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self::with_execution_id(Uuid::new_v4(), workflow_id)
    }

    pub fn with_execution_id(execution_id: Uuid, workflow_id: impl Into<String>) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            arguments: HashMap::new(),
            resume_from: None,
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_resume_from(mut self, action_id: impl Into<String>) -> Self {
        self.resume_from = Some(action_id.into());
        self
    }

    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        let task: Self = decode(bytes)?;
        if task.workflow_id.trim().is_empty() {
            return Err(MessagingError::invalid_message(
                "workflow_id",
                "must not be empty",
            ));
        }
        Ok(task)
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        encode(self)
    }
}

/// Case subscription: a sender and the event types observed from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subscription {
    pub sender: String,
    pub events: Vec<EventType>,
}

impl Subscription {
    pub fn new(sender: impl Into<String>, events: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            sender: sender.into(),
            events: events.into_iter().collect(),
        }
    }
}

/// Live control of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowControl {
    Pause { execution_id: Uuid },
    Resume { execution_id: Uuid },
    Abort { execution_id: Uuid },
}

impl WorkflowControl {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::Pause { execution_id }
            | Self::Resume { execution_id }
            | Self::Abort { execution_id } => *execution_id,
        }
    }
}

/// Case subscription maintenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseControl {
    Create {
        case_id: String,
        subscriptions: Vec<Subscription>,
    },
    Update {
        case_id: String,
        subscriptions: Vec<Subscription>,
    },
    Delete {
        case_id: String,
    },
}

impl CaseControl {
    pub fn case_id(&self) -> &str {
        match self {
            Self::Create { case_id, .. }
            | Self::Update { case_id, .. }
            | Self::Delete { case_id } => case_id,
        }
    }
}

/// Control-plane instruction, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    Workflow(WorkflowControl),
    Case(CaseControl),
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Workflow(_) => "workflow",
            Self::Case(_) => "case",
        }
    }
}

/// Control message plus its addressee; `None` recipient is a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlEnvelope {
    #[serde(default)]
    pub recipient: Option<String>,
    pub message: ControlMessage,
}

impl ControlEnvelope {
    pub fn broadcast(message: ControlMessage) -> Self {
        Self {
            recipient: None,
            message,
        }
    }

    pub fn addressed_to(recipient: impl Into<String>, message: ControlMessage) -> Self {
        Self {
            recipient: Some(recipient.into()),
            message,
        }
    }

    /// Check whether a worker with this identity should act on the message
    pub fn is_for(&self, identity: &str) -> bool {
        self.recipient
            .as_deref()
            .map_or(true, |recipient| recipient == identity)
    }

    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        decode(bytes)
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        encode(self)
    }
}

/// Outbound result record; `status` is the kebab-case event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: EventType,
    pub sender: String,
    #[serde(default)]
    pub data: Value,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub worker: String,
    pub timestamp: DateTime<Utc>,
}

impl ResultRecord {
    pub fn from_event(event: &ExecutionEvent, worker: impl Into<String>) -> Self {
        Self {
            status: event.event_type,
            sender: event.sender.clone(),
            data: event.data.clone(),
            execution_id: event.execution_id,
            workflow_id: event.workflow_id.clone(),
            worker: worker.into(),
            timestamp: event.timestamp,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        decode(bytes)
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_task_decodes_with_defaults() {
        let id = Uuid::new_v4();
        let payload = json!({"execution_id": id, "workflow_id": "W"}).to_string();
        let task = WorkflowTask::from_bytes(payload.as_bytes()).unwrap();
        assert_eq!(task.execution_id, id);
        assert!(task.arguments.is_empty());
        assert_eq!(task.resume_from, None);
    }

    #[test]
    fn test_workflow_task_rejects_garbage_and_empty_workflow() {
        assert!(matches!(
            WorkflowTask::from_bytes(b"{not json"),
            Err(MessagingError::MessageDeserialization { .. })
        ));

        let payload = json!({"execution_id": Uuid::new_v4(), "workflow_id": " "}).to_string();
        assert!(matches!(
            WorkflowTask::from_bytes(payload.as_bytes()),
            Err(MessagingError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_control_envelope_wire_format() {
        let id = Uuid::new_v4();
        let payload = json!({
            "recipient": "Worker-1",
            "message": {"kind": "workflow", "data": {"type": "pause", "execution_id": id}}
        })
        .to_string();

        let envelope = ControlEnvelope::from_bytes(payload.as_bytes()).unwrap();
        assert_eq!(
            envelope.message,
            ControlMessage::Workflow(WorkflowControl::Pause { execution_id: id })
        );
        assert!(envelope.is_for("Worker-1"));
        assert!(!envelope.is_for("Worker-2"));
    }

    #[test]
    fn test_case_control_decodes_subscriptions() {
        let payload = json!({
            "message": {"kind": "case", "data": {
                "type": "create",
                "case_id": "case-1",
                "subscriptions": [{"sender": "a1", "events": ["action-success", "action-failure"]}]
            }}
        })
        .to_string();

        let envelope = ControlEnvelope::from_bytes(payload.as_bytes()).unwrap();
        assert!(envelope.is_for("Worker-9"));
        match envelope.message {
            ControlMessage::Case(CaseControl::Create {
                case_id,
                subscriptions,
            }) => {
                assert_eq!(case_id, "case-1");
                assert_eq!(
                    subscriptions,
                    vec![Subscription::new(
                        "a1",
                        [EventType::ActionSuccess, EventType::ActionFailure]
                    )]
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_control_type_is_rejected() {
        let payload = json!({
            "message": {"kind": "workflow", "data": {"type": "restart", "execution_id": Uuid::new_v4()}}
        })
        .to_string();
        assert!(ControlEnvelope::from_bytes(payload.as_bytes()).is_err());
    }

    #[test]
    fn test_result_record_status_is_event_string() {
        let id = Uuid::new_v4();
        let event = ExecutionEvent::new(
            id,
            "W",
            id.to_string(),
            EventType::WorkflowSuccess,
            json!({"output": 1}),
        );
        let record = ResultRecord::from_event(&event, "Worker-0");
        let value: Value = serde_json::from_slice(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(value["status"], "workflow-success");
        assert_eq!(value["sender"], id.to_string());
        assert_eq!(value["data"]["output"], 1);
    }
}
