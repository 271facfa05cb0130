//! # Messaging
//!
//! JSON message contracts carried over the secure channels.

pub mod errors;
pub mod messages;

pub use errors::{MessagingError, MessagingResult};
pub use messages::{
    CaseControl, ControlEnvelope, ControlMessage, ResultRecord, Subscription, WorkflowControl,
    WorkflowTask,
};
