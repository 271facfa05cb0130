//! # Events
//!
//! Execution lifecycle events and their in-order fan-out to sinks.

pub mod publisher;
pub mod types;

pub use publisher::{event_channel, EventFanOut, EventPublisher, EventSink, PublishError};
pub use types::{EventType, ExecutionEvent};
