//! # Workflow Receiver
//!
//! Decodes dispatch frames into [`WorkflowTask`]s.

use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{debug, warn};

use super::{inbound_stream, try_inbound};
use crate::channel::{ChannelResult, SecureChannel};
use crate::messaging::WorkflowTask;

#[derive(Debug, Clone)]
pub struct WorkflowReceiver {
    channel: Arc<SecureChannel>,
}

fn accept_task(frame: &[u8]) -> Option<WorkflowTask> {
    match WorkflowTask::from_bytes(frame) {
        Ok(task) => {
            debug!(
                execution_id = %task.execution_id,
                workflow_id = %task.workflow_id,
                "Received workflow task"
            );
            Some(task)
        }
        Err(e) => {
            warn!(error = %e, size_bytes = frame.len(), "Dropping malformed workflow task");
            None
        }
    }
}

impl WorkflowReceiver {
    pub fn new(channel: SecureChannel) -> Self {
        Self {
            channel: Arc::new(channel),
        }
    }

    /// Lazy stream of tasks; malformed payloads are skipped, shutdown ends it
    pub fn receive_workflows(&self) -> BoxStream<'static, WorkflowTask> {
        inbound_stream(self.channel.clone(), accept_task)
    }

    /// Take a queued task without waiting
    pub fn try_receive_workflow(&self) -> ChannelResult<Option<WorkflowTask>> {
        try_inbound(&self.channel, accept_task)
    }

    /// Close the channel, ending any active stream
    pub fn shutdown(&self) {
        self.channel.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.channel.is_closed()
    }
}
