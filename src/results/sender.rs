//! # Results Sender
//!
//! Turns execution events into outbound result records. Publishing is fire
//! and forget: failures and publishes that exceed the timeout are logged,
//! counted, and never reach the execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use super::publisher::ResultsPublisher;
use crate::constants::defaults;
use crate::events::{EventSink, ExecutionEvent};
use crate::messaging::ResultRecord;

#[derive(Debug)]
pub struct ResultsSender {
    worker: String,
    publisher: Arc<dyn ResultsPublisher>,
    timeout: Duration,
    executed: AtomicU64,
    publish_failures: AtomicU64,
}

impl ResultsSender {
    pub fn new(worker: impl Into<String>, publisher: Arc<dyn ResultsPublisher>) -> Self {
        Self {
            worker: worker.into(),
            publisher,
            timeout: Duration::from_millis(defaults::SINK_TIMEOUT_MS),
            executed: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Limit how long a single publish may take
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Workflows that reached a terminal event
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Publish the event as a result record
    pub async fn send_result(&self, event: &ExecutionEvent) {
        if event.event_type.is_terminal() {
            self.executed.fetch_add(1, Ordering::Relaxed);
        }

        let record = ResultRecord::from_event(event, &self.worker);
        match tokio::time::timeout(self.timeout, self.publisher.publish(&record)).await {
            Ok(Ok(())) => debug!(
                execution_id = %record.execution_id,
                status = %record.status,
                sender = %record.sender,
                "Result published"
            ),
            Err(_) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    execution_id = %record.execution_id,
                    status = %record.status,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Result publish timed out"
                );
            }
            Ok(Err(e)) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    execution_id = %record.execution_id,
                    status = %record.status,
                    error = %e,
                    "Failed to publish result"
                );
            }
        }
    }

    pub fn shutdown(&self) {
        self.publisher.shutdown();
    }
}

#[async_trait]
impl EventSink for ResultsSender {
    fn name(&self) -> &'static str {
        "results_sender"
    }

    async fn handle_event(&self, event: &ExecutionEvent) {
        self.send_result(event).await;
    }
}
