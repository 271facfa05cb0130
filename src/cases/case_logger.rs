//! # Case Logger
//!
//! Fans each execution event out to every case whose subscription set
//! matches its (sender, event type). Store failures and appends that exceed
//! the timeout are logged and never reach the producing execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use super::store::{CaseRecord, CaseStore};
use super::subscription_cache::SubscriptionCache;
use crate::constants::defaults;
use crate::events::{EventSink, ExecutionEvent};

#[derive(Debug)]
pub struct CaseLogger {
    subscriptions: Arc<SubscriptionCache>,
    store: Arc<dyn CaseStore>,
    timeout: Duration,
    logged: AtomicU64,
}

impl CaseLogger {
    pub fn new(subscriptions: Arc<SubscriptionCache>, store: Arc<dyn CaseStore>) -> Self {
        Self {
            subscriptions,
            store,
            timeout: Duration::from_millis(defaults::SINK_TIMEOUT_MS),
            logged: AtomicU64::new(0),
        }
    }

    /// Limit how long a single append may take
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Records successfully appended so far
    pub fn logged_count(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }

    /// Append the event under every matching case
    pub async fn log_event(&self, event: &ExecutionEvent) {
        // Snapshot the matches so the cache lock is released before any I/O
        let cases = self
            .subscriptions
            .matching_cases(&event.sender, event.event_type);
        if cases.is_empty() {
            return;
        }

        for case_id in cases {
            let record = CaseRecord {
                case_id,
                event: event.clone(),
            };
            match tokio::time::timeout(self.timeout, self.store.append(&record)).await {
                Ok(Ok(())) => {
                    self.logged.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        case_id = %record.case_id,
                        execution_id = %event.execution_id,
                        event_type = %event.event_type,
                        "Case event logged"
                    );
                }
                Ok(Err(e)) => {
                    error!(
                        case_id = %record.case_id,
                        execution_id = %event.execution_id,
                        error = %e,
                        "Failed to log case event"
                    );
                }
                Err(_) => {
                    error!(
                        case_id = %record.case_id,
                        execution_id = %event.execution_id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Case store append timed out"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl EventSink for CaseLogger {
    fn name(&self) -> &'static str {
        "case_logger"
    }

    async fn handle_event(&self, event: &ExecutionEvent) {
        self.log_event(event).await;
    }
}
