//! # Execution Pool
//!
//! Owns the tokio tasks of admitted executions. Admission is decided by the
//! executor before anything reaches the pool, so the pool never queues work.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::executor::AdmittedExecution;

/// Counts from a pool shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolShutdown {
    /// Executions that finished within the grace period
    pub drained: usize,
    /// Executions force-terminated after the grace period
    pub aborted: usize,
}

#[derive(Debug, Default)]
pub struct ExecutionPool {
    tasks: Mutex<JoinSet<()>>,
}

impl ExecutionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an admitted execution on its own task
    pub fn spawn(&self, admitted: AdmittedExecution) {
        let execution_id = admitted.execution_id();
        let mut tasks = self.tasks.lock();
        // Reap finished tasks so the set does not grow with history
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            match admitted.run().await {
                Ok(result) => debug!(
                    execution_id = %result.execution_id,
                    state = %result.state,
                    "Execution finished"
                ),
                Err(e) => error!(execution_id = %execution_id, error = %e, "Execution errored"),
            }
        });
    }

    /// Executions whose tasks have not been reaped yet
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `grace` for in-flight executions, then abort the rest
    pub async fn shutdown(&self, grace: Duration) -> PoolShutdown {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let in_flight = tasks.len();
        info!(in_flight = in_flight, grace_ms = grace.as_millis() as u64, "Execution pool shutting down");

        let mut drained = 0;
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Execution task ended abnormally");
                }
                drained += 1;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_ok() {
            return PoolShutdown {
                drained,
                aborted: 0,
            };
        }

        let aborted = tasks.len();
        warn!(aborted = aborted, "Grace period elapsed; aborting remaining executions");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        PoolShutdown { drained, aborted }
    }
}
