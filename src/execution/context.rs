//! # Execution Context
//!
//! Live record of one in-flight execution. State lives in a `watch` channel
//! so a paused execution can sleep until a resume or abort lands.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::ExecutionState;

#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: Uuid,
    workflow_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    state: watch::Sender<ExecutionState>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub(crate) fn new(execution_id: Uuid, workflow_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ExecutionState::Running);
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            state,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Apply a transition if legal; returns the previous state, or the
    /// current state when the transition is rejected
    pub(crate) fn set_state(&self, target: ExecutionState) -> Result<ExecutionState, ExecutionState> {
        let mut outcome = Err(target);
        self.state.send_if_modified(|current| {
            if current.can_transition_to(target) {
                outcome = Ok(*current);
                *current = target;
                true
            } else {
                outcome = Err(*current);
                false
            }
        });
        outcome
    }

    pub(crate) fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Sleep while paused; true once running again, false on abort
    pub(crate) async fn wait_while_paused(&self) -> bool {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ExecutionState::Running => return true,
                ExecutionState::Paused => {}
                _ => return false,
            }
            tokio::select! {
                _ = self.cancellation.cancelled() => return false,
                changed = state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_rejected_transition_reports_current_state() {
        let context = ExecutionContext::new(Uuid::new_v4(), "wf");
        assert_eq!(context.set_state(ExecutionState::Completed), Ok(ExecutionState::Running));
        assert_eq!(
            context.set_state(ExecutionState::Running),
            Err(ExecutionState::Completed)
        );
    }

    #[tokio::test]
    async fn test_wait_while_paused_wakes_on_resume() {
        let context = Arc::new(ExecutionContext::new(Uuid::new_v4(), "wf"));
        context.set_state(ExecutionState::Paused).unwrap();

        let waiter = {
            let context = context.clone();
            tokio::spawn(async move { context.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        context.set_state(ExecutionState::Running).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_while_paused_wakes_on_cancel() {
        let context = Arc::new(ExecutionContext::new(Uuid::new_v4(), "wf"));
        context.set_state(ExecutionState::Paused).unwrap();

        let waiter = {
            let context = context.clone();
            tokio::spawn(async move { context.wait_while_paused().await })
        };
        context.set_state(ExecutionState::Aborting).unwrap();
        context.cancel();
        assert!(!waiter.await.unwrap());
    }
}
