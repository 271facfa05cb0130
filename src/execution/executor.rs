//! # Workflow Executor
//!
//! Admission control and lifecycle routing for workflow executions.
//!
//! The executor interprets a workflow's action graph one action at a time,
//! calling the [`ExecutionStrategy`] for each. Between actions it passes a
//! safe point where pause and abort take effect. Every lifecycle step is
//! published as an [`ExecutionEvent`] on the event channel; the terminal
//! event is published after the context has left the registry, so anyone
//! reacting to it already sees the freed slot.
//!
//! ```text
//! Running ──► Completed | Failed
//! Running ⇄ Paused
//! Running | Paused ──► Aborting ──► Failed(aborted)
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::errors::{ExecutorError, FailureReason};
use super::graph::ActionGraphStore;
use super::registry::{ExecutionRegistry, TransitionRejected};
use super::state::ExecutionState;
use super::strategy::{ActionInvocation, ExecutionStrategy};
use crate::events::{EventPublisher, EventType, ExecutionEvent};
use crate::messaging::WorkflowTask;

tokio::task_local! {
    static CURRENT_EXECUTION: Arc<ExecutionContext>;
}

/// Result of a pause, resume or abort request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ControlOutcome {
    Applied,
    /// No live execution has this id
    NotFound,
    /// The execution's state does not allow the request
    Ignored { state: ExecutionState },
    /// Resuming would exceed capacity; retry once a slot frees up
    AtCapacity,
}

/// Terminal outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub state: ExecutionState,
    pub output: Option<Value>,
    pub failure: Option<FailureReason>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    pub fn is_aborted(&self) -> bool {
        self.failure == Some(FailureReason::Aborted)
    }
}

/// Point-in-time executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub capacity: usize,
    pub running: usize,
    pub paused: usize,
    pub live: usize,
    pub admitted: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Where an interpreted workflow ended up, before settling its state
enum Outcome {
    Completed(Value),
    Failed(FailureReason),
}

pub struct WorkflowExecutor {
    registry: ExecutionRegistry,
    graphs: Arc<dyn ActionGraphStore>,
    strategy: Arc<dyn ExecutionStrategy>,
    events: EventPublisher,
    counters: Counters,
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("capacity", &self.registry.capacity())
            .field("running", &self.registry.running())
            .field("live", &self.registry.len())
            .finish()
    }
}

/// An execution registered as `Running` but not yet started
///
/// Dropping it without calling [`run`](Self::run) releases its slot.
#[must_use = "an admitted execution holds a capacity slot until run"]
pub struct AdmittedExecution {
    executor: Arc<WorkflowExecutor>,
    context: Arc<ExecutionContext>,
    task: Option<WorkflowTask>,
}

impl AdmittedExecution {
    pub fn execution_id(&self) -> Uuid {
        self.context.execution_id()
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Interpret the workflow to a terminal result
    pub async fn run(mut self) -> Result<ExecutionResult, ExecutorError> {
        let executor = self.executor.clone();
        let context = self.context.clone();
        let Some(task) = self.task.take() else {
            return Err(ExecutorError::DuplicateExecution {
                execution_id: context.execution_id(),
            });
        };

        CURRENT_EXECUTION
            .scope(context.clone(), executor.drive(context, task))
            .await
    }
}

impl Drop for AdmittedExecution {
    fn drop(&mut self) {
        if self.task.is_some() {
            // Never run; give the slot back quietly
            let _ = self
                .executor
                .registry
                .transition(&self.context, ExecutionState::Failed);
            self.executor.registry.remove(&self.context.execution_id());
        }
    }
}

impl WorkflowExecutor {
    pub fn new(
        capacity: usize,
        graphs: Arc<dyn ActionGraphStore>,
        strategy: Arc<dyn ExecutionStrategy>,
        events: EventPublisher,
    ) -> Self {
        info!(capacity = capacity, "Workflow executor created");
        Self {
            registry: ExecutionRegistry::new(capacity),
            graphs,
            strategy,
            events,
            counters: Counters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// True iff the number of `Running` executions has reached capacity
    pub fn is_at_capacity(&self) -> bool {
        self.registry.running() >= self.registry.capacity()
    }

    /// Register `task` as `Running` so the next capacity check already sees it
    pub fn admit(self: &Arc<Self>, task: WorkflowTask) -> Result<AdmittedExecution, ExecutorError> {
        if self.events.is_closed() {
            return Err(ExecutorError::EventChannelClosed);
        }
        let context = Arc::new(ExecutionContext::new(task.execution_id, &task.workflow_id));
        self.registry.register(context.clone())?;
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);

        debug!(
            execution_id = %task.execution_id,
            workflow_id = %task.workflow_id,
            running = self.registry.running(),
            "Execution admitted"
        );
        Ok(AdmittedExecution {
            executor: self.clone(),
            context,
            task: Some(task),
        })
    }

    /// Admit and run `task` to completion
    ///
    /// Business failures come back as `Failed` results; `Err` means the
    /// executor itself was misused or its event channel is gone.
    pub async fn execute(
        self: &Arc<Self>,
        task: WorkflowTask,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.admit(task)?.run().await
    }

    /// Pause a running execution at its next safe point
    pub fn pause(&self, execution_id: Uuid) -> ControlOutcome {
        let Some(context) = self.registry.get(&execution_id) else {
            warn!(execution_id = %execution_id, "Cannot pause unknown execution");
            return ControlOutcome::NotFound;
        };
        if context.state() != ExecutionState::Running {
            return self.ignored("pause", &context);
        }
        self.apply("pause", &context, ExecutionState::Paused)
    }

    /// Resume a paused execution, if a running slot is free
    pub fn resume(&self, execution_id: Uuid) -> ControlOutcome {
        let Some(context) = self.registry.get(&execution_id) else {
            warn!(execution_id = %execution_id, "Cannot resume unknown execution");
            return ControlOutcome::NotFound;
        };
        if context.state() != ExecutionState::Paused {
            return self.ignored("resume", &context);
        }
        self.apply("resume", &context, ExecutionState::Running)
    }

    /// Signal cancellation; observed at the execution's next safe point
    pub fn abort(&self, execution_id: Uuid) -> ControlOutcome {
        let Some(context) = self.registry.get(&execution_id) else {
            warn!(execution_id = %execution_id, "Cannot abort unknown execution");
            return ControlOutcome::NotFound;
        };
        let outcome = self.apply("abort", &context, ExecutionState::Aborting);
        if outcome == ControlOutcome::Applied {
            context.cancel();
        }
        outcome
    }

    fn apply(
        &self,
        request: &'static str,
        context: &ExecutionContext,
        target: ExecutionState,
    ) -> ControlOutcome {
        match self.registry.transition(context, target) {
            Ok(previous) => {
                info!(
                    execution_id = %context.execution_id(),
                    request = request,
                    from = %previous,
                    to = %target,
                    "Control applied"
                );
                ControlOutcome::Applied
            }
            Err(TransitionRejected::AtCapacity) => {
                warn!(
                    execution_id = %context.execution_id(),
                    request = request,
                    capacity = self.capacity(),
                    "Control deferred; executor at capacity"
                );
                ControlOutcome::AtCapacity
            }
            Err(TransitionRejected::Invalid(_)) => self.ignored(request, context),
        }
    }

    fn ignored(&self, request: &'static str, context: &ExecutionContext) -> ControlOutcome {
        let state = context.state();
        warn!(
            execution_id = %context.execution_id(),
            request = request,
            state = %state,
            "Control ignored in current state"
        );
        ControlOutcome::Ignored { state }
    }

    /// The context of the execution the caller is running inside, if any
    pub fn get_current_workflow() -> Option<Arc<ExecutionContext>> {
        CURRENT_EXECUTION.try_with(Arc::clone).ok()
    }

    /// Look up a live execution
    pub fn context(&self, execution_id: Uuid) -> Option<Arc<ExecutionContext>> {
        self.registry.get(&execution_id)
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            capacity: self.registry.capacity(),
            running: self.registry.running(),
            paused: self.registry.count_in(ExecutionState::Paused),
            live: self.registry.len(),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Fail every execution still registered (their tasks were torn down)
    ///
    /// Returns how many were failed.
    pub async fn fail_remaining(&self, reason: &str) -> usize {
        let remaining = self.registry.snapshot();
        for context in &remaining {
            context.cancel();
            let _ = self.registry.transition(context, ExecutionState::Aborting);
            let _ = self.registry.transition(context, ExecutionState::Failed);
            self.registry.remove(&context.execution_id());
            self.counters.failed.fetch_add(1, Ordering::Relaxed);

            warn!(
                execution_id = %context.execution_id(),
                reason = reason,
                "Execution force-terminated"
            );
            let event = ExecutionEvent::new(
                context.execution_id(),
                context.workflow_id(),
                context.execution_id().to_string(),
                EventType::Aborted,
                json!({ "reason": FailureReason::Aborted, "detail": reason }),
            );
            if self.events.publish(event).await.is_err() {
                debug!("Event channel closed; aborted event not published");
            }
        }
        remaining.len()
    }

    async fn emit(
        &self,
        context: &ExecutionContext,
        sender: &str,
        event_type: EventType,
        data: Value,
    ) -> Result<(), ExecutorError> {
        let event = ExecutionEvent::new(
            context.execution_id(),
            context.workflow_id(),
            sender,
            event_type,
            data,
        );
        self.events.publish(event).await?;
        Ok(())
    }

    async fn drive(
        self: Arc<Self>,
        context: Arc<ExecutionContext>,
        task: WorkflowTask,
    ) -> Result<ExecutionResult, ExecutorError> {
        let outcome = self.interpret(&context, &task).await;
        match outcome {
            Ok(outcome) => self.settle(&context, outcome).await,
            Err(e) => {
                error!(
                    execution_id = %context.execution_id(),
                    error = %e,
                    "Execution stopped by executor fault"
                );
                let _ = self.registry.transition(&context, ExecutionState::Failed);
                self.registry.remove(&context.execution_id());
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Safe point between actions; false when the execution must stop
    async fn safe_point(&self, context: &ExecutionContext) -> Result<bool, ExecutorError> {
        if context.is_cancelled() {
            return Ok(false);
        }
        match context.state() {
            ExecutionState::Paused => {}
            ExecutionState::Aborting => return Ok(false),
            _ => return Ok(true),
        }

        let sender = context.execution_id().to_string();
        debug!(execution_id = %context.execution_id(), "Execution paused at safe point");
        self.emit(context, &sender, EventType::Paused, json!({})).await?;

        if !context.wait_while_paused().await {
            return Ok(false);
        }

        debug!(execution_id = %context.execution_id(), "Execution resumed");
        self.emit(context, &sender, EventType::Resumed, json!({})).await?;
        Ok(!context.is_cancelled())
    }

    async fn interpret(
        &self,
        context: &ExecutionContext,
        task: &WorkflowTask,
    ) -> Result<Outcome, ExecutorError> {
        let sender = context.execution_id().to_string();
        self.emit(
            context,
            &sender,
            EventType::Started,
            json!({
                "workflow_id": task.workflow_id,
                "arguments": task.arguments,
                "resume_from": task.resume_from,
            }),
        )
        .await?;

        let Some(graph) = self.graphs.graph(&task.workflow_id) else {
            warn!(workflow_id = %task.workflow_id, "No definition for workflow");
            return Ok(Outcome::Failed(FailureReason::UnknownWorkflow));
        };
        let Some(actions) = graph.actions_from(task.resume_from.as_deref()) else {
            return Ok(Outcome::Failed(FailureReason::UnknownResumePoint {
                action: task.resume_from.clone().unwrap_or_default(),
            }));
        };

        let mut output = Value::Null;
        for action in actions {
            if !self.safe_point(context).await? {
                return Ok(Outcome::Failed(FailureReason::Aborted));
            }

            self.emit(
                context,
                &action.id,
                EventType::ActionStarted,
                json!({ "name": action.display_name(), "handler": action.handler }),
            )
            .await?;

            let invocation = ActionInvocation {
                execution_id: context.execution_id(),
                workflow_id: &task.workflow_id,
                action,
                start_arguments: &task.arguments,
            };
            let result = AssertUnwindSafe(self.strategy.run_action(invocation))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(value)) => {
                    self.emit(
                        context,
                        &action.id,
                        EventType::ActionSuccess,
                        json!({ "name": action.display_name(), "result": value }),
                    )
                    .await?;
                    output = value;
                }
                Ok(Err(e)) => {
                    warn!(
                        execution_id = %context.execution_id(),
                        action = %action.id,
                        error = %e,
                        "Action failed"
                    );
                    self.emit(
                        context,
                        &action.id,
                        EventType::ActionFailure,
                        json!({ "name": action.display_name(), "error": e.to_string() }),
                    )
                    .await?;
                    return Ok(Outcome::Failed(FailureReason::ActionFailed {
                        action: action.id.clone(),
                        message: e.to_string(),
                    }));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        execution_id = %context.execution_id(),
                        action = %action.id,
                        panic = %message,
                        "Action panicked"
                    );
                    self.emit(
                        context,
                        &action.id,
                        EventType::ActionFailure,
                        json!({ "name": action.display_name(), "error": message }),
                    )
                    .await?;
                    return Ok(Outcome::Failed(FailureReason::ActionPanicked {
                        action: action.id.clone(),
                    }));
                }
            }
        }

        // Last safe point: an abort that landed during the final action still wins
        if !self.safe_point(context).await? {
            return Ok(Outcome::Failed(FailureReason::Aborted));
        }
        Ok(Outcome::Completed(output))
    }

    async fn settle(
        &self,
        context: &ExecutionContext,
        outcome: Outcome,
    ) -> Result<ExecutionResult, ExecutorError> {
        let outcome = if context.is_cancelled() || context.state() == ExecutionState::Aborting {
            Outcome::Failed(FailureReason::Aborted)
        } else {
            outcome
        };

        let (state, output, failure) = match outcome {
            Outcome::Completed(output) => {
                match self.registry.transition(context, ExecutionState::Completed) {
                    Ok(_) => (ExecutionState::Completed, Some(output), None),
                    // Aborted between the last safe point and here
                    Err(_) => {
                        let _ = self.registry.transition(context, ExecutionState::Failed);
                        (ExecutionState::Failed, None, Some(FailureReason::Aborted))
                    }
                }
            }
            Outcome::Failed(reason) => {
                let _ = self.registry.transition(context, ExecutionState::Failed);
                (ExecutionState::Failed, None, Some(reason))
            }
        };

        self.registry.remove(&context.execution_id());
        let counter = if state == ExecutionState::Completed {
            &self.counters.completed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let elapsed = context.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let (event_type, data) = match &failure {
            None => (
                EventType::WorkflowSuccess,
                json!({ "output": output, "elapsed_ms": elapsed_ms }),
            ),
            Some(FailureReason::Aborted) => (
                EventType::Aborted,
                json!({ "reason": FailureReason::Aborted, "elapsed_ms": elapsed_ms }),
            ),
            Some(reason) => (
                EventType::WorkflowFailure,
                json!({ "reason": reason, "message": reason.to_string(), "elapsed_ms": elapsed_ms }),
            ),
        };

        match &failure {
            None => info!(
                execution_id = %context.execution_id(),
                workflow_id = %context.workflow_id(),
                elapsed_ms = elapsed_ms,
                "✅ Workflow completed"
            ),
            Some(reason) => info!(
                execution_id = %context.execution_id(),
                workflow_id = %context.workflow_id(),
                elapsed_ms = elapsed_ms,
                reason = %reason,
                "Workflow failed"
            ),
        }

        let sender = context.execution_id().to_string();
        self.emit(context, &sender, event_type, data).await?;

        Ok(ExecutionResult {
            execution_id: context.execution_id(),
            workflow_id: context.workflow_id().to_string(),
            state,
            output,
            failure,
            elapsed,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "action panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, EventSink};
    use crate::execution::graph::{ActionDefinition, InMemoryGraphStore};
    use crate::execution::strategy::LocalExecutionStrategy;

    fn executor(capacity: usize) -> (Arc<WorkflowExecutor>, crate::events::EventFanOut) {
        let graphs = InMemoryGraphStore::new()
            .with_workflow("wf", vec![ActionDefinition::new("a1", "echo")]);
        let (events, fan_out) = event_channel(64, Vec::<Arc<dyn EventSink>>::new());
        let executor = WorkflowExecutor::new(
            capacity,
            Arc::new(graphs),
            Arc::new(LocalExecutionStrategy::with_builtins()),
            events,
        );
        (Arc::new(executor), fan_out)
    }

    #[tokio::test]
    async fn test_dropped_admission_releases_slot() {
        let (executor, _fan_out) = executor(1);
        let admitted = executor.admit(WorkflowTask::new("wf")).unwrap();
        assert!(executor.is_at_capacity());
        drop(admitted);
        assert!(!executor.is_at_capacity());
        assert_eq!(executor.stats().live, 0);
    }

    #[tokio::test]
    async fn test_current_workflow_is_scoped_to_execution() {
        assert!(WorkflowExecutor::get_current_workflow().is_none());

        let (executor, _fan_out) = executor(1);
        let task = WorkflowTask::new("wf");
        let id = task.execution_id;
        let admitted = executor.admit(task).unwrap();
        let context = admitted.context().clone();

        let seen = CURRENT_EXECUTION
            .scope(context, async {
                WorkflowExecutor::get_current_workflow().map(|c| c.execution_id())
            })
            .await;
        assert_eq!(seen, Some(id));
        drop(admitted);
    }

    #[tokio::test]
    async fn test_duplicate_admission_is_an_error() {
        let (executor, _fan_out) = executor(2);
        let task = WorkflowTask::new("wf");
        let _first = executor.admit(task.clone()).unwrap();
        assert!(matches!(
            executor.admit(task),
            Err(ExecutorError::DuplicateExecution { .. })
        ));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
