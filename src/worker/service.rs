//! # Worker
//!
//! Composition root. Runs the receive loop and the control loop
//! concurrently and owns the shutdown protocol:
//!
//! 1. set `exiting` and shut down the workflow receiver
//! 2. shut down the execution pool (grace period, then abort)
//! 3. shut down the communication receiver and join the control loop
//! 4. drain the event fan-out and close the results publisher
//!
//! The control loop keeps serving until step 3 so that an abort can still
//! reach executions that are draining during the grace period.
//!
//! If either inbound stream ends while the worker is not exiting (the
//! dispatcher went away), the worker records the loss and `run_until`
//! shuts down as if it had been signalled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cases::{CaseLogger, CaseStore, SubscriptionCache};
use crate::config::WorkerSection;
use crate::events::{event_channel, EventFanOut, EventSink};
use crate::execution::{
    ActionGraphStore, ControlOutcome, ExecutionPool, ExecutionStrategy, ExecutorError,
    WorkflowExecutor,
};
use crate::logging::log_control_operation;
use crate::messaging::{CaseControl, ControlMessage, WorkflowControl, WorkflowTask};
use crate::receivers::{CommunicationReceiver, WorkflowReceiver};
use crate::results::{ResultsPublisher, ResultsSender};

/// Collaborators the worker is assembled from
pub struct WorkerComponents {
    pub workflow_receiver: WorkflowReceiver,
    pub communication_receiver: CommunicationReceiver,
    pub results_publisher: Arc<dyn ResultsPublisher>,
    pub case_store: Arc<dyn CaseStore>,
    pub graphs: Arc<dyn ActionGraphStore>,
    pub strategy: Arc<dyn ExecutionStrategy>,
}

/// What happened during shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub drained: usize,
    pub aborted: usize,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub workflows_executed: u64,
}

/// Applies control messages to the executor and the subscription cache
#[derive(Debug, Clone)]
pub struct ControlDispatcher {
    executor: Arc<WorkflowExecutor>,
    subscriptions: Arc<SubscriptionCache>,
}

impl ControlDispatcher {
    pub fn new(executor: Arc<WorkflowExecutor>, subscriptions: Arc<SubscriptionCache>) -> Self {
        Self {
            executor,
            subscriptions,
        }
    }

    pub fn dispatch(&self, message: ControlMessage) {
        match message {
            ControlMessage::Workflow(control) => {
                let execution_id = control.execution_id();
                let (operation, outcome) = match control {
                    WorkflowControl::Pause { .. } => ("pause", self.executor.pause(execution_id)),
                    WorkflowControl::Resume { .. } => {
                        ("resume", self.executor.resume(execution_id))
                    }
                    WorkflowControl::Abort { .. } => ("abort", self.executor.abort(execution_id)),
                };
                let outcome = match outcome {
                    ControlOutcome::Applied => "applied".to_string(),
                    ControlOutcome::NotFound => "not_found".to_string(),
                    ControlOutcome::Ignored { state } => format!("ignored:{state}"),
                    ControlOutcome::AtCapacity => "at_capacity".to_string(),
                };
                log_control_operation("workflow", operation, &execution_id.to_string(), &outcome);
            }
            ControlMessage::Case(control) => {
                let case_id = control.case_id().to_string();
                let (operation, outcome) = match control {
                    CaseControl::Create {
                        case_id,
                        subscriptions,
                    } => match self.subscriptions.add_subscriptions(&case_id, subscriptions) {
                        Ok(()) => ("create", "applied"),
                        Err(e) => {
                            warn!(case_id = %case_id, error = %e, "Case create rejected");
                            ("create", "rejected")
                        }
                    },
                    CaseControl::Update {
                        case_id,
                        subscriptions,
                    } => {
                        let applied = self
                            .subscriptions
                            .update_subscriptions(&case_id, subscriptions);
                        ("update", if applied { "applied" } else { "not_found" })
                    }
                    CaseControl::Delete { case_id } => {
                        let applied = self.subscriptions.delete_case(&case_id);
                        ("delete", if applied { "applied" } else { "not_found" })
                    }
                };
                log_control_operation("case", operation, &case_id, outcome);
            }
        }
    }
}

pub struct Worker {
    identity: String,
    settings: WorkerSection,
    executor: Arc<WorkflowExecutor>,
    subscriptions: Arc<SubscriptionCache>,
    case_logger: Arc<CaseLogger>,
    results_sender: Arc<ResultsSender>,
    workflow_receiver: WorkflowReceiver,
    communication_receiver: CommunicationReceiver,
    pool: Arc<ExecutionPool>,
    exiting: CancellationToken,
    inbound_lost: CancellationToken,
    fan_out: Mutex<Option<EventFanOut>>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
    control_loop: Mutex<Option<JoinHandle<()>>>,
    shutdown_started: AtomicBool,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("identity", &self.identity)
            .field("executor", &self.executor)
            .field("exiting", &self.exiting.is_cancelled())
            .finish()
    }
}

impl Worker {
    /// Assemble the worker; must be called inside a tokio runtime
    pub fn new(settings: WorkerSection, components: WorkerComponents) -> Self {
        let identity = settings.identity();
        let subscriptions = Arc::new(SubscriptionCache::new());
        let case_logger = Arc::new(
            CaseLogger::new(subscriptions.clone(), components.case_store)
                .with_timeout(settings.sink_timeout()),
        );
        let results_sender = Arc::new(
            ResultsSender::new(identity.clone(), components.results_publisher)
                .with_timeout(settings.sink_timeout()),
        );

        let sinks: Vec<Arc<dyn EventSink>> = vec![case_logger.clone(), results_sender.clone()];
        let (events, fan_out) = event_channel(settings.event_buffer_size, sinks);

        let executor = Arc::new(WorkflowExecutor::new(
            settings.capacity,
            components.graphs,
            components.strategy,
            events,
        ));

        Self {
            identity,
            settings,
            executor,
            subscriptions,
            case_logger,
            results_sender,
            workflow_receiver: components.workflow_receiver,
            communication_receiver: components.communication_receiver,
            pool: Arc::new(ExecutionPool::new()),
            exiting: CancellationToken::new(),
            inbound_lost: CancellationToken::new(),
            fan_out: Mutex::new(Some(fan_out)),
            receive_loop: Mutex::new(None),
            control_loop: Mutex::new(None),
            shutdown_started: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionCache> {
        &self.subscriptions
    }

    pub fn case_logger(&self) -> &Arc<CaseLogger> {
        &self.case_logger
    }

    pub fn results_sender(&self) -> &Arc<ResultsSender> {
        &self.results_sender
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.is_cancelled()
    }

    /// True once a dispatch or control stream ended outside of shutdown
    pub fn has_lost_inbound(&self) -> bool {
        self.inbound_lost.is_cancelled()
    }

    /// Start the receive and control loops
    pub fn start(&self) {
        let mut receive_loop = self.receive_loop.lock();
        if receive_loop.is_some() || self.is_exiting() {
            return;
        }

        info!(
            identity = %self.identity,
            capacity = self.settings.capacity,
            "🚀 Worker starting"
        );

        *receive_loop = Some(tokio::spawn(run_receive_loop(
            self.workflow_receiver.clone(),
            self.executor.clone(),
            self.pool.clone(),
            self.exiting.clone(),
            self.inbound_lost.clone(),
            self.settings.poll_interval(),
        )));
        *self.control_loop.lock() = Some(tokio::spawn(run_control_loop(
            self.communication_receiver.clone(),
            ControlDispatcher::new(self.executor.clone(), self.subscriptions.clone()),
            self.exiting.clone(),
            self.inbound_lost.clone(),
        )));
    }

    /// Run until `signal` resolves or an inbound stream is lost, then shut down
    pub async fn run_until<F>(&self, signal: F) -> ShutdownReport
    where
        F: std::future::Future<Output = ()>,
    {
        self.start();
        tokio::select! {
            _ = signal => {}
            _ = self.inbound_lost.cancelled() => {
                warn!(identity = %self.identity, "Inbound stream lost; shutting down");
            }
        }
        self.shutdown().await
    }

    /// Shutdown protocol; runs once, later calls return an empty report
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            debug!(identity = %self.identity, "Shutdown already in progress");
            return ShutdownReport::default();
        }
        info!(identity = %self.identity, "🛑 Worker shutting down");

        self.exiting.cancel();
        self.workflow_receiver.shutdown();
        let receive_loop = self.receive_loop.lock().take();
        if let Some(handle) = receive_loop {
            join_with_timeout("receive", handle, self.settings.control_join_timeout()).await;
        }

        let pool = self.pool.shutdown(self.settings.shutdown_grace()).await;
        let force_failed = self.executor.fail_remaining("worker shutdown").await;
        if force_failed > 0 {
            warn!(force_failed = force_failed, "Executions failed by shutdown");
        }

        self.communication_receiver.shutdown();
        let control_loop = self.control_loop.lock().take();
        if let Some(handle) = control_loop {
            join_with_timeout("control", handle, self.settings.control_join_timeout()).await;
        }

        let fan_out = self.fan_out.lock().take();
        let (events_delivered, events_dropped) = match fan_out {
            Some(fan_out) => {
                let dropped = fan_out.dropped();
                (fan_out.drain(self.settings.control_join_timeout()).await, dropped)
            }
            None => (0, 0),
        };
        self.results_sender.shutdown();

        let report = ShutdownReport {
            drained: pool.drained,
            aborted: pool.aborted,
            events_delivered,
            events_dropped,
            workflows_executed: self.results_sender.executed_count(),
        };
        info!(
            identity = %self.identity,
            drained = report.drained,
            aborted = report.aborted,
            events_delivered = report.events_delivered,
            events_dropped = report.events_dropped,
            workflows_executed = report.workflows_executed,
            "✅ Worker shut down"
        );
        report
    }
}

async fn join_with_timeout(name: &'static str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => debug!(loop_name = name, "Loop joined"),
        Ok(Err(e)) => error!(loop_name = name, error = %e, "Loop ended abnormally"),
        Err(_) => {
            warn!(
                loop_name = name,
                timeout_ms = timeout.as_millis() as u64,
                "Loop did not stop in time; aborting"
            );
            handle.abort();
        }
    }
}

/// Record that `stream` ended on its own unless the worker is already exiting
fn note_stream_end(stream: &'static str, exiting: &CancellationToken, lost: &CancellationToken) {
    if exiting.is_cancelled() {
        debug!(stream = stream, "Inbound stream closed during shutdown");
    } else {
        error!(stream = stream, "❌ Inbound stream closed unexpectedly");
        lost.cancel();
    }
}

async fn run_receive_loop(
    receiver: WorkflowReceiver,
    executor: Arc<WorkflowExecutor>,
    pool: Arc<ExecutionPool>,
    exiting: CancellationToken,
    inbound_lost: CancellationToken,
    poll_interval: Duration,
) {
    let mut tasks = receiver.receive_workflows();
    // A control message can take a freed slot between the capacity check and
    // admission; such a task is held here and admitted before pulling more.
    let mut held: Option<WorkflowTask> = None;
    loop {
        if executor.is_at_capacity() {
            tokio::select! {
                _ = exiting.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => continue,
            }
        }

        let task = match held.take() {
            Some(task) => task,
            None => {
                let next = tokio::select! {
                    biased;
                    _ = exiting.cancelled() => break,
                    next = tasks.next() => next,
                };
                let Some(task) = next else {
                    note_stream_end("dispatch", &exiting, &inbound_lost);
                    break;
                };
                task
            }
        };

        let execution_id = task.execution_id;
        match executor.admit(task.clone()) {
            Ok(admitted) => pool.spawn(admitted),
            Err(ExecutorError::AtCapacity { .. }) => {
                debug!(execution_id = %execution_id, "Slot taken before admission; holding task");
                held = Some(task);
            }
            Err(e) => error!(execution_id = %execution_id, error = %e, "Task not admitted"),
        }
    }
    if let Some(task) = held {
        warn!(execution_id = %task.execution_id, "Worker exiting with a task it never admitted");
    }
    debug!("Receive loop finished");
}

async fn run_control_loop(
    receiver: CommunicationReceiver,
    dispatcher: ControlDispatcher,
    exiting: CancellationToken,
    inbound_lost: CancellationToken,
) {
    let mut messages = receiver.receive_communications();
    while let Some(message) = messages.next().await {
        dispatcher.dispatch(message);
    }
    note_stream_end("control", &exiting, &inbound_lost);
    debug!("Control loop finished");
}
