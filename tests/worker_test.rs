mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use flowrelay_worker::cases::InMemoryCaseStore;
use flowrelay_worker::channel::{
    generate_key_pair, ChannelKeys, ChannelRole, MessageTransport, SecureChannel, TcpTransport,
};
use flowrelay_worker::config::{WorkerConfig, WorkerSection, WorkflowDefinition};
use flowrelay_worker::events::EventType;
use flowrelay_worker::execution::{
    ActionDefinition, ExecutionStrategy, InMemoryGraphStore, LocalExecutionStrategy,
};
use flowrelay_worker::messaging::{
    CaseControl, ControlEnvelope, ControlMessage, ResultRecord, Subscription, WorkflowControl,
    WorkflowTask,
};
use flowrelay_worker::receivers::{CommunicationReceiver, WorkflowReceiver};
use flowrelay_worker::results::BroadcastResultsPublisher;
use flowrelay_worker::worker::{Worker, WorkerBootstrap, WorkerComponents};

use common::{connected_channels, wait_for, ConcurrencyTracker, HANDSHAKE_TIMEOUT};

const WAIT: Duration = Duration::from_secs(5);

fn graphs() -> InMemoryGraphStore {
    let steps = (1..=6)
        .map(|i| ActionDefinition::new(format!("step{i}"), "sleep").with_argument("ms", json!(40)))
        .collect();
    InMemoryGraphStore::new()
        .with_workflow("hello", vec![ActionDefinition::new("a1", "echo")])
        .with_workflow(
            "two-sleeps",
            vec![
                ActionDefinition::new("s1", "sleep").with_argument("ms", json!(80)),
                ActionDefinition::new("s2", "sleep").with_argument("ms", json!(80)),
            ],
        )
        .with_workflow("slow-steps", steps)
}

fn settings(capacity: usize, shutdown_grace_ms: u64) -> WorkerSection {
    WorkerSection {
        id: 1,
        capacity,
        poll_interval_ms: 10,
        shutdown_grace_ms,
        control_join_timeout_ms: 1_000,
        event_buffer_size: 256,
        sink_timeout_ms: 500,
    }
}

struct Harness {
    worker: Worker,
    dispatch: SecureChannel,
    control: SecureChannel,
    results: broadcast::Receiver<ResultRecord>,
    store: Arc<InMemoryCaseStore>,
}

impl Harness {
    async fn start(settings: WorkerSection, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        let (dispatch, dispatch_worker_end) = connected_channels("dispatch").await;
        let (control, control_worker_end) = connected_channels("control").await;
        let publisher = Arc::new(BroadcastResultsPublisher::new(512));
        let results = publisher.subscribe();
        let store = Arc::new(InMemoryCaseStore::new());

        let identity = settings.identity();
        let worker = Worker::new(
            settings,
            WorkerComponents {
                workflow_receiver: WorkflowReceiver::new(dispatch_worker_end),
                communication_receiver: CommunicationReceiver::new(control_worker_end, identity),
                results_publisher: publisher,
                case_store: store.clone(),
                graphs: Arc::new(graphs()),
                strategy,
            },
        );
        worker.start();

        Self {
            worker,
            dispatch,
            control,
            results,
            store,
        }
    }

    async fn dispatch(&self, task: &WorkflowTask) {
        self.dispatch.send(&task.to_bytes().unwrap()).await.unwrap();
    }

    async fn control(&self, message: ControlMessage) {
        let envelope = ControlEnvelope::addressed_to("Worker-1", message);
        self.control.send(&envelope.to_bytes().unwrap()).await.unwrap();
    }

    /// Statuses for one execution up to and including `until`
    async fn statuses_until(&mut self, execution_id: Uuid, until: EventType) -> Vec<EventType> {
        let mut statuses = Vec::new();
        tokio::time::timeout(WAIT, async {
            loop {
                let record = self.results.recv().await.unwrap();
                if record.execution_id != execution_id {
                    continue;
                }
                assert_eq!(record.worker, "Worker-1");
                statuses.push(record.status);
                if record.status == until || record.status.is_terminal() {
                    break;
                }
            }
        })
        .await
        .expect("result records in time");
        statuses
    }
}

#[tokio::test]
async fn test_task_runs_end_to_end_with_case_logging() {
    let mut harness = Harness::start(
        settings(2, 500),
        Arc::new(LocalExecutionStrategy::with_builtins()),
    )
    .await;

    harness
        .control(ControlMessage::Case(CaseControl::Create {
            case_id: "case-1".to_string(),
            subscriptions: vec![Subscription::new("a1", [EventType::ActionSuccess])],
        }))
        .await;
    assert!(wait_for(WAIT, || harness.worker.subscriptions().contains_case("case-1")).await);

    let task = WorkflowTask::new("hello").with_argument("name", json!("relay"));
    harness.dispatch(&task).await;

    let statuses = harness
        .statuses_until(task.execution_id, EventType::WorkflowSuccess)
        .await;
    assert_eq!(
        statuses,
        vec![
            EventType::Started,
            EventType::ActionStarted,
            EventType::ActionSuccess,
            EventType::WorkflowSuccess,
        ]
    );

    let store = harness.store.clone();
    assert!(wait_for(WAIT, || store.records_for("case-1").len() == 1).await);
    let record = &store.records_for("case-1")[0];
    assert_eq!(record.event.execution_id, task.execution_id);
    assert_eq!(record.event.data["result"], json!({ "name": "relay" }));

    let report = harness.worker.shutdown().await;
    assert_eq!(report.workflows_executed, 1);
    assert_eq!(report.aborted, 0);
    assert!(harness.worker.is_exiting());
    assert!(!harness.worker.has_lost_inbound());

    // Second shutdown is a no-op
    assert_eq!(harness.worker.shutdown().await.workflows_executed, 0);
}

#[tokio::test]
async fn test_receive_loop_respects_capacity() {
    let tracker = Arc::new(ConcurrencyTracker::new());
    let mut harness = Harness::start(settings(2, 500), tracker.clone()).await;

    let tasks: Vec<WorkflowTask> = (0..3).map(|_| WorkflowTask::new("two-sleeps")).collect();
    for task in &tasks {
        harness.dispatch(task).await;
    }
    for task in &tasks {
        let statuses = harness
            .statuses_until(task.execution_id, EventType::WorkflowSuccess)
            .await;
        assert_eq!(statuses.last(), Some(&EventType::WorkflowSuccess));
    }

    assert_eq!(tracker.peak(), 2);
    assert_eq!(harness.worker.executor().stats().completed, 3);
    harness.worker.shutdown().await;
}

#[tokio::test]
async fn test_pause_and_abort_over_control_channel() {
    let mut harness = Harness::start(
        settings(1, 500),
        Arc::new(LocalExecutionStrategy::with_builtins()),
    )
    .await;

    let task = WorkflowTask::new("slow-steps");
    let id = task.execution_id;
    harness.dispatch(&task).await;
    harness.statuses_until(id, EventType::ActionStarted).await;

    harness
        .control(ControlMessage::Workflow(WorkflowControl::Pause { execution_id: id }))
        .await;
    let statuses = harness.statuses_until(id, EventType::Paused).await;
    assert_eq!(statuses.last(), Some(&EventType::Paused));
    assert_eq!(harness.worker.executor().stats().paused, 1);
    assert!(!harness.worker.executor().is_at_capacity());

    // Unknown executions are ignored without disturbing anything
    harness
        .control(ControlMessage::Workflow(WorkflowControl::Abort {
            execution_id: Uuid::new_v4(),
        }))
        .await;
    harness
        .control(ControlMessage::Workflow(WorkflowControl::Abort { execution_id: id }))
        .await;
    let statuses = harness.statuses_until(id, EventType::Aborted).await;
    assert_eq!(statuses, vec![EventType::Aborted]);

    let report = harness.worker.shutdown().await;
    assert_eq!(report.workflows_executed, 1);
}

#[tokio::test]
async fn test_task_arriving_after_resume_takes_the_slot_is_not_lost() {
    let mut harness = Harness::start(
        settings(1, 500),
        Arc::new(LocalExecutionStrategy::with_builtins()),
    )
    .await;

    let first = WorkflowTask::new("two-sleeps");
    let first_id = first.execution_id;
    harness.dispatch(&first).await;
    harness.statuses_until(first_id, EventType::ActionStarted).await;

    harness
        .control(ControlMessage::Workflow(WorkflowControl::Pause {
            execution_id: first_id,
        }))
        .await;
    harness.statuses_until(first_id, EventType::Paused).await;
    // Let the receive loop see the free slot and park on the dispatch stream
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .control(ControlMessage::Workflow(WorkflowControl::Resume {
            execution_id: first_id,
        }))
        .await;
    let executor = harness.worker.executor().clone();
    assert!(wait_for(WAIT, || executor.is_at_capacity()).await);

    let second = WorkflowTask::new("hello");
    harness.dispatch(&second).await;

    let statuses = harness
        .statuses_until(second.execution_id, EventType::WorkflowSuccess)
        .await;
    assert_eq!(statuses.last(), Some(&EventType::WorkflowSuccess));
    assert!(wait_for(WAIT, || executor.stats().completed == 2).await);
    assert_eq!(executor.stats().admitted, 2);

    harness.worker.shutdown().await;
}

#[tokio::test]
async fn test_lost_dispatcher_connection_shuts_worker_down() {
    let harness = Harness::start(
        settings(1, 100),
        Arc::new(LocalExecutionStrategy::with_builtins()),
    )
    .await;
    let Harness {
        worker,
        dispatch,
        control: _control,
        ..
    } = harness;

    // Dropping the dispatcher end closes the worker's dispatch stream
    drop(dispatch);

    let report = tokio::time::timeout(WAIT, worker.run_until(std::future::pending::<()>()))
        .await
        .expect("worker noticed the lost dispatcher");
    assert_eq!(report.workflows_executed, 0);
    assert!(worker.has_lost_inbound());
    assert!(worker.is_exiting());
}

#[tokio::test]
async fn test_shutdown_fails_stragglers_after_grace() {
    let mut harness = Harness::start(
        settings(1, 50),
        Arc::new(LocalExecutionStrategy::with_builtins()),
    )
    .await;

    let task = WorkflowTask::new("slow-steps");
    harness.dispatch(&task).await;
    harness
        .statuses_until(task.execution_id, EventType::ActionStarted)
        .await;

    let report = harness.worker.shutdown().await;
    assert_eq!(report.aborted, 1);
    assert_eq!(harness.worker.executor().stats().live, 0);

    let statuses = harness
        .statuses_until(task.execution_id, EventType::Aborted)
        .await;
    assert_eq!(statuses.last(), Some(&EventType::Aborted));
}

async fn accept_dispatcher_channel(
    listener: TcpListener,
    keys: ChannelKeys,
    name: &'static str,
) -> (String, SecureChannel) {
    let (stream, _) = listener.accept().await.unwrap();
    let transport = TcpTransport::from_stream(stream, 1024 * 1024).unwrap();
    let identity = transport.pull().await.unwrap().unwrap();
    let channel = SecureChannel::establish(
        name,
        Arc::new(transport),
        &keys,
        ChannelRole::Dispatcher,
        HANDSHAKE_TIMEOUT,
    )
    .await
    .unwrap();
    (String::from_utf8(identity).unwrap(), channel)
}

#[tokio::test]
async fn test_bootstrap_over_tcp() {
    let worker_pair = generate_key_pair();
    let dispatcher_pair = generate_key_pair();
    let dispatcher_keys =
        ChannelKeys::from_hex(&dispatcher_pair.private_key, &worker_pair.public_key, None)
            .unwrap();

    let dispatch_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let results_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut config = WorkerConfig::default();
    config.worker.id = 9;
    config.worker.shutdown_grace_ms = 200;
    config.channel.private_key = worker_pair.private_key.clone();
    config.channel.public_key = Some(worker_pair.public_key.clone());
    config.channel.dispatcher_public_key = dispatcher_pair.public_key.clone();
    config.channel.dispatch_address = dispatch_listener.local_addr().unwrap().to_string();
    config.channel.control_address = control_listener.local_addr().unwrap().to_string();
    config.channel.results_address = Some(results_listener.local_addr().unwrap().to_string());
    config.workflows.push(WorkflowDefinition {
        id: "hello".to_string(),
        actions: vec![ActionDefinition::new("a1", "echo")],
    });

    let dispatch = tokio::spawn(accept_dispatcher_channel(
        dispatch_listener,
        dispatcher_keys.clone(),
        "dispatch",
    ));
    let control = tokio::spawn(accept_dispatcher_channel(
        control_listener,
        dispatcher_keys.clone(),
        "control",
    ));
    let results = tokio::spawn(accept_dispatcher_channel(
        results_listener,
        dispatcher_keys,
        "results",
    ));

    let worker = WorkerBootstrap::from_config(&config).await.unwrap();
    assert_eq!(worker.identity(), "Worker-9");
    worker.start();

    let (identity, dispatch) = dispatch.await.unwrap();
    let (_, _control) = control.await.unwrap();
    let (_, results) = results.await.unwrap();
    assert_eq!(identity, "Worker-9");

    let task = WorkflowTask::new("hello");
    dispatch.send(&task.to_bytes().unwrap()).await.unwrap();

    let terminal = tokio::time::timeout(WAIT, async {
        loop {
            let record = ResultRecord::from_bytes(&results.receive_blocking().await.unwrap())
                .unwrap();
            if record.status.is_terminal() {
                return record;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(terminal.status, EventType::WorkflowSuccess);
    assert_eq!(terminal.execution_id, task.execution_id);
    assert_eq!(terminal.worker, "Worker-9");

    let report = worker.shutdown().await;
    assert_eq!(report.workflows_executed, 1);
}

#[test]
fn test_run_until_resolves_on_signal() {
    tokio_test::block_on(async {
        let harness = Harness::start(
            settings(1, 100),
            Arc::new(LocalExecutionStrategy::with_builtins()),
        )
        .await;
        let report = harness
            .worker
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert_eq!(report.workflows_executed, 0);
        assert!(harness.worker.is_exiting());
    });
}
