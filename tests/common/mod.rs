//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use x25519_dalek::{PublicKey, StaticSecret};

use flowrelay_worker::channel::{establish_pair, ChannelKeys, MemoryTransport, SecureChannel};
use flowrelay_worker::events::{EventSink, EventType, ExecutionEvent};
use flowrelay_worker::execution::{
    ActionError, ActionInvocation, ExecutionStrategy, LocalExecutionStrategy,
};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Dispatcher-side and worker-side keys that belong together
pub fn matching_keys() -> (ChannelKeys, ChannelKeys) {
    let worker_secret: [u8; 32] = rand::random();
    let dispatcher_secret: [u8; 32] = rand::random();
    let dispatcher_public = PublicKey::from(&StaticSecret::from(dispatcher_secret)).to_bytes();

    let worker_keys = ChannelKeys::from_bytes(worker_secret, dispatcher_public);
    let dispatcher_keys = worker_keys.for_peer(dispatcher_secret);
    (dispatcher_keys, worker_keys)
}

/// An established channel over in-memory transports: (dispatcher end, worker end)
pub async fn connected_channels(name: &str) -> (SecureChannel, SecureChannel) {
    let (dispatcher_keys, worker_keys) = matching_keys();
    let (dispatcher_transport, worker_transport) = MemoryTransport::shared_pair(64);
    establish_pair(
        name,
        dispatcher_transport,
        &dispatcher_keys,
        worker_transport,
        &worker_keys,
        HANDSHAKE_TIMEOUT,
    )
    .await
    .expect("handshake over memory transports")
}

/// Sink that records every event it sees
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn types_for(&self, execution_id: uuid::Uuid) -> Vec<EventType> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.execution_id == execution_id)
            .map(|event| event.event_type)
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle_event(&self, event: &ExecutionEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Strategy wrapper that tracks how many actions run at once
#[derive(Debug)]
pub struct ConcurrencyTracker {
    inner: LocalExecutionStrategy,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self {
            inner: LocalExecutionStrategy::with_builtins(),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionStrategy for ConcurrencyTracker {
    async fn run_action(&self, invocation: ActionInvocation<'_>) -> Result<Value, ActionError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.inner.run_action(invocation).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
