//! # Event Publisher
//!
//! Explicit message passing for execution events. Executions emit onto a
//! bounded mpsc channel through an [`EventPublisher`]; a single fan-out task
//! hands each event, in emission order, to a bounded lane per [`EventSink`].
//! Each lane is served by its own task. A lane that is full drops the event
//! for that sink only, so a stalled sink never backs up into an execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::ExecutionEvent;

/// Consumer of execution events (case logger, results sender)
///
/// Sinks must not fail the producing execution; they log their own errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle_event(&self, event: &ExecutionEvent);
}

/// Cloneable handle executions use to emit events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<ExecutionEvent>,
}

impl EventPublisher {
    /// Publish one event; waits for room in the buffer
    pub async fn publish(&self, event: ExecutionEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| PublishError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Handle to the fan-out task and its sink lanes
#[derive(Debug)]
pub struct EventFanOut {
    shutdown: CancellationToken,
    handle: JoinHandle<u64>,
    lanes: Vec<AbortHandle>,
    dropped: Arc<AtomicU64>,
}

impl EventFanOut {
    /// Events a sink never saw because its lane was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting events, deliver what is buffered, and wait for the lanes
    ///
    /// Returns the number of events fanned out over the fan-out's lifetime.
    pub async fn drain(self, timeout: Duration) -> u64 {
        self.shutdown.cancel();
        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(delivered)) => delivered,
            Ok(Err(e)) => {
                warn!(error = %e, "Event fan-out task ended abnormally");
                0
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Event fan-out did not drain in time; aborting"
                );
                handle.abort();
                for lane in &self.lanes {
                    lane.abort();
                }
                0
            }
        }
    }
}

struct SinkLane {
    name: &'static str,
    sender: mpsc::Sender<Arc<ExecutionEvent>>,
    handle: JoinHandle<()>,
}

/// Create the event channel and start its fan-out task
///
/// `buffer_size` bounds the emission channel and every sink lane.
pub fn event_channel(
    buffer_size: usize,
    sinks: Vec<Arc<dyn EventSink>>,
) -> (EventPublisher, EventFanOut) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    let shutdown = CancellationToken::new();
    let dropped = Arc::new(AtomicU64::new(0));

    let sink_names: Vec<&'static str> = sinks.iter().map(|sink| sink.name()).collect();
    info!(buffer_size = buffer_size, sinks = ?sink_names, "Event fan-out started");

    let lanes: Vec<SinkLane> = sinks
        .into_iter()
        .map(|sink| {
            let (lane_sender, lane_receiver) = mpsc::channel(buffer_size);
            SinkLane {
                name: sink.name(),
                sender: lane_sender,
                handle: tokio::spawn(serve_lane(sink, lane_receiver)),
            }
        })
        .collect();
    let lane_handles = lanes.iter().map(|lane| lane.handle.abort_handle()).collect();

    let handle = tokio::spawn(fan_out(receiver, lanes, shutdown.clone(), dropped.clone()));
    (
        EventPublisher { sender },
        EventFanOut {
            shutdown,
            handle,
            lanes: lane_handles,
            dropped,
        },
    )
}

async fn serve_lane(sink: Arc<dyn EventSink>, mut events: mpsc::Receiver<Arc<ExecutionEvent>>) {
    while let Some(event) = events.recv().await {
        sink.handle_event(&event).await;
    }
    debug!(sink = sink.name(), "Sink lane finished");
}

async fn fan_out(
    mut receiver: mpsc::Receiver<ExecutionEvent>,
    lanes: Vec<SinkLane>,
    shutdown: CancellationToken,
    dropped: Arc<AtomicU64>,
) -> u64 {
    let mut delivered = 0u64;
    loop {
        let event = tokio::select! {
            biased;
            event = receiver.recv() => event,
            _ = shutdown.cancelled() => {
                receiver.close();
                receiver.recv().await
            }
        };
        let Some(event) = event else {
            break;
        };
        let event = Arc::new(event);
        for lane in &lanes {
            match lane.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        sink = lane.name,
                        execution_id = %event.execution_id,
                        event_type = %event.event_type,
                        dropped_total = total,
                        "Sink lane full; event dropped for this sink"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(sink = lane.name, "Sink lane closed");
                }
            }
        }
        delivered += 1;
    }

    // Closing the lanes lets each sink finish what it already holds
    for lane in lanes {
        let SinkLane { name, sender, handle } = lane;
        drop(sender);
        if let Err(e) = handle.await {
            warn!(sink = name, error = %e, "Sink lane ended abnormally");
        }
    }
    debug!(delivered = delivered, "Event fan-out finished");
    delivered
}

/// Error types for event publishing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
}
