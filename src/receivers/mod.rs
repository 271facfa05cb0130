//! # Receivers
//!
//! Decoding front ends over secure channels. Each receiver turns sealed
//! frames into typed messages and exposes a non-blocking pull plus a lazy
//! stream. Bad frames never end a stream; only a closed channel does.

pub mod communication_receiver;
pub mod workflow_receiver;

pub use communication_receiver::CommunicationReceiver;
pub use workflow_receiver::WorkflowReceiver;

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::channel::{ChannelResult, SecureChannel};

/// Lazy stream of accepted items; ends (for good) when the channel closes
///
/// `accept` decodes one frame, logging and returning `None` to drop it.
pub(crate) fn inbound_stream<T, F>(channel: Arc<SecureChannel>, accept: F) -> BoxStream<'static, T>
where
    T: Send + 'static,
    F: Fn(&[u8]) -> Option<T> + Send + Sync + 'static,
{
    stream::unfold((channel, accept), |(channel, accept)| async move {
        loop {
            match channel.receive_blocking().await {
                Ok(frame) => {
                    if let Some(item) = accept(&frame) {
                        return Some((item, (channel, accept)));
                    }
                }
                Err(e) if e.is_closed() => {
                    debug!(channel = %channel.name(), "Channel closed; ending stream");
                    return None;
                }
                Err(e) => {
                    warn!(channel = %channel.name(), error = %e, "Dropping inbound frame");
                }
            }
        }
    })
    .fuse()
    .boxed()
}

/// Non-blocking counterpart of [`inbound_stream`]
///
/// `Ok(None)` when nothing usable is queued; `Err` only once the channel is closed.
pub(crate) fn try_inbound<T>(
    channel: &SecureChannel,
    accept: impl Fn(&[u8]) -> Option<T>,
) -> ChannelResult<Option<T>> {
    match channel.receive_nonblocking() {
        Ok(Some(frame)) => Ok(accept(&frame)),
        Ok(None) => Ok(None),
        Err(e) if e.is_closed() => Err(e),
        Err(e) => {
            warn!(channel = %channel.name(), error = %e, "Dropping inbound frame");
            Ok(None)
        }
    }
}
