//! # Communication Receiver
//!
//! Decodes control frames addressed to this worker. Envelopes addressed to
//! another identity are skipped; broadcasts are accepted.

use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{debug, warn};

use super::{inbound_stream, try_inbound};
use crate::channel::{ChannelResult, SecureChannel};
use crate::messaging::{ControlEnvelope, ControlMessage};

#[derive(Debug, Clone)]
pub struct CommunicationReceiver {
    channel: Arc<SecureChannel>,
    identity: Arc<str>,
}

fn accept_control(identity: &str, frame: &[u8]) -> Option<ControlMessage> {
    let envelope = match ControlEnvelope::from_bytes(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, size_bytes = frame.len(), "Dropping malformed control message");
            return None;
        }
    };

    if !envelope.is_for(identity) {
        debug!(
            identity = %identity,
            recipient = ?envelope.recipient,
            "Skipping control message for another worker"
        );
        return None;
    }

    debug!(kind = envelope.message.kind(), "Received control message");
    Some(envelope.message)
}

impl CommunicationReceiver {
    pub fn new(channel: SecureChannel, identity: impl Into<String>) -> Self {
        Self {
            channel: Arc::new(channel),
            identity: Arc::from(identity.into()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Lazy stream of control messages for this worker
    pub fn receive_communications(&self) -> BoxStream<'static, ControlMessage> {
        let identity = self.identity.clone();
        inbound_stream(self.channel.clone(), move |frame| {
            accept_control(&identity, frame)
        })
    }

    /// Take a queued control message without waiting
    pub fn try_receive_communication(&self) -> ChannelResult<Option<ControlMessage>> {
        try_inbound(&self.channel, |frame| accept_control(&self.identity, frame))
    }

    /// Close the channel; idempotent
    pub fn shutdown(&self) {
        self.channel.shutdown();
    }
}
