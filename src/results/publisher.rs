//! # Results Publishers
//!
//! Outbound delivery of [`ResultRecord`]s: an in-process broadcast for local
//! consumers and tests, or JSON over a secure channel to the dispatcher.

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::channel::{ChannelError, SecureChannel};
use crate::messaging::{MessagingError, ResultRecord};

/// Results delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResultsPublishError {
    #[error("Result encoding failed: {0}")]
    Encoding(#[from] MessagingError),

    #[error("Results channel error: {0}")]
    Channel(#[from] ChannelError),
}

#[async_trait]
pub trait ResultsPublisher: Send + Sync + Debug {
    async fn publish(&self, record: &ResultRecord) -> Result<(), ResultsPublishError>;

    /// Release the underlying transport; idempotent
    fn shutdown(&self) {}
}

/// In-process pub/sub; publishing with no subscribers is not an error
#[derive(Debug, Clone)]
pub struct BroadcastResultsPublisher {
    sender: broadcast::Sender<ResultRecord>,
}

impl BroadcastResultsPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastResultsPublisher {
    fn default() -> Self {
        Self::new(crate::constants::defaults::RESULTS_BROADCAST_CAPACITY)
    }
}

#[async_trait]
impl ResultsPublisher for BroadcastResultsPublisher {
    async fn publish(&self, record: &ResultRecord) -> Result<(), ResultsPublishError> {
        // send() only fails when nobody is listening, which is fine here
        let _ = self.sender.send(record.clone());
        Ok(())
    }
}

/// JSON result records sealed onto a secure channel
#[derive(Debug)]
pub struct ChannelResultsPublisher {
    channel: SecureChannel,
}

impl ChannelResultsPublisher {
    pub fn new(channel: SecureChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ResultsPublisher for ChannelResultsPublisher {
    async fn publish(&self, record: &ResultRecord) -> Result<(), ResultsPublishError> {
        let payload = record.to_bytes()?;
        self.channel.send(&payload).await?;
        Ok(())
    }

    fn shutdown(&self) {
        self.channel.shutdown();
    }
}
