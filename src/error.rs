//! Worker-wide error type
//!
//! Subsystem errors fold into [`WorkerError`] at the composition root.

use thiserror::Error;

use crate::cases::{CaseStoreError, SubscriptionError};
use crate::channel::{ChannelError, TransportError};
use crate::config::ConfigurationError;
use crate::execution::ExecutorError;
use crate::messaging::MessagingError;
use crate::results::ResultsPublishError;

/// Worker error type
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Case store error: {0}")]
    CaseStore(#[from] CaseStoreError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Results error: {0}")]
    Results(#[from] ResultsPublishError),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

/// Result type alias for WorkerError
pub type Result<T> = std::result::Result<T, WorkerError>;
