//! # Worker Bootstrap
//!
//! Builds a [`Worker`] from a validated [`WorkerConfig`]: connects the
//! dispatcher endpoints, runs the secure channel handshakes, and selects
//! the case store and results publisher backends.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cases::{CaseStore, InMemoryCaseStore, JsonLinesCaseStore};
use crate::channel::{ChannelKeys, ChannelRole, MessageTransport, SecureChannel, TcpTransport};
use crate::config::{CaseStoreBackend, ConfigurationError, WorkerConfig};
use crate::error::Result;
use crate::execution::{ActionGraphStore, ExecutionStrategy, LocalExecutionStrategy};
use crate::receivers::{CommunicationReceiver, WorkflowReceiver};
use crate::results::{BroadcastResultsPublisher, ChannelResultsPublisher, ResultsPublisher};

use super::service::{Worker, WorkerComponents};

pub struct WorkerBootstrap;

impl WorkerBootstrap {
    /// Connect, handshake, and assemble a worker from configuration
    pub async fn from_config(config: &WorkerConfig) -> Result<Worker> {
        config.validate()?;
        let keys = config.channel.keys()?;
        let identity = config.worker.identity();

        let dispatch =
            Self::open_channel(config, &keys, "dispatch", &config.channel.dispatch_address).await?;
        let control =
            Self::open_channel(config, &keys, "control", &config.channel.control_address).await?;

        let results_publisher: Arc<dyn ResultsPublisher> = match &config.channel.results_address {
            Some(address) => {
                let channel = Self::open_channel(config, &keys, "results", address).await?;
                Arc::new(ChannelResultsPublisher::new(channel))
            }
            None => Arc::new(BroadcastResultsPublisher::default()),
        };

        let case_store = Self::case_store(config).await?;
        let strategy = Arc::new(LocalExecutionStrategy::with_builtins());
        Self::warn_unknown_handlers(config, &strategy);
        let graphs: Arc<dyn ActionGraphStore> = Arc::new(config.graph_store());
        let strategy: Arc<dyn ExecutionStrategy> = strategy;

        info!(
            identity = %identity,
            dispatch = %config.channel.dispatch_address,
            control = %config.channel.control_address,
            "🔐 Secure channels established"
        );

        Ok(Worker::new(
            config.worker.clone(),
            WorkerComponents {
                workflow_receiver: WorkflowReceiver::new(dispatch),
                communication_receiver: CommunicationReceiver::new(control, identity),
                results_publisher,
                case_store,
                graphs,
                strategy,
            },
        ))
    }

    async fn open_channel(
        config: &WorkerConfig,
        keys: &ChannelKeys,
        name: &str,
        address: &str,
    ) -> Result<SecureChannel> {
        let identity = config.worker.identity();
        let transport: Arc<dyn MessageTransport> = Arc::new(
            TcpTransport::connect(address, Some(&identity), config.channel.max_frame_bytes)
                .await?,
        );
        let channel = SecureChannel::establish(
            name,
            transport,
            keys,
            ChannelRole::Worker,
            config.channel.handshake_timeout(),
        )
        .await?;
        Ok(channel)
    }

    async fn case_store(config: &WorkerConfig) -> Result<Arc<dyn CaseStore>> {
        match config.cases.store {
            CaseStoreBackend::Memory => Ok(Arc::new(InMemoryCaseStore::new())),
            CaseStoreBackend::JsonLines => {
                let path = config.cases.path.as_ref().ok_or_else(|| {
                    ConfigurationError::missing_required_field(
                        "cases.path",
                        "the json_lines case store",
                    )
                })?;
                Ok(Arc::new(JsonLinesCaseStore::open(path).await?))
            }
        }
    }

    fn warn_unknown_handlers(config: &WorkerConfig, strategy: &LocalExecutionStrategy) {
        for workflow in &config.workflows {
            for action in &workflow.actions {
                if !strategy.has_handler(&action.handler) {
                    warn!(
                        workflow_id = %workflow.id,
                        action_id = %action.id,
                        handler = %action.handler,
                        "Action references an unregistered handler"
                    );
                }
            }
        }
    }
}
