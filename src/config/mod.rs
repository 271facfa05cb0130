//! # Worker Configuration
//!
//! Explicit, enumerated configuration validated at load time. Unknown keys
//! are a startup error, as are a zero capacity and malformed channel keys.
//!
//! ## Sources (later wins)
//!
//! 1. `worker.yaml` in the configuration directory (required)
//! 2. `worker.<environment>.yaml` (optional; environment from `FLOWRELAY_ENV`)
//! 3. `FLOWRELAY__SECTION__KEY` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flowrelay_worker::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let capacity = manager.config().worker.capacity;
//! # let _ = capacity;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelKeys;
use crate::constants::{channel, defaults, worker_identity};
use crate::execution::{ActionDefinition, InMemoryGraphStore};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root worker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    pub channel: ChannelSection,
    pub cases: CasesSection,
    pub logging: LoggingSection,
    pub supervisor: SupervisorSection,
    pub workflows: Vec<WorkflowDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    /// Identity is `Worker-<id>`
    pub id: u32,
    /// Maximum number of simultaneously running executions
    pub capacity: usize,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub control_join_timeout_ms: u64,
    pub event_buffer_size: usize,
    /// Upper bound on one case-store append or result publish
    pub sink_timeout_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            id: 0,
            capacity: defaults::CAPACITY,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
            control_join_timeout_ms: defaults::CONTROL_JOIN_TIMEOUT_MS,
            event_buffer_size: defaults::EVENT_BUFFER_SIZE,
            sink_timeout_ms: defaults::SINK_TIMEOUT_MS,
        }
    }
}

impl WorkerSection {
    pub fn identity(&self) -> String {
        worker_identity(self.id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn control_join_timeout(&self) -> Duration {
        Duration::from_millis(self.control_join_timeout_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSection {
    /// This worker's X25519 private key, 64 hex characters
    pub private_key: String,
    /// Optional public half of `private_key`, checked against it at startup
    pub public_key: Option<String>,
    pub dispatcher_public_key: String,
    pub dispatch_address: String,
    pub control_address: String,
    /// Results go to the dispatcher when set, otherwise to the in-process broadcast
    pub results_address: Option<String>,
    pub handshake_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            public_key: None,
            dispatcher_public_key: String::new(),
            dispatch_address: "127.0.0.1:5555".to_string(),
            control_address: "127.0.0.1:5556".to_string(),
            results_address: None,
            handshake_timeout_ms: defaults::HANDSHAKE_TIMEOUT_MS,
            max_frame_bytes: channel::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ChannelSection {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parse the configured key material
    pub fn keys(&self) -> ConfigResult<ChannelKeys> {
        ChannelKeys::from_hex(
            &self.private_key,
            &self.dispatcher_public_key,
            self.public_key.as_deref(),
        )
        .map_err(|e| {
            ConfigurationError::invalid_value("channel.private_key", "[MASKED]", e.to_string())
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStoreBackend {
    #[default]
    Memory,
    JsonLines,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CasesSection {
    pub store: CaseStoreBackend,
    /// Required for the `json_lines` store
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// Filter directive; overrides the environment default, `RUST_LOG` overrides this
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorSection {
    pub processes: u32,
    pub kill_grace_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            processes: defaults::SUPERVISOR_PROCESSES,
            kill_grace_ms: defaults::SUPERVISOR_KILL_GRACE_MS,
        }
    }
}

impl SupervisorSection {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Workflow definition served by the in-memory action graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub id: String,
    pub actions: Vec<ActionDefinition>,
}

impl WorkerConfig {
    /// Validate the loaded configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker.capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.capacity",
                "0",
                "capacity must be greater than 0",
            ));
        }

        if self.worker.event_buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.event_buffer_size",
                "0",
                "event buffer size must be greater than 0",
            ));
        }

        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.poll_interval_ms",
                "0",
                "poll interval must be greater than 0",
            ));
        }

        if self.worker.sink_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.sink_timeout_ms",
                "0",
                "sink timeout must be greater than 0",
            ));
        }

        if self.channel.private_key.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "channel.private_key",
                "channel configuration",
            ));
        }

        if self.channel.dispatcher_public_key.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "channel.dispatcher_public_key",
                "channel configuration",
            ));
        }

        self.channel.keys()?;

        for (field, address) in [
            ("channel.dispatch_address", &self.channel.dispatch_address),
            ("channel.control_address", &self.channel.control_address),
        ] {
            if address.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "channel configuration",
                ));
            }
        }

        if self.channel.max_frame_bytes == 0 {
            return Err(ConfigurationError::invalid_value(
                "channel.max_frame_bytes",
                "0",
                "frame limit must be greater than 0",
            ));
        }

        if self.cases.store == CaseStoreBackend::JsonLines && self.cases.path.is_none() {
            return Err(ConfigurationError::missing_required_field(
                "cases.path",
                "the json_lines case store",
            ));
        }

        if self.supervisor.processes == 0 {
            return Err(ConfigurationError::invalid_value(
                "supervisor.processes",
                "0",
                "at least one worker process is required",
            ));
        }

        let mut workflow_ids = HashSet::new();
        for workflow in &self.workflows {
            if !workflow_ids.insert(workflow.id.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "workflows.id",
                    workflow.id.clone(),
                    "workflow ids must be unique",
                ));
            }
            let mut action_ids = HashSet::new();
            for action in &workflow.actions {
                if action.id.is_empty() || action.handler.is_empty() {
                    return Err(ConfigurationError::missing_required_field(
                        "workflows.actions.id/handler",
                        format!("workflow '{}'", workflow.id),
                    ));
                }
                if !action_ids.insert(action.id.as_str()) {
                    return Err(ConfigurationError::invalid_value(
                        "workflows.actions.id",
                        action.id.clone(),
                        format!("duplicate action id in workflow '{}'", workflow.id),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Build the in-memory action graph store from the `workflows` section
    pub fn graph_store(&self) -> InMemoryGraphStore {
        self.workflows
            .iter()
            .map(|workflow| (workflow.id.clone(), workflow.actions.clone()))
            .collect()
    }
}
