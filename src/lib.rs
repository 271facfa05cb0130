#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # FlowRelay Worker
//!
//! Worker-side execution engine of a distributed workflow automation
//! system. A central dispatcher hands workflow tasks to a fleet of workers
//! over an encrypted, authenticated message channel; each worker executes
//! the workflow's action graph, publishes lifecycle events, and honors live
//! control commands (pause, resume, abort) and case subscription changes.
//!
//! ## Architecture
//!
//! ```text
//!  dispatcher ──dispatch──▶ WorkflowReceiver ──▶ receive loop ──▶ WorkflowExecutor ──▶ ExecutionPool
//!  dispatcher ──control───▶ CommunicationReceiver ──▶ control loop ──▶ pause/resume/abort, case CRUD
//!                                                         │
//!  WorkflowExecutor ──EventPublisher──▶ fan-out ──▶ CaseLogger ──▶ CaseStore
//!                                               └─▶ ResultsSender ──▶ ResultsPublisher
//! ```
//!
//! ## Module Organization
//!
//! - [`channel`] - X25519 + AES-256-GCM secure channel over a pluggable transport
//! - [`receivers`] - Decoding streams for workflow tasks and control messages
//! - [`execution`] - Admission control, action graph interpretation, live control
//! - [`events`] - Execution events and the in-process fan-out
//! - [`cases`] - Case subscriptions and the case event log
//! - [`results`] - Result records sent back to the dispatcher
//! - [`worker`] - Composition root, bootstrap, and process supervisor
//! - [`config`] - Layered YAML + environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowrelay_worker::config::ConfigManager;
//! use flowrelay_worker::worker::WorkerBootstrap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let worker = WorkerBootstrap::from_config(manager.config()).await?;
//! let report = worker
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//! println!("executed {} workflows", report.workflows_executed);
//! # Ok(())
//! # }
//! ```

pub mod cases;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod receivers;
pub mod results;
pub mod worker;

pub use cases::{CaseLogger, SubscriptionCache};
pub use channel::{ChannelError, ChannelKeys, ChannelRole, SecureChannel};
pub use config::{ConfigManager, WorkerConfig};
pub use error::{Result, WorkerError};
pub use events::{EventType, ExecutionEvent};
pub use execution::{ExecutionContext, ExecutionState, WorkflowExecutor};
pub use messaging::{ControlMessage, ResultRecord, WorkflowTask};
pub use worker::{Worker, WorkerBootstrap};
