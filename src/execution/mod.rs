//! # Execution
//!
//! Admission control, per-execution lifecycle and action-graph
//! interpretation.
//!
//! - [`WorkflowExecutor`]: capacity check, admit/execute, pause/resume/abort
//! - [`ExecutionStrategy`]: runs one action; [`LocalExecutionStrategy`] is
//!   the in-process handler registry
//! - [`ActionGraphStore`]: read-only workflow definitions
//! - [`ExecutionPool`]: tasks of admitted executions with a bounded shutdown

pub mod context;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod pool;
mod registry;
pub mod state;
pub mod strategy;

pub use context::ExecutionContext;
pub use errors::{ActionError, ExecutorError, FailureReason};
pub use executor::{
    AdmittedExecution, ControlOutcome, ExecutionResult, ExecutorStats, WorkflowExecutor,
};
pub use graph::{ActionDefinition, ActionGraphStore, InMemoryGraphStore, WorkflowGraph};
pub use pool::{ExecutionPool, PoolShutdown};
pub use state::ExecutionState;
pub use strategy::{
    ActionHandler, ActionInvocation, EchoHandler, ExecutionStrategy, FailHandler,
    LocalExecutionStrategy, SleepHandler,
};
