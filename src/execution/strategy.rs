//! # Execution Strategy
//!
//! Pluggable capability that runs one action. The executor owns ordering,
//! safe points and events; a strategy only turns an action plus its
//! arguments into an output value or an [`ActionError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::errors::ActionError;
use super::graph::ActionDefinition;

/// Everything a strategy needs to run one action
#[derive(Debug, Clone, Copy)]
pub struct ActionInvocation<'a> {
    pub execution_id: Uuid,
    pub workflow_id: &'a str,
    pub action: &'a ActionDefinition,
    pub start_arguments: &'a HashMap<String, Value>,
}

impl ActionInvocation<'_> {
    /// Action arguments overlaid with the workflow's start arguments
    pub fn merged_arguments(&self) -> Map<String, Value> {
        let mut merged = self.action.arguments.clone();
        for (name, value) in self.start_arguments {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn run_action(&self, invocation: ActionInvocation<'_>) -> Result<Value, ActionError>;
}

/// Handler for one action kind
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ActionError>;
}

/// Runs actions in-process through a handler registry
pub struct LocalExecutionStrategy {
    handlers: DashMap<String, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for LocalExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutionStrategy")
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl LocalExecutionStrategy {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Registry with the built-in `echo`, `sleep` and `fail` handlers
    pub fn with_builtins() -> Self {
        let strategy = Self::new();
        strategy.register("echo", Arc::new(EchoHandler));
        strategy.register("sleep", Arc::new(SleepHandler));
        strategy.register("fail", Arc::new(FailHandler));
        strategy
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let name = name.into();
        debug!(handler = %name, "Action handler registered");
        self.handlers.insert(name, handler);
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for LocalExecutionStrategy {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[async_trait]
impl ExecutionStrategy for LocalExecutionStrategy {
    async fn run_action(&self, invocation: ActionInvocation<'_>) -> Result<Value, ActionError> {
        // Clone the handler out so the map shard is not held across the await
        let handler = self
            .handlers
            .get(&invocation.action.handler)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ActionError::UnknownHandler {
                handler: invocation.action.handler.clone(),
            })?;
        handler.call(invocation.merged_arguments()).await
    }
}

/// Returns its arguments unchanged
#[derive(Debug)]
pub struct EchoHandler;

#[async_trait]
impl ActionHandler for EchoHandler {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ActionError> {
        Ok(Value::Object(arguments))
    }
}

/// Sleeps for `ms` milliseconds
#[derive(Debug)]
pub struct SleepHandler;

#[async_trait]
impl ActionHandler for SleepHandler {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ActionError> {
        let ms = match arguments.get("ms") {
            None => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| ActionError::invalid_argument("ms", "expected a non-negative integer"))?,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(serde_json::json!({ "slept_ms": ms }))
    }
}

/// Always fails, with `message` when given
#[derive(Debug)]
pub struct FailHandler;

#[async_trait]
impl ActionHandler for FailHandler {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ActionError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("action failed");
        Err(ActionError::failed(message))
    }
}
