//! # Execution Registry
//!
//! O(1) lookup of live executions by id, plus the running-slot counter that
//! backs admission control. Every state change goes through
//! [`ExecutionRegistry::transition`] so the counter never drifts from the
//! number of `Running` contexts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::errors::ExecutorError;
use super::state::ExecutionState;

/// Why a transition was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionRejected {
    Invalid(ExecutionState),
    AtCapacity,
}

#[derive(Debug)]
pub(crate) struct ExecutionRegistry {
    contexts: DashMap<Uuid, Arc<ExecutionContext>>,
    running: AtomicUsize,
    capacity: usize,
}

impl ExecutionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: DashMap::new(),
            running: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    fn reserve_slot(&self) -> bool {
        self.running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running < self.capacity).then_some(running + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        let _ = self
            .running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                running.checked_sub(1)
            });
    }

    /// Register a new `Running` context, taking a slot
    pub fn register(&self, context: Arc<ExecutionContext>) -> Result<(), ExecutorError> {
        match self.contexts.entry(context.execution_id()) {
            Entry::Occupied(_) => Err(ExecutorError::DuplicateExecution {
                execution_id: context.execution_id(),
            }),
            Entry::Vacant(vacant) => {
                if !self.reserve_slot() {
                    return Err(ExecutorError::AtCapacity {
                        capacity: self.capacity,
                    });
                }
                vacant.insert(context);
                Ok(())
            }
        }
    }

    pub fn get(&self, execution_id: &Uuid) -> Option<Arc<ExecutionContext>> {
        self.contexts
            .get(execution_id)
            .map(|entry| entry.value().clone())
    }

    /// Apply a state change, keeping the running counter in step
    pub fn transition(
        &self,
        context: &ExecutionContext,
        target: ExecutionState,
    ) -> Result<ExecutionState, TransitionRejected> {
        if target.is_running() {
            if !self.reserve_slot() {
                return Err(TransitionRejected::AtCapacity);
            }
            return context.set_state(target).map_err(|current| {
                self.release_slot();
                TransitionRejected::Invalid(current)
            });
        }

        let previous = context
            .set_state(target)
            .map_err(TransitionRejected::Invalid)?;
        if previous.is_running() {
            self.release_slot();
        }
        Ok(previous)
    }

    pub fn remove(&self, execution_id: &Uuid) -> Option<Arc<ExecutionContext>> {
        self.contexts.remove(execution_id).map(|(_, context)| context)
    }

    pub fn count_in(&self, state: ExecutionState) -> usize {
        self.contexts
            .iter()
            .filter(|entry| entry.value().state() == state)
            .count()
    }

    pub fn snapshot(&self) -> Vec<Arc<ExecutionContext>> {
        self.contexts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
