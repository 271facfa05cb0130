//! # Action Graphs
//!
//! Read-only workflow definitions consumed by the executor. A workflow is an
//! ordered list of actions; each action names the handler that runs it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One action of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub handler: String,
    /// Static arguments; start arguments of the same name take precedence
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
}

impl ActionDefinition {
    pub fn new(id: impl Into<String>, handler: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            handler: handler.into(),
            arguments: serde_json::Map::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowGraph {
    pub workflow_id: String,
    pub actions: Vec<ActionDefinition>,
}

impl WorkflowGraph {
    pub fn new(workflow_id: impl Into<String>, actions: Vec<ActionDefinition>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            actions,
        }
    }

    /// Actions from `resume_from` onwards; `None` if the marker is not in the graph
    pub fn actions_from(&self, resume_from: Option<&str>) -> Option<&[ActionDefinition]> {
        match resume_from {
            None => Some(&self.actions),
            Some(marker) => self
                .actions
                .iter()
                .position(|action| action.id == marker)
                .map(|index| &self.actions[index..]),
        }
    }
}

/// Source of workflow definitions
pub trait ActionGraphStore: Send + Sync {
    fn graph(&self, workflow_id: &str) -> Option<Arc<WorkflowGraph>>;
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graphs: HashMap<String, Arc<WorkflowGraph>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow(
        mut self,
        workflow_id: impl Into<String>,
        actions: Vec<ActionDefinition>,
    ) -> Self {
        self.insert(WorkflowGraph::new(workflow_id, actions));
        self
    }

    pub fn insert(&mut self, graph: WorkflowGraph) {
        self.graphs
            .insert(graph.workflow_id.clone(), Arc::new(graph));
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

impl FromIterator<(String, Vec<ActionDefinition>)> for InMemoryGraphStore {
    fn from_iter<I: IntoIterator<Item = (String, Vec<ActionDefinition>)>>(iter: I) -> Self {
        let mut store = Self::new();
        for (workflow_id, actions) in iter {
            store.insert(WorkflowGraph::new(workflow_id, actions));
        }
        store
    }
}

impl ActionGraphStore for InMemoryGraphStore {
    fn graph(&self, workflow_id: &str) -> Option<Arc<WorkflowGraph>> {
        self.graphs.get(workflow_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_from_resume_marker() {
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                ActionDefinition::new("a", "echo"),
                ActionDefinition::new("b", "echo"),
                ActionDefinition::new("c", "echo"),
            ],
        );

        assert_eq!(graph.actions_from(None).map(<[_]>::len), Some(3));
        let resumed = graph.actions_from(Some("b")).unwrap();
        assert_eq!(resumed[0].id, "b");
        assert_eq!(resumed.len(), 2);
        assert!(graph.actions_from(Some("zzz")).is_none());
    }

    #[test]
    fn test_store_lookup() {
        let store: InMemoryGraphStore =
            [("wf".to_string(), vec![ActionDefinition::new("a", "echo")])]
                .into_iter()
                .collect();
        assert_eq!(store.len(), 1);
        assert!(store.graph("wf").is_some());
        assert!(store.graph("missing").is_none());
    }
}
