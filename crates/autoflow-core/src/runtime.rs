//! Runtime state reported by the execution collaborator.
//!
//! Execution events carry per-node status, duration and output. They are
//! merged into node data only; topology is never touched.

use crate::GraphState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
    Waiting,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Success | NodeStatus::Error | NodeStatus::Skipped
        )
    }
}

/// One status update for one node, as delivered by the execution stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Merge an execution event into the matching node's data.
///
/// Unknown node ids are ignored. `duration_ms` and `output` are only
/// overwritten when the event carries them.
pub fn apply_execution_event(graph: &GraphState, event: &ExecutionEvent) -> GraphState {
    let mut next = graph.clone();
    match next.find_node_mut(&event.node_id) {
        Some(node) => {
            node.data.status = Some(event.status);
            if let Some(duration) = event.duration_ms {
                node.data.duration_ms = Some(duration);
            }
            if let Some(output) = &event.output {
                node.data.output = Some(output.clone());
            }
        }
        None => debug!(node_id = %event.node_id, "Execution event for unknown node ignored"),
    }
    next
}

/// Clear status, duration and output on every node, ahead of a new run.
pub fn clear_execution_state(graph: &GraphState) -> GraphState {
    let mut next = graph.clone();
    for node in &mut next.nodes {
        node.data.status = None;
        node.data.duration_ms = None;
        node.data.output = None;
    }
    next
}

/// Variables visible to condition evaluation.
///
/// Key format: `"<step>.<field>"` (e.g. `"fetch_orders.count"`).
#[derive(Debug, Default, Clone)]
pub struct RuntimeContext {
    pub variables: HashMap<String, Value>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, NodeKind};

    fn graph_with_action() -> (GraphState, String) {
        let mut graph = GraphState::with_trigger_placeholder();
        let id = graph.add_node(Node::new(NodeKind::Action, "Send email"));
        graph.connect(crate::START_NODE_ID, &id);
        (graph, id)
    }

    #[test]
    fn merges_status_without_touching_topology() {
        let (graph, id) = graph_with_action();
        let event = ExecutionEvent {
            node_id: id.clone(),
            status: NodeStatus::Success,
            duration_ms: Some(42),
            output: Some(serde_json::json!({"sent": true})),
        };

        let next = apply_execution_event(&graph, &event);
        let node = next.find_node(&id).unwrap();
        assert_eq!(node.data.status, Some(NodeStatus::Success));
        assert_eq!(node.data.duration_ms, Some(42));
        assert_eq!(node.data.output, Some(serde_json::json!({"sent": true})));
        assert_eq!(next.edges, graph.edges);
        assert_eq!(next.nodes.len(), graph.nodes.len());
    }

    #[test]
    fn running_update_keeps_previous_output() {
        let (graph, id) = graph_with_action();
        let done = apply_execution_event(
            &graph,
            &ExecutionEvent {
                node_id: id.clone(),
                status: NodeStatus::Success,
                duration_ms: Some(5),
                output: Some(Value::Bool(true)),
            },
        );
        let rerun = apply_execution_event(
            &done,
            &ExecutionEvent {
                node_id: id.clone(),
                status: NodeStatus::Running,
                duration_ms: None,
                output: None,
            },
        );
        let node = rerun.find_node(&id).unwrap();
        assert_eq!(node.data.status, Some(NodeStatus::Running));
        assert_eq!(node.data.output, Some(Value::Bool(true)));
    }

    #[test]
    fn unknown_node_is_ignored() {
        let (graph, _) = graph_with_action();
        let next = apply_execution_event(
            &graph,
            &ExecutionEvent {
                node_id: "nope".to_string(),
                status: NodeStatus::Error,
                duration_ms: None,
                output: None,
            },
        );
        assert_eq!(next, graph);
    }

    #[test]
    fn clear_execution_state_resets_all_nodes() {
        let (graph, id) = graph_with_action();
        let ran = apply_execution_event(
            &graph,
            &ExecutionEvent {
                node_id: id.clone(),
                status: NodeStatus::Error,
                duration_ms: Some(1),
                output: None,
            },
        );
        let cleared = clear_execution_state(&ran);
        assert_eq!(cleared, graph);
    }

    #[test]
    fn status_wire_format_is_lowercase() {
        let json = serde_json::to_value(NodeStatus::Waiting).unwrap();
        assert_eq!(json, "waiting");
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }
}
