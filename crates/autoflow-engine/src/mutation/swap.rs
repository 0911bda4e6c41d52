use super::{NewNode, ensure_acyclic, fill_placeholder_role};
use crate::MutationError;
use autoflow_core::GraphState;
use tracing::debug;

/// Replace a node's kind and content in place, keeping its id and edges.
///
/// Branching nodes own a block whose shape depends on their kind, so they can
/// only be swapped for a node of the same kind (a relabel or new params).
pub fn swap_node(
    graph: &GraphState,
    node_id: &str,
    replacement: NewNode,
) -> Result<GraphState, MutationError> {
    let current = graph
        .find_node(node_id)
        .ok_or_else(|| MutationError::NodeNotFound(node_id.to_string()))?;

    let structural = current.kind.is_branching() || replacement.kind.is_branching();
    if structural && current.kind != replacement.kind {
        return Err(MutationError::UnsupportedSwap {
            node: node_id.to_string(),
            from: current.kind,
            to: replacement.kind,
        });
    }

    let from = current.kind;
    let mut next = graph.clone();
    if let Some(node) = next.find_node_mut(node_id) {
        node.kind = replacement.kind;
        node.data.label = replacement.label;
        node.data.params = replacement.params;
        if node.is_placeholder() {
            fill_placeholder_role(node);
        }
    }

    ensure_acyclic(&next)?;
    debug!(node_id, %from, to = %replacement.kind, "Swapped node");
    Ok(next)
}
