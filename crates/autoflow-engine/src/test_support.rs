//! Graph fixtures shared by the engine's unit tests.

use crate::mutation::{InsertTarget, NewNode, insert_node};
use autoflow_core::{Edge, GraphState, Node, NodeId, NodeKind, START_NODE_ID};

/// Configured trigger `"1"` followed by a single `tail` action.
/// Returns the graph and the id of the `1 -> tail` edge.
pub(crate) fn trunk() -> (GraphState, String) {
    let mut graph = GraphState::default();
    graph.add_node(Node::with_id(START_NODE_ID, NodeKind::Custom, "Webhook"));
    graph.add_node(Node::with_id("tail", NodeKind::Action, "Send Email"));
    let edge = graph.connect(START_NODE_ID, "tail");
    (graph, edge)
}

fn branching_on_trunk(kind: NodeKind, label: &str) -> (GraphState, NodeId) {
    let (graph, edge) = trunk();
    let graph = insert_node(&graph, InsertTarget::Edge(edge), NewNode::new(kind, label)).unwrap();
    let head = graph
        .nodes
        .iter()
        .find(|n| n.kind == kind)
        .map(|n| n.id.clone())
        .unwrap();
    (graph, head)
}

/// `1 -> condition -> (If | Else) -> merge -> tail`
pub(crate) fn condition_on_trunk() -> (GraphState, NodeId) {
    branching_on_trunk(NodeKind::Condition, "Check")
}

/// `1 -> parallel -> (Branch 1 | Branch 2) -> merge -> tail`
pub(crate) fn parallel_on_trunk() -> (GraphState, NodeId) {
    branching_on_trunk(NodeKind::Parallel, "Fan Out")
}

/// `1 -> loop -> body -> merge -> tail`, plus `loop -> merge` bypass.
pub(crate) fn loop_on_trunk() -> (GraphState, NodeId) {
    branching_on_trunk(NodeKind::Loop, "For Each")
}

/// Branch edges of `node`, ordered by branch index.
pub(crate) fn branch_edges<'a>(graph: &'a GraphState, node: &str) -> Vec<&'a Edge> {
    let mut edges: Vec<&Edge> = graph
        .outgoing(node)
        .filter(|e| e.branch_index.is_some())
        .collect();
    edges.sort_by_key(|e| e.branch_index);
    edges
}

/// Target of the branch edge of `node` labelled `label`.
pub(crate) fn branch_target(graph: &GraphState, node: &str, label: &str) -> NodeId {
    graph
        .outgoing(node)
        .find(|e| e.branch_label().as_deref() == Some(label))
        .map(|e| e.target.clone())
        .unwrap_or_else(|| panic!("no branch {label} on {node}"))
}

pub(crate) fn merge_of(graph: &GraphState, node: &str) -> NodeId {
    graph
        .find_node(node)
        .and_then(|n| n.data.merge_node_id.clone())
        .unwrap_or_else(|| panic!("{node} has no cached merge node"))
}

pub(crate) fn assert_no_orphans(graph: &GraphState) {
    let orphans = graph.orphan_edges();
    assert!(orphans.is_empty(), "orphan edges: {orphans:?}");
}
