//! Structural edits on a workflow graph.
//!
//! Every operation takes the current [`GraphState`] by reference and returns
//! the next one; the input is never modified. On error the caller keeps its
//! snapshot unchanged.

mod delete;
mod insert;
mod swap;


pub use delete::delete_node;
pub use insert::{InsertTarget, NewNode, insert_node};
pub use swap::swap_node;

use crate::MutationError;
use autoflow_core::query::find_cycle;
use autoflow_core::{Edge, GraphState, Node, NodeRole};

/// A placeholder that receives real content leaves its placeholder role:
/// merge slots keep acting as merge points, everything else becomes a plain
/// action.
pub(crate) fn fill_placeholder_role(node: &mut Node) {
    node.data.role = match node.data.role {
        NodeRole::MergePlaceholder | NodeRole::MergeNode => NodeRole::MergeNode,
        _ => NodeRole::Action,
    };
    node.data.sub_label = None;
}

pub(crate) fn ensure_acyclic(graph: &GraphState) -> Result<(), MutationError> {
    match find_cycle(graph) {
        Some(node) => Err(MutationError::CycleIntroduced(node)),
        None => Ok(()),
    }
}

/// Add `edge` unless an edge with the same endpoints and handle already
/// exists.
pub(crate) fn add_edge_unique(graph: &mut GraphState, edge: Edge) {
    let duplicate = graph.edges.iter().any(|e| {
        e.source == edge.source && e.target == edge.target && e.handle == edge.handle
    });
    if !duplicate && edge.source != edge.target {
        graph.add_edge(edge);
    }
}
