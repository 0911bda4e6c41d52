//! Self-healing pass run after structural edits.

use crate::reconcile::reconcile_branches;
use autoflow_core::{GraphState, NodeId};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    pub graph: GraphState,
    pub pruned_edges: usize,
    /// Branching nodes whose branch edges were rewritten.
    pub reconciled_nodes: Vec<NodeId>,
}

impl SweepOutcome {
    pub fn repaired(&self) -> bool {
        self.pruned_edges > 0 || !self.reconciled_nodes.is_empty()
    }
}

/// Drop orphan edges, then re-align every condition and parallel node with
/// its declared branch list.
pub fn sweep(graph: &GraphState) -> SweepOutcome {
    let mut next = graph.clone();
    let pruned_edges = next.prune_orphan_edges();
    if pruned_edges > 0 {
        warn!(pruned_edges, "Removed orphan edges");
    }

    let branching: Vec<(NodeId, Vec<String>)> = next
        .nodes
        .iter()
        .filter(|n| n.kind.has_branch_list())
        .filter_map(|n| {
            n.data
                .branches
                .as_ref()
                .filter(|b| !b.is_empty())
                .map(|b| (n.id.clone(), b.clone()))
        })
        .collect();

    let mut reconciled_nodes = Vec::new();
    for (node_id, names) in branching {
        let outcome = reconcile_branches(&next, &node_id, &names);
        if outcome.graph != next {
            debug!(node_id = %node_id, "Branches re-aligned");
            reconciled_nodes.push(node_id);
            next = outcome.graph;
        }
    }

    SweepOutcome {
        graph: next,
        pruned_edges,
        reconciled_nodes,
    }
}
