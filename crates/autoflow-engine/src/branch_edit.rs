//! Editing a branching node's branch list one entry at a time.
//!
//! Each edit first relabels the existing branch edges to the names they will
//! carry afterwards, so the reconciler's exact-label pass keeps every
//! subtree on its own branch even though positions shift.

use crate::MutationError;
use crate::mutation::ensure_acyclic;
use crate::reconcile::{
    ReconcileOptions, assign_edges, branch_handle_for, collapse, existing_branch_edges,
    normalize_branch_names, reconcile_branches_with, reconcile_merge_node, remove_branch_scopes,
};
use autoflow_core::condition::{BranchConfig, shift_for_insert, shift_for_remove};
use autoflow_core::{BranchHandle, EdgeId, GraphState, NodeKind, ValidationError};
use tracing::debug;

struct Target {
    kind: NodeKind,
    names: Vec<String>,
    /// The branch edge carrying each name, aligned with `names`.
    edges: Vec<Option<EdgeId>>,
}

fn target(graph: &GraphState, node_id: &str) -> Result<Target, MutationError> {
    let node = graph
        .find_node(node_id)
        .ok_or_else(|| MutationError::NodeNotFound(node_id.to_string()))?;
    if !node.kind.has_branch_list() {
        return Err(MutationError::NotABranchingNode(node_id.to_string()));
    }
    let existing = existing_branch_edges(graph, node_id);
    let names = match &node.data.branches {
        Some(names) if !names.is_empty() => names.clone(),
        _ => existing
            .iter()
            .filter_map(|e| e.branch_label().map(|l| l.into_owned()))
            .collect(),
    };
    let edges = assign_edges(&existing, node.kind, &names)
        .into_iter()
        .map(|slot| slot.map(|j| existing[j].id.clone()))
        .collect();
    Ok(Target {
        kind: node.kind,
        names,
        edges,
    })
}

fn check_parallel_name(
    names: &[String],
    skip: Option<usize>,
    index: usize,
    name: &str,
) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyBranchName { index });
    }
    if BranchHandle::is_reserved_name(name) {
        return Err(ValidationError::ReservedBranchName(name.trim().to_string()));
    }
    let lowered = name.trim().to_lowercase();
    let clash = names
        .iter()
        .enumerate()
        .any(|(i, n)| Some(i) != skip && n.to_lowercase() == lowered);
    if clash {
        return Err(ValidationError::DuplicateBranchName(name.trim().to_string()));
    }
    Ok(())
}

/// Point each `(edge, index)` at the name it will carry in `names`.
fn relabel(graph: &mut GraphState, kind: NodeKind, moves: &[(EdgeId, usize)], names: &[String]) {
    for (edge_id, index) in moves {
        let (Some(edge), Some(name)) = (graph.find_edge_mut(edge_id), names.get(*index)) else {
            continue;
        };
        edge.label = Some(name.clone());
        edge.handle = Some(branch_handle_for(kind, name));
        edge.branch_index = Some(*index);
    }
}

fn shift_config(
    graph: &mut GraphState,
    node_id: &str,
    shift: impl Fn(&BranchConfig) -> BranchConfig,
) {
    if let Some(node) = graph.find_node_mut(node_id) {
        if let Some(config) = &node.data.branch_config {
            node.data.branch_config = Some(shift(config));
        }
    }
}

/// Insert a branch named `name` at `index`.
///
/// Condition nodes keep `If` first and `Else` last, so new branches go
/// strictly between them; the name is replaced by its canonical label.
pub fn insert_branch(
    graph: &GraphState,
    node_id: &str,
    index: usize,
    name: &str,
) -> Result<GraphState, MutationError> {
    let target = target(graph, node_id)?;
    let len = target.names.len();
    if index > len {
        return Err(MutationError::BranchIndexOutOfRange {
            node: node_id.to_string(),
            index,
        });
    }
    match target.kind {
        NodeKind::Condition if index == 0 || (index == len && len >= 2) => {
            return Err(MutationError::ProtectedBranch {
                node: node_id.to_string(),
                index,
            });
        }
        NodeKind::Parallel => check_parallel_name(&target.names, None, index, name)?,
        _ => {}
    }

    let mut names = target.names.clone();
    names.insert(index, name.trim().to_string());
    let names = normalize_branch_names(target.kind, &names);

    let moves: Vec<(EdgeId, usize)> = target
        .edges
        .iter()
        .enumerate()
        .filter_map(|(j, id)| Some((id.clone()?, if j < index { j } else { j + 1 })))
        .collect();
    let mut next = graph.clone();
    relabel(&mut next, target.kind, &moves, &names);
    if target.kind == NodeKind::Condition {
        shift_config(&mut next, node_id, |c| shift_for_insert(c, index));
    }

    debug!(node_id, index, "Inserting branch");
    let next = reconcile_branches_with(&next, node_id, &names, ReconcileOptions::default()).graph;
    ensure_acyclic(&next)?;
    Ok(next)
}

/// Remove the branch at `index` together with its subtree.
///
/// A condition's `If` and `Else` branches cannot be removed. A parallel node
/// may lose its last branch.
pub fn remove_branch(
    graph: &GraphState,
    node_id: &str,
    index: usize,
) -> Result<GraphState, MutationError> {
    let target = target(graph, node_id)?;
    let len = target.names.len();
    if index >= len {
        return Err(MutationError::BranchIndexOutOfRange {
            node: node_id.to_string(),
            index,
        });
    }
    if target.kind == NodeKind::Condition && (index == 0 || index + 1 == len) {
        return Err(MutationError::ProtectedBranch {
            node: node_id.to_string(),
            index,
        });
    }

    let mut names = target.names.clone();
    names.remove(index);
    let names = normalize_branch_names(target.kind, &names);

    let merge = reconcile_merge_node(graph, node_id);
    let victim: Vec<EdgeId> = target.edges.get(index).cloned().flatten().into_iter().collect();
    let mut next = remove_branch_scopes(graph, node_id, merge.as_deref(), &victim);
    if names.is_empty() {
        if let Some(merge) = &merge {
            collapse(&mut next, node_id, merge);
        }
    }

    let moves: Vec<(EdgeId, usize)> = target
        .edges
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != index)
        .filter_map(|(j, id)| Some((id.clone()?, if j < index { j } else { j - 1 })))
        .collect();
    relabel(&mut next, target.kind, &moves, &names);
    if target.kind == NodeKind::Condition {
        shift_config(&mut next, node_id, |c| shift_for_remove(c, index));
    }

    debug!(node_id, index, "Removing branch");
    let outcome = reconcile_branches_with(
        &next,
        node_id,
        &names,
        ReconcileOptions { allow_empty: true },
    );
    let mut graph = outcome.graph;
    if names.is_empty() {
        if let Some(node) = graph.find_node_mut(node_id) {
            node.data.branches = Some(names);
        }
    }
    ensure_acyclic(&graph)?;
    Ok(graph)
}

/// Rename a parallel branch. Condition labels are positional and cannot be
/// renamed.
pub fn rename_branch(
    graph: &GraphState,
    node_id: &str,
    index: usize,
    name: &str,
) -> Result<GraphState, MutationError> {
    let target = target(graph, node_id)?;
    if index >= target.names.len() {
        return Err(MutationError::BranchIndexOutOfRange {
            node: node_id.to_string(),
            index,
        });
    }
    if target.kind == NodeKind::Condition {
        return Err(MutationError::ProtectedBranch {
            node: node_id.to_string(),
            index,
        });
    }
    check_parallel_name(&target.names, Some(index), index, name)?;

    let mut names = target.names.clone();
    names[index] = name.trim().to_string();

    let mut next = graph.clone();
    if let Some(Some(edge_id)) = target.edges.get(index) {
        relabel(&mut next, target.kind, &[(edge_id.clone(), index)], &names);
    }

    debug!(node_id, index, name, "Renaming branch");
    let next = reconcile_branches_with(&next, node_id, &names, ReconcileOptions::default()).graph;
    ensure_acyclic(&next)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{InsertTarget, NewNode, insert_node};
    use crate::test_support::*;
    use autoflow_core::condition::{ConditionGroup, LogicalOperator};
    use autoflow_core::query::nodes_in_block;
    use autoflow_core::{NodeRole, START_NODE_ID, validate_graph};
    use std::collections::BTreeMap;

    fn fill(graph: &GraphState, slot: &str, label: &str) -> GraphState {
        insert_node(
            graph,
            InsertTarget::Placeholder(slot.to_string()),
            NewNode::new(NodeKind::Action, label),
        )
        .unwrap()
    }

    fn labels(graph: &GraphState, node: &str) -> Vec<String> {
        graph.find_node(node).unwrap().data.branches.clone().unwrap()
    }

    fn only_child(graph: &GraphState, node: &str) -> String {
        let targets: Vec<&str> = graph.outgoing(node).map(|e| e.target.as_str()).collect();
        assert_eq!(targets.len(), 1, "expected one edge out of {node}: {targets:?}");
        targets[0].to_string()
    }

    #[test]
    fn condition_insert_goes_between_if_and_else() {
        let (graph, c) = condition_on_trunk();
        let else_slot = branch_target(&graph, &c, "Else");
        let graph = fill(&graph, &else_slot, "Fallback");

        let next = insert_branch(&graph, &c, 1, "ignored").unwrap();
        assert_eq!(labels(&next, &c), vec!["If", "Else If 1", "Else"]);
        assert_eq!(branch_target(&next, &c, "Else"), else_slot);
        let added = branch_target(&next, &c, "Else If 1");
        assert_eq!(
            next.find_node(&added).unwrap().data.role,
            NodeRole::BranchPlaceholder
        );
        assert_no_orphans(&next);
    }

    #[test]
    fn condition_insert_shifts_branch_config() {
        let (mut graph, c) = condition_on_trunk();
        let mut config = BTreeMap::new();
        config.insert("0".to_string(), ConditionGroup::new("g0", LogicalOperator::And));
        graph.find_node_mut(&c).unwrap().data.branch_config = Some(config);

        let next = insert_branch(&graph, &c, 1, "x").unwrap();
        let next = insert_branch(&next, &c, 1, "y").unwrap();
        let config = next.find_node(&c).unwrap().data.branch_config.clone().unwrap();
        assert_eq!(config["0"].id, "g0");
        assert_eq!(config.len(), 1);

        let removed = remove_branch(&next, &c, 1).unwrap();
        assert_eq!(labels(&removed, &c), vec!["If", "Else If 1", "Else"]);
    }

    #[test]
    fn condition_edges_are_protected() {
        let (graph, c) = condition_on_trunk();
        assert_eq!(
            insert_branch(&graph, &c, 0, "x"),
            Err(MutationError::ProtectedBranch { node: c.clone(), index: 0 })
        );
        assert_eq!(
            insert_branch(&graph, &c, 2, "x"),
            Err(MutationError::ProtectedBranch { node: c.clone(), index: 2 })
        );
        assert_eq!(
            remove_branch(&graph, &c, 1),
            Err(MutationError::ProtectedBranch { node: c.clone(), index: 1 })
        );
        assert!(matches!(
            rename_branch(&graph, &c, 0, "When"),
            Err(MutationError::ProtectedBranch { .. })
        ));
    }

    #[test]
    fn removing_middle_condition_branch_keeps_later_subtree() {
        let (graph, c) = condition_on_trunk();
        let graph = insert_branch(&graph, &c, 1, "a").unwrap();
        let graph = insert_branch(&graph, &c, 2, "b").unwrap();
        assert_eq!(labels(&graph, &c), vec!["If", "Else If 1", "Else If 2", "Else"]);

        let first = branch_target(&graph, &c, "Else If 1");
        let second = branch_target(&graph, &c, "Else If 2");
        let graph = fill(&graph, &second, "Escalate");

        let next = remove_branch(&graph, &c, 1).unwrap();
        assert!(next.find_node(&first).is_none());
        assert_eq!(branch_target(&next, &c, "Else If 1"), second);
        assert_eq!(
            next.outgoing(&c).find(|e| e.target == second).unwrap().handle,
            Some(BranchHandle::Branch("else if 1".into()))
        );
        assert_eq!(branch_edges(&next, &c).len(), 3);
        assert_no_orphans(&next);
    }

    #[test]
    fn parallel_insert_at_front_shifts_others() {
        let (graph, p) = parallel_on_trunk();
        let first = branch_target(&graph, &p, "Branch 1");
        let graph = fill(&graph, &first, "Fetch");

        let next = insert_branch(&graph, &p, 0, "Audit").unwrap();
        assert_eq!(labels(&next, &p), vec!["Audit", "Branch 1", "Branch 2"]);
        let edge = next.outgoing(&p).find(|e| e.target == first).unwrap();
        assert_eq!(edge.branch_index, Some(1));
        assert_eq!(edge.label.as_deref(), Some("Branch 1"));
    }

    #[test]
    fn parallel_names_are_validated() {
        let (graph, p) = parallel_on_trunk();
        assert_eq!(
            insert_branch(&graph, &p, 1, "branch 2"),
            Err(MutationError::Validation(ValidationError::DuplicateBranchName(
                "branch 2".into()
            )))
        );
        assert_eq!(
            rename_branch(&graph, &p, 0, "  "),
            Err(MutationError::Validation(ValidationError::EmptyBranchName { index: 0 }))
        );
        assert!(matches!(
            insert_branch(&graph, &p, 5, "x"),
            Err(MutationError::BranchIndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn parallel_rename_keeps_subtree() {
        let (graph, p) = parallel_on_trunk();
        let second = branch_target(&graph, &p, "Branch 2");
        let graph = fill(&graph, &second, "Notify");

        let next = rename_branch(&graph, &p, 1, "Alerts").unwrap();
        assert_eq!(labels(&next, &p), vec!["Branch 1", "Alerts"]);
        assert_eq!(branch_target(&next, &p, "Alerts"), second);
    }

    #[test]
    fn parallel_can_lose_every_branch() {
        let (graph, p) = parallel_on_trunk();
        let merge = merge_of(&graph, &p);
        let graph = remove_branch(&graph, &p, 0).unwrap();
        let graph = remove_branch(&graph, &p, 0).unwrap();
        assert!(labels(&graph, &p).is_empty());
        assert!(branch_edges(&graph, &p).is_empty());
        assert_no_orphans(&graph);

        // The head runs straight into its merge, so nothing below is cut off.
        let out: Vec<_> = graph.outgoing(&p).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, merge);
        assert_eq!(out[0].handle, Some(BranchHandle::ParallelOutput));
        let reachable = nodes_in_block(&graph, START_NODE_ID, None, true);
        assert!(reachable.contains("tail"));
        assert_eq!(validate_graph(&graph), Ok(()));
    }

    #[test]
    fn emptied_parallel_takes_new_branches() {
        let (graph, p) = parallel_on_trunk();
        let merge = merge_of(&graph, &p);
        let graph = remove_branch(&graph, &p, 0).unwrap();
        let graph = remove_branch(&graph, &p, 0).unwrap();

        let next = insert_branch(&graph, &p, 0, "Retry").unwrap();
        assert_eq!(labels(&next, &p), vec!["Retry"]);
        assert!(
            next.outgoing(&p)
                .all(|e| e.handle != Some(BranchHandle::ParallelOutput))
        );
        let slot = branch_target(&next, &p, "Retry");
        assert_eq!(only_child(&next, &slot), merge);
        assert!(nodes_in_block(&next, START_NODE_ID, None, true).contains("tail"));
        assert_no_orphans(&next);
    }

    #[test]
    fn reserved_parallel_names_are_rejected() {
        let (graph, p) = parallel_on_trunk();
        assert_eq!(
            insert_branch(&graph, &p, 0, "True"),
            Err(MutationError::Validation(ValidationError::ReservedBranchName(
                "True".into()
            )))
        );
        assert_eq!(
            rename_branch(&graph, &p, 1, " Loop-Bypass "),
            Err(MutationError::Validation(ValidationError::ReservedBranchName(
                "Loop-Bypass".into()
            )))
        );
    }

    #[test]
    fn branch_edits_reject_cyclic_graphs() {
        let (mut graph, p) = parallel_on_trunk();
        graph.connect("tail", START_NODE_ID);
        assert!(matches!(
            rename_branch(&graph, &p, 0, "Audit"),
            Err(MutationError::CycleIntroduced(_))
        ));
        assert!(matches!(
            insert_branch(&graph, &p, 2, "Audit"),
            Err(MutationError::CycleIntroduced(_))
        ));
        assert!(matches!(
            remove_branch(&graph, &p, 0),
            Err(MutationError::CycleIntroduced(_))
        ));
    }

    #[test]
    fn non_branching_node_is_rejected() {
        let (graph, _) = trunk();
        assert_eq!(
            insert_branch(&graph, "tail", 0, "x"),
            Err(MutationError::NotABranchingNode("tail".into()))
        );
    }
}
