//! Branch reconciliation.
//!
//! Keeps the outgoing branch edges of a condition or parallel node in step
//! with its declared branch-name list while keeping existing branch
//! subtrees attached to the branch they belong to.

use autoflow_core::query::{find_merge_node_for_block, nodes_in_block, resolve_merge_node};
use autoflow_core::{BranchHandle, Edge, EdgeId, GraphState, Node, NodeId, NodeKind, NodeRole};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub graph: GraphState,
    pub merge_node_id: Option<NodeId>,
    pub normalized_branches: Option<Vec<String>>,
}

impl ReconcileOutcome {
    fn unchanged(graph: &GraphState, merge_node_id: Option<NodeId>) -> Self {
        Self {
            graph: graph.clone(),
            merge_node_id,
            normalized_branches: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Let a parallel node drop to zero branches.
    pub allow_empty: bool,
}

/// Canonical condition labels for `count` branches:
/// `If`, `Else If 1`, ..., `Else`.
pub fn canonical_condition_labels(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            if i == 0 {
                "If".to_string()
            } else if i == count - 1 {
                "Else".to_string()
            } else {
                format!("Else If {i}")
            }
        })
        .collect()
}

/// Condition names are replaced positionally by their canonical labels;
/// parallel names are kept verbatim.
pub fn normalize_branch_names(kind: NodeKind, names: &[String]) -> Vec<String> {
    match kind {
        NodeKind::Condition => canonical_condition_labels(names.len()),
        _ => names.to_vec(),
    }
}

pub fn branch_handle_for(kind: NodeKind, name: &str) -> BranchHandle {
    match kind {
        NodeKind::Condition => BranchHandle::for_condition(name),
        _ => BranchHandle::for_parallel(name),
    }
}

/// Branch edges of `node_id` in their stable order.
///
/// Condition: `If` first, `Else` last, the rest by label. Parallel: by the
/// target's x position, tie-broken by target id.
pub(crate) fn existing_branch_edges<'a>(graph: &'a GraphState, node_id: &str) -> Vec<&'a Edge> {
    let Some(node) = graph.find_node(node_id) else {
        return Vec::new();
    };
    let mut edges: Vec<&Edge> = graph
        .edges
        .iter()
        .filter(|e| e.source == node_id)
        .filter(|e| !e.handle.as_ref().is_some_and(BranchHandle::is_structural))
        .filter(|e| graph.contains_node(&e.target))
        .collect();

    match node.kind {
        NodeKind::Condition => edges.sort_by(|a, b| compare_condition_edges(a, b)),
        _ => edges.sort_by(|a, b| {
            let ax = graph.find_node(&a.target).map_or(0.0, |n| n.position.x);
            let bx = graph.find_node(&b.target).map_or(0.0, |n| n.position.x);
            ax.total_cmp(&bx).then_with(|| a.target.cmp(&b.target))
        }),
    }
    edges
}

fn compare_condition_edges(a: &Edge, b: &Edge) -> Ordering {
    let rank = |e: &Edge| match e.branch_label().as_deref() {
        Some("If") => 0,
        Some("Else") => 2,
        _ => 1,
    };
    let number = |e: &Edge| {
        e.branch_label()
            .and_then(|l| l.rsplit(' ').next().and_then(|n| n.parse::<usize>().ok()))
            .unwrap_or(usize::MAX)
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| number(a).cmp(&number(b)))
        .then_with(|| a.branch_label().cmp(&b.branch_label()))
}

fn edge_matches_name(edge: &Edge, kind: NodeKind, name: &str) -> bool {
    match edge.branch_label() {
        Some(label) => label == name,
        None => edge.handle.as_ref() == Some(&branch_handle_for(kind, name)),
    }
}

/// For each name, the index into `existing` of the edge that carries it:
/// exact label matches first, then the remaining edges in order.
pub(crate) fn assign_edges(
    existing: &[&Edge],
    kind: NodeKind,
    names: &[String],
) -> Vec<Option<usize>> {
    let mut assignment: Vec<Option<usize>> = vec![None; names.len()];
    let mut used = vec![false; existing.len()];
    for (i, name) in names.iter().enumerate() {
        let hit = (0..existing.len())
            .find(|&j| !used[j] && edge_matches_name(existing[j], kind, name));
        if let Some(j) = hit {
            assignment[i] = Some(j);
            used[j] = true;
        }
    }
    let mut leftovers = (0..existing.len()).filter(|&j| !used[j]);
    for slot in assignment.iter_mut().filter(|s| s.is_none()) {
        match leftovers.next() {
            Some(j) => *slot = Some(j),
            None => break,
        }
    }
    assignment
}

/// Merge node used while reconciling: cached or deep search first, then the
/// balance walk over all branches.
pub(crate) fn reconcile_merge_node(graph: &GraphState, node_id: &str) -> Option<NodeId> {
    resolve_merge_node(graph, node_id).or_else(|| find_merge_node_for_block(graph, node_id))
}

pub fn reconcile_branches(graph: &GraphState, node_id: &str, names: &[String]) -> ReconcileOutcome {
    reconcile_branches_with(graph, node_id, names, ReconcileOptions::default())
}

pub fn reconcile_branches_with(
    graph: &GraphState,
    node_id: &str,
    names: &[String],
    options: ReconcileOptions,
) -> ReconcileOutcome {
    let Some(node) = graph.find_node(node_id) else {
        debug!(node_id, "Reconcile skipped: node not found");
        return ReconcileOutcome::unchanged(graph, None);
    };
    if !node.kind.has_branch_list() {
        return ReconcileOutcome::unchanged(graph, None);
    }
    let kind = node.kind;
    let normalized = normalize_branch_names(kind, names);
    let merge = reconcile_merge_node(graph, node_id);

    if normalized.is_empty() && !(options.allow_empty && kind == NodeKind::Parallel) {
        return ReconcileOutcome::unchanged(graph, merge);
    }

    let existing = existing_branch_edges(graph, node_id);
    if existing.is_empty() && !normalized.is_empty() && !is_collapsed(graph, node_id) {
        return ReconcileOutcome::unchanged(graph, merge);
    }

    let assignment = assign_edges(&existing, kind, &normalized);
    let mut used = vec![false; existing.len()];
    for j in assignment.iter().flatten() {
        used[*j] = true;
    }

    let removed: Vec<EdgeId> = existing
        .iter()
        .enumerate()
        .filter(|(j, _)| !used[*j])
        .map(|(_, e)| e.id.clone())
        .collect();
    let matched: Vec<Option<(EdgeId, NodeId)>> = assignment
        .iter()
        .map(|slot| slot.map(|j| (existing[j].id.clone(), existing[j].target.clone())))
        .collect();

    let mut next = remove_branch_scopes(graph, node_id, merge.as_deref(), &removed);

    for (i, name) in normalized.iter().enumerate() {
        let handle = branch_handle_for(kind, name);
        match &matched[i] {
            Some((edge_id, target)) => {
                if let Some(edge) = next.find_edge_mut(edge_id) {
                    edge.handle = Some(handle);
                    edge.label = Some(name.clone());
                    edge.branch_index = Some(i);
                }
                if let Some(target) = next.find_node_mut(target) {
                    if target.data.role == NodeRole::BranchPlaceholder {
                        target.data.sub_label = Some(name.clone());
                    }
                }
            }
            None => {
                let mut placeholder = Node::branch_placeholder(name.clone());
                placeholder.position = node.position;
                let placeholder_id = next.add_node(placeholder);
                next.add_edge(Edge::branch(
                    node_id,
                    placeholder_id.clone(),
                    handle,
                    Some(i),
                    Some(name.clone()),
                ));
                if let Some(merge) = &merge {
                    next.connect(&placeholder_id, merge);
                }
                debug!(node_id, branch = %name, "Created branch placeholder");
            }
        }
    }

    if normalized.is_empty() {
        if let Some(merge) = &merge {
            collapse(&mut next, node_id, merge);
        }
    } else {
        next.edges
            .retain(|e| e.source != node_id || e.handle != Some(BranchHandle::ParallelOutput));
    }

    if let Some(head) = next.find_node_mut(node_id) {
        head.data.branches = Some(normalized.clone());
        head.data.merge_node_id = merge.clone();
    }

    ReconcileOutcome {
        graph: next,
        merge_node_id: merge,
        normalized_branches: Some(normalized),
    }
}

/// A parallel node without branches feeds its merge node directly.
fn is_collapsed(graph: &GraphState, node_id: &str) -> bool {
    graph
        .outgoing(node_id)
        .any(|e| e.handle == Some(BranchHandle::ParallelOutput))
}

pub(crate) fn collapse(graph: &mut GraphState, node_id: &str, merge: &str) {
    if is_collapsed(graph, node_id) || !graph.contains_node(merge) {
        return;
    }
    graph.add_edge(Edge::branch(
        node_id,
        merge,
        BranchHandle::ParallelOutput,
        None,
        None,
    ));
    debug!(node_id, merge, "Parallel node left without branches");
}

/// Remove branch edges of `node_id` together with the nodes only they
/// reach. Nodes also reachable from a kept branch, the merge node and the
/// branching node itself survive.
pub(crate) fn remove_branch_scopes(
    graph: &GraphState,
    node_id: &str,
    merge: Option<&str>,
    removed: &[EdgeId],
) -> GraphState {
    if removed.is_empty() {
        return graph.clone();
    }
    let removed_set: HashSet<&str> = removed.iter().map(String::as_str).collect();

    let mut kept_scope: HashSet<NodeId> = HashSet::new();
    for edge in graph.outgoing(node_id) {
        if !removed_set.contains(edge.id.as_str()) {
            kept_scope.extend(nodes_in_block(graph, &edge.target, merge, false));
        }
    }

    let mut doomed: HashSet<NodeId> = HashSet::new();
    for edge in graph.edges.iter().filter(|e| removed_set.contains(e.id.as_str())) {
        if merge == Some(edge.target.as_str()) {
            continue;
        }
        for id in nodes_in_block(graph, &edge.target, merge, false) {
            if id != node_id && !kept_scope.contains(&id) {
                doomed.insert(id);
            }
        }
    }

    debug!(
        node_id,
        edges = removed.len(),
        nodes = doomed.len(),
        "Removing branches"
    );

    let mut next = graph.clone();
    next.edges.retain(|e| {
        !removed_set.contains(e.id.as_str())
            && !doomed.contains(&e.source)
            && !doomed.contains(&e.target)
    });
    next.nodes.retain(|n| !doomed.contains(&n.id));
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{InsertTarget, NewNode, insert_node};
    use crate::test_support::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn canonical_labels() {
        assert_eq!(canonical_condition_labels(1), names(&["If"]));
        assert_eq!(canonical_condition_labels(2), names(&["If", "Else"]));
        assert_eq!(
            canonical_condition_labels(4),
            names(&["If", "Else If 1", "Else If 2", "Else"])
        );
        assert_eq!(
            normalize_branch_names(NodeKind::Parallel, &names(&["b", "A"])),
            names(&["b", "A"])
        );
    }

    #[test]
    fn reconcile_is_idempotent() {
        let (graph, c) = condition_on_trunk();
        let first = reconcile_branches(&graph, &c, &names(&["If", "x", "Else"]));
        let second = reconcile_branches(&first.graph, &c, &names(&["If", "x", "Else"]));
        assert_eq!(second.graph, first.graph);
        assert_eq!(first.normalized_branches, Some(names(&["If", "Else If 1", "Else"])));
    }

    #[test]
    fn inserting_middle_branch_keeps_else_subtree() {
        let (graph, c) = condition_on_trunk();
        let else_target = branch_target(&graph, &c, "Else");
        // Give the Else branch real content.
        let graph = insert_node(
            &graph,
            InsertTarget::Placeholder(else_target.clone()),
            NewNode::new(NodeKind::Action, "Notify"),
        )
        .unwrap();
        let merge = merge_of(&graph, &c);
        let nodes_before = graph.nodes.len();

        let outcome = reconcile_branches(&graph, &c, &names(&["If", "Else If 1", "Else"]));
        let next = &outcome.graph;

        assert_eq!(branch_target(next, &c, "Else"), else_target);
        assert_eq!(next.find_node(&else_target).unwrap().label(), "Notify");
        assert_eq!(next.nodes.len(), nodes_before + 1);

        let new_target = branch_target(next, &c, "Else If 1");
        let placeholder = next.find_node(&new_target).unwrap();
        assert_eq!(placeholder.data.role, NodeRole::BranchPlaceholder);
        assert_eq!(placeholder.data.sub_label.as_deref(), Some("Else If 1"));
        assert!(next.outgoing(&new_target).any(|e| e.target == merge));
        assert_eq!(outcome.merge_node_id.as_deref(), Some(merge.as_str()));
        assert_no_orphans(next);
    }

    #[test]
    fn shrinking_removes_branch_block() {
        let (graph, c) = condition_on_trunk();
        let grown = reconcile_branches(&graph, &c, &names(&["If", "Else If 1", "Else"])).graph;
        let middle = branch_target(&grown, &c, "Else If 1");
        let grown = insert_node(
            &grown,
            InsertTarget::Placeholder(middle.clone()),
            NewNode::new(NodeKind::Action, "Middle"),
        )
        .unwrap();

        // Dropping the last name: "Else If 1" loses its exact match partner.
        let shrunk = reconcile_branches(&grown, &c, &names(&["If", "Else"])).graph;
        assert!(shrunk.find_node(&middle).is_none());
        assert_eq!(branch_edges(&shrunk, &c).len(), 2);
        assert!(shrunk.contains_node(&merge_of(&grown, &c)));
        assert_no_orphans(&shrunk);
    }

    #[test]
    fn parallel_rename_keeps_subtree() {
        let (graph, p) = parallel_on_trunk();
        let first = branch_target(&graph, &p, "Branch 1");
        let graph = insert_node(
            &graph,
            InsertTarget::Placeholder(first.clone()),
            NewNode::new(NodeKind::Action, "Fetch"),
        )
        .unwrap();

        let renamed = reconcile_branches(&graph, &p, &names(&["Orders", "Branch 2"])).graph;
        assert_eq!(branch_target(&renamed, &p, "Orders"), first);
        let edge = branch_edges(&renamed, &p)
            .into_iter()
            .find(|e| e.target == first)
            .unwrap();
        assert_eq!(edge.handle, Some(BranchHandle::Branch("orders".to_string())));
        assert_eq!(edge.branch_index, Some(0));
    }

    #[test]
    fn placeholder_sub_label_follows_rename() {
        let (graph, p) = parallel_on_trunk();
        let second = branch_target(&graph, &p, "Branch 2");
        let renamed = reconcile_branches(&graph, &p, &names(&["Branch 1", "Audit"])).graph;
        assert_eq!(
            renamed.find_node(&second).unwrap().data.sub_label.as_deref(),
            Some("Audit")
        );
    }

    #[test]
    fn shared_merge_edges_survive_removal() {
        let (graph, p) = parallel_on_trunk();
        let merge = merge_of(&graph, &p);
        let outcome = reconcile_branches(&graph, &p, &names(&["Branch 1"]));
        assert!(outcome.graph.contains_node(&merge));
        assert_eq!(outcome.graph.outgoing(&merge).count(), 1);
        assert_eq!(branch_edges(&outcome.graph, &p).len(), 1);
    }

    #[test]
    fn empty_list_is_a_no_op_unless_allowed() {
        let (graph, p) = parallel_on_trunk();
        let outcome = reconcile_branches(&graph, &p, &[]);
        assert_eq!(outcome.graph, graph);
        assert_eq!(outcome.normalized_branches, None);

        let emptied = reconcile_branches_with(
            &graph,
            &p,
            &[],
            ReconcileOptions { allow_empty: true },
        );
        assert!(branch_edges(&emptied.graph, &p).is_empty());
        assert_no_orphans(&emptied.graph);
    }

    #[test]
    fn dangling_branches_get_no_merge_edge() {
        let mut graph = autoflow_core::GraphState::with_trigger_placeholder();
        let mut c = Node::with_id("c", NodeKind::Condition, "Check");
        c.data.branches = Some(names(&["If", "Else"]));
        graph.add_node(c);
        graph.add_node(Node::with_id("a", NodeKind::Action, "A"));
        graph.add_node(Node::with_id("b", NodeKind::Action, "B"));
        graph.connect("1", "c");
        graph.add_edge(Edge::branch("c", "a", BranchHandle::True, Some(0), None));
        graph.add_edge(Edge::branch("c", "b", BranchHandle::False, Some(1), None));

        let outcome = reconcile_branches(&graph, "c", &names(&["If", "Else If 1", "Else"]));
        assert_eq!(outcome.merge_node_id, None);
        let added = branch_target(&outcome.graph, "c", "Else If 1");
        assert_eq!(outcome.graph.outgoing(&added).count(), 0);
    }
}
