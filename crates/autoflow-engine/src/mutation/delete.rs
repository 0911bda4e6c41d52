use super::{add_edge_unique, ensure_acyclic};
use crate::MutationError;
use autoflow_core::query::{
    cached_merge_node, find_merge_node_for_block, is_merge_candidate, nodes_in_block,
};
use autoflow_core::{
    BranchHandle, Edge, GraphState, Node, NodeId, NodeKind, NodeRole, Position, START_NODE_ID,
};
use std::collections::HashSet;
use tracing::debug;

/// Remove a node from the graph.
///
/// The start node and merge points are never removed: they are reset to
/// their placeholder form. Branching nodes take their whole block with them.
/// Everything else is cut out and its neighbours are bridged. An emptied
/// branch gets a fresh placeholder, unless the deleted node was that
/// placeholder: the branch then runs straight into its merge.
pub fn delete_node(graph: &GraphState, node_id: &str) -> Result<GraphState, MutationError> {
    let node = graph
        .find_node(node_id)
        .ok_or_else(|| MutationError::NodeNotFound(node_id.to_string()))?;

    let next = if is_root(graph, node) {
        reset_trigger(graph, node_id)
    } else if node.is_branching() {
        delete_block(graph, node_id)
    } else if is_merge_candidate(graph, node_id) {
        reset_merge(graph, node_id)
    } else {
        delete_single(graph, node)
    };

    ensure_acyclic(&next)?;
    Ok(next)
}

fn is_root(graph: &GraphState, node: &Node) -> bool {
    node.id == START_NODE_ID
        || (node.kind == NodeKind::Custom && graph.incoming_count(&node.id) == 0)
}

/// True when `edge` leaves a branching node through one of its branches.
fn is_branch_edge(graph: &GraphState, edge: &Edge) -> bool {
    let from_branching = graph
        .find_node(&edge.source)
        .is_some_and(Node::is_branching);
    from_branching && edge.handle.as_ref().is_some_and(|h| *h != BranchHandle::LoopBypass)
}

fn reset_trigger(graph: &GraphState, node_id: &str) -> GraphState {
    let mut next = graph.clone();
    if let Some(node) = next.find_node_mut(node_id) {
        let position = node.position;
        *node = Node::trigger_placeholder();
        node.id = node_id.to_string();
        node.position = position;
    }
    debug!(node_id, "Start node reset to trigger placeholder");
    next
}

fn reset_merge(graph: &GraphState, node_id: &str) -> GraphState {
    let mut next = graph.clone();
    if let Some(node) = next.find_node_mut(node_id) {
        reset_to_merge_placeholder(node);
    }
    debug!(node_id, "Merge node reset to placeholder");
    next
}

fn reset_to_merge_placeholder(node: &mut Node) {
    let mut placeholder = Node::placeholder(NodeRole::MergePlaceholder);
    placeholder.id = std::mem::take(&mut node.id);
    placeholder.position = node.position;
    *node = placeholder;
}

/// Cut out a single non-branching node and connect each of its parents to
/// each of its children, keeping the parent edge's branch identity.
fn delete_single(graph: &GraphState, node: &Node) -> GraphState {
    let inbound: Vec<Edge> = graph.incoming(&node.id).cloned().collect();
    let exits: Vec<NodeId> = graph.outgoing(&node.id).map(|e| e.target.clone()).collect();

    let mut next = graph.clone();
    next.remove_node(&node.id);
    let refill = !node.is_placeholder();
    reconnect(&mut next, graph, &inbound, &exits, node.position, refill);

    debug!(node_id = %node.id, parents = inbound.len(), children = exits.len(), "Deleted node");
    next
}

/// Delete a branching node and every node of its block.
fn delete_block(graph: &GraphState, head: &str) -> GraphState {
    let merge = cached_merge_node(graph, head).or_else(|| find_merge_node_for_block(graph, head));
    let mut scope: HashSet<NodeId> = match &merge {
        Some(merge) => nodes_in_block(graph, head, Some(merge), false),
        None => nodes_in_block(graph, head, None, true),
    };

    // The merge placeholder goes with the block unless something outside
    // the block also feeds it.
    let mut exits: Vec<NodeId> = Vec::new();
    if let Some(merge) = &merge {
        let owned = graph
            .find_node(merge)
            .is_some_and(|n| n.data.role == NodeRole::MergePlaceholder)
            && graph.incoming(merge).all(|e| scope.contains(&e.source));
        if owned {
            scope.insert(merge.clone());
            exits.extend(graph.outgoing(merge).map(|e| e.target.clone()));
        } else {
            exits.push(merge.clone());
        }
    }

    let head_node = graph.find_node(head);
    let position = head_node.map(|n| n.position).unwrap_or_default();
    let mut next = graph.clone();

    if is_merge_candidate(graph, head) {
        // The head also closes an outer block: keep it as an empty merge
        // slot and hang the block's exits below it.
        scope.remove(head);
        next.edges.retain(|e| !scope.contains(&e.source) && !scope.contains(&e.target));
        next.edges.retain(|e| e.source != head);
        next.nodes.retain(|n| !scope.contains(&n.id));
        if let Some(node) = next.find_node_mut(head) {
            reset_to_merge_placeholder(node);
        }
        demote_lonely_merges(&mut next, &exits, 1);
        for exit in &exits {
            if next.contains_node(exit) {
                add_edge_unique(&mut next, Edge::new(head, exit.as_str()));
            }
        }
    } else {
        let inbound: Vec<Edge> = graph
            .incoming(head)
            .filter(|e| !scope.contains(&e.source))
            .cloned()
            .collect();
        next.edges.retain(|e| !scope.contains(&e.source) && !scope.contains(&e.target));
        next.nodes.retain(|n| !scope.contains(&n.id));
        demote_lonely_merges(&mut next, &exits, inbound.len());
        reconnect(&mut next, graph, &inbound, &exits, position, true);
    }

    clear_stale_merge_caches(&mut next);
    debug!(node_id = head, removed = scope.len(), "Deleted branching block");
    next
}

/// Bridge every inbound edge to every exit. With `refill` set, a branch that
/// would end up pointing straight at a merge node, or at nothing, gets a
/// fresh branch placeholder instead.
fn reconnect(
    next: &mut GraphState,
    before: &GraphState,
    inbound: &[Edge],
    exits: &[NodeId],
    position: Position,
    refill: bool,
) {
    let live_exits: Vec<&NodeId> = exits.iter().filter(|id| next.contains_node(id)).collect();
    for edge in inbound {
        if !next.contains_node(&edge.source) {
            continue;
        }
        let needs_placeholder = refill
            && is_branch_edge(before, edge)
            && live_exits.iter().all(|id| is_merge_candidate(next, id));

        if needs_placeholder {
            let mut placeholder = match edge.branch_label() {
                Some(name) if edge.handle != Some(BranchHandle::LoopOutput) => {
                    Node::branch_placeholder(name.into_owned())
                }
                _ => Node::placeholder(NodeRole::Placeholder),
            };
            placeholder.position = position;
            let placeholder_id = next.add_node(placeholder);
            next.add_edge(edge.rewired(&edge.source, &placeholder_id));
            for exit in &live_exits {
                add_edge_unique(next, Edge::new(&placeholder_id, exit.as_str()));
            }
        } else {
            for exit in &live_exits {
                add_edge_unique(next, edge.rewired(&edge.source, exit.as_str()));
            }
        }
    }
}

/// A populated merge node left with at most one input once `arriving` new
/// edges are attached is an ordinary action again.
fn demote_lonely_merges(graph: &mut GraphState, candidates: &[NodeId], arriving: usize) {
    for id in candidates {
        let inputs = graph.incoming_count(id) + arriving;
        if let Some(node) = graph.find_node_mut(id) {
            if node.data.role == NodeRole::MergeNode && inputs <= 1 {
                node.data.role = NodeRole::Action;
            }
        }
    }
}

fn clear_stale_merge_caches(graph: &mut GraphState) {
    let ids: HashSet<NodeId> = graph.nodes.iter().map(|n| n.id.clone()).collect();
    for node in &mut graph.nodes {
        if node
            .data
            .merge_node_id
            .as_ref()
            .is_some_and(|m| !ids.contains(m))
        {
            node.data.merge_node_id = None;
        }
    }
}
