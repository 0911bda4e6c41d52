//! Read-only structural queries over a [`GraphState`].
//!
//! Every walk is bounded by [`MAX_TRAVERSAL_STEPS`]; on malformed or cyclic
//! input the queries return a best-effort answer instead of looping.

use crate::{GraphState, NodeId, START_NODE_ID};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

/// Hard ceiling on nodes visited by a single traversal.
pub const MAX_TRAVERSAL_STEPS: usize = 10_000;

/// A node is a merge candidate when it is flagged as one or when more than
/// one edge points at it.
pub fn is_merge_candidate(graph: &GraphState, id: &str) -> bool {
    graph
        .find_node(id)
        .is_some_and(|n| n.data.role.is_merge())
        || graph.incoming_count(id) > 1
}

/// The node the graph is anchored on: `"1"` when present, else the first
/// node without incoming edges, else the first node.
pub fn start_node(graph: &GraphState) -> Option<&str> {
    if graph.contains_node(START_NODE_ID) {
        return Some(START_NODE_ID);
    }
    let targets: HashSet<&str> = graph.edges.iter().map(|e| e.target.as_str()).collect();
    graph
        .nodes
        .iter()
        .find(|n| !targets.contains(n.id.as_str()))
        .or_else(|| graph.nodes.first())
        .map(|n| n.id.as_str())
}

/// Every node reachable from `start` over outgoing edges, never traversing
/// past `merge`. The merge node itself is part of the result only when
/// `include_merge` is set.
pub fn nodes_in_block(
    graph: &GraphState,
    start: &str,
    merge: Option<&str>,
    include_merge: bool,
) -> HashSet<NodeId> {
    let mut block = HashSet::new();
    let mut queue = VecDeque::from([start.to_string()]);
    let mut steps = 0;

    while let Some(id) = queue.pop_front() {
        steps += 1;
        if steps > MAX_TRAVERSAL_STEPS {
            warn!(start, "Block traversal hit the iteration cap");
            break;
        }
        if !graph.contains_node(&id) || !block.insert(id.clone()) {
            continue;
        }
        if merge == Some(id.as_str()) {
            continue;
        }
        for edge in graph.outgoing(&id) {
            if !block.contains(&edge.target) {
                queue.push_back(edge.target.clone());
            }
        }
    }

    if let Some(merge) = merge {
        if !include_merge {
            block.remove(merge);
        }
    }
    block
}

/// Find the node where all branches of the branching node `start`
/// reconverge.
///
/// Depth-first walk carrying a nesting balance: it starts at 1 for `start`,
/// every merge candidate closes one level and every nested branching node
/// opens one. The first node that brings the balance back to zero closes the
/// block.
pub fn find_merge_node_for_block(graph: &GraphState, start: &str) -> Option<NodeId> {
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut stack: Vec<(&str, i32)> = graph
        .outgoing(start)
        .map(|e| (e.target.as_str(), 1))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let mut steps = 0;

    while let Some((id, mut balance)) = stack.pop() {
        steps += 1;
        if steps > MAX_TRAVERSAL_STEPS {
            warn!(start, "Merge-node search hit the iteration cap");
            return None;
        }
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = graph.find_node(id) else {
            continue;
        };

        if is_merge_candidate(graph, id) {
            balance -= 1;
            if balance == 0 {
                return Some(id.to_string());
            }
        }
        if node.is_branching() {
            balance += 1;
        }

        let children: Vec<&str> = graph.outgoing(id).map(|e| e.target.as_str()).collect();
        for child in children.into_iter().rev() {
            if !visited.contains(child) {
                stack.push((child, balance));
            }
        }
    }
    None
}

/// Inverse of [`find_merge_node_for_block`]: walk parents of `merge` with the
/// mirrored balance to find the branching node that owns it.
pub fn find_block_starter(graph: &GraphState, merge: &str) -> Option<NodeId> {
    let mut visited: HashSet<&str> = HashSet::from([merge]);
    let mut stack: Vec<(&str, i32)> = graph
        .incoming(merge)
        .map(|e| (e.source.as_str(), 1))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let mut steps = 0;

    while let Some((id, mut balance)) = stack.pop() {
        steps += 1;
        if steps > MAX_TRAVERSAL_STEPS {
            warn!(merge, "Block-starter search hit the iteration cap");
            return None;
        }
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = graph.find_node(id) else {
            continue;
        };

        if node.is_branching() {
            balance -= 1;
            if balance == 0 {
                return Some(id.to_string());
            }
        }
        if is_merge_candidate(graph, id) {
            balance += 1;
        }

        let parents: Vec<&str> = graph.incoming(id).map(|e| e.source.as_str()).collect();
        for parent in parents.into_iter().rev() {
            if !visited.contains(parent) {
                stack.push((parent, balance));
            }
        }
    }
    None
}

/// Follow the first branch edge of `node_id` and return the first merge
/// candidate on that path. Nested branching nodes are stepped over through
/// their own merge node.
pub fn find_merge_node_deep(graph: &GraphState, node_id: &str) -> Option<NodeId> {
    let first = graph.outgoing(node_id).next()?;
    let mut current = first.target.clone();
    let mut inside_nested_merge = false;
    let mut visited: HashSet<NodeId> = HashSet::from([node_id.to_string()]);

    for _ in 0..MAX_TRAVERSAL_STEPS {
        if !visited.insert(current.clone()) {
            return None;
        }
        let node = graph.find_node(&current)?;

        if !inside_nested_merge && is_merge_candidate(graph, &current) {
            return Some(current);
        }
        if node.is_branching() {
            current = cached_merge_node(graph, &current)
                .or_else(|| find_merge_node_for_block(graph, &current))?;
            inside_nested_merge = true;
            continue;
        }

        inside_nested_merge = false;
        let next = graph.outgoing(&current).next()?.target.clone();
        current = next;
    }
    warn!(node_id, "Deep merge-node search hit the iteration cap");
    None
}

/// The node's cached `merge_node_id`, if it still names a node reachable
/// from `node_id`.
pub fn cached_merge_node(graph: &GraphState, node_id: &str) -> Option<NodeId> {
    let cached = graph.find_node(node_id)?.data.merge_node_id.clone()?;
    if !graph.contains_node(&cached) {
        return None;
    }
    nodes_in_block(graph, node_id, Some(&cached), true)
        .contains(&cached)
        .then_some(cached)
}

/// Merge node of a branching node: the cached id when trustworthy, else the
/// deep search along its first branch.
pub fn resolve_merge_node(graph: &GraphState, node_id: &str) -> Option<NodeId> {
    cached_merge_node(graph, node_id).or_else(|| find_merge_node_deep(graph, node_id))
}

/// Kahn topological order. Nodes caught in a cycle are appended at the end
/// in their original order.
pub fn topological_order(graph: &GraphState) -> Vec<NodeId> {
    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &graph.edges {
        if graph.contains_node(&edge.source) {
            if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
                *d += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(graph.nodes.len());
    let mut placed: HashSet<&str> = HashSet::new();

    while let Some(id) = queue.pop_front() {
        if !placed.insert(id) {
            continue;
        }
        order.push(id.to_string());
        for edge in graph.outgoing(id) {
            if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
                *d = d.saturating_sub(1);
                if *d == 0 {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
    }

    for node in &graph.nodes {
        if !placed.contains(node.id.as_str()) {
            order.push(node.id.clone());
        }
    }
    order
}

/// Return a node that lies on a directed cycle, if any.
pub fn find_cycle(graph: &GraphState) -> Option<NodeId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for root in &graph.nodes {
        if marks.contains_key(root.id.as_str()) {
            continue;
        }
        // (node, index of next outgoing edge to explore)
        let mut stack: Vec<(&str, usize)> = vec![(root.id.as_str(), 0)];
        marks.insert(root.id.as_str(), Mark::Active);

        while let Some((id, next)) = stack.last().copied() {
            let child = graph.outgoing(id).nth(next).map(|e| e.target.as_str());
            match child {
                Some(child) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(child) {
                        Some(Mark::Active) => return Some(child.to_string()),
                        Some(Mark::Done) => {}
                        None => {
                            if graph.contains_node(child) {
                                marks.insert(child, Mark::Active);
                                stack.push((child, 0));
                            }
                        }
                    }
                }
                None => {
                    marks.insert(id, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    None
}
