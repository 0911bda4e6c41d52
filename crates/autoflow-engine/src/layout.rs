//! Top-down tree layout for workflow graphs.
//!
//! The graph is cut into a tree by ignoring every edge that enters a merge
//! node. The tree hanging off the start node is laid out first; each merge
//! node is then stitched in below its deepest parent, centred on its parents,
//! with its own subtree laid out locally around it. Positions are top-left
//! corners.

use crate::config::LayoutConfig;
use autoflow_core::query::{
    find_merge_node_for_block, is_merge_candidate, nodes_in_block, resolve_merge_node, start_node,
    topological_order,
};
use autoflow_core::{BranchHandle, Edge, GraphState, NodeId, NodeKind, Position};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

type Positions = HashMap<NodeId, (f64, f64)>;

/// Compute positions for every node reachable from the start node and
/// return the graph with them applied. Nodes that cannot be reached keep
/// their current position.
pub fn layout(graph: &GraphState, config: &LayoutConfig) -> GraphState {
    let Some(root) = start_node(graph) else {
        return graph.clone();
    };
    let mut ctx = LayoutContext::new(graph, config);
    let mut positions = Positions::new();

    ctx.place(root, 0.0, 0.0, &mut positions);
    if let Some(&(x, _)) = positions.get(root) {
        let dx = config.root_x - x;
        for (px, _) in positions.values_mut() {
            *px += dx;
        }
    }

    let order = topological_order(graph);
    ctx.stitch_merges(&order, &mut positions);
    let bypass = ctx.loop_bypasses(&order, &positions);

    let mut next = graph.clone();
    for node in &mut next.nodes {
        if let Some(&(x, y)) = positions.get(&node.id) {
            node.position = Position::new(x, y + config.vertical_offset);
        }
        if let Some(&bypass_x) = bypass.get(&node.id) {
            node.data.bypass_x = Some(bypass_x);
        }
    }

    debug!(
        nodes = graph.nodes.len(),
        positioned = positions.len(),
        "Layout complete"
    );
    next
}

struct LayoutContext<'a> {
    graph: &'a GraphState,
    config: &'a LayoutConfig,
    merges: HashSet<&'a str>,
    widths: HashMap<&'a str, f64>,
    visiting: HashSet<&'a str>,
}

impl<'a> LayoutContext<'a> {
    fn new(graph: &'a GraphState, config: &'a LayoutConfig) -> Self {
        let merges = graph
            .nodes
            .iter()
            .filter(|n| is_merge_candidate(graph, &n.id))
            .map(|n| n.id.as_str())
            .collect();
        Self {
            graph,
            config,
            merges,
            widths: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    fn is_merge(&self, id: &str) -> bool {
        self.merges.contains(id)
    }

    fn is_loop(&self, id: &str) -> bool {
        self.graph
            .find_node(id)
            .is_some_and(|n| n.kind == NodeKind::Loop)
    }

    fn merge_of(&self, id: &str) -> Option<&'a str> {
        let merge = resolve_merge_node(self.graph, id)
            .or_else(|| find_merge_node_for_block(self.graph, id))?;
        self.graph.find_node(&merge).map(|n| n.id.as_str())
    }

    /// Outgoing edges of `id` in drawing order, left to right.
    fn sorted_edges(&self, id: &str) -> Vec<&'a Edge> {
        let graph = self.graph;
        let mut edges: Vec<&'a Edge> = graph
            .edges
            .iter()
            .filter(|e| e.source == id && graph.contains_node(&e.target))
            .collect();
        let Some(node) = graph.find_node(id) else {
            return edges;
        };
        match node.kind {
            NodeKind::Condition => edges.sort_by(|a, b| condition_order(a, b)),
            NodeKind::Parallel => {
                let declared = node.data.branches.as_deref().unwrap_or_default();
                edges.sort_by_key(|e| {
                    let slot = e
                        .branch_label()
                        .and_then(|l| declared.iter().position(|d| *d == l))
                        .unwrap_or(usize::MAX);
                    (slot, e.branch_index.unwrap_or(usize::MAX))
                });
            }
            NodeKind::Loop => edges.sort_by_key(|e| match e.handle {
                Some(BranchHandle::LoopOutput) => 0,
                Some(BranchHandle::LoopBypass) => 2,
                _ => 1,
            }),
            _ => {}
        }
        edges
    }

    /// Horizontal slots a node spreads its children over. A branch that runs
    /// straight into the merge node still reserves an empty slot.
    fn slots(&self, id: &str) -> Vec<Option<&'a str>> {
        let branch_list = self
            .graph
            .find_node(id)
            .is_some_and(|n| n.kind.has_branch_list());
        let mut seen = HashSet::new();
        self.sorted_edges(id)
            .into_iter()
            .filter_map(|e| {
                let target = e.target.as_str();
                if self.is_merge(target) {
                    branch_list.then_some(None)
                } else {
                    seen.insert(target).then_some(Some(target))
                }
            })
            .collect()
    }

    fn slot_width(&mut self, slot: Option<&'a str>) -> f64 {
        match slot {
            Some(child) => self.width(child),
            None => self.config.unit_width(),
        }
    }

    fn width(&mut self, id: &'a str) -> f64 {
        if let Some(&width) = self.widths.get(id) {
            return width;
        }
        let unit = self.config.unit_width();
        if !self.visiting.insert(id) {
            return unit;
        }

        let slots = self.slots(id);
        let mut width = if slots.is_empty() { unit } else { 0.0 };
        for slot in slots {
            width += self.slot_width(slot);
        }
        if self.is_loop(id) {
            width += self.config.loop_padding;
        }
        let branching = self.graph.find_node(id).is_some_and(|n| n.is_branching());
        if branching {
            if let Some(merge) = self.merge_of(id) {
                width = width.max(self.width(merge));
            }
        }

        self.visiting.remove(id);
        self.widths.insert(id, width);
        width
    }

    /// Position `id` centred over the range `[left, left + width)` and its
    /// children in consecutive slots one rank below.
    fn place(&mut self, id: &'a str, left: f64, y: f64, out: &mut Positions) {
        if out.contains_key(id) {
            return;
        }
        let width = self.width(id);
        let padding = if self.is_loop(id) {
            self.config.loop_padding
        } else {
            0.0
        };
        let content_left = left + padding;
        let content_width = width - padding;
        let center = content_left + content_width / 2.0;
        out.insert(id.to_string(), (center - self.config.node_width / 2.0, y));

        let slots = self.slots(id);
        let mut widths = Vec::with_capacity(slots.len());
        for slot in &slots {
            widths.push(self.slot_width(*slot));
        }
        let total: f64 = widths.iter().sum();
        let mut cursor = content_left + (content_width - total) / 2.0;
        for (slot, slot_width) in slots.into_iter().zip(widths) {
            if let Some(child) = slot {
                self.place(child, cursor, y + self.config.rank_spacing, out);
            }
            cursor += slot_width;
        }
    }

    /// Place every merge node below its deepest positioned parent, centred on
    /// its parents, and lay out its subtree around it. Merge nodes whose
    /// parents have no position stay unplaced.
    fn stitch_merges(&mut self, order: &[NodeId], positions: &mut Positions) {
        let graph = self.graph;
        for id in order {
            let Some(node) = graph.find_node(id) else {
                continue;
            };
            let id = node.id.as_str();
            if !self.is_merge(id) || positions.contains_key(id) {
                continue;
            }
            let parents: Vec<(f64, f64)> = graph
                .incoming(id)
                .filter_map(|e| positions.get(&e.source).copied())
                .collect();
            if parents.is_empty() {
                continue;
            }
            let x = parents.iter().map(|(x, _)| x).sum::<f64>() / parents.len() as f64;
            let y = parents
                .iter()
                .map(|(_, y)| *y)
                .fold(f64::NEG_INFINITY, f64::max)
                + self.config.rank_spacing;

            let mut local = Positions::new();
            self.place(id, 0.0, 0.0, &mut local);
            let Some(&(local_x, local_y)) = local.get(id) else {
                continue;
            };
            let (dx, dy) = (x - local_x, y - local_y);
            for (node_id, (lx, ly)) in local {
                positions.entry(node_id).or_insert((lx + dx, ly + dy));
            }
        }
    }

    /// Nesting depth of loop `id`: 1, plus the depth of the deepest loop
    /// inside its body.
    fn loop_depth(&self, id: &str, depths: &mut HashMap<NodeId, usize>) -> usize {
        if let Some(&depth) = depths.get(id) {
            return depth;
        }
        // Provisional entry so a malformed cyclic body terminates.
        depths.insert(id.to_string(), 1);
        let merge = self.merge_of(id);
        let inner = nodes_in_block(self.graph, id, merge, false)
            .into_iter()
            .filter(|member| member != id && self.is_loop(member))
            .map(|member| self.loop_depth(&member, depths))
            .max()
            .unwrap_or(0);
        depths.insert(id.to_string(), inner + 1);
        inner + 1
    }

    /// Left x of each loop's bypass connector: one padding step per nesting
    /// level left of every node in the loop body, and at least one step
    /// clear of any nested loop's bypass.
    fn loop_bypasses(&self, order: &[NodeId], positions: &Positions) -> HashMap<NodeId, f64> {
        let mut bypass: HashMap<NodeId, f64> = HashMap::new();
        let mut depths: HashMap<NodeId, usize> = HashMap::new();
        let padding = self.config.loop_padding;
        for id in order.iter().rev() {
            if !self.is_loop(id) {
                continue;
            }
            let Some(&(head_x, _)) = positions.get(id) else {
                continue;
            };
            let depth = self.loop_depth(id, &mut depths);
            let mut body_x = head_x;
            let mut inner_x = f64::INFINITY;
            let merge = self.merge_of(id);
            for member in nodes_in_block(self.graph, id, merge, false) {
                if let Some(&(x, _)) = positions.get(&member) {
                    body_x = body_x.min(x);
                }
                if member != *id {
                    if let Some(&inner) = bypass.get(&member) {
                        inner_x = inner_x.min(inner);
                    }
                }
            }
            let x = (body_x - padding * depth as f64).min(inner_x - padding);
            bypass.insert(id.clone(), x);
        }
        bypass
    }
}

/// `If` first, `Else` last, `Else If` branches by index in between.
fn condition_order(a: &Edge, b: &Edge) -> Ordering {
    let rank = |e: &Edge| match e.handle {
        Some(BranchHandle::True) => 0,
        Some(BranchHandle::False) => 2,
        _ => 1,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| {
            a.branch_index
                .unwrap_or(usize::MAX)
                .cmp(&b.branch_index.unwrap_or(usize::MAX))
        })
        .then_with(|| a.branch_label().cmp(&b.branch_label()))
}
