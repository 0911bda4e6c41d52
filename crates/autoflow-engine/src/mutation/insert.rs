use super::{ensure_acyclic, fill_placeholder_role};
use crate::MutationError;
use crate::reconcile::{branch_handle_for, normalize_branch_names};
use autoflow_core::{
    BranchHandle, Edge, EdgeId, GraphState, Node, NodeId, NodeKind, NodeRole, START_NODE_ID,
    ValidationError,
};
use serde_json::{Map, Value};
use tracing::debug;

/// Where a new node goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertTarget {
    /// Split an existing edge.
    Edge(EdgeId),
    /// Fill a placeholder node in place.
    Placeholder(NodeId),
}

/// Content of a node about to be inserted or swapped in.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub kind: NodeKind,
    pub label: String,
    pub params: Map<String, Value>,
    /// Initial branch names for condition and parallel nodes. `None` or an
    /// empty list selects the kind's defaults.
    pub branches: Option<Vec<String>>,
}

impl NewNode {
    pub fn new(kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            params: Map::new(),
            branches: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_branches(mut self, branches: Vec<String>) -> Self {
        self.branches = Some(branches);
        self
    }

    fn into_node(self) -> Node {
        let mut node = Node::new(self.kind, self.label);
        node.data.params = self.params;
        node
    }
}

pub fn insert_node(
    graph: &GraphState,
    target: InsertTarget,
    new: NewNode,
) -> Result<GraphState, MutationError> {
    if new.kind == NodeKind::Parallel {
        let mut names = new.branches.iter().flatten();
        if let Some(name) = names.find(|n| BranchHandle::is_reserved_name(n)) {
            return Err(ValidationError::ReservedBranchName(name.trim().to_string()).into());
        }
    }
    let next = match target {
        InsertTarget::Edge(edge_id) => insert_on_edge(graph, &edge_id, new)?,
        InsertTarget::Placeholder(node_id) => insert_at_placeholder(graph, &node_id, new)?,
    };
    ensure_acyclic(&next)?;
    Ok(next)
}

fn insert_on_edge(
    graph: &GraphState,
    edge_id: &str,
    new: NewNode,
) -> Result<GraphState, MutationError> {
    let edge = graph
        .find_edge(edge_id)
        .ok_or_else(|| MutationError::EdgeNotFound(edge_id.to_string()))?
        .clone();
    let position = graph
        .find_node(&edge.target)
        .map(|n| n.position)
        .unwrap_or_default();

    let mut next = graph.clone();
    next.remove_edge(edge_id);

    let kind = new.kind;
    let branches = new.branches.clone();
    let mut node = new.into_node();
    node.position = position;
    let node_id = next.add_node(node);
    next.add_edge(edge.rewired(&edge.source, &node_id));

    if kind.is_branching() {
        let merge = attach_block(&mut next, &node_id, kind, branches);
        next.connect(&merge, &edge.target);
    } else {
        next.connect(&node_id, &edge.target);
    }

    debug!(edge_id, node_id = %node_id, %kind, "Inserted node on edge");
    Ok(next)
}

fn insert_at_placeholder(
    graph: &GraphState,
    node_id: &str,
    new: NewNode,
) -> Result<GraphState, MutationError> {
    let existing = graph
        .find_node(node_id)
        .ok_or_else(|| MutationError::NodeNotFound(node_id.to_string()))?;
    if !existing.is_placeholder() {
        return Err(MutationError::NotAPlaceholder(node_id.to_string()));
    }
    if node_id == START_NODE_ID && new.kind.is_branching() {
        return Err(MutationError::UnsupportedInsert {
            node: node_id.to_string(),
            kind: new.kind,
        });
    }

    let mut next = graph.clone();
    let kind = new.kind;
    let branches = new.branches.clone();

    // Downstream edges move below the new block's merge node.
    let downstream: Vec<Edge> = if kind.is_branching() {
        let edges: Vec<Edge> = graph.outgoing(node_id).cloned().collect();
        next.edges.retain(|e| e.source != node_id);
        edges
    } else {
        Vec::new()
    };

    if let Some(node) = next.find_node_mut(node_id) {
        node.kind = kind;
        node.data.label = new.label;
        node.data.params = new.params;
        fill_placeholder_role(node);
    }

    if kind.is_branching() {
        let merge = attach_block(&mut next, node_id, kind, branches);
        for edge in &downstream {
            next.add_edge(edge.rewired(&merge, &edge.target));
        }
    }

    debug!(node_id, %kind, "Filled placeholder");
    Ok(next)
}

/// Create the merge placeholder and initial branches of the branching node
/// `head`. Returns the merge node id.
fn attach_block(
    graph: &mut GraphState,
    head: &str,
    kind: NodeKind,
    branches: Option<Vec<String>>,
) -> NodeId {
    let position = graph.find_node(head).map(|n| n.position).unwrap_or_default();
    let mut merge = Node::placeholder(NodeRole::MergePlaceholder);
    merge.position = position;
    let merge_id = graph.add_node(merge);

    let mut names = None;
    if kind == NodeKind::Loop {
        let mut body = Node::placeholder(NodeRole::Placeholder);
        body.position = position;
        let body_id = graph.add_node(body);
        graph.add_edge(Edge::branch(head, &body_id, BranchHandle::LoopOutput, None, None));
        graph.connect(&body_id, &merge_id);
        graph.add_edge(Edge::branch(head, &merge_id, BranchHandle::LoopBypass, None, None));
    } else {
        let requested = branches
            .filter(|b| !b.is_empty())
            .or_else(|| kind.default_branches())
            .unwrap_or_default();
        let normalized = normalize_branch_names(kind, &requested);
        for (index, name) in normalized.iter().enumerate() {
            let mut placeholder = Node::branch_placeholder(name.clone());
            placeholder.position = position;
            let placeholder_id = graph.add_node(placeholder);
            graph.add_edge(Edge::branch(
                head,
                &placeholder_id,
                branch_handle_for(kind, name),
                Some(index),
                Some(name.clone()),
            ));
            graph.connect(&placeholder_id, &merge_id);
        }
        names = Some(normalized);
    }

    if let Some(node) = graph.find_node_mut(head) {
        node.data.merge_node_id = Some(merge_id.clone());
        node.data.branches = names;
    }
    merge_id
}
