use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

use crate::condition::BranchConfig;
use crate::runtime::NodeStatus;

pub type NodeId = String;
pub type EdgeId = String;

/// Id of the trigger node every workflow is anchored on.
pub const START_NODE_ID: &str = "1";
pub const TRIGGER_PLACEHOLDER_LABEL: &str = "Select Trigger";
pub const ACTION_PLACEHOLDER_LABEL: &str = "Add Action";

/// Persisted workflow snapshot. The engine itself works on [`GraphState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub graph: GraphState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "New Workflow".to_string(),
            graph: GraphState::with_trigger_placeholder(),
            saved_at: None,
        }
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Immutable-by-convention graph value passed into and returned from every
/// engine operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<BranchHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Plain linear edge with a fresh id.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: new_id(),
            source: source.into(),
            target: target.into(),
            handle: None,
            branch_index: None,
            label: None,
        }
    }

    /// Edge leaving a branching node through one of its branch handles.
    pub fn branch(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        handle: BranchHandle,
        branch_index: Option<usize>,
        label: Option<String>,
    ) -> Self {
        Self {
            handle: Some(handle),
            branch_index,
            label,
            ..Self::new(source, target)
        }
    }

    /// Copy of this edge's branch identity (handle, index, label) onto a new
    /// source/target pair.
    pub fn rewired(&self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: new_id(),
            source: source.into(),
            target: target.into(),
            handle: self.handle.clone(),
            branch_index: self.branch_index,
            label: self.label.clone(),
        }
    }

    /// Branch name this edge represents: explicit label first, then the
    /// canonical label implied by the handle.
    pub fn branch_label(&self) -> Option<Cow<'_, str>> {
        if let Some(label) = &self.label {
            return Some(Cow::Borrowed(label.as_str()));
        }
        self.handle
            .as_ref()
            .and_then(|h| h.default_label())
            .map(Cow::Borrowed)
    }
}

/// Mint a fresh node or edge id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Node kinds and structural roles
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Action,
    /// Trigger-like custom node; the start node is one of these.
    Custom,
    Condition,
    Parallel,
    Loop,
    Wait,
    End,
}

impl NodeKind {
    /// Condition, parallel and loop nodes open a block that closes at a
    /// merge node.
    pub fn is_branching(&self) -> bool {
        matches!(self, NodeKind::Condition | NodeKind::Parallel | NodeKind::Loop)
    }

    /// Kinds whose branches are described by a declared name list.
    pub fn has_branch_list(&self) -> bool {
        matches!(self, NodeKind::Condition | NodeKind::Parallel)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NodeKind::Action => "Action",
            NodeKind::Custom => "Trigger",
            NodeKind::Condition => "Condition",
            NodeKind::Parallel => "Parallel",
            NodeKind::Loop => "Loop",
            NodeKind::Wait => "Wait",
            NodeKind::End => "End",
        }
    }

    /// Branch names a freshly inserted node of this kind starts with.
    pub fn default_branches(&self) -> Option<Vec<String>> {
        match self {
            NodeKind::Condition => Some(vec!["If".to_string(), "Else".to_string()]),
            NodeKind::Parallel => Some(vec!["Branch 1".to_string(), "Branch 2".to_string()]),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Structural role of a node in the graph, independent of its kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Action,
    Placeholder,
    BranchPlaceholder,
    MergePlaceholder,
    /// A configured node that also serves as a convergence point.
    MergeNode,
}

impl NodeRole {
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            NodeRole::Placeholder | NodeRole::BranchPlaceholder | NodeRole::MergePlaceholder
        )
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, NodeRole::MergePlaceholder | NodeRole::MergeNode)
    }
}

// =============================================================================
// Branch handles
// =============================================================================

/// Identifies which output of a branching node an edge leaves through.
///
/// Serialized as the string handles the rendering layer understands:
/// `"true"`, `"false"`, `"loop-output"`, `"loop-bypass"`, `"parallel-output"`
/// or a lower-cased branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BranchHandle {
    True,
    False,
    Branch(String),
    LoopOutput,
    LoopBypass,
    ParallelOutput,
}

impl BranchHandle {
    /// Handle for the condition branch with canonical label `label`.
    pub fn for_condition(label: &str) -> Self {
        match label {
            "If" => BranchHandle::True,
            "Else" => BranchHandle::False,
            other => BranchHandle::Branch(other.to_lowercase()),
        }
    }

    /// Handle for a named parallel branch.
    pub fn for_parallel(name: &str) -> Self {
        BranchHandle::Branch(name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        match self {
            BranchHandle::True => "true",
            BranchHandle::False => "false",
            BranchHandle::Branch(name) => name,
            BranchHandle::LoopOutput => "loop-output",
            BranchHandle::LoopBypass => "loop-bypass",
            BranchHandle::ParallelOutput => "parallel-output",
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, BranchHandle::LoopOutput | BranchHandle::LoopBypass)
    }

    /// Handles that wire a block together instead of naming one of its
    /// branches.
    pub fn is_structural(&self) -> bool {
        self.is_loop() || *self == BranchHandle::ParallelOutput
    }

    /// A parallel branch called `name` would read back as a fixed handle
    /// after a save and reload.
    pub fn is_reserved_name(name: &str) -> bool {
        !matches!(
            BranchHandle::from(name.trim().to_lowercase()),
            BranchHandle::Branch(_)
        )
    }

    fn default_label(&self) -> Option<&'static str> {
        match self {
            BranchHandle::True => Some("If"),
            BranchHandle::False => Some("Else"),
            _ => None,
        }
    }
}

impl From<String> for BranchHandle {
    fn from(value: String) -> Self {
        match value.as_str() {
            "true" => BranchHandle::True,
            "false" => BranchHandle::False,
            "loop-output" => BranchHandle::LoopOutput,
            "loop-bypass" => BranchHandle::LoopBypass,
            "parallel-output" => BranchHandle::ParallelOutput,
            _ => BranchHandle::Branch(value),
        }
    }
}

impl From<BranchHandle> for String {
    fn from(value: BranchHandle) -> Self {
        match value {
            BranchHandle::Branch(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for BranchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Node data
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub label: String,
    #[serde(default)]
    pub role: NodeRole,
    /// Cached id of the merge node closing this node's block. A hint only;
    /// it can go stale and is re-derived by traversal when it does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_config: Option<BranchConfig>,
    /// Branch name shown on a branch placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_label: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Left x of a loop's bypass connector, written by the layout engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_x: Option<f64>,
}

impl Node {
    pub fn new(kind: NodeKind, label: impl Into<String>) -> Self {
        Self::with_id(new_id(), kind, label)
    }

    pub fn with_id(id: impl Into<NodeId>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            position: Position::default(),
            data: NodeData {
                label: label.into(),
                ..Default::default()
            },
        }
    }

    /// Empty slot awaiting an action.
    pub fn placeholder(role: NodeRole) -> Self {
        let mut node = Self::new(NodeKind::Action, ACTION_PLACEHOLDER_LABEL);
        node.data.role = role;
        node
    }

    /// Placeholder sitting at the head of a named branch.
    pub fn branch_placeholder(branch_name: impl Into<String>) -> Self {
        let mut node = Self::placeholder(NodeRole::BranchPlaceholder);
        node.data.sub_label = Some(branch_name.into());
        node
    }

    /// The start node in its unconfigured state.
    pub fn trigger_placeholder() -> Self {
        let mut node = Self::with_id(START_NODE_ID, NodeKind::Custom, TRIGGER_PLACEHOLDER_LABEL);
        node.data.role = NodeRole::Placeholder;
        node
    }

    pub fn is_placeholder(&self) -> bool {
        self.data.role.is_placeholder()
    }

    pub fn is_branching(&self) -> bool {
        self.kind.is_branching()
    }

    pub fn label(&self) -> &str {
        &self.data.label
    }
}

// =============================================================================
// Graph accessors
// =============================================================================

impl GraphState {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// A graph holding only the unconfigured start node.
    pub fn with_trigger_placeholder() -> Self {
        Self {
            nodes: vec![Node::trigger_placeholder()],
            edges: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn find_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn find_edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn add_edge(&mut self, edge: Edge) -> EdgeId {
        let id = edge.id.clone();
        self.edges.push(edge);
        id
    }

    /// Connect two nodes with a plain linear edge.
    pub fn connect(&mut self, source: &str, target: &str) -> EdgeId {
        self.add_edge(Edge::new(source, target))
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) {
        self.nodes.retain(|n| n.id != id);
        self.edges.retain(|e| e.source != id && e.target != id);
    }

    pub fn remove_edge(&mut self, id: &str) {
        self.edges.retain(|e| e.id != id);
    }

    /// Edges leaving `id`. The yielded edges borrow the graph only, so they
    /// outlive the id they were looked up with.
    pub fn outgoing<'a, 'id>(
        &'a self,
        id: &'id str,
    ) -> impl Iterator<Item = &'a Edge> + use<'a, 'id> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn incoming<'a, 'id>(
        &'a self,
        id: &'id str,
    ) -> impl Iterator<Item = &'a Edge> + use<'a, 'id> {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn incoming_count(&self, id: &str) -> usize {
        self.incoming(id).count()
    }

    /// Drop edges whose source or target no longer exists.
    /// Returns the number of edges removed.
    pub fn prune_orphan_edges(&mut self) -> usize {
        let ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();
        let before = self.edges.len();
        let kept: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
            .cloned()
            .collect();
        self.edges = kept;
        before - self.edges.len()
    }

    /// Edges whose source or target is missing from the node list.
    pub fn orphan_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| !self.contains_node(&e.source) || !self.contains_node(&e.target))
            .collect()
    }
}
