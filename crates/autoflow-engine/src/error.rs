use autoflow_core::{NodeKind, ValidationError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Edge {0} not found")]
    EdgeNotFound(String),

    #[error("Node {0} is not a placeholder")]
    NotAPlaceholder(String),

    #[error("Node {0} has no branch list")]
    NotABranchingNode(String),

    #[error("Branch index {index} is out of range for node {node}")]
    BranchIndexOutOfRange { node: String, index: usize },

    #[error("Branch {index} of node {node} is protected")]
    ProtectedBranch { node: String, index: usize },

    #[error("Cannot turn node {node} from {from} into {to}")]
    UnsupportedSwap {
        node: String,
        from: NodeKind,
        to: NodeKind,
    },

    #[error("A {kind} node cannot be placed at node {node}")]
    UnsupportedInsert { node: String, kind: NodeKind },

    #[error("Operation would introduce a cycle through node {0}")]
    CycleIntroduced(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
