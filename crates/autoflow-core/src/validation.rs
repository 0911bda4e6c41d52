use crate::query::find_cycle;
use crate::{BranchHandle, GraphState, NodeKind};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Workflow has no nodes")]
    NoNodes,

    #[error("Duplicate node id {0}")]
    DuplicateNodeId(String),

    #[error("Edge {edge} references missing node {missing}")]
    OrphanEdge { edge: String, missing: String },

    #[error("Cycle detected through node {0}")]
    CycleDetected(String),

    #[error("Node {node} declares {declared} branches but has {actual} branch edges")]
    BranchCountMismatch {
        node: String,
        declared: usize,
        actual: usize,
    },

    #[error("Loop node {0} has no bypass edge")]
    MissingBypass(String),

    #[error("Branch list is invalid: {0}")]
    InvalidBranchList(String),

    #[error("Branch {index} has an empty name")]
    EmptyBranchName { index: usize },

    #[error("Branch name '{0}' is used more than once")]
    DuplicateBranchName(String),

    #[error("Branch name '{0}' is reserved")]
    ReservedBranchName(String),
}

/// Check the structural invariants of a graph, stopping at the first
/// violation.
pub fn validate_graph(graph: &GraphState) -> Result<(), ValidationError> {
    match graph_issues(graph).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Collect every structural violation in a graph.
pub fn graph_issues(graph: &GraphState) -> Vec<ValidationError> {
    let mut issues = Vec::new();
    if graph.nodes.is_empty() {
        issues.push(ValidationError::NoNodes);
        return issues;
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            issues.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for edge in &graph.edges {
        for end in [&edge.source, &edge.target] {
            if !seen.contains(end.as_str()) {
                issues.push(ValidationError::OrphanEdge {
                    edge: edge.id.clone(),
                    missing: end.clone(),
                });
            }
        }
    }

    if let Some(node) = find_cycle(graph) {
        issues.push(ValidationError::CycleDetected(node));
    }

    for node in &graph.nodes {
        match node.kind {
            NodeKind::Condition | NodeKind::Parallel => {
                let Some(declared) = &node.data.branches else {
                    continue;
                };
                let actual = graph
                    .outgoing(&node.id)
                    .filter(|e| !e.handle.as_ref().is_some_and(BranchHandle::is_structural))
                    .count();
                if actual != declared.len() {
                    issues.push(ValidationError::BranchCountMismatch {
                        node: node.id.clone(),
                        declared: declared.len(),
                        actual,
                    });
                }
            }
            NodeKind::Loop => {
                let has_bypass = graph
                    .outgoing(&node.id)
                    .any(|e| e.handle == Some(BranchHandle::LoopBypass));
                if !has_bypass {
                    issues.push(ValidationError::MissingBypass(node.id.clone()));
                }
            }
            _ => {}
        }
    }

    issues
}

/// Parse a user-entered branch list.
///
/// Accepts a JSON string array (`["A", "B"]`) or a comma/newline separated
/// list (`A, B`). Names are trimmed; empty names, names that collide once
/// lower-cased and names that lower-case to a fixed handle (`true`,
/// `loop-bypass`, ...) are rejected, since branch handles are derived from
/// the lower-cased name.
pub fn parse_branch_list(input: &str) -> Result<Vec<String>, ValidationError> {
    let trimmed = input.trim();
    let raw: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| ValidationError::InvalidBranchList(e.to_string()))?
    } else {
        trimmed
            .split([',', '\n'])
            .map(|s| s.to_string())
            .collect()
    };

    if trimmed.is_empty() || raw.is_empty() {
        return Err(ValidationError::InvalidBranchList(
            "at least one branch is required".to_string(),
        ));
    }

    let mut names = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();
    for (index, name) in raw.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyBranchName { index });
        }
        if BranchHandle::is_reserved_name(name) {
            return Err(ValidationError::ReservedBranchName(name.to_string()));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(ValidationError::DuplicateBranchName(name.to_string()));
        }
        names.push(name.to_string());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edge, Node, START_NODE_ID};

    #[test]
    fn valid_linear_graph() {
        let mut g = GraphState::with_trigger_placeholder();
        let a = g.add_node(Node::new(NodeKind::Action, "A"));
        g.connect(START_NODE_ID, &a);
        assert_eq!(validate_graph(&g), Ok(()));
    }

    #[test]
    fn empty_graph_is_rejected() {
        assert_eq!(
            validate_graph(&GraphState::default()),
            Err(ValidationError::NoNodes)
        );
    }

    #[test]
    fn orphan_and_cycle_are_reported() {
        let mut g = GraphState::with_trigger_placeholder();
        let a = g.add_node(Node::new(NodeKind::Action, "A"));
        g.connect(START_NODE_ID, &a);
        g.connect(&a, START_NODE_ID);
        g.add_edge(Edge::new(a.clone(), "ghost"));

        let issues = graph_issues(&g);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationError::OrphanEdge { missing, .. } if missing == "ghost")));
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationError::CycleDetected(_))));
    }

    #[test]
    fn branch_count_mismatch() {
        let mut g = GraphState::with_trigger_placeholder();
        let mut c = Node::new(NodeKind::Condition, "Check");
        c.data.branches = Some(vec!["If".into(), "Else".into()]);
        let c = g.add_node(c);
        let a = g.add_node(Node::new(NodeKind::Action, "A"));
        g.connect(START_NODE_ID, &c);
        g.add_edge(Edge::branch(c.clone(), a, BranchHandle::True, Some(0), None));

        assert_eq!(
            validate_graph(&g),
            Err(ValidationError::BranchCountMismatch {
                node: c,
                declared: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn parses_comma_list() {
        assert_eq!(
            parse_branch_list(" Fetch , Notify\nArchive "),
            Ok(vec!["Fetch".into(), "Notify".into(), "Archive".into()])
        );
    }

    #[test]
    fn parses_json_list() {
        assert_eq!(
            parse_branch_list(r#"["A", "B"]"#),
            Ok(vec!["A".into(), "B".into()])
        );
    }

    #[test]
    fn rejects_malformed_lists() {
        assert!(matches!(
            parse_branch_list(r#"["A", 3]"#),
            Err(ValidationError::InvalidBranchList(_))
        ));
        assert_eq!(
            parse_branch_list("A,,B"),
            Err(ValidationError::EmptyBranchName { index: 1 })
        );
        assert_eq!(
            parse_branch_list("Retry, retry"),
            Err(ValidationError::DuplicateBranchName("retry".into()))
        );
        assert!(matches!(
            parse_branch_list("   "),
            Err(ValidationError::InvalidBranchList(_))
        ));
    }

    #[test]
    fn rejects_names_that_read_back_as_fixed_handles() {
        assert_eq!(
            parse_branch_list("Fetch, True"),
            Err(ValidationError::ReservedBranchName("True".into()))
        );
        assert_eq!(
            parse_branch_list(r#"["Loop-Bypass"]"#),
            Err(ValidationError::ReservedBranchName("Loop-Bypass".into()))
        );
        assert_eq!(
            parse_branch_list(" parallel-output "),
            Err(ValidationError::ReservedBranchName("parallel-output".into()))
        );
        assert_eq!(
            parse_branch_list("Truthy, Falsey"),
            Ok(vec!["Truthy".into(), "Falsey".into()])
        );
    }

    #[test]
    fn collapsed_parallel_output_is_not_a_branch() {
        let mut g = GraphState::with_trigger_placeholder();
        let mut p = Node::new(NodeKind::Parallel, "Fan Out");
        p.data.branches = Some(Vec::new());
        let p = g.add_node(p);
        let m = g.add_node(Node::new(NodeKind::Action, "Join"));
        g.connect(START_NODE_ID, &p);
        g.add_edge(Edge::branch(p, m, BranchHandle::ParallelOutput, None, None));
        assert_eq!(validate_graph(&g), Ok(()));
    }
}
