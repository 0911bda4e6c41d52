//! Editor session: the single owner of the workflow being edited.
//!
//! Every edit computes a new graph from the current snapshot and replaces it
//! wholesale. After a structural change the graph is swept, laid out and
//! handed to the auto-saver.

use crate::MutationError;
use crate::autosave::AutoSaver;
use crate::branch_edit::{insert_branch, remove_branch, rename_branch};
use crate::config::EditorConfig;
use crate::integrity::sweep;
use crate::layout::layout;
use crate::mutation::{
    InsertTarget, NewNode, delete_node, ensure_acyclic, insert_node, swap_node,
};
use crate::reconcile::reconcile_branches;
use autoflow_core::runtime::{ExecutionEvent, apply_execution_event, clear_execution_state};
use autoflow_core::{
    BranchHandle, GraphState, NodeId, NodeKind, ValidationError, Workflow, parse_branch_list,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub struct EditorSession {
    workflow: Workflow,
    selected_node_id: Option<NodeId>,
    config: EditorConfig,
    autosaver: Option<AutoSaver>,
}

impl EditorSession {
    pub fn new(workflow: Workflow, config: EditorConfig) -> Self {
        info!(workflow_id = %workflow.id, name = %workflow.name, "Editor session opened");
        Self {
            workflow,
            selected_node_id: None,
            config,
            autosaver: None,
        }
    }

    pub fn with_autosaver(mut self, autosaver: AutoSaver) -> Self {
        self.autosaver = Some(autosaver);
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn graph(&self) -> &GraphState {
        &self.workflow.graph
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn selected_node_id(&self) -> Option<&str> {
        self.selected_node_id.as_deref()
    }

    /// Select a node. Unknown ids clear the selection.
    pub fn select(&mut self, node_id: Option<&str>) {
        self.selected_node_id = node_id
            .filter(|id| self.workflow.graph.contains_node(id))
            .map(str::to_string);
    }

    pub fn insert(&mut self, target: InsertTarget, new: NewNode) -> Result<(), MutationError> {
        let next = insert_node(self.graph(), target, new)?;
        self.commit(next);
        Ok(())
    }

    pub fn delete(&mut self, node_id: &str) -> Result<(), MutationError> {
        let next = delete_node(self.graph(), node_id)?;
        self.commit(next);
        Ok(())
    }

    pub fn swap(&mut self, node_id: &str, replacement: NewNode) -> Result<(), MutationError> {
        let next = swap_node(self.graph(), node_id, replacement)?;
        self.commit(next);
        Ok(())
    }

    /// Replace a condition or parallel node's branch list.
    pub fn set_branches(&mut self, node_id: &str, names: &[String]) -> Result<(), MutationError> {
        let node = self
            .graph()
            .find_node(node_id)
            .ok_or_else(|| MutationError::NodeNotFound(node_id.to_string()))?;
        if !node.kind.has_branch_list() {
            return Err(MutationError::NotABranchingNode(node_id.to_string()));
        }
        if node.kind == NodeKind::Parallel {
            if let Some(name) = names.iter().find(|n| BranchHandle::is_reserved_name(n)) {
                return Err(ValidationError::ReservedBranchName(name.trim().to_string()).into());
            }
        }
        let outcome = reconcile_branches(self.graph(), node_id, names);
        ensure_acyclic(&outcome.graph)?;
        self.commit(outcome.graph);
        Ok(())
    }

    /// Parse a user-entered branch list, then apply it.
    pub fn set_branches_from_input(
        &mut self,
        node_id: &str,
        input: &str,
    ) -> Result<(), MutationError> {
        let names = parse_branch_list(input)?;
        self.set_branches(node_id, &names)
    }

    pub fn insert_branch(
        &mut self,
        node_id: &str,
        index: usize,
        name: &str,
    ) -> Result<(), MutationError> {
        let next = insert_branch(self.graph(), node_id, index, name)?;
        self.commit(next);
        Ok(())
    }

    pub fn remove_branch(&mut self, node_id: &str, index: usize) -> Result<(), MutationError> {
        let next = remove_branch(self.graph(), node_id, index)?;
        self.commit(next);
        Ok(())
    }

    pub fn rename_branch(
        &mut self,
        node_id: &str,
        index: usize,
        name: &str,
    ) -> Result<(), MutationError> {
        let next = rename_branch(self.graph(), node_id, index, name)?;
        self.commit(next);
        Ok(())
    }

    /// Replace a node's parameters. Topology is untouched, so no sweep or
    /// layout runs.
    pub fn update_params(
        &mut self,
        node_id: &str,
        params: Map<String, Value>,
    ) -> Result<(), MutationError> {
        let mut next = self.graph().clone();
        let node = next
            .find_node_mut(node_id)
            .ok_or_else(|| MutationError::NodeNotFound(node_id.to_string()))?;
        node.data.params = params;
        self.workflow.graph = next;
        self.schedule_save();
        Ok(())
    }

    /// Merge a runtime status update. Status is transient and is not saved.
    pub fn apply_execution_event(&mut self, event: &ExecutionEvent) {
        self.workflow.graph = apply_execution_event(self.graph(), event);
    }

    pub fn clear_execution_state(&mut self) {
        self.workflow.graph = clear_execution_state(self.graph());
    }

    /// Adopt an externally produced graph, e.g. one loaded from disk.
    pub fn replace_graph(&mut self, graph: GraphState) {
        self.commit(graph);
    }

    fn commit(&mut self, next: GraphState) {
        let current = self.graph();
        let mut next = next;
        if next.nodes.len() != current.nodes.len() || next.edges.len() != current.edges.len() {
            let outcome = sweep(&next);
            if outcome.repaired() {
                warn!(
                    pruned_edges = outcome.pruned_edges,
                    reconciled = outcome.reconciled_nodes.len(),
                    "Integrity sweep repaired the graph"
                );
            }
            next = outcome.graph;
        }
        self.workflow.graph = layout(&next, &self.config.layout);

        if let Some(selected) = &self.selected_node_id {
            if !self.workflow.graph.contains_node(selected) {
                debug!(node_id = %selected, "Selected node removed");
                self.selected_node_id = None;
            }
        }
        self.schedule_save();
    }

    fn schedule_save(&self) {
        if let Some(autosaver) = &self.autosaver {
            autosaver.schedule(self.workflow.clone());
        }
    }

    /// Close the session, flushing any pending save.
    pub async fn close(self) -> Workflow {
        let EditorSession {
            workflow, autosaver, ..
        } = self;
        if let Some(autosaver) = autosaver {
            autosaver.shutdown().await;
        }
        info!(workflow_id = %workflow.id, "Editor session closed");
        workflow
    }
}
