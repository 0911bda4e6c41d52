use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::Workflow;

/// Persistence collaborator: stores and returns whole workflow snapshots.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save(&self, workflow: &Workflow) -> Result<()>;
    async fn load(&self, id: Uuid) -> Result<Workflow>;
}

/// File name component for a workflow name: its ASCII alphanumeric runs,
/// lower-cased and joined by single dashes. `unnamed` when none are left.
pub fn sanitize_name(name: &str) -> String {
    let slug = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Stores each workflow as one JSON file.
///
/// Layout:
/// ```text
/// <base>/
///   <sanitized_name>_<short_id>.json
/// ```
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Deterministic path for a workflow's snapshot file.
    pub fn path_for(&self, workflow: &Workflow) -> PathBuf {
        self.base_path.join(format!(
            "{}_{}.json",
            sanitize_name(&workflow.name),
            short_id(workflow.id)
        ))
    }

    /// Files whose name carries this workflow's short id.
    fn files_for(&self, id: Uuid) -> Result<Vec<PathBuf>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let suffix = format!("_{}.json", short_id(id));
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.base_path).context("Failed to read workflow directory")? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix));
            if matches {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Write a snapshot, stamping `saved_at`. A previous file for the same
    /// workflow under an older name is removed.
    pub fn save_sync(&self, workflow: &Workflow) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.base_path).context("Failed to create workflow directory")?;

        let mut snapshot = workflow.clone();
        snapshot.saved_at = Some(Utc::now());
        let path = self.path_for(&snapshot);

        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize workflow")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).context("Failed to write workflow snapshot")?;
        std::fs::rename(&tmp, &path).context("Failed to move workflow snapshot into place")?;

        for stale in self.files_for(workflow.id)? {
            if stale != path {
                debug!(path = %stale.display(), "Removing snapshot saved under an old name");
                std::fs::remove_file(&stale).context("Failed to remove stale snapshot")?;
            }
        }
        Ok(path)
    }

    pub fn load_sync(&self, id: Uuid) -> Result<Workflow> {
        for path in self.files_for(id)? {
            let workflow = read_workflow(&path)?;
            if workflow.id == id {
                return Ok(workflow);
            }
        }
        anyhow::bail!("Workflow {} not found in {}", id, self.base_path.display())
    }

    /// Every workflow in the store, ordered by name.
    pub fn list(&self) -> Result<Vec<Workflow>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut workflows = Vec::new();
        for entry in std::fs::read_dir(&self.base_path).context("Failed to read workflow directory")? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                workflows.push(read_workflow(&path)?);
            }
        }
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn save(&self, workflow: &Workflow) -> Result<()> {
        self.save_sync(workflow).map(|_| ())
    }

    async fn load(&self, id: Uuid) -> Result<Workflow> {
        self.load_sync(id)
    }
}

/// Read a workflow snapshot from a JSON file.
pub fn read_workflow(path: &Path) -> Result<Workflow> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write a workflow snapshot to an explicit path.
pub fn write_workflow(path: &Path, workflow: &Workflow) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create directory")?;
        }
    }
    let json = serde_json::to_string_pretty(workflow).context("Failed to serialize workflow")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
