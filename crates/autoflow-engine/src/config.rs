use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Geometry used by the layout engine. All values are canvas units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub node_width: f64,
    pub horizontal_gap: f64,
    /// Vertical distance between a node and its children.
    pub rank_spacing: f64,
    /// Lateral clearance reserved per loop nesting level for bypass lines.
    pub loop_padding: f64,
    /// Fixed x of the start node.
    pub root_x: f64,
    /// Added to every emitted y.
    pub vertical_offset: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_width: 280.0,
            horizontal_gap: 40.0,
            rank_spacing: 150.0,
            loop_padding: 40.0,
            root_x: 210.0,
            vertical_offset: 50.0,
        }
    }
}

impl LayoutConfig {
    /// Horizontal space one node occupies in its row.
    pub fn unit_width(&self) -> f64 {
        self.node_width + self.horizontal_gap
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub layout: LayoutConfig,
    /// Quiet period after the last graph change before a snapshot is saved.
    pub autosave_debounce_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            autosave_debounce_ms: 1500,
        }
    }
}

impl EditorConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}
