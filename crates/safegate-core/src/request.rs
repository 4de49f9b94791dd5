//! Action metadata recognised by the gate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Typed view of the metadata a caller attaches to an action.
///
/// Unknown keys are ignored so callers can pass richer maps through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(default)]
    pub requires_network: bool,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    #[serde(default)]
    pub target_paths: Vec<PathBuf>,
    #[serde(default)]
    pub estimated_cost_usd: f64,
    #[serde(default = "default_true")]
    pub modifies_workspace: bool,
}

impl Default for ActionMetadata {
    fn default() -> Self {
        Self {
            requires_network: false,
            requires_confirmation: false,
            target_path: None,
            target_paths: Vec::new(),
            estimated_cost_usd: 0.0,
            modifies_workspace: true,
        }
    }
}

impl ActionMetadata {
    /// Decode metadata from a JSON value. `null` yields the defaults.
    pub fn from_json(value: &serde_json::Value) -> serde_json::Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }

    pub fn with_target_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn with_estimated_cost(mut self, usd: f64) -> Self {
        self.estimated_cost_usd = usd;
        self
    }

    /// Paths to back up before a mutating action: `target_paths` followed by
    /// `target_path`.
    pub fn checkpoint_candidates(&self) -> Vec<PathBuf> {
        let mut paths = self.target_paths.clone();
        if let Some(p) = &self.target_path {
            paths.push(p.clone());
        }
        paths
    }
}
