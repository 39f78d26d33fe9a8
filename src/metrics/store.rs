//! Persisted metrics: baseline, bounded snapshot history and last validation per phase.

use super::MetricsSnapshot;
use crate::milestone::ValidationResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<MetricsSnapshot>,
    #[serde(default)]
    pub history: Vec<MetricsSnapshot>,
    #[serde(default)]
    pub validations: BTreeMap<String, ValidationResult>,
}

impl MetricsStore {
    /// Load the store, or an empty one when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read metrics file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse metrics file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize metrics")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write metrics file: {}", path.display()))
    }

    /// Keep `snapshot` as the baseline unless one already exists. Returns the baseline.
    pub fn ensure_baseline(&mut self, snapshot: &MetricsSnapshot) -> &MetricsSnapshot {
        self.baseline.get_or_insert_with(|| snapshot.clone())
    }

    pub fn reset_baseline(&mut self, snapshot: Option<MetricsSnapshot>) {
        self.baseline = snapshot;
    }

    pub fn record_snapshot(&mut self, snapshot: MetricsSnapshot) {
        self.history.push(snapshot);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    pub fn record_validation(&mut self, phase_id: &str, validation: ValidationResult) {
        self.validations.insert(phase_id.to_string(), validation);
    }

    pub fn latest(&self) -> Option<&MetricsSnapshot> {
        self.history.last()
    }
}
