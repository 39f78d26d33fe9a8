//! Run audit: one JSON record per `campaign run`, plus JSON export of result types.

pub mod logger;

pub use logger::RunRecorder;

use crate::campaign::CampaignSummary;
use crate::config::CampaignSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings a run was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub project_dir: PathBuf,
    pub auto_rollback: bool,
    pub continue_on_failure: bool,
    pub production: bool,
    pub batch_interval_ms: u64,
    /// Phase ids selected for this run, in order.
    pub phases: Vec<String>,
}

impl RunConfig {
    pub fn from_settings(project_dir: &Path, settings: &CampaignSettings, phases: Vec<String>) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            auto_rollback: settings.auto_rollback,
            continue_on_failure: settings.continue_on_failure,
            production: settings.production,
            batch_interval_ms: settings.batch_interval.as_millis() as u64,
            phases,
        }
    }
}

/// What lands in `current-run.json` and `runs/<timestamp>_<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRun {
    pub config: RunConfig,
    #[serde(flatten)]
    pub summary: CampaignSummary,
}

/// Write any result type (`PhaseResult`, `BatchProcessingResult`, `CampaignSummary`, ...) as
/// pretty JSON.
pub fn export_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
