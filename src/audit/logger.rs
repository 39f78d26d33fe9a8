use super::{CampaignRun, RunConfig};
use crate::campaign::CampaignSummary;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Persists the in-progress run after every phase and the finished run once at the end.
pub struct RunRecorder {
    audit_dir: PathBuf,
    current_run: Option<CampaignRun>,
    current_run_file: PathBuf,
}

impl RunRecorder {
    pub fn new(audit_dir: &Path) -> Self {
        let current_run_file = audit_dir.join("current-run.json");
        Self {
            audit_dir: audit_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, config: RunConfig, summary: &CampaignSummary) -> Result<()> {
        self.current_run = Some(CampaignRun {
            config,
            summary: summary.clone(),
        });
        self.save_current()
    }

    /// Replace the current run's summary and rewrite `current-run.json`.
    ///
    /// Errors when no run is active so phase data is never dropped silently.
    pub fn update(&mut self, summary: &CampaignSummary) -> Result<()> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("update called with no active run"))?;
        run.summary = summary.clone();
        self.save_current()
    }

    pub fn finish_run(&mut self, summary: &CampaignSummary) -> Result<PathBuf> {
        let mut run = self
            .current_run
            .take()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;
        run.summary = summary.clone();

        let filename = format!(
            "{}_{}.json",
            run.summary.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.summary.run_id.to_string()[..8]
        );
        let runs_dir = self.audit_dir.join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create runs directory")?;
        let run_file = runs_dir.join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize campaign run")?;
        fs::write(&run_file, json).context("Failed to write campaign run file")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current_run {
            fs::create_dir_all(&self.audit_dir).context("Failed to create audit directory")?;
            let json =
                serde_json::to_string_pretty(run).context("Failed to serialize current run")?;
            fs::write(&self.current_run_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }

    /// Load an interrupted run left behind by a crashed process.
    pub fn load_current(&mut self) -> Result<bool> {
        if self.current_run_file.exists() {
            let content = fs::read_to_string(&self.current_run_file)
                .context("Failed to read current run file")?;
            let run: CampaignRun =
                serde_json::from_str(&content).context("Failed to parse current run file")?;
            self.current_run = Some(run);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn current_run(&self) -> Option<&CampaignRun> {
        self.current_run.as_ref()
    }

    /// Finished run files, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.audit_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();

        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<CampaignRun> {
        let content = fs::read_to_string(path).context("Failed to read campaign run file")?;
        serde_json::from_str(&content).context("Failed to parse campaign run file")
    }

    pub fn latest_run(&self) -> Result<Option<CampaignRun>> {
        match self.list_runs()?.first() {
            Some(path) => self.load_run(path).map(Some),
            None => Ok(None),
        }
    }
}
