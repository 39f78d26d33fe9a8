use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::campaign_config::{CampaignToml, CommandsSection, EventsSection};
use crate::safety::SafetyThresholds;

pub const CAMPAIGN_DIR: &str = ".campaign";

/// Project paths plus the parsed campaign.toml.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub campaign_dir: PathBuf,
    pub toml: CampaignToml,
}

impl Config {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let campaign_dir = project_dir.join(CAMPAIGN_DIR);
        let toml = CampaignToml::load_or_default(&campaign_dir)?;
        Ok(Self {
            project_dir,
            campaign_dir,
            toml,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.phases_file().exists()
    }

    pub fn config_file(&self) -> PathBuf {
        self.campaign_dir.join("campaign.toml")
    }

    pub fn phases_file(&self) -> PathBuf {
        self.campaign_dir.join("phases.json")
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.campaign_dir.join("metrics.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.campaign_dir.join("state")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.campaign_dir.join("audit")
    }

    pub fn events_file(&self) -> PathBuf {
        self.audit_dir().join("events.jsonl")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.audit_dir().join("runs"))
            .context("Failed to create audit directory")?;
        // Keep campaign state out of working-tree snapshots.
        let ignore = self.campaign_dir.join(".gitignore");
        if !ignore.exists() {
            std::fs::write(&ignore, "*\n").context("Failed to write .campaign/.gitignore")?;
        }
        Ok(())
    }

    /// Resolve settings from the file and the process environment.
    pub fn settings(&self) -> CampaignSettingsBuilder {
        CampaignSettings::builder()
            .with_toml(&self.toml)
            .with_env(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Fully resolved runtime settings (file -> environment -> CLI).
#[derive(Debug, Clone)]
pub struct CampaignSettings {
    pub auto_rollback: bool,
    pub continue_on_failure: bool,
    pub batch_interval: Duration,
    pub production: bool,
    pub validate_build_after_tool: bool,
    pub run_tests: bool,
    pub thresholds: SafetyThresholds,
    pub commands: CommandsSection,
    pub events: EventsSection,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CampaignSettings {
    pub fn builder() -> CampaignSettingsBuilder {
        CampaignSettingsBuilder::default()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CampaignSettingsBuilder {
    toml: CampaignToml,
    auto_rollback: Option<bool>,
    continue_on_failure: Option<bool>,
    batch_interval: Option<Duration>,
}

impl CampaignSettingsBuilder {
    pub fn with_toml(mut self, toml: &CampaignToml) -> Self {
        self.toml = toml.clone();
        self
    }

    /// Apply `CAMPAIGN_AUTO_ROLLBACK` and `CAMPAIGN_BATCH_INTERVAL_MS` from `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("CAMPAIGN_AUTO_ROLLBACK") {
            let value = value.trim().to_ascii_lowercase();
            self.auto_rollback = Some(!matches!(value.as_str(), "false" | "0" | "no" | "off"));
        }
        if let Some(value) = lookup("CAMPAIGN_BATCH_INTERVAL_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.batch_interval = Some(Duration::from_millis(ms)),
                Err(_) => tracing::warn!(value = %value, "ignoring invalid CAMPAIGN_BATCH_INTERVAL_MS"),
            }
        }
        self
    }

    pub fn auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = Some(enabled);
        self
    }

    pub fn continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = Some(enabled);
        self
    }

    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = Some(interval);
        self
    }

    pub fn build(self) -> CampaignSettings {
        let toml = self.toml;
        CampaignSettings {
            auto_rollback: self.auto_rollback.unwrap_or(toml.campaign.auto_rollback),
            continue_on_failure: self
                .continue_on_failure
                .unwrap_or(toml.campaign.continue_on_failure),
            batch_interval: self
                .batch_interval
                .unwrap_or(Duration::from_millis(toml.campaign.batch_interval_ms)),
            production: toml.campaign.production,
            validate_build_after_tool: toml.safety.validate_build_after_tool,
            run_tests: toml.safety.run_tests,
            thresholds: SafetyThresholds {
                minimum_safety_score: toml.safety.minimum_safety_score,
                maximum_error_count: toml.safety.maximum_error_count,
                maximum_build_time: Duration::from_secs_f64(
                    toml.safety.maximum_build_time_secs.max(0.0),
                ),
            },
            commands: toml.commands,
            events: toml.events,
        }
    }
}
