//! `.campaign/campaign.toml` configuration.
//!
//! ```toml
//! [campaign]
//! name = "strict-types"
//! auto_rollback = true
//! continue_on_failure = false
//! batch_interval_ms = 2000
//! production = true
//!
//! [safety]
//! minimum_safety_score = 0.7
//! maximum_error_count = 0
//! maximum_build_time_secs = 30
//! validate_build_after_tool = true
//! run_tests = false
//!
//! [commands]
//! compile = "npx tsc --noEmit"
//! build = "yarn build"
//! test = "yarn test --run"
//! timeout_secs = 300
//!
//! [metrics]
//! errors = { command = "npx tsc --noEmit", pattern = "error TS\\d+" }
//! warnings = { command = "npx eslint . -f unix", pattern = "\\[Warning/" }
//! build_time = "yarn build"
//!
//! [metrics.custom]
//! anyTypes = "grep -rc ': any' src | awk -F: '{s+=$2} END {print s}'"
//!
//! [events]
//! capacity = 1000
//! retain = 500
//! persist = true
//! ```

use crate::events::{DEFAULT_CAPACITY, DEFAULT_RETAIN};
use crate::metrics::MetricsCommands;
use crate::phase::{Metric, PhasesFile};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `[campaign]`: run-level behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Restore the phase checkpoint when validation fails.
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    /// Keep going after a failed or rolled-back phase.
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Pause between batches.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Require a verified checkpoint before any automatic restore.
    #[serde(default = "default_true")]
    pub production: bool,
}

fn default_true() -> bool {
    true
}

fn default_batch_interval_ms() -> u64 {
    2000
}

impl Default for CampaignSection {
    fn default() -> Self {
        Self {
            name: None,
            auto_rollback: true,
            continue_on_failure: false,
            batch_interval_ms: default_batch_interval_ms(),
            production: true,
        }
    }
}

/// `[safety]`: thresholds and gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySection {
    #[serde(default = "default_minimum_safety_score")]
    pub minimum_safety_score: f64,
    /// Errors tolerated above the phase baseline after a tool runs.
    #[serde(default)]
    pub maximum_error_count: u64,
    #[serde(default = "default_maximum_build_time_secs")]
    pub maximum_build_time_secs: f64,
    #[serde(default = "default_true")]
    pub validate_build_after_tool: bool,
    #[serde(default)]
    pub run_tests: bool,
}

fn default_minimum_safety_score() -> f64 {
    0.7
}

fn default_maximum_build_time_secs() -> f64 {
    30.0
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            minimum_safety_score: default_minimum_safety_score(),
            maximum_error_count: 0,
            maximum_build_time_secs: default_maximum_build_time_secs(),
            validate_build_after_tool: true,
            run_tests: false,
        }
    }
}

/// `[commands]`: compile, build and test commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            compile: None,
            build: None,
            test: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `[events]`: safety event log bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_retain")]
    pub retain: usize,
    #[serde(default = "default_true")]
    pub persist: bool,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_retain() -> usize {
    DEFAULT_RETAIN
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retain: DEFAULT_RETAIN,
            persist: true,
        }
    }
}

/// The complete campaign.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignToml {
    #[serde(default)]
    pub campaign: CampaignSection,
    #[serde(default)]
    pub safety: SafetySection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub metrics: MetricsCommands,
    #[serde(default)]
    pub events: EventsSection,
}

impl CampaignToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse campaign.toml")
    }

    /// Load `<campaign_dir>/campaign.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(campaign_dir: &Path) -> Result<Self> {
        let config_path = campaign_dir.join("campaign.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize campaign.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let score = self.safety.minimum_safety_score;
        if !(0.0..=1.0).contains(&score) {
            warnings.push(format!(
                "minimum_safety_score {} is outside [0, 1]",
                score
            ));
        }
        if self.safety.maximum_build_time_secs <= 0.0 {
            warnings.push("maximum_build_time_secs must be positive".to_string());
        }
        if self.events.retain > self.events.capacity {
            warnings.push(format!(
                "events.retain ({}) exceeds events.capacity ({}); it will be clamped",
                self.events.retain, self.events.capacity
            ));
        }
        if self.events.capacity == 0 {
            warnings.push("events.capacity of 0 is raised to 1".to_string());
        }
        if self.commands.compile.is_none() {
            warnings.push(
                "No [commands].compile configured: compile checks will be skipped".to_string(),
            );
        }
        if self.safety.validate_build_after_tool && self.commands.build.is_none() {
            warnings.push(
                "validate_build_after_tool is set but no [commands].build is configured"
                    .to_string(),
            );
        }
        if self.safety.run_tests && self.commands.test.is_none() {
            warnings.push("run_tests is set but no [commands].test is configured".to_string());
        }

        warnings
    }

    /// Warnings for phases whose criteria reference metrics nothing collects.
    pub fn validate_phases(&self, phases: &PhasesFile) -> Vec<String> {
        let mut warnings = Vec::new();
        for phase in &phases.phases {
            for metric in phase.declared_metrics() {
                let collected = match &metric {
                    Metric::Errors => self.metrics.errors.is_some(),
                    Metric::Warnings => self.metrics.warnings.is_some(),
                    Metric::BuildTime => self.metrics.build_time.is_some(),
                    Metric::Custom(name) => self.metrics.custom.contains_key(name),
                };
                if !collected {
                    warnings.push(format!(
                        "Phase '{}' has criteria on {} but [metrics] does not collect it",
                        phase.id, metric
                    ));
                }
            }
        }
        warnings
    }
}

/// Default campaign.toml written by `campaign init` and `campaign config init`.
pub fn default_config_toml() -> &'static str {
    r#"# Campaign configuration

[campaign]
auto_rollback = true
continue_on_failure = false
batch_interval_ms = 2000
production = true

[safety]
minimum_safety_score = 0.7
maximum_error_count = 0
maximum_build_time_secs = 30
validate_build_after_tool = true
run_tests = false

[commands]
# compile = "npx tsc --noEmit"
# build = "yarn build"
# test = "yarn test --run"
timeout_secs = 300

[metrics]
# errors = { command = "npx tsc --noEmit", pattern = "error TS\\d+" }
# warnings = { command = "npx eslint . -f unix", pattern = "\\[Warning/" }
# build_time = "yarn build"

[events]
capacity = 1000
retain = 500
persist = true
"#
}
