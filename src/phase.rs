//! Campaign phase definitions and JSON loading.
//!
//! This module provides:
//! - `CampaignPhase`: one ordered unit of campaign work with its tools and success criteria
//! - `ToolConfiguration`: how to invoke one external transformation tool
//! - `SuccessCriterion`: a parsed `"<metric> <op> <number>"` threshold
//! - `PhasesFile`: the `.campaign/phases.json` format
//!
//! Phases are immutable after load; the executor only ever borrows them.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

/// How conservatively the safety validator treats a tool's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyLevel {
    Maximum,
    #[default]
    High,
    Medium,
    Low,
}

impl SafetyLevel {
    /// Whether a compile check runs after every batch of this tool.
    pub fn compile_after_each_batch(self) -> bool {
        matches!(self, SafetyLevel::Maximum | SafetyLevel::High)
    }

    /// Whether the tool must report a safety score at all.
    pub fn requires_score(self) -> bool {
        self == SafetyLevel::Maximum
    }

    /// Minimum acceptable tool safety score for this level, given the configured floor.
    pub fn score_floor(self, minimum_safety_score: f64) -> Option<f64> {
        match self {
            SafetyLevel::Maximum | SafetyLevel::High => Some(minimum_safety_score),
            SafetyLevel::Medium => Some((minimum_safety_score - 0.1).max(0.0)),
            SafetyLevel::Low => None,
        }
    }
}

impl std::fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyLevel::Maximum => write!(f, "MAXIMUM"),
            SafetyLevel::High => write!(f, "HIGH"),
            SafetyLevel::Medium => write!(f, "MEDIUM"),
            SafetyLevel::Low => write!(f, "LOW"),
        }
    }
}

/// Named parameters passed to a transformation tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// `--max-files=<N>`; batch orchestration overrides this with the batch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub auto_fix: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub validate_safety: bool,
    /// Additional `--key=value` flags, emitted in key order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// One external transformation tool within a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfiguration {
    /// Display name used in logs and results.
    pub name: String,
    /// Shell command that launches the tool (e.g. `node scripts/remove-unused.js`).
    pub command: String,
    #[serde(default)]
    pub parameters: ToolParameters,
    #[serde(default)]
    pub safety_level: SafetyLevel,
    /// Expected wall-clock; the hard timeout is twice this.
    #[serde(default = "default_estimated_duration_secs")]
    pub estimated_duration_secs: u64,
    /// Files per batch; `None` runs the tool once over everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Glob (relative to the project) whose match count sizes batching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_glob: Option<String>,
    /// Explicit unit count; wins over `target_glob`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_units: Option<usize>,
}

fn default_estimated_duration_secs() -> u64 {
    60
}

impl ToolConfiguration {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            parameters: ToolParameters::default(),
            safety_level: SafetyLevel::default(),
            estimated_duration_secs: default_estimated_duration_secs(),
            batch_size: None,
            target_glob: None,
            total_units: None,
        }
    }

    pub fn with_batching(mut self, batch_size: usize, total_units: usize) -> Self {
        self.batch_size = Some(batch_size);
        self.total_units = Some(total_units);
        self
    }

    pub fn with_safety_level(mut self, level: SafetyLevel) -> Self {
        self.safety_level = level;
        self
    }

    /// Hard timeout for one invocation: twice the estimated duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.estimated_duration_secs.max(1).saturating_mul(2))
    }

    /// Deterministic argument list for this configuration.
    ///
    /// Order: mode flag, `--max-files`, `--validate-safety`, then extras by key.
    /// `dry_run` wins over `auto_fix`.
    pub fn build_args(&self) -> Vec<String> {
        let p = &self.parameters;
        let mut args = Vec::new();
        if p.dry_run {
            args.push("--dry-run".to_string());
        } else if p.auto_fix {
            args.push("--auto-fix".to_string());
        }
        if let Some(n) = p.max_files {
            args.push(format!("--max-files={}", n));
        }
        if p.validate_safety {
            args.push("--validate-safety".to_string());
        }
        for (key, value) in &p.extra {
            if value.is_empty() {
                args.push(format!("--{}", key));
            } else {
                args.push(format!("--{}={}", key, value));
            }
        }
        args
    }

    /// Copy of this configuration scoped to one batch.
    pub fn for_batch(&self, batch_size: usize) -> Self {
        let mut scoped = self.clone();
        scoped.parameters.max_files = Some(batch_size);
        scoped
    }
}

/// A tracked metric dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Errors,
    Warnings,
    BuildTime,
    Custom(String),
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Errors => write!(f, "errorCount"),
            Metric::Warnings => write!(f, "warningCount"),
            Metric::BuildTime => write!(f, "buildTime"),
            Metric::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("custom:") {
            if name.is_empty() {
                anyhow::bail!("Custom metric name must not be empty");
            }
            return Ok(Metric::Custom(name.to_string()));
        }
        match s {
            "errorCount" | "errors" | "error_count" => Ok(Metric::Errors),
            "warningCount" | "warnings" | "warning_count" => Ok(Metric::Warnings),
            "buildTime" | "build_time" => Ok(Metric::BuildTime),
            _ => anyhow::bail!(
                "Unknown metric '{}'. Valid: errorCount, warningCount, buildTime, custom:<name>",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
}

impl Comparison {
    pub fn holds(self, current: f64, threshold: f64) -> bool {
        match self {
            Comparison::Eq => (current - threshold).abs() < f64::EPSILON,
            Comparison::Le => current <= threshold,
            Comparison::Lt => current < threshold,
            Comparison::Ge => current >= threshold,
            Comparison::Gt => current > threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Le => "<=",
            Comparison::Lt => "<",
            Comparison::Ge => ">=",
            Comparison::Gt => ">",
        }
    }
}

static CRITERION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][\w:\-\.]*)\s*(==|<=|>=|<|>)\s*(-?\d+(?:\.\d+)?)\s*(ms|s)?\s*$")
        .unwrap()
});

/// A named threshold evaluated against a metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CriterionSpec", into = "CriterionSpec")]
pub struct SuccessCriterion {
    pub metric: Metric,
    pub comparison: Comparison,
    /// Threshold in the metric's unit (seconds for build time).
    pub threshold: f64,
    /// Hard criteria block completion; soft ones only warn.
    pub hard: bool,
    expr: String,
}

impl SuccessCriterion {
    /// Parse `"errorCount == 0"`, `"buildTime <= 10s"`, `"custom:anyTypes < 50"`.
    ///
    /// Equality defaults to hard, comparisons to soft.
    pub fn parse(expr: &str) -> Result<Self> {
        let caps = CRITERION_REGEX
            .captures(expr)
            .ok_or_else(|| anyhow!("Invalid success criterion '{}'", expr))?;
        let metric: Metric = caps[1].parse()?;
        let comparison = match &caps[2] {
            "==" => Comparison::Eq,
            "<=" => Comparison::Le,
            ">=" => Comparison::Ge,
            "<" => Comparison::Lt,
            _ => Comparison::Gt,
        };
        let mut threshold: f64 = caps[3]
            .parse()
            .with_context(|| format!("Invalid threshold in '{}'", expr))?;
        if caps.get(4).map(|m| m.as_str()) == Some("ms") {
            threshold /= 1000.0;
        }
        Ok(Self {
            metric,
            hard: comparison == Comparison::Eq,
            comparison,
            threshold,
            expr: expr.trim().to_string(),
        })
    }

    pub fn with_hard(mut self, hard: bool) -> Self {
        self.hard = hard;
        self
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn is_met(&self, current: f64) -> bool {
        self.comparison.holds(current, self.threshold)
    }
}

/// Wire form of a criterion: a bare expression or an expression with an explicit severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum CriterionSpec {
    Expr(String),
    Detailed {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hard: Option<bool>,
    },
}

impl TryFrom<CriterionSpec> for SuccessCriterion {
    type Error = anyhow::Error;

    fn try_from(spec: CriterionSpec) -> Result<Self> {
        match spec {
            CriterionSpec::Expr(expr) => SuccessCriterion::parse(&expr),
            CriterionSpec::Detailed { expr, hard } => {
                let criterion = SuccessCriterion::parse(&expr)?;
                Ok(match hard {
                    Some(hard) => criterion.with_hard(hard),
                    None => criterion,
                })
            }
        }
    }
}

impl From<SuccessCriterion> for CriterionSpec {
    fn from(c: SuccessCriterion) -> Self {
        let default_hard = c.comparison == Comparison::Eq;
        if c.hard == default_hard {
            CriterionSpec::Expr(c.expr)
        } else {
            CriterionSpec::Detailed {
                expr: c.expr,
                hard: Some(c.hard),
            }
        }
    }
}

/// Operator guidance attached to validation results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextSteps {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,
}

/// One named, ordered unit of campaign work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPhase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tools in execution order.
    #[serde(default)]
    pub tools: Vec<ToolConfiguration>,
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    /// Checkpoint labels. The first labels the phase-start checkpoint (the rollback target);
    /// label `i` (i >= 1) is taken before tool `i`.
    #[serde(default)]
    pub checkpoints: Vec<String>,
    #[serde(default)]
    pub next_steps: NextSteps,
}

impl CampaignPhase {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            tools: Vec::new(),
            success_criteria: Vec::new(),
            checkpoints: Vec::new(),
            next_steps: NextSteps::default(),
        }
    }

    pub fn with_tool(mut self, tool: ToolConfiguration) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a criterion from an expression. Panics on an invalid expression; meant for literals.
    pub fn with_criterion(mut self, expr: &str) -> Self {
        match SuccessCriterion::parse(expr) {
            Ok(c) => self.success_criteria.push(c),
            Err(e) => panic!("invalid criterion literal: {}", e),
        }
        self
    }

    /// Label of the phase-start checkpoint.
    pub fn start_checkpoint_label(&self) -> String {
        self.checkpoints
            .first()
            .cloned()
            .unwrap_or_else(|| format!("{}-start", self.id))
    }

    /// Label of the checkpoint to take before tool `index`, if one is declared.
    pub fn tool_checkpoint_label(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.checkpoints.get(index).map(String::as_str)
    }

    /// Metric dimensions this phase declares criteria on, in first-seen order.
    pub fn declared_metrics(&self) -> Vec<Metric> {
        let mut seen = HashSet::new();
        self.success_criteria
            .iter()
            .filter(|c| seen.insert(c.metric.clone()))
            .map(|c| c.metric.clone())
            .collect()
    }
}

/// The `.campaign/phases.json` file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    pub phases: Vec<CampaignPhase>,
}

impl PhasesFile {
    /// Load phases from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        let phases_file: PhasesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))?;

        Ok(phases_file)
    }

    /// Save phases to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;

        Ok(())
    }

    /// Phases from `start` (inclusive) onwards, in declaration order.
    pub fn phases_from(&self, start: &str) -> Option<&[CampaignPhase]> {
        let idx = self.phases.iter().position(|p| p.id == start)?;
        Some(&self.phases[idx..])
    }

    /// Structural problems that make the campaign unrunnable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut ids = HashSet::new();
        for phase in &self.phases {
            if phase.id.trim().is_empty() {
                problems.push(format!("Phase '{}' has an empty id", phase.name));
            }
            if !ids.insert(phase.id.as_str()) {
                problems.push(format!("Duplicate phase id '{}'", phase.id));
            }
            if phase.tools.is_empty() {
                problems.push(format!("Phase '{}' declares no tools", phase.id));
            }
            for tool in &phase.tools {
                if tool.command.trim().is_empty() {
                    problems.push(format!(
                        "Tool '{}' in phase '{}' has an empty command",
                        tool.name, phase.id
                    ));
                }
                if tool.batch_size == Some(0) {
                    problems.push(format!(
                        "Tool '{}' in phase '{}' has batch_size 0",
                        tool.name, phase.id
                    ));
                }
            }
        }
        problems
    }
}

/// Example campaign written by `campaign init`.
pub fn example_phases() -> PhasesFile {
    let mut removal = ToolConfiguration::new("remove-unused", "node scripts/remove-unused-vars.js");
    removal.parameters.auto_fix = true;
    removal.parameters.validate_safety = true;
    removal.batch_size = Some(15);
    removal.target_glob = Some("src/**/*.ts".to_string());
    removal.safety_level = SafetyLevel::Maximum;

    let mut lint = ToolConfiguration::new("lint-autofix", "yarn lint --fix");
    lint.safety_level = SafetyLevel::Medium;
    lint.estimated_duration_secs = 180;

    let mut first = CampaignPhase::new("phase-1", "Compilation errors")
        .with_tool(removal)
        .with_criterion("errorCount == 0")
        .with_criterion("buildTime <= 10s");
    first.description = "Eliminate compiler errors without breaking the build".to_string();
    first.checkpoints = vec!["phase-1-start".to_string()];

    let mut second = CampaignPhase::new("phase-2", "Linting warnings")
        .with_tool(lint)
        .with_criterion("warningCount <= 100");
    second.description = "Reduce linter warnings below the agreed ceiling".to_string();

    PhasesFile {
        generated_at: Some(chrono::Utc::now().to_rfc3339()),
        phases: vec![first, second],
    }
}
