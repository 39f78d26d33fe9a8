use super::{MetricsProvider, MetricsSnapshot};
use crate::process::run_shell;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

static NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());

/// A command whose output reduces to one number.
///
/// The plain form takes the last number printed on stdout. The counted form counts output lines
/// matching `pattern` (e.g. `"error TS\\d+"` over `tsc --noEmit`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricCommand {
    Plain(String),
    Counted {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
}

impl MetricCommand {
    pub fn command(&self) -> &str {
        match self {
            MetricCommand::Plain(command) => command,
            MetricCommand::Counted { command, .. } => command,
        }
    }

    fn pattern(&self) -> Option<&str> {
        match self {
            MetricCommand::Plain(_) => None,
            MetricCommand::Counted { pattern, .. } => pattern.as_deref(),
        }
    }
}

/// `[metrics]` section of `campaign.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<MetricCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<MetricCommand>,
    /// Build command timed for `buildTime`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_time: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, MetricCommand>,
}

/// Collects metrics by running the configured shell commands in the project directory.
///
/// An unconfigured dimension reads as zero. A command that cannot run, times out or prints no
/// usable number is a collection failure.
pub struct CommandMetricsProvider {
    project_dir: PathBuf,
    commands: MetricsCommands,
    timeout: Duration,
}

impl CommandMetricsProvider {
    pub fn new(project_dir: &Path, commands: MetricsCommands, timeout: Duration) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            commands,
            timeout,
        }
    }

    async fn measure(&self, name: &str, spec: &MetricCommand) -> Result<f64> {
        let output = run_shell(spec.command(), &[], &self.project_dir, self.timeout)
            .await
            .with_context(|| format!("Metrics command for {} failed", name))?;

        let value = match spec.pattern() {
            Some(pattern) => {
                let regex = Regex::new(pattern)
                    .with_context(|| format!("Invalid pattern for metric {}", name))?;
                output
                    .combined()
                    .lines()
                    .filter(|line| regex.is_match(line))
                    .count() as f64
            }
            None => last_number(&output.stdout).ok_or_else(|| {
                anyhow!(
                    "Metrics command for {} (`{}`) printed no number",
                    name,
                    spec.command()
                )
            })?,
        };

        tracing::debug!(metric = name, value, "metric collected");
        Ok(value)
    }

    async fn count(&self, name: &str, spec: Option<&MetricCommand>) -> Result<u64> {
        match spec {
            Some(spec) => Ok(self.measure(name, spec).await?.max(0.0).round() as u64),
            None => Ok(0),
        }
    }
}

fn last_number(text: &str) -> Option<f64> {
    NUMBER_REGEX
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .last()
}

#[async_trait]
impl MetricsProvider for CommandMetricsProvider {
    async fn collect(&self) -> Result<MetricsSnapshot> {
        let error_count = self
            .count("errorCount", self.commands.errors.as_ref())
            .await?;
        let warning_count = self
            .count("warningCount", self.commands.warnings.as_ref())
            .await?;

        let build_time_secs = match &self.commands.build_time {
            Some(command) => {
                let output = run_shell(command, &[], &self.project_dir, self.timeout)
                    .await
                    .context("Metrics build command failed")?;
                if !output.success() {
                    tracing::warn!(
                        exit_code = ?output.exit_code,
                        "build failed while measuring build time"
                    );
                }
                output.duration.as_secs_f64()
            }
            None => 0.0,
        };

        let mut snapshot = MetricsSnapshot::new(error_count, warning_count, build_time_secs);
        for (name, spec) in &self.commands.custom {
            let value = self.measure(&format!("custom:{}", name), spec).await?;
            snapshot.custom.insert(name.clone(), value);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn provider(dir: &Path, commands: MetricsCommands) -> CommandMetricsProvider {
        CommandMetricsProvider::new(dir, commands, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_unconfigured_metrics_read_zero() {
        let dir = tempdir().unwrap();
        let snapshot = provider(dir.path(), MetricsCommands::default())
            .collect()
            .await
            .unwrap();
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.warning_count, 0);
        assert_eq!(snapshot.build_time_secs, 0.0);
    }

    #[tokio::test]
    async fn test_last_number_and_pattern_counting() {
        let dir = tempdir().unwrap();
        let mut commands = MetricsCommands {
            errors: Some(MetricCommand::Plain("echo 'checked 40 files'; echo 7".into())),
            warnings: Some(MetricCommand::Counted {
                command: "printf 'a.ts: warning x\\nb.ts: ok\\nc.ts: warning y\\n'; exit 1".into(),
                pattern: Some("warning".into()),
            }),
            ..Default::default()
        };
        commands
            .custom
            .insert("anyTypes".into(), MetricCommand::Plain("echo 12.5".into()));

        let snapshot = provider(dir.path(), commands).collect().await.unwrap();
        assert_eq!(snapshot.error_count, 7);
        assert_eq!(snapshot.warning_count, 2);
        assert_eq!(snapshot.custom.get("anyTypes"), Some(&12.5));
    }

    #[tokio::test]
    async fn test_build_time_is_wall_clock() {
        let dir = tempdir().unwrap();
        let commands = MetricsCommands {
            build_time: Some("sleep 0.2".into()),
            ..Default::default()
        };
        let snapshot = provider(dir.path(), commands).collect().await.unwrap();
        assert!(snapshot.build_time_secs >= 0.2);
    }

    #[tokio::test]
    async fn test_missing_number_is_an_error() {
        let dir = tempdir().unwrap();
        let commands = MetricsCommands {
            errors: Some(MetricCommand::Plain("echo none".into())),
            ..Default::default()
        };
        let err = provider(dir.path(), commands).collect().await.unwrap_err();
        assert!(err.to_string().contains("printed no number"));
    }

    #[test]
    fn test_metric_command_toml_forms() {
        let parsed: MetricsCommands = toml::from_str(
            r#"
            errors = { command = "npx tsc --noEmit", pattern = "error TS\\d+" }
            warnings = "npx eslint . -f unix | tail -1"
            build_time = "yarn build"
            [custom]
            anyTypes = "grep -r ': any' src | wc -l"
            "#,
        )
        .unwrap();
        assert!(matches!(parsed.errors, Some(MetricCommand::Counted { .. })));
        assert_eq!(
            parsed.warnings.as_ref().unwrap().command(),
            "npx eslint . -f unix | tail -1"
        );
        assert_eq!(parsed.custom.len(), 1);
    }
}
