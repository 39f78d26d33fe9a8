//! Safety Validator: compile and build gates, rollback capability, tool result gating and
//! replacement scoring.
//!
//! Every check returns a structured result; subprocess failures, timeouts and missing tools
//! become failed results with a synthetic error entry.

pub mod score;

pub use score::{
    Replacement, ReplacementContext, ReplacementKind, SafetyScore, calculate_safety_score,
};

use crate::campaign_config::CommandsSection;
use crate::checkpoint::{RollbackCapability, validate_integrity};
use crate::phase::SafetyLevel;
use crate::process::run_shell;
use crate::tool::ToolExecutionResult;
use crate::util::{duration_serde, push_capped};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

const MAX_COMPILATION_ERRORS: usize = 200;

static COMPILE_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s\[(:])error(?:\s*:|\[|\s+TS\d+)").unwrap()
});

/// Runtime-tunable thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub minimum_safety_score: f64,
    /// Errors tolerated above the phase baseline.
    pub maximum_error_count: u64,
    #[serde(with = "duration_serde")]
    pub maximum_build_time: Duration,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            minimum_safety_score: 0.7,
            maximum_error_count: 0,
            maximum_build_time: Duration::from_secs(30),
        }
    }
}

/// Partial threshold update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsUpdate {
    pub minimum_safety_score: Option<f64>,
    pub maximum_error_count: Option<u64>,
    pub maximum_build_time: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationResult {
    pub build_successful: bool,
    pub compilation_errors: Vec<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// No compile command is configured.
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(with = "duration_serde")]
    pub build_time: Duration,
    #[serde(with = "duration_serde")]
    pub maximum_build_time: Duration,
    pub changed_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildValidationResult {
    pub build_successful: bool,
    pub errors: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestResults>,
    #[serde(default)]
    pub skipped: bool,
}

/// Judge a finished build against the build-time gate.
///
/// A build that exits 0 but runs longer than `maximum` still fails.
pub fn judge_build(
    exit_ok: bool,
    exit_code: Option<i32>,
    build_time: Duration,
    maximum: Duration,
    changed_files: usize,
) -> BuildValidationResult {
    let mut errors = Vec::new();
    if !exit_ok {
        errors.push(match exit_code {
            Some(code) => format!("Build failed with exit code {}", code),
            None => "Build was terminated by a signal".to_string(),
        });
    }
    if build_time > maximum {
        errors.push(format!(
            "Build took {:.2}s, exceeding the maximum build time of {:.2}s",
            build_time.as_secs_f64(),
            maximum.as_secs_f64()
        ));
    }
    BuildValidationResult {
        build_successful: errors.is_empty(),
        errors,
        performance_metrics: PerformanceMetrics {
            build_time,
            maximum_build_time: maximum,
            changed_files,
        },
        test_results: None,
        skipped: false,
    }
}

pub struct SafetyValidator {
    project_dir: PathBuf,
    commands: CommandsSection,
    thresholds: RwLock<SafetyThresholds>,
}

impl SafetyValidator {
    pub fn new(project_dir: &Path, commands: CommandsSection, thresholds: SafetyThresholds) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            commands,
            thresholds: RwLock::new(thresholds),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs.max(1))
    }

    pub fn get_safety_thresholds(&self) -> SafetyThresholds {
        self.thresholds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update_safety_thresholds(&self, update: ThresholdsUpdate) -> SafetyThresholds {
        let mut thresholds = self
            .thresholds
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(score) = update.minimum_safety_score {
            thresholds.minimum_safety_score = score.clamp(0.0, 1.0);
        }
        if let Some(count) = update.maximum_error_count {
            thresholds.maximum_error_count = count;
        }
        if let Some(limit) = update.maximum_build_time {
            thresholds.maximum_build_time = limit;
        }
        tracing::info!(?thresholds, "safety thresholds updated");
        thresholds.clone()
    }

    pub fn has_compile_command(&self) -> bool {
        self.commands.compile.is_some()
    }

    pub fn has_build_command(&self) -> bool {
        self.commands.build.is_some()
    }

    /// Run the compile-check command and collect error lines.
    pub async fn validate_compilation(&self) -> CompilationResult {
        let Some(command) = &self.commands.compile else {
            return CompilationResult {
                build_successful: true,
                compilation_errors: Vec::new(),
                duration: Duration::ZERO,
                skipped: true,
            };
        };

        let output = match run_shell(command, &[], &self.project_dir, self.timeout()).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "compile check did not complete");
                return CompilationResult {
                    build_successful: false,
                    compilation_errors: vec![format!("Compile check failed: {}", e)],
                    duration: self.timeout(),
                    skipped: false,
                };
            }
        };

        let mut errors = Vec::new();
        for line in output.combined().lines() {
            let line = line.trim();
            if COMPILE_ERROR_REGEX.is_match(line) {
                push_capped(&mut errors, line, MAX_COMPILATION_ERRORS);
            }
        }
        if !output.success() && errors.is_empty() {
            errors.push(match output.exit_code {
                Some(127) => format!("Compile command not found: {}", command),
                Some(code) => format!("Compile check exited with code {}", code),
                None => "Compile check was terminated by a signal".to_string(),
            });
        }

        let build_successful = output.success() && errors.is_empty();
        tracing::info!(
            success = build_successful,
            errors = errors.len(),
            duration_ms = output.duration.as_millis() as u64,
            "compile check"
        );
        CompilationResult {
            build_successful,
            compilation_errors: errors,
            duration: output.duration,
            skipped: false,
        }
    }

    /// Run the build, enforce the build-time gate and optionally the test suite.
    pub async fn validate_build_after_batch(
        &self,
        changed_files: &[PathBuf],
        run_tests: bool,
    ) -> BuildValidationResult {
        let maximum = self.get_safety_thresholds().maximum_build_time;
        let mut result = match &self.commands.build {
            None => BuildValidationResult {
                build_successful: true,
                errors: Vec::new(),
                performance_metrics: PerformanceMetrics {
                    build_time: Duration::ZERO,
                    maximum_build_time: maximum,
                    changed_files: changed_files.len(),
                },
                test_results: None,
                skipped: true,
            },
            Some(command) => match run_shell(command, &[], &self.project_dir, self.timeout()).await
            {
                Ok(output) => judge_build(
                    output.success(),
                    output.exit_code,
                    output.duration,
                    maximum,
                    changed_files.len(),
                ),
                Err(e) => {
                    let mut failed = judge_build(
                        false,
                        None,
                        self.timeout(),
                        maximum,
                        changed_files.len(),
                    );
                    failed.errors = vec![format!("Build did not complete: {}", e)];
                    failed
                }
            },
        };

        if run_tests && let Some(test) = &self.commands.test {
            let tests = self.run_tests(test).await;
            if !tests.passed {
                result.errors.push("Test suite failed".to_string());
                result.build_successful = false;
            }
            result.test_results = Some(tests);
        }

        if !result.build_successful {
            tracing::warn!(errors = ?result.errors, "build validation failed");
        }
        result
    }

    async fn run_tests(&self, command: &str) -> TestResults {
        match run_shell(command, &[], &self.project_dir, self.timeout()).await {
            Ok(output) => {
                let mut failures = Vec::new();
                if !output.success() {
                    for line in output.combined().lines().rev().take(20) {
                        failures.push(line.to_string());
                    }
                    failures.reverse();
                }
                TestResults {
                    passed: output.success(),
                    exit_code: output.exit_code,
                    duration: output.duration,
                    failures,
                }
            }
            Err(e) => TestResults {
                passed: false,
                exit_code: None,
                duration: self.timeout(),
                failures: vec![e.to_string()],
            },
        }
    }

    /// Must pass before any automatic rollback in a production run.
    pub fn validate_rollback_capability(
        &self,
        original_files: &[PathBuf],
        backup_files: &[PathBuf],
    ) -> RollbackCapability {
        validate_integrity(original_files, backup_files)
    }

    /// Gate a tool's reported safety score by its safety level.
    pub fn assess_tool_result(&self, result: &ToolExecutionResult, level: SafetyLevel) -> Vec<String> {
        let minimum = self.get_safety_thresholds().minimum_safety_score;
        let mut errors = Vec::new();
        match (result.safety_score, level.score_floor(minimum)) {
            (None, _) if level.requires_score() => errors.push(format!(
                "Tool {} reported no safety score, required at {} safety level",
                result.tool, level
            )),
            (Some(score), Some(floor)) if score < floor => errors.push(format!(
                "Tool {} safety score {:.2} is below the {:.2} required at {} safety level",
                result.tool, score, floor, level
            )),
            _ => {}
        }
        errors
    }

    /// Error-count regression check against the phase baseline.
    pub fn check_error_count(&self, baseline: u64, current: u64) -> Option<String> {
        let tolerance = self.get_safety_thresholds().maximum_error_count;
        if current > baseline.saturating_add(tolerance) {
            Some(format!(
                "Error count rose from {} to {} (tolerance {})",
                baseline, current, tolerance
            ))
        } else {
            None
        }
    }

    pub fn calculate_safety_score(
        &self,
        replacement: &Replacement,
        context: &ReplacementContext,
    ) -> SafetyScore {
        calculate_safety_score(
            replacement,
            context,
            self.get_safety_thresholds().minimum_safety_score,
        )
    }
}
