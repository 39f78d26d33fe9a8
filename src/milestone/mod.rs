//! Milestone / completion validation of a phase against a fresh metrics snapshot.
//!
//! Hard criteria that are not met become blocking errors; soft criteria become warnings.
//! Registered [`MilestoneCheck`]s are awaited and folded into the same classification.

use crate::metrics::{ProgressMetrics, completion_percentage};
use crate::phase::{CampaignPhase, Metric, SuccessCriterion};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of a validation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Non-blocking problems.
    pub warnings: Vec<String>,
    /// The snapshot this result was computed from.
    pub metrics: ProgressMetrics,
    pub completion_percentage: f64,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl ValidationResult {
    pub fn from_checks(metrics: ProgressMetrics, errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            errors,
            warnings,
            metrics,
            completion_percentage: 100.0,
            next_steps: Vec::new(),
        }
    }

    /// Fold another result's findings into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.success = self.success && other.success && self.errors.is_empty();
    }
}

/// Caller-supplied completion condition.
#[async_trait]
pub trait MilestoneCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Hard checks block completion; soft ones only warn.
    fn hard(&self) -> bool {
        true
    }

    async fn check(&self, phase: &CampaignPhase, metrics: &ProgressMetrics) -> Result<bool>;
}

/// A synchronous predicate wrapped as a [`MilestoneCheck`].
pub struct PredicateCheck<F> {
    name: String,
    hard: bool,
    predicate: F,
}

impl<F> PredicateCheck<F>
where
    F: Fn(&ProgressMetrics) -> bool + Send + Sync,
{
    pub fn new(name: &str, hard: bool, predicate: F) -> Self {
        Self {
            name: name.to_string(),
            hard,
            predicate,
        }
    }
}

#[async_trait]
impl<F> MilestoneCheck for PredicateCheck<F>
where
    F: Fn(&ProgressMetrics) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn hard(&self) -> bool {
        self.hard
    }

    async fn check(&self, _phase: &CampaignPhase, metrics: &ProgressMetrics) -> Result<bool> {
        Ok((self.predicate)(metrics))
    }
}

#[derive(Default, Clone)]
pub struct MilestoneValidator {
    global: Vec<Arc<dyn MilestoneCheck>>,
    per_phase: HashMap<String, Vec<Arc<dyn MilestoneCheck>>>,
}

impl MilestoneValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check for one phase, or for every phase when `phase_id` is `None`.
    pub fn register(&mut self, phase_id: Option<&str>, check: Arc<dyn MilestoneCheck>) {
        match phase_id {
            Some(id) => self.per_phase.entry(id.to_string()).or_default().push(check),
            None => self.global.push(check),
        }
    }

    pub async fn validate_phase_completion(
        &self,
        phase: &CampaignPhase,
        metrics: &ProgressMetrics,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut unmet_hard = Vec::new();

        for criterion in &phase.success_criteria {
            let Some(current) = metrics.snapshot.value(&criterion.metric) else {
                let message = format!(
                    "{} cannot be evaluated: {} is not reported by the metrics provider",
                    criterion.expr(),
                    criterion.metric
                );
                if criterion.hard {
                    errors.push(message);
                } else {
                    warnings.push(message);
                }
                continue;
            };
            if criterion.is_met(current) {
                continue;
            }
            let message = unmet_message(criterion, current);
            if criterion.hard {
                unmet_hard.push((criterion, current));
                errors.push(message);
            } else {
                warnings.push(message);
            }
        }

        let phase_checks = self.per_phase.get(&phase.id).into_iter().flatten();
        for check in self.global.iter().chain(phase_checks) {
            let message = match check.check(phase, metrics).await {
                Ok(true) => continue,
                Ok(false) => format!("Custom check '{}' not satisfied", check.name()),
                Err(e) => format!("Custom check '{}' failed: {}", check.name(), e),
            };
            if check.hard() {
                errors.push(message);
            } else {
                warnings.push(message);
            }
        }

        let success = errors.is_empty();
        let completion = completion_for(phase, metrics);
        let next_steps = next_steps_for(phase, success, &unmet_hard, !warnings.is_empty());

        tracing::info!(
            phase = %phase.id,
            success,
            errors = errors.len(),
            warnings = warnings.len(),
            completion,
            "milestone validation"
        );

        ValidationResult {
            success,
            errors,
            warnings,
            metrics: metrics.clone(),
            completion_percentage: completion,
            next_steps,
        }
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

fn unmet_message(criterion: &SuccessCriterion, current: f64) -> String {
    format!(
        "{} not met: current value {} (required {} {})",
        criterion.expr(),
        format_value(current),
        criterion.comparison.symbol(),
        format_value(criterion.threshold)
    )
}

/// Mean over declared dimensions; each dimension takes its least-complete criterion.
fn completion_for(phase: &CampaignPhase, metrics: &ProgressMetrics) -> f64 {
    let mut per_metric: BTreeMap<&Metric, f64> = BTreeMap::new();
    for criterion in &phase.success_criteria {
        let pct = match metrics.snapshot.value(&criterion.metric) {
            Some(current) => {
                let baseline = metrics.baseline.value(&criterion.metric).unwrap_or(current);
                completion_percentage(baseline, current, criterion)
            }
            None => 0.0,
        };
        per_metric
            .entry(&criterion.metric)
            .and_modify(|existing| *existing = existing.min(pct))
            .or_insert(pct);
    }
    if per_metric.is_empty() {
        return 100.0;
    }
    per_metric.values().sum::<f64>() / per_metric.len() as f64
}

fn next_steps_for(
    phase: &CampaignPhase,
    success: bool,
    unmet_hard: &[(&SuccessCriterion, f64)],
    has_warnings: bool,
) -> Vec<String> {
    let mut steps = Vec::new();
    if success {
        if phase.next_steps.on_success.is_empty() {
            steps.push(format!(
                "Phase {} complete: commit the changes and continue with the next phase",
                phase.id
            ));
        } else {
            steps.extend(phase.next_steps.on_success.iter().cloned());
        }
        if has_warnings {
            steps.push(format!(
                "Review the soft-threshold warnings for phase {} before the final release",
                phase.id
            ));
        }
        return steps;
    }

    for (criterion, current) in unmet_hard {
        steps.push(format!(
            "Bring {} from {} to {} {}",
            criterion.metric,
            format_value(*current),
            criterion.comparison.symbol(),
            format_value(criterion.threshold)
        ));
    }
    if phase.next_steps.on_failure.is_empty() {
        steps.push(format!(
            "Re-run phase {} once the blocking errors are resolved",
            phase.id
        ));
        steps.push("Inspect the safety events with `campaign events`".to_string());
    } else {
        steps.extend(phase.next_steps.on_failure.iter().cloned());
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;

    fn progress(baseline: MetricsSnapshot, current: MetricsSnapshot) -> ProgressMetrics {
        ProgressMetrics::compute(&baseline, current, &[])
    }

    #[tokio::test]
    async fn test_unmet_equality_is_blocking() {
        let phase = CampaignPhase::new("phase-1", "Errors").with_criterion("errorCount == 0");
        let metrics = progress(MetricsSnapshot::new(20, 0, 1.0), MetricsSnapshot::new(5, 0, 1.0));
        let result = MilestoneValidator::new()
            .validate_phase_completion(&phase, &metrics)
            .await;
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains('5'));
        assert!(result.errors[0].contains('0'));
        assert!(!result.next_steps.is_empty());
        assert_eq!(result.completion_percentage, 75.0);
    }

    #[tokio::test]
    async fn test_unmet_comparison_is_a_warning() {
        let phase = CampaignPhase::new("phase-1", "Build").with_criterion("buildTime <= 10s");
        let metrics = progress(MetricsSnapshot::new(0, 0, 14.0), MetricsSnapshot::new(0, 0, 12.0));
        let result = MilestoneValidator::new()
            .validate_phase_completion(&phase, &metrics)
            .await;
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.completion_percentage < 100.0);
        assert!(result.next_steps.iter().any(|s| s.contains("soft-threshold")));
    }

    #[tokio::test]
    async fn test_explicit_hard_overrides_default() {
        let mut phase = CampaignPhase::new("p", "P");
        phase
            .success_criteria
            .push(SuccessCriterion::parse("warningCount <= 10").unwrap().with_hard(true));
        let metrics = progress(MetricsSnapshot::new(0, 50, 0.0), MetricsSnapshot::new(0, 20, 0.0));
        let result = MilestoneValidator::new()
            .validate_phase_completion(&phase, &metrics)
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_custom_metric_is_reported() {
        let phase = CampaignPhase::new("p", "P").with_criterion("custom:anyTypes == 0");
        let metrics = progress(MetricsSnapshot::new(0, 0, 0.0), MetricsSnapshot::new(0, 0, 0.0));
        let result = MilestoneValidator::new()
            .validate_phase_completion(&phase, &metrics)
            .await;
        assert!(!result.success);
        assert!(result.errors[0].contains("not reported"));
    }

    #[tokio::test]
    async fn test_custom_checks_are_awaited_and_classified() {
        let phase = CampaignPhase::new("phase-2", "P");
        let mut validator = MilestoneValidator::new();
        validator.register(
            Some("phase-2"),
            Arc::new(PredicateCheck::new("no-warnings", true, |m: &ProgressMetrics| {
                m.snapshot.warning_count == 0
            })),
        );
        validator.register(
            None,
            Arc::new(PredicateCheck::new("fast-build", false, |m: &ProgressMetrics| {
                m.snapshot.build_time_secs < 1.0
            })),
        );
        let metrics = progress(MetricsSnapshot::new(0, 3, 5.0), MetricsSnapshot::new(0, 3, 5.0));
        let result = validator.validate_phase_completion(&phase, &metrics).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Custom check 'no-warnings' not satisfied"]);
        assert_eq!(result.warnings, vec!["Custom check 'fast-build' not satisfied"]);

        let other = CampaignPhase::new("phase-3", "Q");
        let result = validator.validate_phase_completion(&other, &metrics).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_next_steps_are_deterministic() {
        let phase = CampaignPhase::new("phase-1", "Errors").with_criterion("errorCount == 0");
        let metrics = progress(MetricsSnapshot::new(9, 0, 0.0), MetricsSnapshot::new(4, 0, 0.0));
        let validator = MilestoneValidator::new();
        let a = validator.validate_phase_completion(&phase, &metrics).await;
        let b = validator.validate_phase_completion(&phase, &metrics).await;
        assert_eq!(a.next_steps, b.next_steps);
    }

    #[tokio::test]
    async fn test_completion_is_mean_across_dimensions() {
        let phase = CampaignPhase::new("p", "P")
            .with_criterion("errorCount == 0")
            .with_criterion("warningCount <= 0");
        let metrics = progress(
            MetricsSnapshot::new(10, 10, 0.0),
            MetricsSnapshot::new(0, 5, 0.0),
        );
        let result = MilestoneValidator::new()
            .validate_phase_completion(&phase, &metrics)
            .await;
        assert_eq!(result.completion_percentage, 75.0);
    }
}
