//! Phase state machine and the structured results of a phase and a whole campaign.

use crate::batch::BatchProcessingResult;
use crate::checkpoint::CheckpointId;
use crate::errors::PhaseError;
use crate::events::SafetyEvent;
use crate::metrics::MetricsSnapshot;
use crate::milestone::ValidationResult;
use crate::tool::ToolExecutionResult;
use crate::util::duration_serde;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a single phase.
///
/// `NotStarted -> Checkpointed -> ToolRunning -> Validating -> {Completed | RolledBack | Failed}`.
/// `Validating -> ToolRunning` repeats for every further tool. `Cancelled` ends a phase at a
/// tool or batch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    NotStarted,
    Checkpointed,
    ToolRunning,
    Validating,
    Completed,
    RolledBack,
    Failed,
    Cancelled,
}

impl PhaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::RolledBack | Self::Failed | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Checkpointed => "checkpointed",
            Self::ToolRunning => "tool_running",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: PhaseState) -> bool {
        use PhaseState::*;
        match (self, next) {
            (NotStarted, Checkpointed) => true,
            (Checkpointed, ToolRunning | Validating) => true,
            (ToolRunning, Validating) => true,
            (Validating, ToolRunning | Completed | RolledBack) => true,
            // Any running state may fail or be cancelled.
            (NotStarted | Checkpointed | ToolRunning | Validating, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric improvement over one phase; positive means better.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub errors_reduced: i64,
    pub warnings_reduced: i64,
    /// Seconds saved on the build (`before - after`).
    pub build_time_delta: f64,
    #[serde(default)]
    pub custom_delta: BTreeMap<String, f64>,
}

impl MetricsDelta {
    pub fn between(before: &MetricsSnapshot, after: &MetricsSnapshot) -> Self {
        let custom_delta = after
            .custom
            .iter()
            .map(|(name, value)| {
                let base = before.custom.get(name).copied().unwrap_or(*value);
                (name.clone(), base - value)
            })
            .collect();
        Self {
            errors_reduced: before.error_count as i64 - after.error_count as i64,
            warnings_reduced: before.warning_count as i64 - after.warning_count as i64,
            build_time_delta: before.build_time_secs - after.build_time_secs,
            custom_delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: PhaseState,
    pub at: DateTime<Utc>,
}

/// Outcome of one phase. Produced for every phase, including failed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_id: String,
    pub success: bool,
    pub state: PhaseState,
    pub metrics_delta: MetricsDelta,
    pub files_processed: u64,
    pub items_fixed: u64,
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,
    pub safety_events: Vec<SafetyEvent>,
    pub tool_results: Vec<ToolExecutionResult>,
    #[serde(default)]
    pub batch_results: Vec<BatchProcessingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    /// Phase checkpoint; `None` when no snapshot could be taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointId>,
    /// Snapshots taken before individual tools, in tool order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_checkpoints: Vec<CheckpointId>,
    /// Ran without a safety net.
    pub degraded: bool,
    pub state_history: Vec<StateTransition>,
    pub errors: Vec<String>,
    /// Rollback was attempted and failed; the working tree state is unknown.
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
}

impl PhaseResult {
    pub fn new(phase_id: &str) -> Self {
        Self {
            phase_id: phase_id.to_string(),
            success: false,
            state: PhaseState::NotStarted,
            metrics_delta: MetricsDelta::default(),
            files_processed: 0,
            items_fixed: 0,
            execution_time: Duration::ZERO,
            safety_events: Vec::new(),
            tool_results: Vec::new(),
            batch_results: Vec::new(),
            validation: None,
            checkpoint: None,
            tool_checkpoints: Vec::new(),
            degraded: false,
            state_history: vec![StateTransition {
                state: PhaseState::NotStarted,
                at: Utc::now(),
            }],
            errors: Vec::new(),
            fatal: false,
            rollback_error: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: PhaseState) -> Result<(), PhaseError> {
        if !self.state.can_transition_to(next) {
            return Err(PhaseError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.set_state(next);
        Ok(())
    }

    /// Force a terminal failure regardless of the current state.
    pub fn abort(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        if !self.state.is_terminal() || self.state == PhaseState::Completed {
            self.set_state(PhaseState::Failed);
        }
    }

    fn set_state(&mut self, next: PhaseState) {
        self.state = next;
        self.success = next == PhaseState::Completed;
        self.state_history.push(StateTransition {
            state: next,
            at: Utc::now(),
        });
    }

    pub fn failed_tools(&self) -> usize {
        self.tool_results.iter().filter(|r| !r.success).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignTotals {
    pub phases_completed: usize,
    pub phases_failed: usize,
    pub phases_rolled_back: usize,
    pub phases_cancelled: usize,
    pub files_processed: u64,
    pub items_fixed: u64,
}

/// Everything one `campaign run` did, in phase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseResult>,
    pub totals: CampaignTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_reason: Option<String>,
}

impl Default for CampaignSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            phases: Vec::new(),
            totals: CampaignTotals::default(),
            aborted_reason: None,
        }
    }

    pub fn add_result(&mut self, result: PhaseResult) {
        match result.state {
            PhaseState::Completed => self.totals.phases_completed += 1,
            PhaseState::RolledBack => self.totals.phases_rolled_back += 1,
            PhaseState::Cancelled => self.totals.phases_cancelled += 1,
            _ => self.totals.phases_failed += 1,
        }
        self.totals.files_processed += result.files_processed;
        self.totals.items_fixed += result.items_fixed;
        self.phases.push(result);
    }

    pub fn finish(&mut self, aborted_reason: Option<String>) {
        self.ended_at = Some(Utc::now());
        if aborted_reason.is_some() {
            self.aborted_reason = aborted_reason;
        }
    }

    /// Every executed phase completed and nothing stopped the run early.
    pub fn all_success(&self) -> bool {
        self.aborted_reason.is_none() && self.phases.iter().all(|p| p.success)
    }

    pub fn get(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_state_terminal() {
        assert!(!PhaseState::NotStarted.is_terminal());
        assert!(!PhaseState::Validating.is_terminal());
        assert!(PhaseState::Completed.is_terminal());
        assert!(PhaseState::RolledBack.is_terminal());
        assert!(PhaseState::Failed.is_terminal());
        assert!(PhaseState::Cancelled.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut result = PhaseResult::new("p1");
        result.transition(PhaseState::Checkpointed).unwrap();
        result.transition(PhaseState::ToolRunning).unwrap();
        result.transition(PhaseState::Validating).unwrap();
        result.transition(PhaseState::ToolRunning).unwrap();
        result.transition(PhaseState::Validating).unwrap();
        result.transition(PhaseState::Completed).unwrap();
        assert!(result.success);
        assert_eq!(result.state_history.len(), 7);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut result = PhaseResult::new("p1");
        let err = result.transition(PhaseState::Completed).unwrap_err();
        assert!(err.to_string().contains("not_started -> completed"));

        result.transition(PhaseState::Checkpointed).unwrap();
        result.transition(PhaseState::ToolRunning).unwrap();
        assert!(result.transition(PhaseState::RolledBack).is_err());
        assert_eq!(result.state, PhaseState::ToolRunning);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut result = PhaseResult::new("p1");
        result.transition(PhaseState::Failed).unwrap();
        assert!(result.transition(PhaseState::Checkpointed).is_err());
        assert!(result.transition(PhaseState::Completed).is_err());
    }

    #[test]
    fn test_abort_forces_failed() {
        let mut result = PhaseResult::new("p1");
        result.transition(PhaseState::Checkpointed).unwrap();
        result.abort("boom");
        assert_eq!(result.state, PhaseState::Failed);
        assert!(!result.success);
        assert_eq!(result.errors, vec!["boom".to_string()]);

        let mut rolled = PhaseResult::new("p2");
        rolled.transition(PhaseState::Checkpointed).unwrap();
        rolled.transition(PhaseState::Validating).unwrap();
        rolled.transition(PhaseState::RolledBack).unwrap();
        rolled.abort("late error");
        assert_eq!(rolled.state, PhaseState::RolledBack);
    }

    #[test]
    fn test_metrics_delta() {
        let before = MetricsSnapshot::new(10, 4, 12.0).with_custom("anyTypes", 30.0);
        let after = MetricsSnapshot::new(3, 6, 9.5).with_custom("anyTypes", 12.0);
        let delta = MetricsDelta::between(&before, &after);
        assert_eq!(delta.errors_reduced, 7);
        assert_eq!(delta.warnings_reduced, -2);
        assert!((delta.build_time_delta - 2.5).abs() < 1e-9);
        assert_eq!(delta.custom_delta.get("anyTypes"), Some(&18.0));
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = CampaignSummary::new();

        let mut done = PhaseResult::new("p1");
        done.transition(PhaseState::Checkpointed).unwrap();
        done.transition(PhaseState::Validating).unwrap();
        done.transition(PhaseState::Completed).unwrap();
        done.files_processed = 10;
        done.items_fixed = 4;
        summary.add_result(done);

        let mut failed = PhaseResult::new("p2");
        failed.abort("nope");
        failed.files_processed = 2;
        summary.add_result(failed);

        assert_eq!(summary.totals.phases_completed, 1);
        assert_eq!(summary.totals.phases_failed, 1);
        assert_eq!(summary.totals.files_processed, 12);
        assert_eq!(summary.totals.items_fixed, 4);
        assert!(!summary.all_success());
        assert!(summary.get("p2").is_some());

        summary.finish(None);
        assert!(summary.ended_at.is_some());
        assert!(summary.aborted_reason.is_none());
    }

    #[test]
    fn test_phase_result_serializes_state_snake_case() {
        let result = PhaseResult::new("p1");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"state\":\"not_started\""));
        let back: PhaseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase_id, "p1");
    }
}
