//! End-to-end phase and campaign scenarios against the library API.
//!
//! Snapshot backends and metrics providers are faked; tools are real shell scripts.

use anyhow::Result;
use async_trait::async_trait;
use campaign::batch::CancellationFlag;
use campaign::campaign::{Campaign, PhaseExecutor, PhaseState, RunOptions};
use campaign::checkpoint::{CheckpointId, CheckpointInfo, CheckpointManager, SnapshotBackend};
use campaign::config::CampaignSettings;
use campaign::errors::{CampaignError, CheckpointError};
use campaign::events::{SafetyEventLog, SafetyEventType, Severity};
use campaign::metrics::{MetricsProvider, MetricsSnapshot, ProgressMetrics};
use campaign::milestone::MilestoneValidator;
use campaign::phase::{CampaignPhase, SafetyLevel, ToolConfiguration};
use campaign::safety::{SafetyThresholds, SafetyValidator, judge_build};
use campaign::tool::{ToolRunner, parse_tool_output};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// Fakes
// =============================================================================

/// Hands out error counts in order, repeating the last one.
struct QueuedMetrics {
    errors: Mutex<VecDeque<u64>>,
}

impl QueuedMetrics {
    fn new(errors: &[u64]) -> Arc<Self> {
        Arc::new(Self {
            errors: Mutex::new(errors.iter().copied().collect()),
        })
    }
}

#[async_trait]
impl MetricsProvider for QueuedMetrics {
    async fn collect(&self) -> Result<MetricsSnapshot> {
        let mut queue = self.errors.lock().unwrap();
        let errors = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            *queue.front().unwrap()
        };
        Ok(MetricsSnapshot::new(errors, 0, 1.0))
    }
}

#[derive(Clone, Default)]
struct CountingBackend {
    restores: Arc<AtomicUsize>,
    fail_restore: bool,
}

impl SnapshotBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn create(&mut self, label: &str) -> Result<CheckpointInfo, CheckpointError> {
        Ok(CheckpointInfo {
            id: CheckpointId::new(format!("snap-{}", label)),
            label: label.to_string(),
            created_at: Utc::now(),
        })
    }

    fn restore(&mut self, _id: &CheckpointId) -> Result<(), CheckpointError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore {
            Err(CheckpointError::Unavailable("snapshot store unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn exists(&self, _id: &CheckpointId) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        Ok(Vec::new())
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn settings(auto_rollback: bool, continue_on_failure: bool) -> CampaignSettings {
    CampaignSettings::builder()
        .auto_rollback(auto_rollback)
        .continue_on_failure(continue_on_failure)
        .batch_interval(Duration::ZERO)
        .build()
}

fn executor(
    dir: &Path,
    settings: CampaignSettings,
    backend: Option<CountingBackend>,
    metrics: Arc<dyn MetricsProvider>,
    cancel: CancellationFlag,
) -> PhaseExecutor {
    let events = SafetyEventLog::default();
    let backend = backend.map(|b| Box::new(b) as Box<dyn SnapshotBackend>);
    let checkpoints = Arc::new(CheckpointManager::new(backend, events.clone()));
    let validator = Arc::new(SafetyValidator::new(
        dir,
        settings.commands.clone(),
        settings.thresholds.clone(),
    ));
    PhaseExecutor::new(
        settings,
        checkpoints,
        validator,
        metrics,
        ToolRunner::new(dir),
        events,
        cancel,
    )
}

fn phase(id: &str, command: &str) -> CampaignPhase {
    CampaignPhase::new(id, "Scenario phase")
        .with_tool(ToolConfiguration::new("fixer", command).with_safety_level(SafetyLevel::Low))
        .with_criterion("errorCount == 0")
}

// =============================================================================
// Scenario A: tool output parsing
// =============================================================================

#[test]
fn scenario_a_tool_output_is_parsed() {
    let result = parse_tool_output("10 files processed\n5 variables removed");
    assert_eq!(result.files_processed, 10);
    assert_eq!(result.items_removed, 5);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn scenario_a_tool_run_reports_counts() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(
        dir.path(),
        "fix.sh",
        "printf '10 files processed\\n5 variables removed\\n'",
    );
    let runner = ToolRunner::new(dir.path());

    let result = runner.run(&ToolConfiguration::new("fixer", &tool)).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.files_processed, 10);
    assert_eq!(result.items_removed, 5);
}

// =============================================================================
// Scenario B: no snapshot backend
// =============================================================================

#[tokio::test]
async fn scenario_b_missing_checkpoint_fails_instead_of_rolling_back() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(dir.path(), "fix.sh", "echo '1 files processed'");
    let exec = executor(
        dir.path(),
        settings(true, false),
        None,
        QueuedMetrics::new(&[3]),
        CancellationFlag::new(),
    );

    let result = exec.execute_phase(&phase("p1", &tool)).await;

    assert_eq!(result.state, PhaseState::Failed);
    assert!(result.degraded);
    assert!(result.checkpoint.is_none());
    assert!(!result.fatal);
    assert!(result.safety_events.iter().any(|e| {
        e.event_type == SafetyEventType::CheckpointFailed && e.severity == Severity::Warning
    }));
    assert!(
        !result
            .safety_events
            .iter()
            .any(|e| e.event_type == SafetyEventType::RollbackTriggered)
    );
}

// =============================================================================
// Scenario C: build-time gate
// =============================================================================

#[test]
fn scenario_c_slow_build_fails_despite_exit_zero() {
    let result = judge_build(
        true,
        Some(0),
        Duration::from_secs(12),
        Duration::from_secs(10),
        3,
    );
    assert!(!result.build_successful);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("maximum build time"));
    assert!(result.errors[0].contains("10.00"));
}

#[tokio::test]
async fn scenario_c_slow_build_command_fails() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(true, false);
    settings.commands.build = Some("sleep 0.5".to_string());
    let thresholds = SafetyThresholds {
        maximum_build_time: Duration::from_millis(100),
        ..SafetyThresholds::default()
    };
    let validator = SafetyValidator::new(dir.path(), settings.commands, thresholds);

    let result = validator.validate_build_after_batch(&[], false).await;
    assert!(!result.build_successful);
    assert!(result.errors.iter().any(|e| e.contains("exceeding the maximum build time")));
}

// =============================================================================
// Scenario D: milestone validation
// =============================================================================

#[tokio::test]
async fn scenario_d_unmet_hard_criterion_blocks_completion() {
    let phase = CampaignPhase::new("p1", "Errors").with_criterion("errorCount == 0");
    let baseline = MetricsSnapshot::new(8, 0, 1.0);
    let current = MetricsSnapshot::new(5, 0, 1.0);
    let progress = ProgressMetrics::compute(&baseline, current, &phase.success_criteria);

    let validation = MilestoneValidator::new()
        .validate_phase_completion(&phase, &progress)
        .await;

    assert!(!validation.success);
    assert_eq!(validation.errors.len(), 1);
    assert!(validation.errors[0].contains('5'));
    assert!(validation.errors[0].contains('0'));
    assert!(!validation.next_steps.is_empty());
}

// =============================================================================
// Rollback happens exactly when validation fails, auto-rollback is on and a
// checkpoint exists
// =============================================================================

#[tokio::test]
async fn rollback_only_when_all_preconditions_hold() {
    for validation_fails in [false, true] {
        for auto_rollback in [false, true] {
            for has_checkpoint in [false, true] {
                let dir = TempDir::new().unwrap();
                let tool = write_script(dir.path(), "fix.sh", "echo ok");
                let backend = CountingBackend::default();
                let restores = backend.restores.clone();
                let errors_after = if validation_fails { 2 } else { 0 };
                let exec = executor(
                    dir.path(),
                    settings(auto_rollback, false),
                    has_checkpoint.then_some(backend),
                    QueuedMetrics::new(&[2, errors_after]),
                    CancellationFlag::new(),
                );

                let result = exec.execute_phase(&phase("p1", &tool)).await;

                let expect_rollback = validation_fails && auto_rollback && has_checkpoint;
                let case = format!(
                    "fails={} auto={} checkpoint={}",
                    validation_fails, auto_rollback, has_checkpoint
                );
                assert_eq!(
                    restores.load(Ordering::SeqCst),
                    usize::from(expect_rollback),
                    "{}",
                    case
                );
                let expected_state = match (validation_fails, expect_rollback) {
                    (false, _) => PhaseState::Completed,
                    (true, true) => PhaseState::RolledBack,
                    (true, false) => PhaseState::Failed,
                };
                assert_eq!(result.state, expected_state, "{}", case);
            }
        }
    }
}

// =============================================================================
// Campaign driver
// =============================================================================

#[tokio::test]
async fn campaign_stops_after_rolled_back_phase() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(dir.path(), "fix.sh", "echo ok");
    let exec = executor(
        dir.path(),
        settings(true, false),
        Some(CountingBackend::default()),
        QueuedMetrics::new(&[4]),
        CancellationFlag::new(),
    );
    let phases = vec![phase("p1", &tool), phase("p2", &tool)];
    let mut campaign = Campaign::new(exec, phases, dir.path().to_path_buf());

    let summary = campaign.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.phases.len(), 1);
    assert_eq!(summary.totals.phases_rolled_back, 1);
    assert!(!summary.all_success());
    assert!(summary.aborted_reason.is_some());
}

#[tokio::test]
async fn campaign_continues_on_failure_when_configured() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(dir.path(), "fix.sh", "echo ok");
    let exec = executor(
        dir.path(),
        settings(false, true),
        Some(CountingBackend::default()),
        QueuedMetrics::new(&[4]),
        CancellationFlag::new(),
    );
    let phases = vec![phase("p1", &tool), phase("p2", &tool)];
    let mut campaign = Campaign::new(exec, phases, dir.path().to_path_buf());

    let summary = campaign.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.phases.len(), 2);
    assert_eq!(summary.totals.phases_failed, 2);
    assert!(summary.aborted_reason.is_none());
}

#[tokio::test]
async fn failed_restore_aborts_the_campaign() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(dir.path(), "fix.sh", "echo ok");
    let backend = CountingBackend {
        fail_restore: true,
        ..CountingBackend::default()
    };
    let exec = executor(
        dir.path(),
        settings(true, true),
        Some(backend),
        QueuedMetrics::new(&[4]),
        CancellationFlag::new(),
    );
    let phases = vec![phase("p1", &tool), phase("p2", &tool)];
    let mut campaign = Campaign::new(exec, phases, dir.path().to_path_buf());

    let (summary, outcome) = campaign.run_with_summary(&RunOptions::default()).await;

    assert!(matches!(
        outcome,
        Err(CampaignError::RollbackFailed { ref phase, .. }) if phase == "p1"
    ));
    assert_eq!(summary.phases.len(), 1);
    assert!(summary.phases[0].fatal);
    assert!(
        summary.phases[0]
            .safety_events
            .iter()
            .any(|e| e.event_type == SafetyEventType::EmergencyRecovery)
    );
}

#[tokio::test]
async fn cancellation_before_start_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(dir.path(), "fix.sh", "echo ok");
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let exec = executor(
        dir.path(),
        settings(true, false),
        Some(CountingBackend::default()),
        QueuedMetrics::new(&[0]),
        cancel,
    );
    let mut campaign = Campaign::new(exec, vec![phase("p1", &tool)], dir.path().to_path_buf());

    let summary = campaign.run(&RunOptions::default()).await.unwrap();

    assert!(summary.phases.is_empty());
    assert!(
        summary
            .aborted_reason
            .as_deref()
            .is_some_and(|r| r.contains("cancelled"))
    );
    assert!(
        campaign
            .executor()
            .events()
            .snapshot()
            .iter()
            .any(|e| e.event_type == SafetyEventType::CampaignCancelled)
    );
}

#[tokio::test]
async fn only_selects_a_single_phase() {
    let dir = TempDir::new().unwrap();
    let tool = write_script(dir.path(), "fix.sh", "echo ok");
    let exec = executor(
        dir.path(),
        settings(true, false),
        Some(CountingBackend::default()),
        QueuedMetrics::new(&[0]),
        CancellationFlag::new(),
    );
    let phases = vec![phase("p1", &tool), phase("p2", &tool), phase("p3", &tool)];
    let mut campaign = Campaign::new(exec, phases, dir.path().to_path_buf());

    let options = RunOptions {
        only: Some("p2".to_string()),
        ..RunOptions::default()
    };
    let summary = campaign.run(&options).await.unwrap();

    assert_eq!(summary.phases.len(), 1);
    assert_eq!(summary.phases[0].phase_id, "p2");
    assert!(summary.all_success());

    let unknown = RunOptions {
        from: Some("p9".to_string()),
        ..RunOptions::default()
    };
    assert!(matches!(
        campaign.run(&unknown).await,
        Err(CampaignError::UnknownPhase(_))
    ));
}
