//! Phase Executor: checkpoint, run tools in order, validate after each, roll back on failure.
//!
//! `execute_phase` always returns a [`PhaseResult`]. Internal errors and panics are caught and
//! turned into a failed result with an `EMERGENCY_RECOVERY` event. The only condition the
//! caller must treat as fatal is `PhaseResult::fatal` (a rollback that did not restore).

use super::state::{MetricsDelta, PhaseResult, PhaseState};
use crate::batch::{BatchOrchestrator, CancellationFlag};
use crate::checkpoint::{CheckpointId, CheckpointManager};
use crate::config::CampaignSettings;
use crate::errors::PhaseError;
use crate::events::{SafetyEventLog, SafetyEventType, Severity};
use crate::metrics::{MetricsProvider, MetricsSnapshot, MetricsStore, ProgressMetrics};
use crate::milestone::{MilestoneValidator, ValidationResult};
use crate::phase::{CampaignPhase, ToolConfiguration};
use crate::safety::SafetyValidator;
use crate::tool::{ToolExecutionResult, ToolRunner};
use crate::ui::CampaignUI;
use crate::util::count_glob_matches;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub struct PhaseExecutor {
    settings: CampaignSettings,
    checkpoints: Arc<CheckpointManager>,
    validator: Arc<SafetyValidator>,
    metrics: Arc<dyn MetricsProvider>,
    milestones: MilestoneValidator,
    runner: ToolRunner,
    events: SafetyEventLog,
    cancel: CancellationFlag,
    metrics_file: Option<PathBuf>,
    ui: Option<Arc<CampaignUI>>,
}

/// Baseline bookkeeping for one phase.
struct PhaseMetrics {
    /// Snapshot taken right after the phase checkpoint.
    start: MetricsSnapshot,
    /// Campaign baseline used for progress percentages.
    baseline: MetricsSnapshot,
    store: Option<MetricsStore>,
}

enum ToolOutcome {
    Continue,
    Cancelled,
}

impl PhaseExecutor {
    pub fn new(
        settings: CampaignSettings,
        checkpoints: Arc<CheckpointManager>,
        validator: Arc<SafetyValidator>,
        metrics: Arc<dyn MetricsProvider>,
        runner: ToolRunner,
        events: SafetyEventLog,
        cancel: CancellationFlag,
    ) -> Self {
        Self {
            settings,
            checkpoints,
            validator,
            metrics,
            milestones: MilestoneValidator::new(),
            runner,
            events,
            cancel,
            metrics_file: None,
            ui: None,
        }
    }

    pub fn with_milestones(mut self, milestones: MilestoneValidator) -> Self {
        self.milestones = milestones;
        self
    }

    /// Persist baseline, snapshots and validations to `path`.
    pub fn with_metrics_store(mut self, path: PathBuf) -> Self {
        self.metrics_file = Some(path);
        self
    }

    pub fn with_ui(mut self, ui: Option<Arc<CampaignUI>>) -> Self {
        self.ui = ui;
        self
    }

    pub fn settings(&self) -> &CampaignSettings {
        &self.settings
    }

    pub fn events(&self) -> &SafetyEventLog {
        &self.events
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub async fn execute_phase(&self, phase: &CampaignPhase) -> PhaseResult {
        let started = Instant::now();
        let mark = self.events.next_seq();
        self.events.set_phase(Some(&phase.id));

        let mut result = PhaseResult::new(&phase.id);
        let outcome = AssertUnwindSafe(self.run_phase(phase, &mut result))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(PhaseError::MetricsCollection(message))) => {
                self.events.record(
                    SafetyEventType::ValidationFailed,
                    Severity::Error,
                    format!("Phase {} cannot be validated: {}", phase.id, message),
                    "phase aborted; checkpoint kept for inspection",
                );
                result.abort(format!("Metrics collection failed: {}", message));
            }
            Ok(Err(e)) => self.emergency(&mut result, &e.to_string()),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.emergency(&mut result, &format!("panic: {}", message));
            }
        }

        result.execution_time = started.elapsed();
        result.safety_events = self.events.events_since(mark);
        self.events.set_phase(None);

        tracing::info!(
            phase = %phase.id,
            state = %result.state,
            success = result.success,
            fatal = result.fatal,
            files = result.files_processed,
            items = result.items_fixed,
            elapsed_ms = result.execution_time.as_millis() as u64,
            "phase finished"
        );
        result
    }

    fn emergency(&self, result: &mut PhaseResult, message: &str) {
        self.events.record(
            SafetyEventType::EmergencyRecovery,
            Severity::Error,
            format!("Phase {} aborted: {}", result.phase_id, message),
            "phase marked failed; checkpoint kept for inspection",
        );
        result.abort(format!("Internal error: {}", message));
    }

    async fn run_phase(
        &self,
        phase: &CampaignPhase,
        result: &mut PhaseResult,
    ) -> Result<(), PhaseError> {
        self.events.record(
            SafetyEventType::PhaseStarted,
            Severity::Info,
            format!("Phase {} ({}) started", phase.id, phase.name),
            format!("{} tool(s) scheduled", phase.tools.len()),
        );

        let label = phase.start_checkpoint_label();
        let checkpoint = self.checkpoints.create(&label);
        if let Some(ui) = &self.ui {
            ui.checkpoint(&label, &checkpoint);
        }
        if checkpoint.is_sentinel() {
            result.degraded = true;
            tracing::warn!(phase = %phase.id, "running without a checkpoint");
        } else {
            result.checkpoint = Some(checkpoint.clone());
        }
        result.transition(PhaseState::Checkpointed)?;

        let mut metrics = self.phase_metrics().await?;
        let mut latest = metrics.start.clone();
        let mut safety_errors = Vec::new();

        for (index, tool) in phase.tools.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.cancel_phase(result, &checkpoint);
                return Ok(());
            }
            if let Some(label) = phase.tool_checkpoint_label(index) {
                let id = self.checkpoints.create(label);
                if let Some(ui) = &self.ui {
                    ui.checkpoint(label, &id);
                }
                if !id.is_sentinel() {
                    result.tool_checkpoints.push(id);
                }
            }

            result.transition(PhaseState::ToolRunning)?;
            if let ToolOutcome::Cancelled = self.run_tool(tool, result).await {
                self.cancel_phase(result, &checkpoint);
                return Ok(());
            }

            result.transition(PhaseState::Validating)?;
            latest = self.collect().await?;
            if let Some(store) = metrics.store.as_mut() {
                store.record_snapshot(latest.clone());
            }
            safety_errors = self.validate_after_tool(&metrics.start, &latest, tool).await;
            if !safety_errors.is_empty() {
                tracing::warn!(
                    phase = %phase.id,
                    tool = %tool.name,
                    errors = safety_errors.len(),
                    "safety validation failed after tool"
                );
                break;
            }
        }

        if phase.tools.is_empty() {
            result.transition(PhaseState::Validating)?;
        }

        result.metrics_delta = MetricsDelta::between(&metrics.start, &latest);
        let progress = ProgressMetrics::compute(&metrics.baseline, latest, &phase.success_criteria);
        let mut validation = self
            .milestones
            .validate_phase_completion(phase, &progress)
            .await;
        if !safety_errors.is_empty() {
            let was_success = validation.success;
            validation.merge(ValidationResult::from_checks(
                progress.clone(),
                safety_errors,
                Vec::new(),
            ));
            if was_success {
                validation.next_steps = vec![
                    format!(
                        "Fix the safety violations above, then re-run phase {}",
                        phase.id
                    ),
                    "Inspect the safety events with `campaign events`".to_string(),
                ];
            }
        }

        let passed = validation.success;
        if passed && result.failed_tools() > 0 {
            let failed: Vec<&str> = result
                .tool_results
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.tool.as_str())
                .collect();
            validation.success = false;
            validation.errors.push(format!(
                "{} of {} tool(s) failed in phase {}",
                failed.len(),
                result.tool_results.len(),
                phase.id
            ));
            validation.next_steps = vec![
                format!(
                    "Fix the failing tool(s) {}, then re-run phase {}",
                    failed.join(", "),
                    phase.id
                ),
                "Inspect the safety events with `campaign events`".to_string(),
            ];
        }

        if let Some(store) = metrics.store.as_mut() {
            store.record_validation(&phase.id, validation.clone());
        }
        self.save_store(metrics.store.as_ref());

        if !passed {
            result.errors.extend(validation.errors.iter().cloned());
        }
        result.validation = Some(validation);

        if passed {
            self.finish_validated(phase, result)
        } else {
            self.handle_validation_failure(phase, result, &checkpoint)
        }
    }

    fn finish_validated(
        &self,
        phase: &CampaignPhase,
        result: &mut PhaseResult,
    ) -> Result<(), PhaseError> {
        let failed_tools = result.failed_tools();
        if failed_tools > 0 {
            result.errors.push(format!(
                "{} of {} tool(s) failed in phase {}",
                failed_tools,
                result.tool_results.len(),
                phase.id
            ));
            return result.transition(PhaseState::Failed);
        }

        result.transition(PhaseState::Completed)?;
        self.events.record(
            SafetyEventType::PhaseCompleted,
            Severity::Info,
            format!(
                "Phase {} completed: {} files processed, {} items fixed",
                phase.id, result.files_processed, result.items_fixed
            ),
            "continuing campaign",
        );
        Ok(())
    }

    /// Roll back iff automatic rollback is enabled and a readable checkpoint exists.
    fn handle_validation_failure(
        &self,
        phase: &CampaignPhase,
        result: &mut PhaseResult,
        checkpoint: &CheckpointId,
    ) -> Result<(), PhaseError> {
        let error_count = result
            .validation
            .as_ref()
            .map(|v| v.errors.len())
            .unwrap_or(0);

        if !self.settings.auto_rollback {
            self.events.record(
                SafetyEventType::ValidationFailed,
                Severity::Error,
                format!("Phase {} failed validation ({} errors)", phase.id, error_count),
                "automatic rollback disabled; working tree left as-is",
            );
            return result.transition(PhaseState::Failed);
        }
        if checkpoint.is_sentinel() {
            self.events.record(
                SafetyEventType::ValidationFailed,
                Severity::Error,
                format!("Phase {} failed validation ({} errors)", phase.id, error_count),
                "no checkpoint available; working tree left as-is",
            );
            return result.transition(PhaseState::Failed);
        }
        if self.settings.production && !self.checkpoints.validate_checkpoint(checkpoint) {
            self.events.record(
                SafetyEventType::ValidationFailed,
                Severity::Error,
                format!(
                    "Phase {} failed validation and checkpoint {} cannot be read",
                    phase.id,
                    checkpoint.short()
                ),
                "rollback skipped; working tree left as-is",
            );
            result.errors.push(format!(
                "Checkpoint {} failed its integrity check; rollback skipped",
                checkpoint.short()
            ));
            return result.transition(PhaseState::Failed);
        }

        self.events.record(
            SafetyEventType::ValidationFailed,
            Severity::Error,
            format!("Phase {} failed validation ({} errors)", phase.id, error_count),
            "rolling back",
        );
        self.events.record(
            SafetyEventType::RollbackTriggered,
            Severity::Warning,
            format!("Rolling back phase {} to checkpoint {}", phase.id, checkpoint.short()),
            "restoring working tree",
        );
        if let Some(ui) = &self.ui {
            ui.rollback(&phase.id, checkpoint);
        }

        match self.checkpoints.restore(checkpoint) {
            Ok(()) => {
                self.events.record(
                    SafetyEventType::RollbackCompleted,
                    Severity::Info,
                    format!("Phase {} restored to checkpoint {}", phase.id, checkpoint.short()),
                    "phase not retried",
                );
                result.transition(PhaseState::RolledBack)
            }
            Err(e) => {
                let message = e.to_string();
                self.events.record(
                    SafetyEventType::EmergencyRecovery,
                    Severity::Error,
                    format!(
                        "Rollback of phase {} to {} failed: {}",
                        phase.id,
                        checkpoint.short(),
                        message
                    ),
                    "campaign stopped; working tree state unknown",
                );
                result.fatal = true;
                result.rollback_error = Some(message.clone());
                result.errors.push(format!("Rollback failed: {}", message));
                result.transition(PhaseState::Failed)
            }
        }
    }

    fn cancel_phase(&self, result: &mut PhaseResult, checkpoint: &CheckpointId) {
        self.events.record(
            SafetyEventType::CampaignCancelled,
            Severity::Warning,
            format!("Phase {} cancelled", result.phase_id),
            format!("checkpoint {} kept for inspection", checkpoint),
        );
        result.errors.push("Cancelled".to_string());
        if result.transition(PhaseState::Cancelled).is_err() {
            result.abort("Cancelled from an unexpected state");
        }
    }

    async fn run_tool(&self, tool: &ToolConfiguration, result: &mut PhaseResult) -> ToolOutcome {
        if let Some(ui) = &self.ui {
            ui.start_tool(&tool.name);
        }

        let (tool_result, cancelled) = match tool.batch_size {
            Some(batch_size) => match self.batch_units(tool) {
                Ok(units) => {
                    let orchestrator = BatchOrchestrator::new(
                        self.runner.clone(),
                        self.validator.clone(),
                        self.events.clone(),
                        self.settings.batch_interval,
                        self.cancel.clone(),
                    )
                    .with_ui(self.ui.clone());
                    let batches = orchestrator.process_batches(tool, units, batch_size).await;
                    let merged = batches.as_tool_result();
                    let cancelled = batches.cancelled;
                    result.batch_results.push(batches);
                    (merged, cancelled)
                }
                Err(e) => {
                    let failed = ToolExecutionResult::failure(&tool.name, e.to_string());
                    self.record_tool_failure(tool, &failed);
                    (failed, false)
                }
            },
            None => {
                let mut single = self.runner.run(tool).await;
                if single.success {
                    let gate = self.validator.assess_tool_result(&single, tool.safety_level);
                    if !gate.is_empty() {
                        single.errors.extend(gate);
                        single.success = false;
                    }
                }
                if !single.success {
                    self.record_tool_failure(tool, &single);
                }
                (single, false)
            }
        };

        if let Some(ui) = &self.ui {
            ui.tool_finished(&tool_result);
        }
        result.files_processed += tool_result.files_processed;
        result.items_fixed += tool_result.items_changed();
        if !tool_result.success {
            result.errors.extend(
                tool_result
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", tool.name, e)),
            );
        }
        result.tool_results.push(tool_result);

        if cancelled {
            ToolOutcome::Cancelled
        } else {
            ToolOutcome::Continue
        }
    }

    fn record_tool_failure(&self, tool: &ToolConfiguration, failed: &ToolExecutionResult) {
        self.events.record(
            SafetyEventType::ToolFailed,
            Severity::Warning,
            format!(
                "{} failed: {}",
                tool.name,
                failed.errors.first().map(String::as_str).unwrap_or("unknown error")
            ),
            "recorded; phase will not complete",
        );
    }

    fn batch_units(&self, tool: &ToolConfiguration) -> Result<usize, PhaseError> {
        if let Some(units) = tool.total_units {
            return Ok(units);
        }
        match &tool.target_glob {
            Some(pattern) => count_glob_matches(self.runner.project_dir(), pattern).map_err(|e| {
                PhaseError::ToolSetup {
                    tool: tool.name.clone(),
                    message: format!("{:#}", e),
                }
            }),
            None => Err(PhaseError::ToolSetup {
                tool: tool.name.clone(),
                message: "batch_size is set but neither total_units nor target_glob is".to_string(),
            }),
        }
    }

    /// Safety gates after one tool: error-count regression and the build gate.
    async fn validate_after_tool(
        &self,
        phase_start: &MetricsSnapshot,
        current: &MetricsSnapshot,
        tool: &ToolConfiguration,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(error) = self
            .validator
            .check_error_count(phase_start.error_count, current.error_count)
        {
            errors.push(format!("after {}: {}", tool.name, error));
        }
        if self.settings.validate_build_after_tool && self.validator.has_build_command() {
            let build = self
                .validator
                .validate_build_after_batch(&[], self.settings.run_tests)
                .await;
            errors.extend(
                build
                    .errors
                    .into_iter()
                    .map(|e| format!("after {}: {}", tool.name, e)),
            );
        }
        errors
    }

    async fn collect(&self) -> Result<MetricsSnapshot, PhaseError> {
        self.metrics
            .collect()
            .await
            .map_err(|e| PhaseError::MetricsCollection(format!("{:#}", e)))
    }

    async fn phase_metrics(&self) -> Result<PhaseMetrics, PhaseError> {
        let start = self.collect().await?;
        let mut store = self.metrics_file.as_ref().map(|path| {
            MetricsStore::load_or_default(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable metrics file");
                MetricsStore::default()
            })
        });
        let baseline = match store.as_mut() {
            Some(store) => {
                let baseline = store.ensure_baseline(&start).clone();
                store.record_snapshot(start.clone());
                baseline
            }
            None => start.clone(),
        };
        Ok(PhaseMetrics {
            start,
            baseline,
            store,
        })
    }

    fn save_store(&self, store: Option<&MetricsStore>) {
        if let (Some(path), Some(store)) = (&self.metrics_file, store)
            && let Err(e) = store.save(path)
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist metrics");
        }
    }
}
