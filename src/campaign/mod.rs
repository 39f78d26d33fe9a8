//! Campaign driver: runs the configured phases in order on top of the [`PhaseExecutor`].
//!
//! Phases run strictly sequentially against one working tree. The driver checks the
//! cancellation flag at phase boundaries, stops after a failed or rolled-back phase unless
//! `continue_on_failure` is set, and always stops after a fatal rollback failure.

pub mod executor;
pub mod report;
pub mod state;

pub use executor::PhaseExecutor;
pub use report::render_report;
pub use state::{CampaignSummary, CampaignTotals, MetricsDelta, PhaseResult, PhaseState};

use crate::audit::{RunConfig, RunRecorder};
use crate::errors::CampaignError;
use crate::events::{SafetyEventType, Severity};
use crate::phase::CampaignPhase;
use crate::state::StateManager;
use crate::ui::CampaignUI;
use std::path::PathBuf;
use std::sync::Arc;

/// Which phases a run covers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Start at this phase id.
    pub from: Option<String>,
    /// Run only this phase id.
    pub only: Option<String>,
    /// Start after the last phase recorded as completed in the state file.
    pub resume: bool,
}

pub struct Campaign {
    executor: PhaseExecutor,
    phases: Vec<CampaignPhase>,
    project_dir: PathBuf,
    state: Option<StateManager>,
    recorder: Option<RunRecorder>,
    ui: Option<Arc<CampaignUI>>,
}

impl Campaign {
    pub fn new(executor: PhaseExecutor, phases: Vec<CampaignPhase>, project_dir: PathBuf) -> Self {
        Self {
            executor,
            phases,
            project_dir,
            state: None,
            recorder: None,
            ui: None,
        }
    }

    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_recorder(mut self, recorder: RunRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_ui(mut self, ui: Option<Arc<CampaignUI>>) -> Self {
        self.ui = ui;
        self
    }

    pub fn executor(&self) -> &PhaseExecutor {
        &self.executor
    }

    /// Resolve `options` to the ordered list of phases to execute.
    pub fn select_phases(&self, options: &RunOptions) -> Result<Vec<CampaignPhase>, CampaignError> {
        if let Some(id) = &options.only {
            return self
                .phases
                .iter()
                .find(|p| &p.id == id)
                .map(|p| vec![p.clone()])
                .ok_or_else(|| CampaignError::UnknownPhase(id.clone()));
        }

        let mut start = match &options.from {
            Some(id) => self
                .phases
                .iter()
                .position(|p| &p.id == id)
                .ok_or_else(|| CampaignError::UnknownPhase(id.clone()))?,
            None => 0,
        };

        if options.resume
            && let Some(last) = self.state.as_ref().and_then(|s| s.last_completed_phase())
        {
            match self.phases.iter().position(|p| p.id == last) {
                Some(index) => start = start.max(index + 1),
                None => tracing::warn!(phase = %last, "last completed phase is not configured; starting over"),
            }
        }

        Ok(self.phases[start..].to_vec())
    }

    pub async fn run(&mut self, options: &RunOptions) -> Result<CampaignSummary, CampaignError> {
        let (summary, outcome) = self.run_with_summary(options).await;
        outcome.map(|()| summary)
    }

    /// Run and always hand back the summary, alongside the fatal error if one stopped the run.
    pub async fn run_with_summary(
        &mut self,
        options: &RunOptions,
    ) -> (CampaignSummary, Result<(), CampaignError>) {
        let mut summary = CampaignSummary::new();
        let selected = match self.select_phases(options) {
            Ok(selected) => selected,
            Err(e) => {
                summary.finish(Some(e.to_string()));
                return (summary, Err(e));
            }
        };

        if let Some(ui) = &self.ui {
            ui.set_phase_total(selected.len() as u64);
        }
        tracing::info!(
            run_id = %summary.run_id,
            phases = selected.len(),
            "starting campaign"
        );

        if let Some(recorder) = self.recorder.as_mut() {
            let config = RunConfig::from_settings(
                &self.project_dir,
                self.executor.settings(),
                selected.iter().map(|p| p.id.clone()).collect(),
            );
            if let Err(e) = recorder.start_run(config, &summary) {
                tracing::warn!(error = %e, "failed to record run start");
            }
        }

        let continue_on_failure = self.executor.settings().continue_on_failure;
        let mut aborted = None;
        let mut fatal = None;

        for phase in &selected {
            if self.executor.cancellation().is_cancelled() {
                self.executor.events().record(
                    SafetyEventType::CampaignCancelled,
                    Severity::Warning,
                    format!("Campaign cancelled before phase {}", phase.id),
                    "remaining phases skipped",
                );
                aborted = Some(format!("cancelled before phase {}", phase.id));
                break;
            }

            self.save_state(&phase.id, "started");
            if let Some(ui) = &self.ui {
                ui.start_phase(&phase.id, &phase.name);
            }

            let result = self.executor.execute_phase(phase).await;

            self.save_state(&phase.id, result.state.as_str());
            if let Some(ui) = &self.ui {
                ui.phase_finished(&result);
            }

            let state = result.state;
            if result.fatal {
                fatal = Some(CampaignError::RollbackFailed {
                    phase: phase.id.clone(),
                    checkpoint: result
                        .checkpoint
                        .as_ref()
                        .map(|c| c.to_string())
                        .unwrap_or_default(),
                    message: result.rollback_error.clone().unwrap_or_default(),
                });
            }
            summary.add_result(result);
            if let Some(recorder) = self.recorder.as_mut()
                && let Err(e) = recorder.update(&summary)
            {
                tracing::warn!(error = %e, "failed to record phase result");
            }

            if let Some(error) = &fatal {
                tracing::error!(phase = %phase.id, error = %error, "fatal rollback failure");
                aborted = Some(format!("rollback of phase {} failed", phase.id));
                break;
            }
            if state == PhaseState::Cancelled {
                aborted = Some(format!("cancelled during phase {}", phase.id));
                break;
            }
            if state != PhaseState::Completed && !continue_on_failure {
                aborted = Some(format!("phase {} ended {}", phase.id, state));
                break;
            }
        }

        summary.finish(aborted);
        if let Some(ui) = &self.ui {
            ui.finish(summary.all_success());
        }
        if let Some(recorder) = self.recorder.as_mut() {
            match recorder.finish_run(&summary) {
                Ok(path) => tracing::info!(path = %path.display(), "run recorded"),
                Err(e) => tracing::warn!(error = %e, "failed to record run"),
            }
        }

        tracing::info!(
            run_id = %summary.run_id,
            completed = summary.totals.phases_completed,
            failed = summary.totals.phases_failed,
            rolled_back = summary.totals.phases_rolled_back,
            "campaign finished"
        );

        match fatal {
            Some(error) => (summary, Err(error)),
            None => (summary, Ok(())),
        }
    }

    fn save_state(&self, phase: &str, status: &str) {
        if let Some(state) = &self.state
            && let Err(e) = state.save(phase, status)
        {
            tracing::warn!(phase, status, error = %e, "failed to write state file");
        }
    }
}
