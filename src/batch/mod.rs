//! Batch Orchestrator: runs a tool over `ceil(units / batch_size)` sequential batches.
//!
//! Each batch gets a scoped configuration (`--max-files=<batch_size>`). A failed batch is
//! recorded and the next one still runs. The orchestrator pauses for a fixed interval between
//! batches and checks the cancellation flag before starting each one.

use crate::events::{SafetyEventLog, SafetyEventType, Severity};
use crate::phase::ToolConfiguration;
use crate::safety::SafetyValidator;
use crate::tool::{ToolExecutionResult, ToolRunner};
use crate::ui::CampaignUI;
use crate::util::duration_serde;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Cooperative cancellation shared between the driver, the executor and the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregate over the batches of one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProcessingResult {
    pub tool: String,
    /// `ceil(total_units / batch_size)`.
    pub total_batches: usize,
    /// Batches actually started; lower than `total_batches` only after cancellation.
    pub processed_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub total_files_processed: u64,
    pub total_items_changed: u64,
    /// Mean over successful batches; zero when none succeeded.
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
    /// Mean over successful batches that reported a score; zero when none did.
    pub average_safety_score: f64,
    pub errors: Vec<String>,
    #[serde(default)]
    pub batch_results: Vec<ToolExecutionResult>,
    #[serde(default)]
    pub cancelled: bool,
}

impl BatchProcessingResult {
    pub fn success(&self) -> bool {
        self.failed_batches == 0 && !self.cancelled
    }

    /// Collapse into one result for the phase's per-tool accounting.
    pub fn as_tool_result(&self) -> ToolExecutionResult {
        let mut merged = ToolExecutionResult {
            tool: self.tool.clone(),
            success: self.success(),
            files_processed: self.total_files_processed,
            errors: self.errors.clone(),
            ..Default::default()
        };
        for batch in &self.batch_results {
            merged.items_removed += batch.items_removed;
            merged.items_fixed += batch.items_fixed;
            merged.items_prefixed += batch.items_prefixed;
            merged.duration += batch.duration;
            merged.warnings.extend(batch.warnings.iter().cloned());
        }
        if self.successful_batches > 0 && self.average_safety_score > 0.0 {
            merged.safety_score = Some(self.average_safety_score);
        }
        if self.cancelled {
            merged.errors.push("Cancelled between batches".to_string());
        }
        merged
    }

    fn finalize(&mut self) {
        let successful: Vec<&ToolExecutionResult> =
            self.batch_results.iter().filter(|r| r.success).collect();
        self.average_duration = if successful.is_empty() {
            Duration::ZERO
        } else {
            successful.iter().map(|r| r.duration).sum::<Duration>() / successful.len() as u32
        };
        let scores: Vec<f64> = successful.iter().filter_map(|r| r.safety_score).collect();
        self.average_safety_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
    }
}

pub struct BatchOrchestrator {
    runner: ToolRunner,
    validator: Arc<SafetyValidator>,
    events: SafetyEventLog,
    interval: Duration,
    cancel: CancellationFlag,
    ui: Option<Arc<CampaignUI>>,
}

impl BatchOrchestrator {
    pub fn new(
        runner: ToolRunner,
        validator: Arc<SafetyValidator>,
        events: SafetyEventLog,
        interval: Duration,
        cancel: CancellationFlag,
    ) -> Self {
        Self {
            runner,
            validator,
            events,
            interval,
            cancel,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Option<Arc<CampaignUI>>) -> Self {
        self.ui = ui;
        self
    }

    pub async fn process_batches(
        &self,
        tool: &ToolConfiguration,
        total_units: usize,
        batch_size: usize,
    ) -> BatchProcessingResult {
        let batch_size = batch_size.max(1);
        let total_batches = total_units.div_ceil(batch_size);
        let mut result = BatchProcessingResult {
            tool: tool.name.clone(),
            total_batches,
            ..Default::default()
        };

        tracing::info!(tool = %tool.name, total_units, batch_size, total_batches, "processing batches");
        let spinner = self
            .ui
            .as_ref()
            .map(|ui| ui.start_batches(&tool.name, total_batches));

        for index in 0..total_batches {
            if self.cancel.is_cancelled() {
                tracing::warn!(tool = %tool.name, batch = index + 1, "cancelled before batch");
                result.cancelled = true;
                break;
            }
            if index > 0 && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
                if self.cancel.is_cancelled() {
                    result.cancelled = true;
                    break;
                }
            }

            if let Some(pb) = &spinner {
                pb.set_position(index as u64);
                pb.set_message(format!("batch {}/{}", index + 1, total_batches));
            }

            let batch = self.run_batch(tool, batch_size, index, total_batches).await;
            result.processed_batches += 1;
            result.total_files_processed += batch.files_processed;
            result.total_items_changed += batch.items_changed();
            if batch.success {
                result.successful_batches += 1;
            } else {
                result.failed_batches += 1;
                for error in &batch.errors {
                    result
                        .errors
                        .push(format!("batch {}/{}: {}", index + 1, total_batches, error));
                }
                self.events.record(
                    SafetyEventType::ToolFailed,
                    Severity::Warning,
                    format!(
                        "{} batch {}/{} failed: {}",
                        tool.name,
                        index + 1,
                        total_batches,
                        batch.errors.first().map(String::as_str).unwrap_or("unknown error")
                    ),
                    "continuing with next batch",
                );
            }
            result.batch_results.push(batch);
        }

        result.finalize();
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        tracing::info!(
            tool = %tool.name,
            successful = result.successful_batches,
            failed = result.failed_batches,
            cancelled = result.cancelled,
            "batches finished"
        );
        result
    }

    async fn run_batch(
        &self,
        tool: &ToolConfiguration,
        batch_size: usize,
        index: usize,
        total: usize,
    ) -> ToolExecutionResult {
        let scoped = tool.for_batch(batch_size);
        let mut batch = self.runner.run(&scoped).await;
        if !batch.success {
            return batch;
        }

        let gate_errors = self.validator.assess_tool_result(&batch, tool.safety_level);
        if !gate_errors.is_empty() {
            batch.errors.extend(gate_errors);
            batch.success = false;
            return batch;
        }

        if tool.safety_level.compile_after_each_batch() && self.validator.has_compile_command() {
            let compile = self.validator.validate_compilation().await;
            if !compile.build_successful {
                tracing::warn!(
                    tool = %tool.name,
                    batch = index + 1,
                    total,
                    errors = compile.compilation_errors.len(),
                    "compile check failed after batch"
                );
                batch.errors.push(format!(
                    "Compilation failed after batch with {} error(s)",
                    compile.compilation_errors.len()
                ));
                batch
                    .errors
                    .extend(compile.compilation_errors.into_iter().take(5));
                batch.success = false;
            }
        }
        batch
    }
}
