use crate::campaign::{PhaseResult, PhaseState};
use crate::checkpoint::CheckpointId;
use crate::tool::ToolExecutionResult;
use crate::ui::icons::{CHECK, CHECKPOINT, CROSS, ROLLBACK, SPARKLE, STOP, TOOL, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a campaign run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar: how many phases have finished
/// - Tool spinner: the tool currently running
///
/// Batch bars are added below on demand and removed when the tool finishes.
pub struct CampaignUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    tool_bar: ProgressBar,
    verbose: bool,
}

impl CampaignUI {
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let tool_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let tool_bar = multi.add(ProgressBar::new_spinner());
        tool_bar.set_style(tool_style);
        tool_bar.set_prefix("  Tool");

        Self {
            multi,
            phase_bar,
            tool_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to `eprintln!`.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn set_phase_total(&self, total: u64) {
        self.phase_bar.set_length(total);
    }

    pub fn start_phase(&self, id: &str, name: &str) {
        self.phase_bar
            .set_message(format!("{}: {}", style(id).yellow(), name));
    }

    pub fn checkpoint(&self, label: &str, id: &CheckpointId) {
        if id.is_sentinel() {
            self.print_line(format!(
                "  {} {}",
                WARN,
                style(format!("No checkpoint for '{}': rollback unavailable", label)).yellow()
            ));
        } else if self.verbose {
            self.print_line(format!(
                "  {} Checkpoint {} {}",
                CHECKPOINT,
                style(label).cyan(),
                style(id.short()).dim()
            ));
        }
    }

    pub fn start_tool(&self, name: &str) {
        self.tool_bar
            .set_message(format!("{} {}", TOOL, style(name).cyan()));
        self.tool_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn tool_finished(&self, result: &ToolExecutionResult) {
        let line = if result.success {
            format!(
                "  {} {} {} files, {} items",
                CHECK,
                style(&result.tool).green(),
                result.files_processed,
                result.items_changed()
            )
        } else {
            format!(
                "  {} {} {}",
                CROSS,
                style(&result.tool).red(),
                style(result.errors.first().map(String::as_str).unwrap_or("failed")).dim()
            )
        };
        self.print_line(line);
        if self.verbose {
            for warning in &result.warnings {
                self.print_line(format!("      {}", style(warning).dim()));
            }
        }
        self.tool_bar.set_message("");
    }

    /// Add a bar for the batches of one tool.
    pub fn start_batches(&self, tool: &str, total: usize) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.green/white}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("=> ");
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(style);
        bar.set_prefix(format!("  {}", tool));
        bar
    }

    pub fn rollback(&self, phase: &str, id: &CheckpointId) {
        self.print_line(format!(
            "  {} {}",
            ROLLBACK,
            style(format!("Rolling back phase {} to {}", phase, id.short()))
                .yellow()
                .bold()
        ));
    }

    /// Advance the phase bar and print the phase outcome.
    pub fn phase_finished(&self, result: &PhaseResult) {
        self.phase_bar.inc(1);
        let secs = result.execution_time.as_secs_f64();
        let line = match result.state {
            PhaseState::Completed => format!(
                "{} Phase {} complete in {:.1}s ({} files, {} items)",
                SPARKLE,
                style(&result.phase_id).green().bold(),
                secs,
                result.files_processed,
                result.items_fixed
            ),
            PhaseState::RolledBack => format!(
                "{} Phase {} rolled back",
                ROLLBACK,
                style(&result.phase_id).yellow().bold()
            ),
            PhaseState::Cancelled => format!(
                "{} Phase {} cancelled",
                STOP,
                style(&result.phase_id).yellow().bold()
            ),
            _ => format!(
                "{} Phase {} failed{}",
                CROSS,
                style(&result.phase_id).red().bold(),
                if result.fatal { " (FATAL)" } else { "" }
            ),
        };
        self.print_line(line);
        for error in result.errors.iter().take(5) {
            self.print_line(format!("    {}", style(error).red()));
        }
    }

    pub fn finish(&self, all_completed: bool) {
        self.tool_bar.finish_and_clear();
        if all_completed {
            self.phase_bar
                .finish_with_message(format!("{}", style("campaign complete").green()));
        } else {
            self.phase_bar
                .abandon_with_message(format!("{}", style("campaign stopped").red()));
        }
    }
}
