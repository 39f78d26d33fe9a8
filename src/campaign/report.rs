//! Plain-text campaign report: achievements, issues and next steps per phase.

use super::state::{CampaignSummary, PhaseResult, PhaseState};
use std::fmt::Write;

const MAX_LISTED: usize = 10;

pub fn render_report(summary: &CampaignSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Campaign run {}", summary.run_id);
    let _ = writeln!(out, "Started: {}", summary.started_at.to_rfc3339());
    if let Some(ended) = summary.ended_at {
        let elapsed = ended - summary.started_at;
        let _ = writeln!(
            out,
            "Ended:   {} ({:.1}s)",
            ended.to_rfc3339(),
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }
    let totals = &summary.totals;
    let _ = writeln!(
        out,
        "Phases:  {} completed, {} failed, {} rolled back, {} cancelled",
        totals.phases_completed,
        totals.phases_failed,
        totals.phases_rolled_back,
        totals.phases_cancelled
    );
    let _ = writeln!(
        out,
        "Totals:  {} files processed, {} items fixed",
        totals.files_processed, totals.items_fixed
    );
    if let Some(reason) = &summary.aborted_reason {
        let _ = writeln!(out, "Stopped: {}", reason);
    }

    for phase in &summary.phases {
        out.push('\n');
        render_phase(&mut out, phase);
    }
    out
}

fn render_phase(out: &mut String, phase: &PhaseResult) {
    let marker = match phase.state {
        PhaseState::Completed => "COMPLETED",
        PhaseState::RolledBack => "ROLLED BACK",
        PhaseState::Cancelled => "CANCELLED",
        _ if phase.fatal => "FAILED (FATAL)",
        _ => "FAILED",
    };
    let _ = writeln!(
        out,
        "== Phase {} [{}] in {:.1}s",
        phase.phase_id,
        marker,
        phase.execution_time.as_secs_f64()
    );

    let _ = writeln!(out, "Achievements:");
    let _ = writeln!(
        out,
        "  - {} files processed, {} items fixed",
        phase.files_processed, phase.items_fixed
    );
    let delta = &phase.metrics_delta;
    if delta.errors_reduced != 0 {
        let _ = writeln!(out, "  - errors reduced by {}", delta.errors_reduced);
    }
    if delta.warnings_reduced != 0 {
        let _ = writeln!(out, "  - warnings reduced by {}", delta.warnings_reduced);
    }
    for (name, change) in &delta.custom_delta {
        if *change != 0.0 {
            let _ = writeln!(out, "  - {} reduced by {}", name, change);
        }
    }
    if let Some(validation) = &phase.validation {
        let _ = writeln!(
            out,
            "  - completion {:.0}%",
            validation.completion_percentage
        );
    }

    let warnings = phase
        .validation
        .as_ref()
        .map(|v| v.warnings.as_slice())
        .unwrap_or_default();
    if !phase.errors.is_empty() || !warnings.is_empty() || phase.degraded {
        let _ = writeln!(out, "Issues:");
        if phase.degraded {
            let _ = writeln!(out, "  - ran without a checkpoint (rollback unavailable)");
        }
        for error in phase.errors.iter().take(MAX_LISTED) {
            let _ = writeln!(out, "  - error: {}", error);
        }
        if phase.errors.len() > MAX_LISTED {
            let _ = writeln!(out, "  - ... {} more errors", phase.errors.len() - MAX_LISTED);
        }
        for warning in warnings.iter().take(MAX_LISTED) {
            let _ = writeln!(out, "  - warning: {}", warning);
        }
    }

    let steps = next_steps(phase);
    if !steps.is_empty() {
        let _ = writeln!(out, "Next steps:");
        for step in steps {
            let _ = writeln!(out, "  - {}", step);
        }
    }
}

fn next_steps(phase: &PhaseResult) -> Vec<String> {
    if phase.fatal {
        return vec![
            "Inspect the working tree manually; automatic rollback did not complete".to_string(),
            "List the snapshots with `campaign checkpoints list`".to_string(),
        ];
    }
    if phase.state == PhaseState::Cancelled {
        let mut steps = vec![format!(
            "Resume with `campaign run --from {}` once the tree is inspected",
            phase.phase_id
        )];
        if let Some(checkpoint) = &phase.checkpoint {
            steps.push(format!(
                "Restore the phase start with `campaign checkpoints restore {}` if needed",
                checkpoint
            ));
        }
        return steps;
    }
    phase
        .validation
        .as_ref()
        .map(|v| v.next_steps.clone())
        .unwrap_or_else(|| vec![format!("Re-run phase {} after fixing the errors above", phase.phase_id)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointId;

    fn completed(id: &str) -> PhaseResult {
        let mut result = PhaseResult::new(id);
        result.transition(PhaseState::Checkpointed).unwrap();
        result.transition(PhaseState::Validating).unwrap();
        result.transition(PhaseState::Completed).unwrap();
        result.files_processed = 12;
        result.items_fixed = 7;
        result.metrics_delta.errors_reduced = 5;
        result
    }

    #[test]
    fn test_report_lists_achievements_and_totals() {
        let mut summary = CampaignSummary::new();
        summary.add_result(completed("phase-1"));
        summary.finish(None);

        let report = render_report(&summary);
        assert!(report.contains("1 completed, 0 failed"));
        assert!(report.contains("== Phase phase-1 [COMPLETED]"));
        assert!(report.contains("12 files processed, 7 items fixed"));
        assert!(report.contains("errors reduced by 5"));
        assert!(!report.contains("Stopped:"));
    }

    #[test]
    fn test_report_flags_fatal_and_degraded() {
        let mut failed = PhaseResult::new("phase-2");
        failed.degraded = true;
        failed.fatal = true;
        failed.abort("Rollback failed: disk gone");

        let mut summary = CampaignSummary::new();
        summary.add_result(failed);
        summary.finish(Some("rollback of phase phase-2 failed".into()));

        let report = render_report(&summary);
        assert!(report.contains("[FAILED (FATAL)]"));
        assert!(report.contains("ran without a checkpoint"));
        assert!(report.contains("error: Rollback failed: disk gone"));
        assert!(report.contains("Stopped: rollback of phase phase-2 failed"));
        assert!(report.contains("automatic rollback did not complete"));
    }

    #[test]
    fn test_cancelled_phase_suggests_restore() {
        let mut cancelled = PhaseResult::new("phase-3");
        cancelled.checkpoint = Some(CheckpointId::new("abc123def"));
        cancelled.transition(PhaseState::Cancelled).unwrap();

        let mut summary = CampaignSummary::new();
        summary.add_result(cancelled);
        let report = render_report(&summary);
        assert!(report.contains("campaign run --from phase-3"));
        assert!(report.contains("checkpoints restore abc123def"));
    }
}
