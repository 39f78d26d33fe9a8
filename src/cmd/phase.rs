//! Phase listing, status and safety event commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use campaign::config::Config;

pub fn cmd_phases(project_dir: &Path) -> Result<()> {
    use campaign::phase::PhasesFile;

    let config = Config::new(project_dir.to_path_buf())?;
    if !config.is_initialized() {
        println!();
        println!("No phases found. Run 'campaign init' first.");
        println!();
        return Ok(());
    }

    let phases_file = config.phases_file();
    let pf = PhasesFile::load(&phases_file)?;

    println!();
    println!("Phases loaded from: {}", phases_file.display());
    if let Some(generated_at) = &pf.generated_at {
        println!("Generated at: {}", generated_at);
    }
    println!();

    for phase in &pf.phases {
        println!("{} {}", style(&phase.id).yellow().bold(), phase.name);
        if !phase.description.is_empty() {
            println!("  {}", style(&phase.description).dim());
        }
        for tool in &phase.tools {
            let batching = match (tool.batch_size, tool.total_units, &tool.target_glob) {
                (Some(size), Some(units), _) => format!(" batches of {} over {} units", size, units),
                (Some(size), None, Some(glob)) => format!(" batches of {} over {}", size, glob),
                (Some(size), None, None) => format!(" batches of {}", size),
                (None, _, _) => String::new(),
            };
            println!(
                "  tool {:<20} [{}]{} `{} {}`",
                tool.name,
                tool.safety_level,
                batching,
                tool.command,
                tool.build_args().join(" ")
            );
        }
        for criterion in &phase.success_criteria {
            let severity = if criterion.hard { "hard" } else { "soft" };
            println!("  criterion {} ({})", criterion.expr(), severity);
        }
        println!();
    }

    println!("{} phase(s)", pf.phases.len());
    for warning in config.toml.validate_phases(&pf) {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    println!();
    Ok(())
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use campaign::audit::RunRecorder;
    use campaign::state::StateManager;

    println!();
    println!("Campaign Status");
    println!("===============");
    println!();

    let config = Config::new(project_dir.to_path_buf())?;
    if !config.is_initialized() {
        println!("Project: Not initialized");
        println!();
        println!("Run 'campaign init' to initialize the project.");
        println!();
        return Ok(());
    }
    println!("Project: Initialized ({})", config.project_dir.display());

    let state = StateManager::new(config.state_file());
    match state.last_completed_phase() {
        Some(phase) => println!("Last completed phase: {}", phase),
        None => println!("Last completed phase: none"),
    }

    let mut recorder = RunRecorder::new(&config.audit_dir());
    if recorder.load_current()?
        && let Some(run) = recorder.current_run()
    {
        println!(
            "Interrupted run: {} started {} ({} phase(s) recorded)",
            run.summary.run_id,
            run.summary.started_at.to_rfc3339(),
            run.summary.phases.len()
        );
    }

    match recorder.latest_run()? {
        Some(run) => {
            let totals = &run.summary.totals;
            println!();
            println!("Last run: {}", run.summary.run_id);
            println!("  started:     {}", run.summary.started_at.to_rfc3339());
            println!(
                "  phases:      {} completed, {} failed, {} rolled back, {} cancelled",
                totals.phases_completed,
                totals.phases_failed,
                totals.phases_rolled_back,
                totals.phases_cancelled
            );
            println!(
                "  changes:     {} files processed, {} items fixed",
                totals.files_processed, totals.items_fixed
            );
            if let Some(reason) = &run.summary.aborted_reason {
                println!("  stopped:     {}", reason);
            }
        }
        None => println!("Last run: none"),
    }
    println!();
    Ok(())
}

pub fn cmd_events(project_dir: &Path, limit: usize) -> Result<()> {
    use campaign::events::{Severity, load_persisted};

    let config = Config::new(project_dir.to_path_buf())?;
    let events = load_persisted(&config.events_file(), limit)?;
    if events.is_empty() {
        println!("No safety events recorded.");
        return Ok(());
    }

    for event in events {
        let severity = match event.severity {
            Severity::Info => style("INFO ").green(),
            Severity::Warning => style("WARN ").yellow(),
            Severity::Error => style("ERROR").red(),
        };
        println!(
            "{} {} {:<20} {} {}",
            style(event.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            severity,
            event.event_type.to_string(),
            event.phase.as_deref().unwrap_or("-"),
            event.description
        );
        if !event.action.is_empty() {
            println!("      -> {}", style(&event.action).dim());
        }
    }
    Ok(())
}
