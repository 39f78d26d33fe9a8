//! Metrics snapshot and baseline (`campaign metrics`).

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

pub async fn cmd_metrics(project_dir: &Path, reset_baseline: bool) -> Result<()> {
    use campaign::config::Config;
    use campaign::metrics::{CommandMetricsProvider, MetricsProvider, MetricsStore, ProgressMetrics};
    use campaign::phase::{PhasesFile, SuccessCriterion};

    let config = Config::new(project_dir.to_path_buf())?;
    let settings = config.settings().build();
    let provider = CommandMetricsProvider::new(
        &config.project_dir,
        config.toml.metrics.clone(),
        settings.command_timeout(),
    );

    let snapshot = provider
        .collect()
        .await
        .context("Failed to collect metrics")?;

    let metrics_file = config.metrics_file();
    let mut store = MetricsStore::load_or_default(&metrics_file)?;
    if reset_baseline {
        store.reset_baseline(Some(snapshot.clone()));
        println!("Baseline reset to the current snapshot.");
    }
    let baseline = store.ensure_baseline(&snapshot).clone();
    store.record_snapshot(snapshot.clone());
    store.save(&metrics_file)?;

    let criteria: Vec<SuccessCriterion> = if config.is_initialized() {
        PhasesFile::load(&config.phases_file())?
            .phases
            .into_iter()
            .flat_map(|p| p.success_criteria)
            .collect()
    } else {
        Vec::new()
    };
    let progress = ProgressMetrics::compute(&baseline, snapshot, &criteria);

    println!();
    println!(
        "Metrics at {} (baseline {})",
        progress.snapshot.captured_at.to_rfc3339(),
        progress.baseline.captured_at.to_rfc3339()
    );
    println!();
    println!(
        "{:<24} {:>10} {:>10} {:>10} {:>8}",
        "Metric", "Current", "Baseline", "Target", "Done"
    );
    for (name, dim) in &progress.dimensions {
        let target = dim
            .target
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let done = format!("{:.0}%", dim.percentage);
        let done = if dim.percentage >= 100.0 {
            style(done).green()
        } else {
            style(done).yellow()
        };
        println!(
            "{:<24} {:>10} {:>10} {:>10} {:>8}",
            name, dim.current, dim.baseline, target, done
        );
    }
    println!();
    for (phase, validation) in &store.validations {
        let status = if validation.success {
            style("passed").green()
        } else {
            style("failed").red()
        };
        println!(
            "Last validation of {}: {} ({:.0}% complete)",
            phase, status, validation.completion_percentage
        );
    }
    Ok(())
}
