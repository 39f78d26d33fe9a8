//! Campaign execution (`campaign run`).

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use campaign::batch::CancellationFlag;
use campaign::campaign::{Campaign, PhaseExecutor, RunOptions, render_report};
use campaign::checkpoint::CheckpointManager;
use campaign::config::{CampaignSettings, Config};
use campaign::events::SafetyEventLog;
use campaign::metrics::CommandMetricsProvider;
use campaign::phase::PhasesFile;
use campaign::safety::SafetyValidator;
use campaign::tool::ToolRunner;

pub struct RunArgs {
    pub from: Option<String>,
    pub only: Option<String>,
    pub resume: bool,
    pub no_rollback: bool,
    pub continue_on_failure: bool,
    pub json: bool,
    pub verbose: bool,
}

pub fn check_run_prerequisites(config: &Config) -> Result<()> {
    if !config.is_initialized() {
        anyhow::bail!("Campaign not initialized. Run 'campaign init' first.");
    }
    Ok(())
}

/// Event log configured from `[events]`, persisted to `audit/events.jsonl` when enabled.
pub fn event_log(config: &Config, settings: &CampaignSettings) -> SafetyEventLog {
    let log = SafetyEventLog::new(settings.events.capacity, settings.events.retain);
    if settings.events.persist {
        log.with_sink(config.events_file())
    } else {
        log
    }
}

/// Returns whether every selected phase completed.
pub async fn cmd_run(project_dir: &Path, args: RunArgs) -> Result<bool> {
    use campaign::audit::RunRecorder;
    use campaign::state::StateManager;
    use campaign::ui::CampaignUI;

    let config = Config::new(project_dir.to_path_buf())?;
    check_run_prerequisites(&config)?;
    config.ensure_directories()?;

    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }

    let phases = PhasesFile::load(&config.phases_file())?;
    let problems = phases.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid phases.json:\n  - {}", problems.join("\n  - "));
    }

    let mut builder = config.settings();
    if args.no_rollback {
        builder = builder.auto_rollback(false);
    }
    if args.continue_on_failure {
        builder = builder.continue_on_failure(true);
    }
    let settings = builder.build();

    let events = event_log(&config, &settings);
    let cancel = CancellationFlag::new();
    let checkpoints = Arc::new(CheckpointManager::for_project(
        &config.project_dir,
        events.clone(),
    ));
    let validator = Arc::new(SafetyValidator::new(
        &config.project_dir,
        settings.commands.clone(),
        settings.thresholds.clone(),
    ));
    let metrics = Arc::new(CommandMetricsProvider::new(
        &config.project_dir,
        config.toml.metrics.clone(),
        settings.command_timeout(),
    ));

    let ui = (!args.json).then(|| {
        Arc::new(CampaignUI::new(phases.phases.len() as u64, args.verbose))
    });

    let executor = PhaseExecutor::new(
        settings,
        checkpoints,
        validator,
        metrics,
        ToolRunner::new(&config.project_dir),
        events,
        cancel.clone(),
    )
    .with_metrics_store(config.metrics_file())
    .with_ui(ui.clone());

    let mut campaign = Campaign::new(executor, phases.phases, config.project_dir.clone())
        .with_state(StateManager::new(config.state_file()))
        .with_recorder(RunRecorder::new(&config.audit_dir()))
        .with_ui(ui);

    let ctrl_c_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping at the next batch or phase boundary");
            ctrl_c_flag.cancel();
        }
    });

    let options = RunOptions {
        from: args.from,
        only: args.only,
        resume: args.resume,
    };
    let (summary, outcome) = campaign.run_with_summary(&options).await;

    if args.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
        println!("{}", json);
    } else {
        println!();
        print!("{}", render_report(&summary));
    }

    outcome?;
    Ok(summary.all_success())
}
