use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "campaign")]
#[command(
    version,
    about = "Drive multi-phase codebase transformations behind checkpoints, safety gates and rollback"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .campaign/ with a default campaign.toml and example phases
    Init {
        /// Overwrite existing configuration files
        #[arg(long)]
        force: bool,
    },
    /// Execute the campaign
    Run {
        /// Start at this phase
        #[arg(long)]
        from: Option<String>,
        /// Run only this phase
        #[arg(long, conflicts_with = "from")]
        only: Option<String>,
        /// Continue after the last completed phase
        #[arg(long)]
        resume: bool,
        /// Disable automatic rollback on validation failure
        #[arg(long)]
        no_rollback: bool,
        /// Keep going after a failed or rolled-back phase
        #[arg(long)]
        continue_on_failure: bool,
        /// Print the campaign summary as JSON instead of the text report
        #[arg(long)]
        json: bool,
    },
    /// Show initialisation state, last completed phase and last run
    Status,
    /// List configured phases, tools and success criteria
    Phases,
    /// Collect a metrics snapshot and show progress against the baseline
    Metrics {
        /// Replace the stored baseline with the fresh snapshot
        #[arg(long)]
        reset_baseline: bool,
    },
    /// Show persisted safety events
    Events {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Inspect or restore working-tree checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Check that every ORIGINAL=BACKUP pair has a non-empty backup
    CheckBackups {
        #[arg(required = true, value_name = "ORIGINAL=BACKUP")]
        pairs: Vec<String>,
    },
    /// Score one automated replacement
    Score {
        /// Replacement kind (array-type, unused-variable, type-assertion, ...)
        #[arg(long)]
        kind: String,
        /// File the replacement is in
        #[arg(long)]
        file: Option<PathBuf>,
        /// Surrounding source text used to infer the context
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        original: Option<String>,
        #[arg(long)]
        replacement: Option<String>,
        #[arg(long)]
        external_api: bool,
        #[arg(long)]
        error_handling: bool,
        #[arg(long)]
        function_parameter: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// List checkpoints, oldest first
    List,
    /// Restore the working tree to a checkpoint
    Restore { id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and phases and show any warnings
    Validate,
    /// Initialize a default campaign.toml file
    Init,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("campaign=debug")
        } else {
            EnvFilter::new("campaign=info")
        }
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, *force)?,
        Commands::Run {
            from,
            only,
            resume,
            no_rollback,
            continue_on_failure,
            json,
        } => {
            let args = cmd::RunArgs {
                from: from.clone(),
                only: only.clone(),
                resume: *resume,
                no_rollback: *no_rollback,
                continue_on_failure: *continue_on_failure,
                json: *json,
                verbose: cli.verbose,
            };
            let success = cmd::cmd_run(&project_dir, args).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Phases => cmd::cmd_phases(&project_dir)?,
        Commands::Metrics { reset_baseline } => {
            cmd::cmd_metrics(&project_dir, *reset_baseline).await?
        }
        Commands::Events { limit } => cmd::cmd_events(&project_dir, *limit)?,
        Commands::Checkpoints { command } => cmd::cmd_checkpoints(&project_dir, command.clone())?,
        Commands::CheckBackups { pairs } => {
            if !cmd::cmd_check_backups(&project_dir, pairs)? {
                std::process::exit(1);
            }
        }
        Commands::Score {
            kind,
            file,
            code,
            original,
            replacement,
            external_api,
            error_handling,
            function_parameter,
        } => {
            let args = cmd::ScoreArgs {
                kind: kind.clone(),
                file: file.clone(),
                code: code.clone(),
                original: original.clone(),
                replacement: replacement.clone(),
                external_api: *external_api,
                error_handling: *error_handling,
                function_parameter: *function_parameter,
            };
            cmd::cmd_score(&project_dir, args)?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
