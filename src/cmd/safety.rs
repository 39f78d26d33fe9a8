//! Checkpoint inspection, backup integrity and replacement scoring.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

use super::super::CheckpointCommands;
use campaign::config::Config;

pub fn cmd_checkpoints(project_dir: &Path, command: CheckpointCommands) -> Result<()> {
    use campaign::checkpoint::{CheckpointId, CheckpointManager};

    let config = Config::new(project_dir.to_path_buf())?;
    let settings = config.settings().build();
    let events = super::run::event_log(&config, &settings);
    let manager = CheckpointManager::for_project(&config.project_dir, events);
    if !manager.has_backend() {
        anyhow::bail!(
            "{} is not a git repository; checkpoints are unavailable",
            config.project_dir.display()
        );
    }

    match command {
        CheckpointCommands::List => {
            let checkpoints = manager.list()?;
            if checkpoints.is_empty() {
                println!("No checkpoints.");
            }
            for checkpoint in checkpoints {
                println!(
                    "{} {} {}",
                    style(checkpoint.id.short()).cyan(),
                    style(checkpoint.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                    checkpoint.label
                );
            }
        }
        CheckpointCommands::Restore { id } => {
            let full = manager
                .list()?
                .into_iter()
                .map(|c| c.id)
                .find(|c| c.as_str().starts_with(&id))
                .unwrap_or_else(|| CheckpointId::new(id.clone()));
            manager
                .restore(&full)
                .with_context(|| format!("Failed to restore checkpoint {}", id))?;
            println!("Restored working tree to checkpoint {}", full.short());
        }
    }
    Ok(())
}

/// Returns whether rollback is possible for every pair.
pub fn cmd_check_backups(project_dir: &Path, pairs: &[String]) -> Result<bool> {
    use campaign::safety::SafetyValidator;

    let config = Config::new(project_dir.to_path_buf())?;
    let settings = config.settings().build();
    let validator = SafetyValidator::new(
        &config.project_dir,
        settings.commands.clone(),
        settings.thresholds.clone(),
    );

    let mut originals = Vec::new();
    let mut backups = Vec::new();
    for pair in pairs {
        let (original, backup) = pair
            .split_once('=')
            .with_context(|| format!("Expected ORIGINAL=BACKUP, got '{}'", pair))?;
        originals.push(resolve(&config.project_dir, original));
        backups.push(resolve(&config.project_dir, backup));
    }

    let capability = validator.validate_rollback_capability(&originals, &backups);
    if capability.can_rollback {
        println!("{} All {} backup(s) present and non-empty", style("OK").green(), backups.len());
    } else {
        println!(
            "{} Rollback not possible ({} violation(s)):",
            style("FAIL").red(),
            capability.errors.len()
        );
        for error in &capability.errors {
            println!("  - {}", error);
        }
    }
    Ok(capability.can_rollback)
}

fn resolve(project_dir: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        project_dir.join(path)
    }
}

pub struct ScoreArgs {
    pub kind: String,
    pub file: Option<PathBuf>,
    pub code: Option<String>,
    pub original: Option<String>,
    pub replacement: Option<String>,
    pub external_api: bool,
    pub error_handling: bool,
    pub function_parameter: bool,
}

pub fn cmd_score(project_dir: &Path, args: ScoreArgs) -> Result<()> {
    use campaign::safety::{Replacement, ReplacementContext, ReplacementKind, calculate_safety_score};

    let config = Config::new(project_dir.to_path_buf())?;
    let minimum = config.toml.safety.minimum_safety_score;

    let kind: ReplacementKind = args.kind.parse()?;
    let mut replacement = Replacement::new(kind);
    replacement.original = args.original.unwrap_or_default();
    replacement.replacement = args.replacement.unwrap_or_default();

    let code = args.code.as_deref().unwrap_or_default();
    let mut context = match &args.file {
        Some(file) => ReplacementContext::infer(file, code),
        None => ReplacementContext {
            file_path: None,
            ..ReplacementContext::infer(Path::new(""), code)
        },
    };
    context.uses_external_api |= args.external_api;
    context.in_error_handling |= args.error_handling;
    context.is_function_parameter |= args.function_parameter;

    let score = calculate_safety_score(&replacement, &context, minimum);
    let verdict = if score.is_valid {
        style("valid").green()
    } else {
        style("below threshold").red()
    };
    println!(
        "Safety score: {:.3} ({}, minimum {:.2})",
        score.safety_score, verdict, minimum
    );
    for warning in &score.warnings {
        println!("  warning: {}", warning);
    }
    for recommendation in &score.recommendations {
        println!("  recommendation: {}", recommendation);
    }
    Ok(())
}
