//! Configuration view and validation commands (`campaign config`).

use anyhow::Result;
use console::style;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use campaign::campaign_config::{CampaignToml, default_config_toml};
    use campaign::config::Config;
    use campaign::phase::PhasesFile;

    let config = Config::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Campaign Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No campaign.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            println!("[campaign]");
            if let Some(name) = &toml.campaign.name {
                println!("  name = \"{}\"", name);
            }
            println!("  auto_rollback = {}", toml.campaign.auto_rollback);
            println!("  continue_on_failure = {}", toml.campaign.continue_on_failure);
            println!("  batch_interval_ms = {}", toml.campaign.batch_interval_ms);
            println!("  production = {}", toml.campaign.production);
            println!();

            println!("[safety]");
            println!("  minimum_safety_score = {}", toml.safety.minimum_safety_score);
            println!("  maximum_error_count = {}", toml.safety.maximum_error_count);
            println!(
                "  maximum_build_time_secs = {}",
                toml.safety.maximum_build_time_secs
            );
            println!(
                "  validate_build_after_tool = {}",
                toml.safety.validate_build_after_tool
            );
            println!("  run_tests = {}", toml.safety.run_tests);
            println!();

            println!("[commands]");
            for (key, value) in [
                ("compile", &toml.commands.compile),
                ("build", &toml.commands.build),
                ("test", &toml.commands.test),
            ] {
                match value {
                    Some(command) => println!("  {} = \"{}\"", key, command),
                    None => println!("  {} = {}", key, style("(not set)").dim()),
                }
            }
            println!("  timeout_secs = {}", toml.commands.timeout_secs);
            println!();

            println!("[metrics]");
            let metrics = &toml.metrics;
            let collected = [
                ("errors", metrics.errors.as_ref().map(|m| m.command())),
                ("warnings", metrics.warnings.as_ref().map(|m| m.command())),
                ("build_time", metrics.build_time.as_deref()),
            ];
            for (key, command) in collected {
                match command {
                    Some(command) => println!("  {} = \"{}\"", key, command),
                    None => println!("  {} = {}", key, style("(not collected)").dim()),
                }
            }
            for (name, command) in &metrics.custom {
                println!("  custom.{} = \"{}\"", name, command.command());
            }
            println!();

            println!("[events]");
            println!("  capacity = {}", toml.events.capacity);
            println!("  retain = {}", toml.events.retain);
            println!("  persist = {}", toml.events.persist);
            println!();

            let settings = config.settings().build();
            println!("Effective values (with env overrides):");
            println!("  auto_rollback = {}", settings.auto_rollback);
            println!("  batch_interval = {:?}", settings.batch_interval);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                CampaignToml::load(&config_path)?
            } else {
                println!("No campaign.toml found. Checking defaults.");
                CampaignToml::default()
            };
            let mut warnings = toml.validate();

            if config.is_initialized() {
                let phases = PhasesFile::load(&config.phases_file())?;
                warnings.extend(phases.validate());
                warnings.extend(toml.validate_phases(&phases));
            } else {
                warnings.push("No phases.json found. Run 'campaign init' first.".to_string());
            }

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("campaign.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.campaign_dir)?;
            std::fs::write(&config_path, default_config_toml())?;

            println!("Created campaign.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [commands] compile, build, test");
            println!("  - [metrics] errors, warnings, build_time and custom metrics");
            println!("  - [safety] thresholds and gates");
            println!();
        }
    }

    Ok(())
}
