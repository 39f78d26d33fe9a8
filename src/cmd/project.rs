//! Project initialization (`campaign init`).

use anyhow::{Context, Result};
use std::path::Path;

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    use campaign::campaign_config::default_config_toml;
    use campaign::config::Config;
    use campaign::phase::example_phases;

    std::fs::create_dir_all(project_dir).context("Failed to create project directory")?;
    let config = Config::new(project_dir.to_path_buf())?;
    let was_initialized = config.is_initialized();
    config.ensure_directories()?;

    let config_file = config.config_file();
    let wrote_config = force || !config_file.exists();
    if wrote_config {
        std::fs::write(&config_file, default_config_toml())
            .with_context(|| format!("Failed to write {}", config_file.display()))?;
    }

    let phases_file = config.phases_file();
    let wrote_phases = force || !phases_file.exists();
    if wrote_phases {
        example_phases().save(&phases_file)?;
    }

    if was_initialized && !force {
        println!(
            "Campaign already initialized at {}",
            config.campaign_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    println!(
        "Initialized campaign at {}",
        config.campaign_dir.display()
    );
    println!();
    println!("Created directory structure:");
    println!("  .campaign/");
    println!("  ├── campaign.toml   # Safety thresholds, commands, metrics");
    println!("  ├── phases.json     # Campaign phases (edit before running)");
    println!("  └── audit/runs/     # Run records and safety events");
    println!();
    println!("Next steps:");
    println!("  1. Configure [commands] and [metrics] in campaign.toml");
    println!("  2. Replace the example phases in phases.json");
    println!("  3. Run `campaign config validate`, then `campaign run`");

    Ok(())
}
