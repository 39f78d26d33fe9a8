//! Integration tests for the campaign CLI
//!
//! These tests drive the binary end to end against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a campaign Command
fn campaign() -> Command {
    let mut cmd = cargo_bin_cmd!("campaign");
    cmd.env("CAMPAIGN_BATCH_INTERVAL_MS", "0");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a campaign in a temp directory
fn init_campaign_project(dir: &TempDir) {
    campaign()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn write_phases(dir: &TempDir, json: &str) {
    fs::write(dir.path().join(".campaign/phases.json"), json).unwrap();
}

fn write_config(dir: &TempDir, toml: &str) {
    fs::write(dir.path().join(".campaign/campaign.toml"), toml).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_campaign_help() {
        campaign().arg("--help").assert().success();
    }

    #[test]
    fn test_campaign_version() {
        campaign().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized campaign"));

        assert!(dir.path().join(".campaign/campaign.toml").exists());
        assert!(dir.path().join(".campaign/phases.json").exists());
        assert!(dir.path().join(".campaign/audit/runs").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_campaign_project(&dir);

        campaign()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));
    }

    #[test]
    fn test_status_initialized() {
        let dir = create_temp_project();
        init_campaign_project(&dir);

        campaign()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized"))
            .stdout(predicate::str::contains("Last run: none"));
    }

    #[test]
    fn test_phases_without_init() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("No phases found"));
    }

    #[test]
    fn test_phases_lists_example_campaign() {
        let dir = create_temp_project();
        init_campaign_project(&dir);

        campaign()
            .current_dir(dir.path())
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("phase-1"))
            .stdout(predicate::str::contains("remove-unused"))
            .stdout(predicate::str::contains("errorCount == 0"))
            .stdout(predicate::str::contains("2 phase(s)"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        init_campaign_project(&dir);

        campaign()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("phase-2"));
    }

    #[test]
    fn test_only_conflicts_with_from() {
        campaign()
            .args(["run", "--from", "a", "--only", "b"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No campaign.toml found"))
            .stdout(predicate::str::contains("auto_rollback = true"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created campaign.toml"));

        let content = fs::read_to_string(dir.path().join(".campaign/campaign.toml")).unwrap();
        assert!(content.contains("[safety]"));

        campaign()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_uncollected_metrics() {
        let dir = create_temp_project();
        init_campaign_project(&dir);

        campaign()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("does not collect"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(
            &dir,
            r#"
[safety]
validate_build_after_tool = false

[commands]
compile = "true"

[metrics]
errors = "echo 0"
"#,
        );
        write_phases(
            &dir,
            r#"{"phases": [{"id": "p1", "name": "One",
                "tools": [{"name": "noop", "command": "true"}],
                "success_criteria": ["errorCount == 0"]}]}"#,
        );

        campaign()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_shows_toml_content() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(
            &dir,
            r#"
[campaign]
name = "strict-types"

[commands]
build = "make"
"#,
        );

        campaign()
            .current_dir(dir.path())
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("name = \"strict-types\""))
            .stdout(predicate::str::contains("build = \"make\""));
    }
}

// =============================================================================
// Safety Tooling Tests
// =============================================================================

mod safety_tools {
    use super::*;

    #[test]
    fn test_score_prints_score() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .args(["score", "--kind", "unused-variable"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Safety score:"));
    }

    #[test]
    fn test_score_rejects_unknown_kind() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .args(["score", "--kind", "rename-everything"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown replacement kind"));
    }

    #[test]
    fn test_check_backups_passes_for_present_backups() {
        let dir = create_temp_project();
        fs::write(dir.path().join("a.ts"), "let a = 1;").unwrap();
        fs::write(dir.path().join("a.ts.bak"), "let a = 1;").unwrap();

        campaign()
            .current_dir(dir.path())
            .args(["check-backups", "a.ts=a.ts.bak"])
            .assert()
            .success()
            .stdout(predicate::str::contains("All 1 backup(s) present"));
    }

    #[test]
    fn test_check_backups_reports_every_violation() {
        let dir = create_temp_project();
        fs::write(dir.path().join("a.ts"), "let a = 1;").unwrap();
        fs::write(dir.path().join("b.ts"), "let b = 2;").unwrap();
        fs::write(dir.path().join("b.ts.bak"), "").unwrap();

        campaign()
            .current_dir(dir.path())
            .args(["check-backups", "a.ts=a.ts.bak", "b.ts=b.ts.bak"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("2 violation(s)"));
    }

    #[test]
    fn test_check_backups_rejects_malformed_pair() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .args(["check-backups", "a.ts"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ORIGINAL=BACKUP"));
    }

    #[test]
    fn test_checkpoints_require_git() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .args(["checkpoints", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not a git repository"));
    }
}

// =============================================================================
// Campaign Run Tests
// =============================================================================

mod runs {
    use super::*;

    const QUIET_CONFIG: &str = r#"
[safety]
validate_build_after_tool = false

[metrics]
errors = "echo 0"
"#;

    #[test]
    fn test_run_requires_init() {
        let dir = create_temp_project();

        campaign()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("campaign init"));
    }

    #[test]
    fn test_run_rejects_invalid_phases() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_phases(&dir, r#"{"phases": [{"id": "p1", "name": "One"}]}"#);

        campaign()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("declares no tools"));
    }

    #[test]
    fn test_run_completes_without_git() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(&dir, QUIET_CONFIG);
        write_phases(
            &dir,
            r#"{"phases": [{"id": "p1", "name": "One",
                "tools": [{"name": "fixer", "command": "echo '3 files processed'"}],
                "success_criteria": ["errorCount == 0"]}]}"#,
        );

        campaign()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("== Phase p1 [COMPLETED]"))
            .stdout(predicate::str::contains("3 files processed"));

        campaign()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Last completed phase: p1"))
            .stdout(predicate::str::contains("1 completed"));

        campaign()
            .current_dir(dir.path())
            .arg("events")
            .assert()
            .success()
            .stdout(predicate::str::contains("PHASE_STARTED"))
            .stdout(predicate::str::contains("PHASE_COMPLETED"));

        let runs = fs::read_dir(dir.path().join(".campaign/audit/runs"))
            .unwrap()
            .count();
        assert_eq!(runs, 1);
    }

    #[test]
    fn test_run_json_summary() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(&dir, QUIET_CONFIG);
        write_phases(
            &dir,
            r#"{"phases": [{"id": "p1", "name": "One",
                "tools": [{"name": "noop", "command": "true"}]}]}"#,
        );

        let output = campaign()
            .current_dir(dir.path())
            .args(["run", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(summary["totals"]["phases_completed"], 1);
        assert_eq!(summary["phases"][0]["state"], "completed");
        assert_eq!(summary["phases"][0]["degraded"], true);
    }

    #[test]
    fn test_failed_criteria_exit_non_zero_and_stop() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(
            &dir,
            r#"
[safety]
validate_build_after_tool = false

[metrics]
errors = "echo 4"
"#,
        );
        write_phases(
            &dir,
            r#"{"phases": [
                {"id": "p1", "name": "One",
                 "tools": [{"name": "noop", "command": "true"}],
                 "success_criteria": ["errorCount == 0"]},
                {"id": "p2", "name": "Two",
                 "tools": [{"name": "noop", "command": "true"}]}
            ]}"#,
        );

        campaign()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stdout(predicate::str::contains("== Phase p1 [FAILED]"))
            .stdout(predicate::str::contains("Phase p2").not());

        campaign()
            .current_dir(dir.path())
            .args(["run", "--only", "p2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("== Phase p2 [COMPLETED]"));
    }

    #[test]
    fn test_run_unknown_phase() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(&dir, QUIET_CONFIG);
        write_phases(
            &dir,
            r#"{"phases": [{"id": "p1", "name": "One",
                "tools": [{"name": "noop", "command": "true"}]}]}"#,
        );

        campaign()
            .current_dir(dir.path())
            .args(["run", "--from", "p9"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("p9"));
    }

    #[test]
    fn test_metrics_command_records_baseline() {
        let dir = create_temp_project();
        init_campaign_project(&dir);
        write_config(&dir, QUIET_CONFIG);

        campaign()
            .current_dir(dir.path())
            .arg("metrics")
            .assert()
            .success()
            .stdout(predicate::str::contains("errorCount"));

        assert!(dir.path().join(".campaign/metrics.json").exists());
    }
}
