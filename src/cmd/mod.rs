//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `run`           | `Run`                                              |
//! | `phase`         | `Phases`, `Status`, `Events`                       |
//! | `project`       | `Init`                                             |
//! | `metrics`       | `Metrics`                                          |
//! | `safety`        | `Checkpoints`, `CheckBackups`, `Score`             |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod metrics;
pub mod phase;
pub mod project;
pub mod run;
pub mod safety;

pub use config::cmd_config;
pub use metrics::cmd_metrics;
pub use phase::{cmd_events, cmd_phases, cmd_status};
pub use project::cmd_init;
pub use run::{RunArgs, cmd_run};
pub use safety::{ScoreArgs, cmd_check_backups, cmd_checkpoints, cmd_score};
