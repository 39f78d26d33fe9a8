//! Typed error hierarchy for the campaign orchestrator.
//!
//! Four enums cover the layers that can fail:
//! - `CampaignError`: campaign-level failures surfaced to the caller (the FATAL class)
//! - `PhaseError`: failures inside a single phase, always folded into a `PhaseResult`
//! - `CheckpointError`: snapshot backend failures
//! - `ProcessError`: subprocess spawn / timeout failures

use std::time::Duration;
use thiserror::Error;

/// Errors that stop a campaign run.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(
        "Rollback of phase {phase} to checkpoint {checkpoint} failed: {message}. Working tree state is unknown; stopping campaign"
    )]
    RollbackFailed {
        phase: String,
        checkpoint: String,
        message: String,
    },

    #[error("Metrics collection failed: {0}")]
    MetricsCollection(String),

    #[error("Campaign cancelled")]
    Cancelled,

    #[error("Unknown phase {0}")]
    UnknownPhase(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Metrics collection failed: {0}")]
    MetricsCollection(String),

    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Tool {tool} could not be prepared: {message}")]
    ToolSetup { tool: String, message: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the snapshot backend.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Snapshot backend unavailable: {0}")]
    Unavailable(String),

    #[error("Checkpoint {0} not found")]
    NotFound(String),

    #[error("Checkpoint id is the sentinel; no snapshot was taken")]
    Sentinel,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}
