//! Append-only campaign state file: one `phase|status|timestamp` line per phase transition.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub phase: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

pub struct StateManager {
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn save(&self, phase: &str, status: &str) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let entry = format!("{}|{}|{}\n", phase, status, Utc::now().to_rfc3339());

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .context("Failed to open state file")?
            .write_all(entry.as_bytes())
            .context("Failed to write state entry")?;

        Ok(())
    }

    /// The most recent phase recorded as `completed`.
    pub fn last_completed_phase(&self) -> Option<String> {
        let content = fs::read_to_string(&self.state_file).ok()?;
        content
            .lines()
            .rfind(|line| line.split('|').nth(1) == Some("completed"))
            .and_then(|line| line.split('|').next())
            .map(|s| s.to_string())
    }

    pub fn entries(&self) -> Result<Vec<StateEntry>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;

        Ok(content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split('|').collect();
                if parts.len() != 3 {
                    return None;
                }
                Some(StateEntry {
                    phase: parts[0].to_string(),
                    status: parts[1].to_string(),
                    timestamp: DateTime::parse_from_rfc3339(parts[2])
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect())
    }

    pub fn reset(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).context("Failed to remove state file")?;
        }
        Ok(())
    }
}
