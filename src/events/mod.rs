//! Safety Event Log: the bounded, append-only journal of controller actions.
//!
//! Every component that changes or judges the working tree records what it did here. The log is
//! a cheap cloneable handle, so the checkpoint manager, batch orchestrator and phase executor all
//! append to the same journal. When the log grows past `capacity` it is cut back to the newest
//! `retain` events; recency always wins over completeness.
//!
//! Events are mirrored to `tracing` and, when a sink path is configured, appended as JSON lines
//! to disk. Disk writes are best-effort and never fail the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETAIN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyEventType {
    CheckpointCreated,
    CheckpointFailed,
    RollbackTriggered,
    RollbackCompleted,
    PhaseStarted,
    PhaseCompleted,
    ToolFailed,
    ValidationFailed,
    EmergencyRecovery,
    CampaignCancelled,
}

impl std::fmt::Display for SafetyEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SafetyEventType::CheckpointCreated => "CHECKPOINT_CREATED",
            SafetyEventType::CheckpointFailed => "CHECKPOINT_FAILED",
            SafetyEventType::RollbackTriggered => "ROLLBACK_TRIGGERED",
            SafetyEventType::RollbackCompleted => "ROLLBACK_COMPLETED",
            SafetyEventType::PhaseStarted => "PHASE_STARTED",
            SafetyEventType::PhaseCompleted => "PHASE_COMPLETED",
            SafetyEventType::ToolFailed => "TOOL_FAILED",
            SafetyEventType::ValidationFailed => "VALIDATION_FAILED",
            SafetyEventType::EmergencyRecovery => "EMERGENCY_RECOVERY",
            SafetyEventType::CampaignCancelled => "CAMPAIGN_CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    /// Monotonic sequence number, unique within one log.
    pub seq: u64,
    pub event_type: SafetyEventType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub severity: Severity,
    /// What the controller did in response.
    pub action: String,
    /// Phase that was executing when the event was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(Debug)]
struct LogInner {
    events: VecDeque<SafetyEvent>,
    next_seq: u64,
    capacity: usize,
    retain: usize,
    current_phase: Option<String>,
    sink: Option<PathBuf>,
}

/// Shared handle to the bounded event journal.
#[derive(Debug, Clone)]
pub struct SafetyEventLog {
    inner: Arc<Mutex<LogInner>>,
}

impl Default for SafetyEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETAIN)
    }
}

impl SafetyEventLog {
    /// Create an in-memory log. `retain` is clamped to `1..=capacity`.
    pub fn new(capacity: usize, retain: usize) -> Self {
        let capacity = capacity.max(1);
        let retain = retain.clamp(1, capacity);
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY) + 1),
                next_seq: 1,
                capacity,
                retain,
                current_phase: None,
                sink: None,
            })),
        }
    }

    /// Also append every event as a JSON line to `path`.
    pub fn with_sink(self, path: impl Into<PathBuf>) -> Self {
        self.lock().sink = Some(path.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stamp subsequent events with `phase` (or clear it with `None`).
    pub fn set_phase(&self, phase: Option<&str>) {
        self.lock().current_phase = phase.map(str::to_string);
    }

    /// Append an event and return a copy of it.
    pub fn record(
        &self,
        event_type: SafetyEventType,
        severity: Severity,
        description: impl Into<String>,
        action: impl Into<String>,
    ) -> SafetyEvent {
        let (event, sink) = {
            let mut inner = self.lock();
            let event = SafetyEvent {
                seq: inner.next_seq,
                event_type,
                timestamp: Utc::now(),
                description: description.into(),
                severity,
                action: action.into(),
                phase: inner.current_phase.clone(),
            };
            inner.next_seq += 1;
            inner.events.push_back(event.clone());
            if inner.events.len() > inner.capacity {
                let excess = inner.events.len() - inner.retain;
                inner.events.drain(..excess);
            }
            (event, inner.sink.clone())
        };

        mirror_to_tracing(&event);
        if let Some(path) = sink
            && let Err(e) = append_json_line(&path, &event)
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist safety event");
        }
        event
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Sequence number the next recorded event will receive.
    pub fn next_seq(&self) -> u64 {
        self.lock().next_seq
    }

    /// Copy of every retained event, oldest first.
    pub fn snapshot(&self) -> Vec<SafetyEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Retained events with `seq >= from_seq`.
    pub fn events_since(&self, from_seq: u64) -> Vec<SafetyEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.seq >= from_seq)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, event_type: SafetyEventType) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

fn mirror_to_tracing(event: &SafetyEvent) {
    let phase = event.phase.as_deref().unwrap_or("-");
    match event.severity {
        Severity::Info => tracing::info!(
            event = %event.event_type, phase, action = %event.action, "{}", event.description
        ),
        Severity::Warning => tracing::warn!(
            event = %event.event_type, phase, action = %event.action, "{}", event.description
        ),
        Severity::Error => tracing::error!(
            event = %event.event_type, phase, action = %event.action, "{}", event.description
        ),
    }
}

fn append_json_line(path: &Path, event: &SafetyEvent) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create event log directory")?;
    }
    let line = serde_json::to_string(event).context("Failed to serialize safety event")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    writeln!(file, "{}", line).context("Failed to append safety event")?;
    Ok(())
}

/// Read persisted events back, newest `limit` entries. Unparseable lines are skipped.
pub fn load_persisted(path: &Path, limit: usize) -> Result<Vec<SafetyEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log {}", path.display()))?;
    let events: Vec<SafetyEvent> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    let skip = events.len().saturating_sub(limit);
    Ok(events.into_iter().skip(skip).collect())
}
