//! Checkpoint Manager: restorable working-tree snapshots and backup integrity checks.
//!
//! Snapshot creation fails soft: when the backend is missing or errors, the manager hands back
//! the sentinel id and logs a `CHECKPOINT_FAILED` warning, so the caller runs without a safety
//! net instead of aborting. Restoring fails hard; the caller treats an error as fatal.

pub mod git;

pub use git::GitSnapshotBackend;

use crate::errors::CheckpointError;
use crate::events::{SafetyEventLog, SafetyEventType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Opaque snapshot identifier. The empty id is the sentinel for "rollback unavailable".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn sentinel() -> Self {
        Self(String::new())
    }

    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_sentinel() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A created checkpoint. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: CheckpointId,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Version-control snapshot backend: named create, list and idempotent restore.
pub trait SnapshotBackend: Send {
    fn name(&self) -> &'static str;
    fn create(&mut self, label: &str) -> Result<CheckpointInfo, CheckpointError>;
    fn restore(&mut self, id: &CheckpointId) -> Result<(), CheckpointError>;
    fn exists(&self, id: &CheckpointId) -> bool;
    fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError>;
}

/// Outcome of a backup integrity check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackCapability {
    pub can_rollback: bool,
    pub backup_integrity: bool,
    pub errors: Vec<String>,
}

pub struct CheckpointManager {
    backend: Mutex<Option<Box<dyn SnapshotBackend>>>,
    events: SafetyEventLog,
}

impl CheckpointManager {
    pub fn new(backend: Option<Box<dyn SnapshotBackend>>, events: SafetyEventLog) -> Self {
        Self {
            backend: Mutex::new(backend),
            events,
        }
    }

    /// Use the git backend when `project_dir` is a repository, otherwise run without one.
    pub fn for_project(project_dir: &Path, events: SafetyEventLog) -> Self {
        let backend: Option<Box<dyn SnapshotBackend>> = match GitSnapshotBackend::open(project_dir)
        {
            Ok(git) => Some(Box::new(git)),
            Err(e) => {
                tracing::warn!(error = %e, "no snapshot backend; rollback will be unavailable");
                None
            }
        };
        Self::new(backend, events)
    }

    fn backend(&self) -> MutexGuard<'_, Option<Box<dyn SnapshotBackend>>> {
        self.backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has_backend(&self) -> bool {
        self.backend().is_some()
    }

    /// Snapshot the working tree. Returns the sentinel id on any failure.
    pub fn create(&self, label: &str) -> CheckpointId {
        let result = match self.backend().as_mut() {
            Some(backend) => backend.create(label),
            None => Err(CheckpointError::Unavailable(
                "no snapshot backend configured".to_string(),
            )),
        };

        match result {
            Ok(info) => {
                self.events.record(
                    SafetyEventType::CheckpointCreated,
                    Severity::Info,
                    format!("Checkpoint '{}' created ({})", label, info.id.short()),
                    "snapshot stored",
                );
                info.id
            }
            Err(e) => {
                self.events.record(
                    SafetyEventType::CheckpointFailed,
                    Severity::Warning,
                    format!("Checkpoint '{}' could not be created: {}", label, e),
                    "continuing without rollback",
                );
                CheckpointId::sentinel()
            }
        }
    }

    /// Whether `id` refers to a snapshot that exists and can be read right now.
    pub fn validate_checkpoint(&self, id: &CheckpointId) -> bool {
        if id.is_sentinel() {
            return false;
        }
        self.backend()
            .as_ref()
            .is_some_and(|backend| backend.exists(id))
    }

    /// Restore the working tree to `id`. The checkpoint is validated first.
    pub fn restore(&self, id: &CheckpointId) -> Result<(), CheckpointError> {
        if id.is_sentinel() {
            return Err(CheckpointError::Sentinel);
        }
        let mut guard = self.backend();
        let backend = guard.as_mut().ok_or_else(|| {
            CheckpointError::Unavailable("no snapshot backend configured".to_string())
        })?;
        if !backend.exists(id) {
            return Err(CheckpointError::NotFound(id.to_string()));
        }
        backend.restore(id)
    }

    pub fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        match self.backend().as_ref() {
            Some(backend) => backend.list(),
            None => Ok(Vec::new()),
        }
    }

    pub fn validate_integrity(
        &self,
        original_paths: &[PathBuf],
        backup_paths: &[PathBuf],
    ) -> RollbackCapability {
        validate_integrity(original_paths, backup_paths)
    }
}

/// Check every (original, backup) pair; a backup that is missing or empty is a violation.
///
/// All violations are reported, not only the first.
pub fn validate_integrity(original_paths: &[PathBuf], backup_paths: &[PathBuf]) -> RollbackCapability {
    let mut errors = Vec::new();

    if original_paths.len() != backup_paths.len() {
        errors.push(format!(
            "{} original files but {} backups",
            original_paths.len(),
            backup_paths.len()
        ));
    }

    for (original, backup) in original_paths.iter().zip(backup_paths) {
        match fs::metadata(backup) {
            Err(_) => errors.push(format!(
                "Backup {} for {} does not exist",
                backup.display(),
                original.display()
            )),
            Ok(meta) if meta.is_file() && meta.len() == 0 => errors.push(format!(
                "Backup {} for {} is empty",
                backup.display(),
                original.display()
            )),
            Ok(meta) if meta.is_dir() && is_empty_dir(backup) => errors.push(format!(
                "Backup directory {} for {} is empty",
                backup.display(),
                original.display()
            )),
            Ok(_) => {}
        }
    }

    let ok = errors.is_empty();
    RollbackCapability {
        can_rollback: ok,
        backup_integrity: ok,
        errors,
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
