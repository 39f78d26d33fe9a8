use super::{CheckpointId, CheckpointInfo, SnapshotBackend};
use crate::errors::CheckpointError;
use chrono::{TimeZone, Utc};
use git2::build::CheckoutBuilder;
use git2::{IndexAddOption, Oid, Repository, ResetType, Signature, Status, StatusOptions};
use std::fs;
use std::path::{Path, PathBuf};

const REF_PREFIX: &str = "refs/campaign/checkpoints/";
const MESSAGE_PREFIX: &str = "[campaign] checkpoint: ";
const STATE_DIR: &str = ".campaign";

/// Snapshots the working tree as dangling commits kept alive under `refs/campaign/checkpoints/`.
///
/// Creating a checkpoint never touches HEAD, the index file or the working tree. Restoring
/// resets the branch to the commit that was checked out at snapshot time, rewrites the working
/// tree from the snapshot and removes files created since. `.campaign/` is never captured or
/// removed.
pub struct GitSnapshotBackend {
    repo: Repository,
    workdir: PathBuf,
}

impl GitSnapshotBackend {
    pub fn open(project_dir: &Path) -> Result<Self, CheckpointError> {
        let repo = Repository::open(project_dir).map_err(|e| {
            CheckpointError::Unavailable(format!(
                "{} is not a git repository: {}",
                project_dir.display(),
                e.message()
            ))
        })?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| CheckpointError::Unavailable("bare repository".to_string()))?
            .to_path_buf();
        Ok(Self { repo, workdir })
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    fn snapshot_commit(&self, id: &CheckpointId) -> Result<git2::Commit<'_>, CheckpointError> {
        let oid = Oid::from_str(id.as_str())
            .map_err(|_| CheckpointError::NotFound(id.to_string()))?;
        if self.repo.find_reference(&ref_name(oid)).is_err() {
            return Err(CheckpointError::NotFound(id.to_string()));
        }
        self.repo
            .find_commit(oid)
            .map_err(|_| CheckpointError::NotFound(id.to_string()))
    }

    fn remove_files_absent_from_snapshot(&self) -> Result<usize, CheckpointError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut removed = 0;
        for entry in statuses.iter() {
            if !entry.status().contains(Status::WT_NEW) {
                continue;
            }
            let Some(rel) = entry.path() else {
                continue;
            };
            if is_state_path(Path::new(rel)) {
                continue;
            }
            let path = self.workdir.join(rel);
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

fn ref_name(oid: Oid) -> String {
    format!("{}{}", REF_PREFIX, oid)
}

fn is_state_path(path: &Path) -> bool {
    path.components()
        .next()
        .is_some_and(|c| c.as_os_str() == STATE_DIR)
}

impl SnapshotBackend for GitSnapshotBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn create(&mut self, label: &str) -> Result<CheckpointInfo, CheckpointError> {
        // The in-memory index is never written back, so the staging area is left alone.
        let mut index = self.repo.index()?;
        let mut skip_state = |path: &Path, _spec: &[u8]| -> i32 {
            if is_state_path(path) { 1 } else { 0 }
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::DEFAULT,
            Some(&mut skip_state as &mut git2::IndexMatchedPath),
        )?;
        index.update_all(["*"].iter(), None)?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let sig = Signature::now("campaign", "campaign@localhost")?;
        let message = format!("{}{}", MESSAGE_PREFIX, label);
        let commit_id = match self.head_commit() {
            Some(parent) => self
                .repo
                .commit(None, &sig, &sig, &message, &tree, &[&parent])?,
            None => self.repo.commit(None, &sig, &sig, &message, &tree, &[])?,
        };
        self.repo
            .reference(&ref_name(commit_id), commit_id, true, &message)?;

        // Drop the cached index so later operations re-read the on-disk one.
        index.read(true)?;

        Ok(CheckpointInfo {
            id: CheckpointId::new(commit_id.to_string()),
            label: label.to_string(),
            created_at: Utc::now(),
        })
    }

    fn restore(&mut self, id: &CheckpointId) -> Result<(), CheckpointError> {
        if id.is_sentinel() {
            return Err(CheckpointError::Sentinel);
        }
        let snapshot = self.snapshot_commit(id)?;
        let parent = snapshot.parent(0).ok();

        if let Some(parent) = &parent {
            self.repo.reset(parent.as_object(), ResetType::Mixed, None)?;
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo
            .checkout_tree(snapshot.as_object(), Some(&mut checkout))?;

        let removed = self.remove_files_absent_from_snapshot()?;

        match &parent {
            Some(parent) => self.repo.reset(parent.as_object(), ResetType::Mixed, None)?,
            None => {
                let mut index = self.repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }

        tracing::debug!(checkpoint = %id, removed, "working tree restored");
        Ok(())
    }

    fn exists(&self, id: &CheckpointId) -> bool {
        !id.is_sentinel() && self.snapshot_commit(id).is_ok()
    }

    fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut infos = Vec::new();
        for reference in self.repo.references_glob(&format!("{}*", REF_PREFIX))? {
            let reference = reference?;
            let Ok(commit) = reference.peel_to_commit() else {
                continue;
            };
            let label = commit
                .message()
                .and_then(|m| m.strip_prefix(MESSAGE_PREFIX))
                .unwrap_or("")
                .trim()
                .to_string();
            let created_at = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now);
            infos.push(CheckpointInfo {
                id: CheckpointId::new(commit.id().to_string()),
                label,
                created_at,
            });
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(infos)
    }
}
