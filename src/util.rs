//! Shared helpers for the campaign crate.

use anyhow::{Context, Result};
use std::path::Path;

/// Count files under `project_dir` matching a relative glob pattern.
pub fn count_glob_matches(project_dir: &Path, pattern: &str) -> Result<usize> {
    let full = project_dir.join(pattern);
    let full = full.to_string_lossy();
    let entries =
        glob::glob(&full).with_context(|| format!("Invalid glob pattern '{}'", pattern))?;
    Ok(entries.filter_map(|e| e.ok()).filter(|p| p.is_file()).count())
}

/// Push `line` onto `lines` unless it already holds `cap` entries.
pub fn push_capped(lines: &mut Vec<String>, line: &str, cap: usize) {
    if lines.len() < cap {
        lines.push(line.to_string());
    }
}

/// Serde helpers for Duration serialization as milliseconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_count_glob_matches() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "").unwrap();
        fs::write(dir.path().join("src/nested/b.ts"), "").unwrap();
        fs::write(dir.path().join("src/c.js"), "").unwrap();
        assert_eq!(count_glob_matches(dir.path(), "src/**/*.ts").unwrap(), 2);
        assert_eq!(count_glob_matches(dir.path(), "lib/*.ts").unwrap(), 0);
    }

    #[test]
    fn test_count_glob_matches_rejects_bad_pattern() {
        let dir = tempdir().unwrap();
        assert!(count_glob_matches(dir.path(), "src/[").is_err());
    }

    #[test]
    fn test_push_capped() {
        let mut lines = Vec::new();
        for i in 0..5 {
            push_capped(&mut lines, &i.to_string(), 3);
        }
        assert_eq!(lines, vec!["0", "1", "2"]);
    }
}
