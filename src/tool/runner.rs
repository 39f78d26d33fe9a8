use super::parser::{PatternOutputParser, ToolOutputParser};
use super::ToolExecutionResult;
use crate::phase::ToolConfiguration;
use crate::process::run_shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs transformation tools against the project working tree.
///
/// `run` never fails: spawn errors, timeouts and non-zero exits all come back as a
/// `ToolExecutionResult` with `success == false`.
#[derive(Clone)]
pub struct ToolRunner {
    project_dir: PathBuf,
    parser: Arc<dyn ToolOutputParser>,
}

impl ToolRunner {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            parser: Arc::new(PatternOutputParser::default()),
        }
    }

    /// Swap the output parser.
    pub fn with_parser(mut self, parser: Arc<dyn ToolOutputParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub async fn run(&self, tool: &ToolConfiguration) -> ToolExecutionResult {
        let args = tool.build_args();
        tracing::info!(tool = %tool.name, args = ?args, "running tool");

        let output = match run_shell(&tool.command, &args, &self.project_dir, tool.timeout()).await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "tool did not complete");
                let mut result = ToolExecutionResult::failure(&tool.name, e.to_string());
                result.args = args;
                return result;
            }
        };

        let mut result = self.parser.parse(&output.combined());
        result.tool = tool.name.clone();
        result.args = args;
        result.duration = output.duration;
        result.exit_code = output.exit_code;

        if !output.success() {
            let reason = match output.exit_code {
                Some(code) => format!("{} exited with code {}", tool.name, code),
                None => format!("{} was terminated by a signal", tool.name),
            };
            result.errors.push(reason);
        }
        result.success = output.success() && result.errors.is_empty();

        if result.success {
            tracing::info!(
                tool = %tool.name,
                files = result.files_processed,
                items = result.items_changed(),
                duration_ms = result.duration.as_millis() as u64,
                "tool finished"
            );
        } else {
            tracing::warn!(tool = %tool.name, errors = result.errors.len(), "tool failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_successful_tool_is_parsed() {
        let dir = tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "tool.sh",
            "echo '10 files processed'\necho '5 variables removed'\n",
        );
        let runner = ToolRunner::new(dir.path());
        let result = runner.run(&ToolConfiguration::new("remove", &script)).await;
        assert!(result.success);
        assert_eq!(result.files_processed, 10);
        assert_eq!(result.items_removed, 5);
        assert_eq!(result.tool, "remove");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_tool_receives_built_args() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "echo \"$@\" > args.txt\n");
        let mut tool = ToolConfiguration::new("t", &script);
        tool.parameters.dry_run = true;
        tool.parameters.max_files = Some(15);
        let result = ToolRunner::new(dir.path()).run(&tool).await;
        assert!(result.success);
        let seen = fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(seen.trim(), "--dry-run --max-files=15");
        assert_eq!(result.args, vec!["--dry-run", "--max-files=15"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_reason() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "echo '3 files processed'\nexit 2\n");
        let result = ToolRunner::new(dir.path())
            .run(&ToolConfiguration::new("t", &script))
            .await;
        assert!(!result.success);
        assert_eq!(result.files_processed, 3);
        assert!(result.errors.iter().any(|e| e.contains("code 2")));
    }

    #[tokio::test]
    async fn test_error_marker_fails_despite_exit_zero() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "echo 'Error: parse failure' >&2\n");
        let result = ToolRunner::new(dir.path())
            .run(&ToolConfiguration::new("t", &script))
            .await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Error: parse failure"]);
    }

    #[tokio::test]
    async fn test_missing_tool_is_a_result_not_an_error() {
        let dir = tempdir().unwrap();
        let result = ToolRunner::new(dir.path())
            .run(&ToolConfiguration::new("ghost", "./does-not-exist.sh"))
            .await;
        assert!(!result.success);
        assert!(!result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_twice_estimate() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "sleep 5\n");
        let mut tool = ToolConfiguration::new("slow", &script);
        tool.estimated_duration_secs = 1;
        let result = ToolRunner::new(dir.path()).run(&tool).await;
        assert!(!result.success);
        assert!(result.errors[0].contains("timed out after 2s"));
    }

    struct JsonLineParser;

    impl ToolOutputParser for JsonLineParser {
        fn parse(&self, text: &str) -> ToolExecutionResult {
            let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap_or_default();
            ToolExecutionResult {
                files_processed: value["files"].as_u64().unwrap_or(0),
                ..ToolExecutionResult::default()
            }
        }
    }

    #[tokio::test]
    async fn test_custom_parser_replaces_patterns() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "echo '{\"files\": 7}'\n");
        let runner = ToolRunner::new(dir.path()).with_parser(Arc::new(JsonLineParser));
        let result = runner.run(&ToolConfiguration::new("json", &script)).await;
        assert!(result.success);
        assert_eq!(result.files_processed, 7);
        assert_eq!(result.tool, "json");
    }
}
