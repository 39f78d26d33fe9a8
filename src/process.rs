//! Subprocess execution with a hard timeout.
//!
//! Every external invocation the campaign makes (transformation tools, compile checks, builds,
//! test runs, metrics commands) goes through [`run_shell`]. Commands run under `sh -c` so
//! configured strings may contain pipes and redirects; extra arguments are forwarded verbatim as
//! `"$@"` so generated flags are never re-split by the shell.

use crate::errors::ProcessError;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, the text that output parsers scan.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        text.push_str(&self.stdout);
        if !self.stdout.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

/// Run `command` through `sh -c` in `working_dir`, appending `args`, and wait at most `limit`.
///
/// The shell leads its own process group. On timeout the whole group is killed and the shell is
/// reaped before returning, so nothing the command started outlives the call.
pub async fn run_shell(
    command: &str,
    args: &[String],
    working_dir: &Path,
    limit: Duration,
) -> Result<CommandOutput, ProcessError> {
    let script = if args.is_empty() {
        command.to_string()
    } else {
        format!("{} \"$@\"", command)
    };

    let start = Instant::now();
    let child = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .arg("campaign")
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let pgid = child.id();
    let wait = child.wait_with_output();
    tokio::pin!(wait);

    let output = match timeout(limit, &mut wait).await {
        Ok(result) => result.map_err(|source| ProcessError::Wait {
            command: command.to_string(),
            source,
        })?,
        Err(_) => {
            tracing::warn!(command, timeout_secs = limit.as_secs_f64(), "command timed out");
            kill_process_group(pgid);
            if timeout(REAP_GRACE, &mut wait).await.is_err() {
                tracing::warn!(command, "timed-out command was not reaped after kill");
            }
            return Err(ProcessError::Timeout {
                command: command.to_string(),
                timeout: limit,
            });
        }
    };

    let result = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start.elapsed(),
    };

    tracing::debug!(
        command,
        exit_code = ?result.exit_code,
        duration_ms = result.duration.as_millis() as u64,
        "command finished"
    );

    Ok(result)
}

/// How long to wait for a killed process group to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(5);

fn kill_process_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this child by process_group(0).
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::warn!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "failed to kill process group"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_shell_captures_stdout_and_exit_code() {
        let dir = tempdir().unwrap();
        let out = run_shell("echo hello", &[], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_shell_forwards_args_verbatim() {
        let dir = tempdir().unwrap();
        let args = vec!["--max-files=5".to_string(), "two words".to_string()];
        let out = run_shell("printf '%s|'", &args, dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "--max-files=5|two words|");
    }

    #[tokio::test]
    async fn test_run_shell_non_zero_exit() {
        let dir = tempdir().unwrap();
        let out = run_shell("echo boom >&2; exit 3", &[], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert!(out.combined().contains("boom"));
    }

    #[tokio::test]
    async fn test_run_shell_timeout() {
        let dir = tempdir().unwrap();
        let err = run_shell("sleep 5", &[], dir.path(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nsh -c 'sleep 1; echo late > mutated.txt'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = run_shell(
            &script.to_string_lossy(),
            &[],
            dir.path(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("mutated.txt").exists());
    }

    #[test]
    fn test_combined_joins_streams() {
        let out = CommandOutput {
            exit_code: Some(0),
            stdout: "a".into(),
            stderr: "b\n".into(),
            duration: Duration::ZERO,
        };
        assert_eq!(out.combined(), "a\nb\n");
    }
}
