//! Exec port and the local process adapter.
//!
//! The [`CommandRunner`] trait decouples step orchestration from process
//! spawning. Tests use scripted runners that record commands without spawning
//! anything.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::policy::command_allowed;
use crate::core::types::Policy;
use crate::io::process::{run_bounded, tail_chars};

/// Characters of stdout/stderr kept in an [`ExecOutput`].
pub const OUTPUT_TAIL_CHARS: usize = 8000;
/// Exit code reported for a command killed after its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Result of one executed command; streams hold at most the last
/// [`OUTPUT_TAIL_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Raised when a command is rejected by the policy gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command not allowed: {command}")]
pub struct PermissionDenied {
    pub command: String,
}

/// Abstraction over command execution backends.
pub trait CommandRunner {
    /// Run `command` under `policy`. Must fail with [`PermissionDenied`] when the
    /// policy rejects the command.
    fn run(&self, command: &str, policy: &Policy) -> Result<ExecOutput>;
}

/// Limits for [`LocalExec`].
#[derive(Debug, Clone)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Runs commands directly (no shell) inside the workspace root.
#[derive(Debug, Clone)]
pub struct LocalExec {
    workdir: PathBuf,
    limits: ExecLimits,
}

impl LocalExec {
    pub fn new(workdir: impl Into<PathBuf>, limits: ExecLimits) -> Self {
        Self {
            workdir: workdir.into(),
            limits,
        }
    }
}

impl CommandRunner for LocalExec {
    #[instrument(skip_all, fields(command = %command, timeout_secs = self.limits.timeout.as_secs()))]
    fn run(&self, command: &str, policy: &Policy) -> Result<ExecOutput> {
        if !command_allowed(command, policy) {
            warn!("command rejected by policy");
            return Err(PermissionDenied {
                command: command.to_string(),
            }
            .into());
        }
        let argv = split_command(command)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;

        info!(program = %program, "running command");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_bounded(cmd, self.limits.timeout, self.limits.output_limit_bytes)
            .with_context(|| format!("run {command}"))?;

        let mut stderr = output.stderr_lossy();
        let exit_code = if output.timed_out {
            stderr.push_str(&format!(
                "\n[command timed out after {}s]\n",
                self.limits.timeout.as_secs()
            ));
            TIMEOUT_EXIT_CODE
        } else {
            output.status.code().unwrap_or(-1)
        };

        Ok(ExecOutput {
            exit_code,
            stdout: tail_chars(&output.stdout_lossy(), OUTPUT_TAIL_CHARS),
            stderr: tail_chars(&stderr, OUTPUT_TAIL_CHARS),
        })
    }
}

/// Split a command line into argv with POSIX shell quoting rules. No
/// expansion of any kind.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    shlex::split(command).ok_or_else(|| anyhow!("unbalanced quoting in: {command}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_policy() -> Policy {
        Policy::with_allow_commands(["python", "sh", "printf"])
    }

    #[test]
    fn splits_plain_and_quoted_arguments() {
        assert_eq!(
            split_command(r#"python -c 'print("a b")'  x\ y "q\"z""#).expect("split"),
            vec!["python", "-c", r#"print("a b")"#, "x y", r#"q"z"#]
        );
        assert_eq!(split_command("  ").expect("split"), Vec::<String>::new());
        assert_eq!(split_command("echo ''").expect("split"), vec!["echo", ""]);
    }

    #[test]
    fn split_rejects_unterminated_quotes() {
        assert!(split_command("echo 'oops").is_err());
        assert!(split_command("echo \"oops").is_err());
    }

    #[test]
    fn rejects_non_allowlisted_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = LocalExec::new(temp.path(), ExecLimits::default());
        let err = exec
            .run("git status", &Policy::with_allow_commands(["pytest"]))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<PermissionDenied>(),
            Some(&PermissionDenied {
                command: "git status".to_string()
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn runs_allowlisted_command_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "").expect("write");
        let exec = LocalExec::new(temp.path(), ExecLimits::default());

        let out = exec
            .run("sh -c 'ls; echo warn 1>&2; exit 2'", &python_policy())
            .expect("run");
        assert_eq!(out.exit_code, 2);
        assert_eq!(out.stdout, "marker.txt\n");
        assert_eq!(out.stderr, "warn\n");
    }

    #[cfg(unix)]
    #[test]
    fn truncates_output_to_tail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = LocalExec::new(temp.path(), ExecLimits::default());

        let out = exec
            .run(
                "sh -c 'head -c 9001 /dev/zero | tr \"\\0\" a; head -c 9001 /dev/zero | tr \"\\0\" b 1>&2'",
                &python_policy(),
            )
            .expect("run");
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.chars().count(), OUTPUT_TAIL_CHARS);
        assert_eq!(out.stderr.chars().count(), OUTPUT_TAIL_CHARS);
    }

    #[cfg(unix)]
    #[test]
    fn reports_timeout_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = LocalExec::new(
            temp.path(),
            ExecLimits {
                timeout: Duration::from_millis(100),
                output_limit_bytes: 1024,
            },
        );
        let out = exec.run("sh -c 'sleep 5; echo late'", &python_policy()).expect("run");
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.stderr.contains("timed out"));
    }
}
