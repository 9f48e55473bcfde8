//! Git adapter for workspace snapshots.
//!
//! The workspace port only needs a handful of read-only git queries, so we
//! keep a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Resolve the top-level directory of the repository containing `cwd`.
    #[instrument(skip_all, fields(cwd = %cwd.display()))]
    pub fn discover_root(cwd: &Path) -> Result<PathBuf> {
        let output = Self::new(cwd).run(&["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(anyhow!("not a git repository: {}", cwd.display()));
        }
        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", root.display()))?;
        debug!(root = %root.display(), "discovered repo root");
        Ok(root)
    }

    /// `git status --short`, trimmed.
    pub fn status_short(&self) -> Result<String> {
        let out = self.run_capture(&["status", "--short"])?;
        Ok(out.trim().to_string())
    }

    /// Unstaged working tree diff.
    pub fn diff(&self) -> Result<String> {
        self.run_capture(&["diff", "--"])
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::fs;

    #[test]
    fn discover_root_finds_toplevel_from_subdir() {
        let repo = TestRepo::new().expect("repo");
        let sub = repo.path().join("nested").join("dir");
        fs::create_dir_all(&sub).expect("mkdir");

        let root = Git::discover_root(&sub).expect("discover");
        assert_eq!(root, repo.path().canonicalize().expect("canonicalize"));
    }

    #[test]
    fn discover_root_rejects_plain_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Git::discover_root(temp.path()).unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }

    #[test]
    fn status_and_diff_reflect_modifications() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        assert_eq!(git.status_short().expect("status"), "");

        fs::write(repo.path().join("README.md"), "changed\n").expect("write");
        assert_eq!(git.status_short().expect("status"), "M README.md");
        let diff = git.diff().expect("diff");
        assert!(diff.contains("+changed"));
    }
}
