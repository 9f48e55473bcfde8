//! Workspace port and its git-backed local adapter.
//!
//! All paths coming from a plan are relative to the repository root and must
//! stay inside it; [`resolve_repo_path`] is the single gate for that.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::io::git::Git;
use crate::io::process::head_chars;

/// Filesystem and version-control view of the repository a step works in.
pub trait Workspace {
    fn repo_root(&self) -> &Path;
    /// Read a file, keeping at most `max_chars` characters. Fails if the file is missing.
    fn read_text(&self, path: &str, max_chars: usize) -> Result<String>;
    /// Replace a file's full content, creating parent directories.
    fn write_text(&self, path: &str, content: &str) -> Result<()>;
    fn git_status(&self) -> Result<String>;
    fn git_diff(&self, max_chars: usize) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathEscape {
    #[error("empty path")]
    Empty,
    #[error("path escapes repo root: {0}")]
    OutsideRoot(String),
}

/// Resolve `requested` against `repo_root`, rejecting anything outside the root.
///
/// Resolution is lexical (`.` and `..` are folded without touching the
/// filesystem); the deepest existing ancestor is then canonicalized and checked
/// again so a symlink cannot lead outside the root.
pub fn resolve_repo_path(repo_root: &Path, requested: &str) -> Result<PathBuf, PathEscape> {
    if requested.is_empty() {
        return Err(PathEscape::Empty);
    }
    let outside = || PathEscape::OutsideRoot(requested.to_string());

    let candidate = normalize_lexically(&repo_root.join(requested)).ok_or_else(outside)?;
    if !candidate.starts_with(repo_root) {
        return Err(outside());
    }
    if let Some(real) = canonicalize_existing_prefix(&candidate) {
        let real_root = repo_root
            .canonicalize()
            .unwrap_or_else(|_| repo_root.to_path_buf());
        if !real.starts_with(&real_root) {
            return Err(outside());
        }
    }
    Ok(candidate)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|ancestor| {
        let real = ancestor.canonicalize().ok()?;
        let rest = path.strip_prefix(ancestor).ok()?;
        Some(real.join(rest))
    })
}

/// Fold `.` and `..` components. Returns `None` when `..` climbs above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Workspace rooted at the top level of a local git repository.
#[derive(Debug, Clone)]
pub struct LocalGitWorkspace {
    root: PathBuf,
    git: Git,
}

impl LocalGitWorkspace {
    /// Discover the repository containing `cwd`. Fails outside a git repository.
    pub fn open(cwd: &Path) -> Result<Self> {
        let root = Git::discover_root(cwd)?;
        Ok(Self {
            git: Git::new(&root),
            root,
        })
    }
}

impl Workspace for LocalGitWorkspace {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    #[instrument(skip_all, fields(path = %path, max_chars = max_chars))]
    fn read_text(&self, path: &str, max_chars: usize) -> Result<String> {
        let resolved = resolve_repo_path(&self.root, path)?;
        if !resolved.is_file() {
            return Err(anyhow!("file not found: {path}"));
        }
        let content =
            fs::read_to_string(&resolved).with_context(|| format!("read {}", resolved.display()))?;
        debug!(chars = content.chars().count(), "read file");
        Ok(head_chars(&content, max_chars))
    }

    #[instrument(skip_all, fields(path = %path, bytes = content.len()))]
    fn write_text(&self, path: &str, content: &str) -> Result<()> {
        let resolved = resolve_repo_path(&self.root, path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&resolved, content).with_context(|| format!("write {}", resolved.display()))
    }

    fn git_status(&self) -> Result<String> {
        self.git.status_short()
    }

    fn git_diff(&self, max_chars: usize) -> Result<String> {
        Ok(head_chars(&self.git.diff()?, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn resolve_inside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolved = resolve_repo_path(temp.path(), "src/main.rs").expect("resolve");
        assert_eq!(resolved, temp.path().join("src").join("main.rs"));
    }

    #[test]
    fn resolve_folds_dot_segments_that_stay_inside() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolved = resolve_repo_path(temp.path(), "./src/../lib/./a.rs").expect("resolve");
        assert_eq!(resolved, temp.path().join("lib").join("a.rs"));
    }

    #[test]
    fn resolve_rejects_traversal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_repo_path(temp.path(), "../../etc/passwd").unwrap_err();
        assert_eq!(err, PathEscape::OutsideRoot("../../etc/passwd".to_string()));
    }

    #[test]
    fn resolve_rejects_absolute_outside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(resolve_repo_path(temp.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn resolve_rejects_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(resolve_repo_path(temp.path(), ""), Err(PathEscape::Empty));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_out_of_root() {
        let outside = tempfile::tempdir().expect("outside");
        let root = tempfile::tempdir().expect("root");
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).expect("symlink");
        fs::write(outside.path().join("secret.txt"), "x").expect("write");

        let err = resolve_repo_path(root.path(), "link/secret.txt").unwrap_err();
        assert!(matches!(err, PathEscape::OutsideRoot(_)));
        let err = resolve_repo_path(root.path(), "link/new/file.txt").unwrap_err();
        assert!(matches!(err, PathEscape::OutsideRoot(_)));
    }

    #[test]
    fn local_workspace_reads_writes_and_snapshots() {
        let repo = TestRepo::new().expect("repo");
        let ws = LocalGitWorkspace::open(repo.path()).expect("open");

        ws.write_text("notes/todo.txt", "first line\n").expect("write");
        assert_eq!(
            ws.read_text("notes/todo.txt", 5).expect("read"),
            "first"
        );
        assert!(ws.git_status().expect("status").contains("notes/"));

        ws.write_text("README.md", "rewritten\n").expect("write");
        let diff = ws.git_diff(10_000).expect("diff");
        assert!(diff.contains("+rewritten"));
        assert_eq!(ws.git_diff(4).expect("diff").chars().count(), 4);
    }

    #[test]
    fn local_workspace_read_missing_file_fails() {
        let repo = TestRepo::new().expect("repo");
        let ws = LocalGitWorkspace::open(repo.path()).expect("open");
        let err = ws.read_text("missing.txt", 100).unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn local_workspace_rejects_escaping_write() {
        let repo = TestRepo::new().expect("repo");
        let ws = LocalGitWorkspace::open(repo.path()).expect("open");
        let err = ws.write_text("../escape.txt", "x").unwrap_err();
        assert!(err.to_string().contains("escapes repo root"));
    }
}
