//! Test-only fakes for every step port plus a throwaway git repository.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::policy::command_allowed;
use crate::core::types::{Event, ModelConfig, Policy};
use crate::io::events::EventSink;
use crate::io::exec::{CommandRunner, ExecOutput, PermissionDenied};
use crate::io::memory::Memory;
use crate::io::model::ModelClient;
use crate::io::process::head_chars;
use crate::io::workspace::Workspace;

/// Model that always returns the same raw plan and records its prompts.
#[derive(Debug, Default)]
pub struct StaticModel {
    raw: String,
    prompts: RefCell<Vec<(String, String)>>,
}

impl StaticModel {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    /// `(system, user)` prompt pairs in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.borrow().clone()
    }
}

impl ModelClient for StaticModel {
    fn plan_step(&self, _config: &ModelConfig, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts
            .borrow_mut()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        Ok(self.raw.clone())
    }
}

/// Model whose every call fails with `message`.
#[derive(Debug)]
pub struct FailingModel {
    message: String,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ModelClient for FailingModel {
    fn plan_step(&self, _config: &ModelConfig, _system: &str, _user: &str) -> Result<String> {
        Err(anyhow!("{}", self.message))
    }
}

/// In-memory workspace with canned git snapshots.
#[derive(Debug)]
pub struct FakeWorkspace {
    root: PathBuf,
    files: RefCell<BTreeMap<String, String>>,
    writes: RefCell<Vec<String>>,
    status: String,
    diff: String,
    git_error: Option<String>,
}

impl Default for FakeWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/fake-repo"),
            files: RefCell::new(BTreeMap::new()),
            writes: RefCell::new(Vec::new()),
            status: String::new(),
            diff: String::new(),
            git_error: None,
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_git(mut self, status: &str, diff: &str) -> Self {
        self.status = status.to_string();
        self.diff = diff.to_string();
        self
    }

    /// Make `git_status` and `git_diff` fail with `message`.
    pub fn failing_git(mut self, message: &str) -> Self {
        self.git_error = Some(message.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    /// Paths passed to `write_text`, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }

    fn git_result(&self, value: &str) -> Result<String> {
        match &self.git_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(value.to_string()),
        }
    }
}

impl Workspace for FakeWorkspace {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn read_text(&self, path: &str, max_chars: usize) -> Result<String> {
        self.files
            .borrow()
            .get(path)
            .map(|content| head_chars(content, max_chars))
            .ok_or_else(|| anyhow!("file not found: {path}"))
    }

    fn write_text(&self, path: &str, content: &str) -> Result<()> {
        if path.split('/').any(|part| part == "..") {
            return Err(anyhow!("path escapes repo root: {path}"));
        }
        self.writes.borrow_mut().push(path.to_string());
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn git_status(&self) -> Result<String> {
        self.git_result(&self.status)
    }

    fn git_diff(&self, max_chars: usize) -> Result<String> {
        self.git_result(&head_chars(&self.diff, max_chars))
    }
}

/// Command runner that never spawns; returns a fixed result and records commands.
#[derive(Debug)]
pub struct FakeExec {
    exit_code: i32,
    stdout: String,
    stderr: String,
    commands: RefCell<Vec<String>>,
}

impl FakeExec {
    pub fn new(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn with_output(mut self, stdout: &str, stderr: &str) -> Self {
        self.stdout = stdout.to_string();
        self.stderr = stderr.to_string();
        self
    }

    /// Commands that reached the runner, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for FakeExec {
    fn run(&self, command: &str, policy: &Policy) -> Result<ExecOutput> {
        if !command_allowed(command, policy) {
            return Err(PermissionDenied {
                command: command.to_string(),
            }
            .into());
        }
        self.commands.borrow_mut().push(command.to_string());
        Ok(ExecOutput {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

/// Sink that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RefCell<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Memory holding a fixed config and an in-memory run log.
#[derive(Debug)]
pub struct FakeMemory {
    model: ModelConfig,
    policy: Policy,
    runlog: RefCell<Vec<Event>>,
    init_calls: Cell<usize>,
    policy_error: Option<String>,
    runlog_fails: bool,
}

impl FakeMemory {
    pub fn new(policy: Policy) -> Self {
        Self {
            model: test_model_config(),
            policy,
            runlog: RefCell::new(Vec::new()),
            init_calls: Cell::new(0),
            policy_error: None,
            runlog_fails: false,
        }
    }

    /// Make `load_policy` fail with `message`.
    pub fn failing_policy(mut self, message: &str) -> Self {
        self.policy_error = Some(message.to_string());
        self
    }

    /// Make every `append_runlog` fail.
    pub fn failing_runlog(mut self) -> Self {
        self.runlog_fails = true;
        self
    }

    pub fn runlog(&self) -> Vec<Event> {
        self.runlog.borrow().clone()
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.get()
    }
}

impl Memory for FakeMemory {
    fn ensure_initialized(&self) -> Result<()> {
        self.init_calls.set(self.init_calls.get() + 1);
        Ok(())
    }

    fn load_model_config(&self) -> Result<ModelConfig> {
        Ok(self.model.clone())
    }

    fn load_policy(&self) -> Result<Policy> {
        match &self.policy_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(self.policy.clone()),
        }
    }

    fn append_runlog(&self, event: &Event) -> Result<()> {
        if self.runlog_fails {
            return Err(anyhow!("run log is read-only"));
        }
        self.runlog.borrow_mut().push(event.clone());
        Ok(())
    }
}

pub fn test_model_config() -> ModelConfig {
    ModelConfig {
        provider: "openai_compat".to_string(),
        model: "test-model".to_string(),
        base_url: None,
        api_style: None,
    }
}

/// Temporary git repository with one commit containing `README.md`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "onestep@example.com"])?;
        repo.git(&["config", "user.name", "onestep tests"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README.md")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-q", "-m", "init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
