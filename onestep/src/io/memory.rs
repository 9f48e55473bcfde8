//! Memory port and the `.onestep/` file-backed adapter.
//!
//! Layout under the repository root:
//!
//! ```text
//! .onestep/
//!   .gitignore     ignores local.toml and runlog.jsonl
//!   config.toml    committed project settings
//!   local.toml     local overrides and secrets
//!   runlog.jsonl   append-only event history
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::types::{Event, ModelConfig, Policy};
use crate::io::config::{
    DEFAULT_CONFIG_TOML, DEFAULT_LOCAL_TOML, Settings, load_settings, write_atomic,
};
use crate::io::jsonl::to_ascii_line;

pub const STATE_DIR: &str = ".onestep";
pub const CONFIG_FILE: &str = "config.toml";
pub const LOCAL_FILE: &str = "local.toml";
pub const RUNLOG_FILE: &str = "runlog.jsonl";

const GITIGNORE_CONTENTS: &str = "local.toml\nrunlog.jsonl\n";

/// Persistent project state: configuration and the run log.
pub trait Memory {
    /// Create the state directory and default files. Idempotent; never
    /// overwrites existing files.
    fn ensure_initialized(&self) -> Result<()>;
    fn load_model_config(&self) -> Result<ModelConfig>;
    fn load_policy(&self) -> Result<Policy>;
    /// Append one event to the run log. Existing entries are never rewritten.
    fn append_runlog(&self, event: &Event) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileMemory {
    state_dir: PathBuf,
}

impl FileMemory {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            state_dir: repo_root.join(STATE_DIR),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn local_path(&self) -> PathBuf {
        self.state_dir.join(LOCAL_FILE)
    }

    pub fn runlog_path(&self) -> PathBuf {
        self.state_dir.join(RUNLOG_FILE)
    }

    /// Everything resolved from `config.toml` + `local.toml`, including exec
    /// limits and secrets.
    pub fn load_settings(&self) -> Result<Settings> {
        load_settings(&self.config_path(), &self.local_path())
    }

    /// Parse the run log back into events. A missing log is empty.
    pub fn read_runlog(&self) -> Result<Vec<Event>> {
        let path = self.runlog_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
            })
            .collect()
    }

    fn write_if_missing(&self, name: &str, contents: &str) -> Result<bool> {
        let path = self.state_dir.join(name);
        if path.exists() {
            return Ok(false);
        }
        write_atomic(&path, contents)?;
        Ok(true)
    }
}

impl Memory for FileMemory {
    #[instrument(skip_all, fields(state_dir = %self.state_dir.display()))]
    fn ensure_initialized(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("create directory {}", self.state_dir.display()))?;
        let mut created = Vec::new();
        for (name, contents) in [
            (".gitignore", GITIGNORE_CONTENTS),
            (CONFIG_FILE, DEFAULT_CONFIG_TOML),
            (LOCAL_FILE, DEFAULT_LOCAL_TOML),
            (RUNLOG_FILE, ""),
        ] {
            if self.write_if_missing(name, contents)? {
                created.push(name);
            }
        }
        if created.is_empty() {
            debug!("state directory already initialized");
        } else {
            info!(files = ?created, "initialized state directory");
        }
        Ok(())
    }

    fn load_model_config(&self) -> Result<ModelConfig> {
        Ok(self.load_settings()?.model)
    }

    fn load_policy(&self) -> Result<Policy> {
        Ok(self.load_settings()?.policy)
    }

    fn append_runlog(&self, event: &Event) -> Result<()> {
        let path = self.runlog_path();
        let line = to_ascii_line(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))
    }
}
