//! Setup diagnostics for `onestep doctor`.
//!
//! Checks workspace detection, the state directory, the configured provider
//! and where its API key comes from. The live model probe is opt-in.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::types::ModelConfig;
use crate::io::config::Secrets;
use crate::io::memory::FileMemory;
use crate::io::model::{KeySource, ModelClient, Provider, resolve_api_key_with};
use crate::io::process::head_chars;
use crate::plan_check::render_table;

pub const PROBE_SYSTEM_PROMPT: &str =
    "You are a diagnostic assistant. Reply with one short plain sentence only.";
pub const PROBE_USER_PROMPT: &str =
    "What model are you? equation: model_identity = provider/model_name";
const PROBE_DETAIL_CHARS: usize = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skip,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Skip => "SKIP",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub repo_root: String,
    pub git_repository: bool,
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_style: Option<String>,
    pub config_path: String,
    pub local_path: String,
    pub runlog_path: String,
    pub api_key_source: Option<String>,
    pub checks: Vec<Check>,
    pub issues: Vec<String>,
    #[serde(skip)]
    probed: bool,
    #[serde(skip)]
    model_config: ModelConfig,
    #[serde(skip)]
    secrets: Secrets,
}

impl DoctorReport {
    /// Inspect `memory` (already initialized) for the repository at `repo_root`.
    pub fn collect(repo_root: &Path, git_repository: bool, memory: &FileMemory) -> Result<Self> {
        Self::collect_with(repo_root, git_repository, memory, |name| {
            std::env::var(name).ok()
        })
    }

    #[instrument(skip_all, fields(repo_root = %repo_root.display()))]
    fn collect_with(
        repo_root: &Path,
        git_repository: bool,
        memory: &FileMemory,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let settings = memory.load_settings()?;
        let config = settings.model;
        let provider = config.provider.parse::<Provider>();
        let key_source = match &provider {
            Ok(provider) => resolve_api_key_with(*provider, &settings.secrets, lookup)
                .ok()
                .map(|(_, source): (String, KeySource)| source.to_string()),
            Err(_) => None,
        };
        debug!(provider = %config.provider, key_source = ?key_source, "collected doctor inputs");

        let mut issues = Vec::new();
        let mut checks = vec![
            if git_repository {
                check("Workspace", CheckStatus::Pass, "Git repository detected")
            } else {
                check(
                    "Workspace",
                    CheckStatus::Warn,
                    "No git repository yet; `onestep run` needs one",
                )
            },
            check("Config", CheckStatus::Pass, ".onestep files are present"),
        ];
        match &provider {
            Ok(_) => checks.push(check("Provider", CheckStatus::Pass, &config.provider)),
            Err(err) => {
                issues.push(format!("{err:#}"));
                checks.push(check("Provider", CheckStatus::Fail, &config.provider));
            }
        }
        match &key_source {
            Some(source) => checks.push(check("API key", CheckStatus::Pass, source)),
            None => {
                issues.push(format!(
                    "Missing API key for provider '{}'",
                    config.provider
                ));
                checks.push(check("API key", CheckStatus::Warn, "none"));
            }
        }

        Ok(Self {
            repo_root: repo_root.display().to_string(),
            git_repository,
            provider: config.provider.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            api_style: config.api_style.clone(),
            config_path: memory.config_path().display().to_string(),
            local_path: memory.local_path().display().to_string(),
            runlog_path: memory.runlog_path().display().to_string(),
            api_key_source: key_source,
            checks,
            issues,
            probed: false,
            model_config: config,
            secrets: settings.secrets,
        })
    }

    /// Ask the configured model to identify itself. `connect` builds the client
    /// and is only called when the provider and API key checks passed. A
    /// failed probe is a warning, not an issue.
    pub fn probe<M, F>(&mut self, connect: F)
    where
        M: ModelClient,
        F: FnOnce(&ModelConfig, &Secrets) -> Result<M>,
    {
        self.probed = true;
        let (status, details) = if self.api_key_source.is_none() {
            (CheckStatus::Warn, "skipped: missing API key".to_string())
        } else if self.provider.parse::<Provider>().is_err() {
            (CheckStatus::Fail, "unsupported provider".to_string())
        } else {
            let reply = connect(&self.model_config, &self.secrets).and_then(|model| {
                model.plan_step(&self.model_config, PROBE_SYSTEM_PROMPT, PROBE_USER_PROMPT)
            });
            match reply {
                Ok(raw) => {
                    let line = raw.trim().replace('\n', " ");
                    let details = if line.is_empty() {
                        "(empty response)".to_string()
                    } else {
                        head_chars(&line, PROBE_DETAIL_CHARS)
                    };
                    (CheckStatus::Pass, details)
                }
                Err(err) => (CheckStatus::Warn, format!("probe failed: {err:#}")),
            }
        };
        self.checks.push(Check {
            name: "Model probe",
            status,
            details,
        });
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Plain-text rendering for terminals.
    pub fn render(&self) -> String {
        let mut out = String::from("Doctor report\n");
        let fields = [
            ("Repo root", self.repo_root.as_str()),
            ("Provider", self.provider.as_str()),
            ("Model", self.model.as_str()),
            ("Base URL", self.base_url.as_deref().unwrap_or("(default)")),
            ("API style", self.api_style.as_deref().unwrap_or("(n/a)")),
            ("Config", self.config_path.as_str()),
            ("Local config", self.local_path.as_str()),
            ("Runlog", self.runlog_path.as_str()),
        ];
        for (label, value) in fields {
            out.push_str(&format!("  {label}: {value}\n"));
        }
        out.push('\n');

        let mut rows: Vec<[String; 3]> = self
            .checks
            .iter()
            .map(|c| [c.name.to_string(), c.status.to_string(), c.details.clone()])
            .collect();
        if !self.probed {
            rows.push([
                "Model probe".to_string(),
                CheckStatus::Skip.to_string(),
                "not requested".to_string(),
            ]);
        }
        out.push_str(&render_table(["Check", "Status", "Details"], &rows));
        out.push_str(&format!(
            "\nAPI key source: {}\n",
            self.api_key_source.as_deref().unwrap_or("none")
        ));
        if !self.probed {
            out.push_str("Tip: run `onestep doctor --probe-model` for a live model identity check.\n");
        }
        for issue in &self.issues {
            out.push_str(&format!("[WARN] {issue}\n"));
        }
        out
    }
}

fn check(name: &'static str, status: CheckStatus, details: &str) -> Check {
    Check {
        name,
        status,
        details: details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::anyhow;

    use super::*;
    use crate::test_support::{FailingModel, StaticModel};
    use crate::io::memory::Memory;

    fn memory_with_local(local: &str) -> (tempfile::TempDir, FileMemory) {
        let temp = tempfile::tempdir().expect("tempdir");
        let memory = FileMemory::new(temp.path());
        memory.ensure_initialized().expect("init");
        fs::write(memory.local_path(), local).expect("write local.toml");
        (temp, memory)
    }

    fn collect(memory: &FileMemory, root: &Path, env: Option<&str>) -> DoctorReport {
        let env = env.map(str::to_string);
        DoctorReport::collect_with(root, true, memory, |_| env.clone()).expect("collect")
    }

    fn status_of(report: &DoctorReport, name: &str) -> CheckStatus {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
            .expect("check present")
    }

    #[test]
    fn env_key_passes_without_issues() {
        let (temp, memory) = memory_with_local("");
        let report = collect(&memory, temp.path(), Some("sk-env"));
        assert!(!report.has_issues());
        assert_eq!(report.api_key_source.as_deref(), Some("env"));
        assert_eq!(status_of(&report, "Provider"), CheckStatus::Pass);

        let text = report.render();
        assert!(text.contains("Model probe  SKIP    not requested"));
        assert!(text.contains("Tip: run `onestep doctor --probe-model`"));
    }

    #[test]
    fn local_secret_is_reported_as_source() {
        let (temp, memory) = memory_with_local("[secrets]\nopenai_api_key = \"sk-local\"\n");
        let report = collect(&memory, temp.path(), None);
        assert_eq!(report.api_key_source.as_deref(), Some("local.toml"));
        assert!(!report.has_issues());
    }

    #[test]
    fn missing_key_is_an_issue_and_skips_probe() {
        let (temp, memory) = memory_with_local("");
        let mut report = collect(&memory, temp.path(), None);
        report.probe(|_, _| -> Result<StaticModel> { Err(anyhow!("must not connect")) });

        assert!(report.has_issues());
        assert_eq!(status_of(&report, "API key"), CheckStatus::Warn);
        let probe = report.checks.last().expect("probe");
        assert_eq!(probe.status, CheckStatus::Warn);
        assert_eq!(probe.details, "skipped: missing API key");
        assert!(report.render().contains("[WARN] Missing API key for provider 'openai_compat'"));
    }

    #[test]
    fn unknown_provider_fails() {
        let (temp, memory) = memory_with_local("[model]\nprovider = \"local_llama\"\n");
        let report = collect(&memory, temp.path(), Some("sk"));
        assert!(report.has_issues());
        assert_eq!(status_of(&report, "Provider"), CheckStatus::Fail);
        assert_eq!(report.api_key_source, None);
    }

    #[test]
    fn probe_reply_is_flattened_and_truncated() {
        let (temp, memory) = memory_with_local("");
        let mut report = collect(&memory, temp.path(), Some("sk"));
        let reply = format!("  I am\ngpt-4o-mini {}", "x".repeat(400));
        report.probe(|_, _| Ok(StaticModel::new(reply)));

        let probe = report.checks.last().expect("probe");
        assert_eq!(probe.status, CheckStatus::Pass);
        assert!(probe.details.starts_with("I am gpt-4o-mini "));
        assert_eq!(probe.details.chars().count(), PROBE_DETAIL_CHARS);
        assert!(!report.has_issues());
        assert!(!report.render().contains("Tip:"));
    }

    #[test]
    fn probe_failure_is_a_warning_only() {
        let (temp, memory) = memory_with_local("");
        let mut report = collect(&memory, temp.path(), Some("sk"));
        report.probe(|_, _| Ok(FailingModel::new("HTTP 401")));

        let probe = report.checks.last().expect("probe");
        assert_eq!(probe.status, CheckStatus::Warn);
        assert!(probe.details.starts_with("probe failed: "));
        assert!(probe.details.contains("HTTP 401"));
        assert!(!report.has_issues());
    }

    #[test]
    fn report_serializes_statuses_uppercase() {
        let (temp, memory) = memory_with_local("");
        let report = collect(&memory, temp.path(), Some("sk"));
        let value = serde_json::to_value(&report).expect("json");
        assert_eq!(value["checks"][0]["status"], "PASS");
        assert_eq!(value["api_key_source"], "env");
        assert!(value.get("secrets").is_none());
    }
}
