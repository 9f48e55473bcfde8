//! Configuration stored under `.onestep/config.toml` and `.onestep/local.toml`.
//!
//! Both files share one schema with every field optional. Values resolve as
//! built-in defaults, then `config.toml`, then `local.toml` (git-ignored, may
//! hold secrets).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{ModelConfig, Policy};
use crate::io::exec::ExecLimits;

pub const DEFAULT_PROVIDER: &str = "openai_compat";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Written by `init` when `config.toml` is missing.
pub const DEFAULT_CONFIG_TOML: &str = r#"[model]
provider = "openai_compat"
model = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"

[policy]
allow_commands = ["pytest", "python -m pytest", "git status", "git diff", "ls", "cat"]
max_diff_chars = 4000
max_file_read_chars = 4000

[exec]
timeout_secs = 300
output_limit_bytes = 1000000
"#;

/// Written by `init` when `local.toml` is missing.
pub const DEFAULT_LOCAL_TOML: &str = "# Local overrides and secrets (not committed).\n";

/// On-disk shape shared by `config.toml` and `local.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigFile {
    pub model: ModelTable,
    pub policy: PolicyTable,
    pub exec: ExecTable,
    pub providers: BTreeMap<String, ProviderTable>,
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelTable {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_style: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyTable {
    pub allow_commands: Option<Vec<String>>,
    pub max_diff_chars: Option<usize>,
    pub max_file_read_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecTable {
    pub timeout_secs: Option<u64>,
    pub output_limit_bytes: Option<usize>,
}

/// Per-provider overrides, keyed by provider name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderTable {
    pub base_url: Option<String>,
    pub api_style: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
}

impl ConfigFile {
    /// Overlay `over` on top of `self`, field by field.
    ///
    /// Switching provider drops the base layer's `base_url`/`api_style`, which
    /// belong to the previous provider.
    pub fn overlay(self, over: ConfigFile) -> ConfigFile {
        let mut base_model = self.model;
        if over
            .model
            .provider
            .as_ref()
            .is_some_and(|p| base_model.provider.as_ref() != Some(p))
        {
            base_model.base_url = None;
            base_model.api_style = None;
        }

        let mut providers = self.providers;
        for (name, table) in over.providers {
            let merged = match providers.remove(&name) {
                Some(base) => ProviderTable {
                    base_url: table.base_url.or(base.base_url),
                    api_style: table.api_style.or(base.api_style),
                },
                None => table,
            };
            providers.insert(name, merged);
        }

        ConfigFile {
            model: ModelTable {
                provider: over.model.provider.or(base_model.provider),
                model: over.model.model.or(base_model.model),
                base_url: over.model.base_url.or(base_model.base_url),
                api_style: over.model.api_style.or(base_model.api_style),
            },
            policy: PolicyTable {
                allow_commands: over.policy.allow_commands.or(self.policy.allow_commands),
                max_diff_chars: over.policy.max_diff_chars.or(self.policy.max_diff_chars),
                max_file_read_chars: over
                    .policy
                    .max_file_read_chars
                    .or(self.policy.max_file_read_chars),
            },
            exec: ExecTable {
                timeout_secs: over.exec.timeout_secs.or(self.exec.timeout_secs),
                output_limit_bytes: over.exec.output_limit_bytes.or(self.exec.output_limit_bytes),
            },
            providers,
            secrets: Secrets {
                openai_api_key: over.secrets.openai_api_key.or(self.secrets.openai_api_key),
                anthropic_api_key: over
                    .secrets
                    .anthropic_api_key
                    .or(self.secrets.anthropic_api_key),
                openrouter_api_key: over
                    .secrets
                    .openrouter_api_key
                    .or(self.secrets.openrouter_api_key),
            },
        }
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<Settings> {
        let provider = self
            .model
            .provider
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let provider_table = self.providers.get(&provider).cloned().unwrap_or_default();
        let model = ModelConfig {
            model: self.model.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: provider_table.base_url.or(self.model.base_url),
            api_style: provider_table.api_style.or(self.model.api_style),
            provider,
        };

        let defaults = Policy::default();
        let policy = Policy {
            allow_commands: self.policy.allow_commands.unwrap_or_default(),
            max_diff_chars: self.policy.max_diff_chars.unwrap_or(defaults.max_diff_chars),
            max_file_read_chars: self
                .policy
                .max_file_read_chars
                .unwrap_or(defaults.max_file_read_chars),
        };

        let exec_defaults = ExecLimits::default();
        let exec = ExecLimits {
            timeout: self
                .exec
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(exec_defaults.timeout),
            output_limit_bytes: self
                .exec
                .output_limit_bytes
                .unwrap_or(exec_defaults.output_limit_bytes),
        };

        let settings = Settings {
            model,
            policy,
            exec,
            secrets: self.secrets,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: ModelConfig,
    pub policy: Policy,
    pub exec: ExecLimits,
    pub secrets: Secrets,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.model.provider.trim().is_empty() {
            return Err(anyhow!("model.provider must be non-empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if self.policy.max_diff_chars == 0 {
            return Err(anyhow!("policy.max_diff_chars must be > 0"));
        }
        if self.policy.max_file_read_chars == 0 {
            return Err(anyhow!("policy.max_file_read_chars must be > 0"));
        }
        if let Some(idx) = self
            .policy
            .allow_commands
            .iter()
            .position(|entry| entry.trim().is_empty())
        {
            return Err(anyhow!("policy.allow_commands[{idx}] must be non-empty"));
        }
        if self.exec.timeout.is_zero() {
            return Err(anyhow!("exec.timeout_secs must be > 0"));
        }
        if self.exec.output_limit_bytes == 0 {
            return Err(anyhow!("exec.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load one config layer. A missing file is an empty layer.
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Load and resolve `config.toml` overlaid with `local.toml`.
pub fn load_settings(config_path: &Path, local_path: &Path) -> Result<Settings> {
    let base = load_config_file(config_path)?;
    let local = load_config_file(local_path)?;
    base.overlay(local)
        .resolve()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))
}

/// Atomically write `contents` to `path` (temp file + rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ConfigFile {
        toml::from_str(raw).expect("parse")
    }

    #[test]
    fn default_template_resolves() {
        let settings = parse(DEFAULT_CONFIG_TOML).resolve().expect("resolve");
        assert_eq!(settings.model.provider, "openai_compat");
        assert_eq!(settings.model.model, "gpt-4o-mini");
        assert_eq!(
            settings.model.base_url.as_deref(),
            Some("https://api.openai.com/v1")
        );
        assert!(settings.policy.allow_commands.contains(&"pytest".to_string()));
        assert_eq!(settings.exec.timeout, Duration::from_secs(300));
    }

    #[test]
    fn missing_files_resolve_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(
            &temp.path().join("config.toml"),
            &temp.path().join("local.toml"),
        )
        .expect("load");
        assert_eq!(settings.model.provider, DEFAULT_PROVIDER);
        assert_eq!(settings.model.base_url, None);
        assert!(settings.policy.allow_commands.is_empty());
        assert_eq!(settings.policy, Policy::default());
    }

    #[test]
    fn local_overrides_model_and_provider_table() {
        let base = parse(DEFAULT_CONFIG_TOML);
        let local = parse(
            r#"
[model]
provider = "openrouter_http"
model = "anthropic/claude-sonnet-4-6"

[providers.openrouter_http]
api_style = "anthropic"
"#,
        );
        let settings = base.overlay(local).resolve().expect("resolve");
        assert_eq!(settings.model.model, "anthropic/claude-sonnet-4-6");
        assert_eq!(settings.model.api_style.as_deref(), Some("anthropic"));
        assert_eq!(settings.model.base_url, None);
        assert_eq!(settings.policy.max_diff_chars, 4000);
    }

    #[test]
    fn local_secrets_overlay_base() {
        let base = parse("[secrets]\nopenai_api_key = \"base\"\n");
        let local = parse("[secrets]\nopenrouter_api_key = \"abc\"\n");
        let merged = base.overlay(local);
        assert_eq!(merged.secrets.openai_api_key.as_deref(), Some("base"));
        assert_eq!(merged.secrets.openrouter_api_key.as_deref(), Some("abc"));
    }

    #[test]
    fn rejects_wrongly_typed_allow_commands() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[policy]\nallow_commands = \"pytest\"\n").expect("write");
        let err = load_settings(&path, &temp.path().join("local.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("parse"));
    }

    #[test]
    fn rejects_invalid_limits() {
        let err = parse("[policy]\nmax_diff_chars = 0\n").resolve().unwrap_err();
        assert!(err.to_string().contains("max_diff_chars"));
        let err = parse("[policy]\nallow_commands = [\"ok\", \"  \"]\n")
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("allow_commands[1]"));
        let err = parse("[exec]\ntimeout_secs = 0\n").resolve().unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn write_atomic_replaces_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        write_atomic(&path, "a = 1\n").expect("write");
        write_atomic(&path, "a = 2\n").expect("rewrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "a = 2\n");
        assert!(!path.with_extension("tmp").exists());
    }
}
