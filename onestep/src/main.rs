//! Single-step coding agent CLI.
//!
//! `onestep run` plans one step with the configured model and applies it to
//! the current git repository; state lives in `.onestep/`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::json;
use tracing::debug;

use onestep::doctor::DoctorReport;
use onestep::exit_codes;
use onestep::io::events::{ConsoleEventSink, ConsoleFormat};
use onestep::io::exec::LocalExec;
use onestep::io::git::Git;
use onestep::io::memory::{FileMemory, Memory};
use onestep::io::model::model_client_for;
use onestep::io::workspace::{LocalGitWorkspace, Workspace};
use onestep::logging;
use onestep::plan_check::check_plan;
use onestep::step::{StepPorts, StepRunner};

const DIFF_PREVIEW_CHARS: usize = 20_000;

#[derive(Parser)]
#[command(
    name = "onestep",
    version,
    about = "Plan and apply one coding-agent step in a git repository"
)]
struct Cli {
    /// Print machine-readable JSON lines instead of human text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.onestep/` (config, local overrides, run log) if missing.
    Init,
    /// Ask the model for one action plan and apply it.
    Run {
        /// What the agent should do.
        task: String,
    },
    /// Validate an action plan without running it.
    #[command(group(ArgGroup::new("input").required(true).args(["file", "json_input"])))]
    PlanCheck {
        /// Path to an action plan JSON file.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Inline action plan JSON.
        #[arg(long)]
        json_input: Option<String>,
    },
    /// Show the current working tree diff.
    Diff,
    /// Check workspace, config, provider and API key setup.
    Doctor {
        /// Also ask the configured model to identify itself.
        #[arg(long)]
        probe_model: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init => cmd_init(&cwd, cli.json),
        Command::Run { task } => cmd_run(&cwd, &task, cli.json),
        Command::PlanCheck { file, json_input } => {
            cmd_plan_check(file.as_deref(), json_input.as_deref(), cli.json)
        }
        Command::Diff => cmd_diff(&cwd, cli.json),
        Command::Doctor { probe_model } => cmd_doctor(&cwd, probe_model, cli.json),
    }
}

/// Repository root containing `cwd`, or `cwd` itself outside a repository.
fn state_root(cwd: &Path) -> (PathBuf, bool) {
    match Git::discover_root(cwd) {
        Ok(root) => (root, true),
        Err(err) => {
            debug!(err = %err, "no git repository; using current directory");
            (cwd.to_path_buf(), false)
        }
    }
}

fn cmd_init(cwd: &Path, json: bool) -> Result<i32> {
    let (root, in_repo) = state_root(cwd);
    let memory = FileMemory::new(&root);
    memory.ensure_initialized()?;
    if json {
        println!(
            "{}",
            json!({"state_dir": memory.state_dir().display().to_string(), "git_repository": in_repo})
        );
    } else {
        println!("Initialized {}", memory.state_dir().display());
        if !in_repo {
            eprintln!(
                "No git repository detected; initialized in the current directory. \
                 Rerun `onestep init` from the repository root after `git init`."
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_run(cwd: &Path, task: &str, json: bool) -> Result<i32> {
    if task.trim().is_empty() {
        bail!("task must be non-empty");
    }
    let workspace = LocalGitWorkspace::open(cwd)?;
    let memory = FileMemory::new(workspace.repo_root());
    memory.ensure_initialized()?;
    let settings = memory.load_settings()?;
    let model = model_client_for(&settings.model, &settings.secrets)?;
    let exec = LocalExec::new(workspace.repo_root(), settings.exec.clone());
    let format = if json {
        ConsoleFormat::JsonLines
    } else {
        ConsoleFormat::Human
    };

    let runner = StepRunner::new(StepPorts {
        model,
        workspace,
        exec,
        events: ConsoleEventSink::stdout(format),
        memory,
    });
    let result = runner.run_once(task);
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_plan_check(file: Option<&Path>, inline: Option<&str>, json: bool) -> Result<i32> {
    let (source, raw) = match (file, inline) {
        (Some(path), None) => (
            path.display().to_string(),
            fs::read_to_string(path)
                .with_context(|| format!("read action plan file {}", path.display()))?,
        ),
        (None, Some(raw)) => ("inline --json-input".to_string(), raw.to_string()),
        _ => bail!("provide exactly one input: --file or --json-input"),
    };

    let report = check_plan(&source, &raw);
    if json {
        println!(
            "{}",
            serde_json::to_string(&report).context("serialize plan report")?
        );
    } else {
        print!("{}", report.render());
    }
    Ok(if report.passed() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_diff(cwd: &Path, json: bool) -> Result<i32> {
    let workspace = LocalGitWorkspace::open(cwd)?;
    let diff = workspace.git_diff(DIFF_PREVIEW_CHARS)?;
    if json {
        println!("{}", json!({ "diff": diff }));
    } else if diff.trim().is_empty() {
        println!("(no changes)");
    } else {
        print!("{diff}");
        if !diff.ends_with('\n') {
            println!();
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_doctor(cwd: &Path, probe_model: bool, json: bool) -> Result<i32> {
    let (root, in_repo) = state_root(cwd);
    let memory = FileMemory::new(&root);
    memory.ensure_initialized()?;
    let mut report = DoctorReport::collect(&root, in_repo, &memory)?;
    if probe_model {
        report.probe(model_client_for);
    }
    if json {
        println!(
            "{}",
            serde_json::to_string(&report).context("serialize doctor report")?
        );
    } else {
        print!("{}", report.render());
    }
    Ok(if report.has_issues() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_global_json_flag() {
        let cli = Cli::parse_from(["onestep", "run", "fix tests", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Run { ref task } if task == "fix tests"));
    }

    #[test]
    fn parse_plan_check_file() {
        let cli = Cli::parse_from(["onestep", "plan-check", "--file", "plan.json"]);
        assert!(matches!(
            cli.command,
            Command::PlanCheck { file: Some(_), json_input: None }
        ));
    }

    #[test]
    fn parse_doctor_probe_flag() {
        let cli = Cli::parse_from(["onestep", "doctor", "--probe-model"]);
        assert!(matches!(cli.command, Command::Doctor { probe_model: true }));
        let cli = Cli::parse_from(["onestep", "doctor"]);
        assert!(matches!(cli.command, Command::Doctor { probe_model: false }));
    }

    #[test]
    fn plan_check_requires_exactly_one_input() {
        assert!(Cli::try_parse_from(["onestep", "plan-check"]).is_err());
        assert!(
            Cli::try_parse_from([
                "onestep",
                "plan-check",
                "--file",
                "a.json",
                "--json-input",
                "{}"
            ])
            .is_err()
        );
    }
}
