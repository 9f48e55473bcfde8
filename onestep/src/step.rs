//! Orchestration for a single `onestep run`.
//!
//! One call plans with the model, validates the plan, applies its actions in
//! order and reports everything as [`Event`]s. Every event goes to the sink,
//! then the run log, then the returned [`StepResult`], in that order.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{Span, debug, info, instrument, warn};

use crate::core::action_plan::{Action, ActionPlan, parse_action_plan};
use crate::core::policy::command_allowed;
use crate::core::types::{Event, EventType, ModelConfig, Payload, Policy, StepResult, Thread};
use crate::io::events::EventSink;
use crate::io::exec::{CommandRunner, PermissionDenied};
use crate::io::memory::Memory;
use crate::io::model::ModelClient;
use crate::io::prompt::PromptEngine;
use crate::io::workspace::Workspace;

pub const SUGGEST_TESTS: &str = "Run tests next";
pub const SUGGEST_USER_DECISION: &str = "Need user decision";

/// The five collaborators a step needs.
pub struct StepPorts<M, W, X, S, R> {
    pub model: M,
    pub workspace: W,
    pub exec: X,
    pub events: S,
    pub memory: R,
}

pub struct StepRunner<M, W, X, S, R> {
    ports: StepPorts<M, W, X, S, R>,
}

impl<M, W, X, S, R> StepRunner<M, W, X, S, R>
where
    M: ModelClient,
    W: Workspace,
    X: CommandRunner,
    S: EventSink,
    R: Memory,
{
    pub fn new(ports: StepPorts<M, W, X, S, R>) -> Self {
        Self { ports }
    }

    pub fn ports(&self) -> &StepPorts<M, W, X, S, R> {
        &self.ports
    }

    pub fn into_ports(self) -> StepPorts<M, W, X, S, R> {
        self.ports
    }

    /// Run one plan-and-apply step for `task`. Never fails: every failure is
    /// reported as an `error` event followed by a `done` event.
    #[instrument(skip_all, fields(thread_id = tracing::field::Empty))]
    pub fn run_once(&self, task: &str) -> StepResult {
        let thread = Thread::new(task);
        Span::current().record("thread_id", thread.id.as_str());
        let mut trail = Trail::default();

        let setup = self.load_setup();
        self.emit(
            Event::progress(
                "Starting single-step run",
                payload([
                    ("task", Value::from(thread.task.as_str())),
                    ("thread_id", Value::from(thread.id.as_str())),
                ]),
            ),
            &mut trail,
        );
        let (model_config, policy) = match setup {
            Ok(setup) => setup,
            Err(err) => return self.abort("Run setup failed", &err, trail),
        };

        let plan = match self.build_prompts(task, &policy) {
            Err(err) => return self.abort("Prompt construction failed", &err, trail),
            Ok((system, user)) => match self.plan(&model_config, &system, &user) {
                Ok(plan) => plan,
                Err(err) => return self.abort("Model output parsing failed", &err, trail),
            },
        };

        self.emit(
            Event::progress(
                format!("Action plan ready: {}", plan.summary),
                payload([("actions", Value::from(plan.actions.len()))]),
            ),
            &mut trail,
        );

        let mut success = true;
        for action in &plan.actions {
            match self.apply(action, &policy, &mut trail) {
                Ok(true) => {}
                Ok(false) => success = false,
                Err(err) => {
                    warn!(kind = action.kind(), err = %format!("{err:#}"), "action failed");
                    success = false;
                    self.emit(
                        Event::error(format!("Action failed: {}", action.kind()), format!("{err:#}")),
                        &mut trail,
                    );
                    break;
                }
            }
        }

        if self.report_runlog_failure(&mut trail) {
            success = false;
        }
        let git_status = self
            .ports
            .workspace
            .git_status()
            .unwrap_or_else(|err| format!("{err:#}"));
        let git_diff = self
            .ports
            .workspace
            .git_diff(policy.max_diff_chars)
            .unwrap_or_else(|err| format!("{err:#}"));
        let suggestion = if success {
            SUGGEST_TESTS
        } else {
            SUGGEST_USER_DECISION
        };
        self.emit(
            Event::new(
                EventType::Review,
                "Step review",
                false,
                payload([
                    ("git_status", Value::from(git_status)),
                    ("git_diff", Value::from(git_diff)),
                    ("suggestion", Value::from(suggestion)),
                ]),
            ),
            &mut trail,
        );

        if self.report_runlog_failure(&mut trail) {
            success = false;
        }
        info!(success, events = trail.events.len() + 1, "step finished");
        self.emit(Event::done("Run completed", success), &mut trail);
        StepResult {
            success: success && trail.runlog_error.is_none(),
            events: trail.events,
        }
    }

    fn load_setup(&self) -> Result<(ModelConfig, Policy)> {
        let memory = &self.ports.memory;
        memory
            .ensure_initialized()
            .context("initialize state directory")?;
        let model_config = memory.load_model_config().context("load model config")?;
        let policy = memory.load_policy().context("load policy")?;
        Ok((model_config, policy))
    }

    fn build_prompts(&self, task: &str, policy: &Policy) -> Result<(String, String)> {
        let workspace = &self.ports.workspace;
        let status = workspace.git_status().context("read repo status")?;
        let diff = workspace
            .git_diff(policy.max_diff_chars)
            .context("read repo diff")?;
        let engine = PromptEngine::new()?;
        Ok((
            engine.system_prompt()?,
            engine.user_prompt(task, &status, &diff)?,
        ))
    }

    fn plan(&self, config: &ModelConfig, system: &str, user: &str) -> Result<ActionPlan> {
        let raw = self.ports.model.plan_step(config, system, user)?;
        debug!(chars = raw.chars().count(), "model returned plan");
        Ok(parse_action_plan(&raw)?)
    }

    /// Apply one action. `Ok(false)` marks the step unsuccessful without
    /// stopping the loop; `Err` stops it.
    fn apply(&self, action: &Action, policy: &Policy, trail: &mut Trail) -> Result<bool> {
        match action {
            Action::Read { path } => {
                let content = self
                    .ports
                    .workspace
                    .read_text(path, policy.max_file_read_chars)?;
                self.emit(
                    Event::artifact(
                        format!("Read {path}"),
                        false,
                        payload([
                            ("path", Value::from(path.as_str())),
                            ("content", Value::from(content)),
                        ]),
                    ),
                    trail,
                );
                Ok(true)
            }
            Action::Write { path, content } => {
                self.ports.workspace.write_text(path, content)?;
                self.emit(
                    Event::artifact(
                        format!("Wrote {path}"),
                        false,
                        payload([
                            ("path", Value::from(path.as_str())),
                            ("bytes", Value::from(content.len())),
                        ]),
                    ),
                    trail,
                );
                Ok(true)
            }
            Action::Run { command } => {
                if !command_allowed(command, policy) {
                    return Err(PermissionDenied {
                        command: command.clone(),
                    }
                    .into());
                }
                let output = self.ports.exec.run(command, policy)?;
                let ok = output.exit_code == 0;
                self.emit(
                    Event::artifact(
                        format!("Ran command: {command}"),
                        !ok,
                        payload([
                            ("command", Value::from(command.as_str())),
                            ("exit_code", Value::from(output.exit_code)),
                            ("stdout", Value::from(output.stdout)),
                            ("stderr", Value::from(output.stderr)),
                        ]),
                    ),
                    trail,
                );
                Ok(ok)
            }
            Action::Emit {
                event_type,
                message,
                blocking,
                payload,
            } => {
                self.emit(
                    Event::new(
                        *event_type,
                        message.as_str(),
                        *blocking,
                        payload.clone().unwrap_or_default(),
                    ),
                    trail,
                );
                Ok(true)
            }
        }
    }

    fn abort(&self, summary: &str, err: &anyhow::Error, mut trail: Trail) -> StepResult {
        warn!(summary, err = %format!("{err:#}"), "step aborted");
        self.emit(Event::error(summary, format!("{err:#}")), &mut trail);
        self.report_runlog_failure(&mut trail);
        self.emit(Event::done("Run failed", false), &mut trail);
        StepResult {
            success: false,
            events: trail.events,
        }
    }

    /// Emit one `error` event for the first failed run-log append. Returns
    /// whether any append has failed so far.
    fn report_runlog_failure(&self, trail: &mut Trail) -> bool {
        let Some(err) = trail.runlog_error.clone() else {
            return false;
        };
        if !trail.runlog_reported {
            trail.runlog_reported = true;
            self.emit(Event::error("Run log append failed", err), trail);
        }
        true
    }

    fn emit(&self, event: Event, trail: &mut Trail) {
        self.ports.events.emit(&event);
        if let Err(err) = self.ports.memory.append_runlog(&event) {
            warn!(err = %format!("{err:#}"), event_type = %event.event_type, "failed to append run log");
            trail.runlog_error.get_or_insert_with(|| format!("{err:#}"));
        }
        trail.events.push(event);
    }
}

/// Events emitted so far plus the first run-log append failure, if any.
#[derive(Default)]
struct Trail {
    events: Vec<Event>,
    runlog_error: Option<String>,
    runlog_reported: bool,
}

fn payload<const N: usize>(entries: [(&str, Value); N]) -> Payload {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
