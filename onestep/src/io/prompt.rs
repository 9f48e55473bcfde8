//! Prompt rendering for the model call.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::action_plan::{MAX_ACTIONS, MIN_ACTIONS};
use crate::core::types::EventType;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const USER_TEMPLATE: &str = include_str!("prompts/user.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("load system prompt template")?;
        env.add_template("user", USER_TEMPLATE)
            .context("load user prompt template")?;
        Ok(Self { env })
    }

    /// Fixed instructions describing the action plan contract.
    pub fn system_prompt(&self) -> Result<String> {
        let event_types: Vec<&str> = EventType::ALL.iter().map(|t| t.as_str()).collect();
        self.env
            .get_template("system")?
            .render(context! {
                event_types => event_types,
                min_actions => MIN_ACTIONS,
                max_actions => MAX_ACTIONS,
            })
            .context("render system prompt")
    }

    /// Task plus a snapshot of the repository.
    pub fn user_prompt(&self, task: &str, status: &str, diff: &str) -> Result<String> {
        self.env
            .get_template("user")?
            .render(context! { task => task, status => status, diff => diff })
            .context("render user prompt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_contract() {
        let prompt = PromptEngine::new().expect("engine").system_prompt().expect("render");
        assert!(prompt.contains(r#"{"kind":"run","command":"..."}"#));
        assert!(prompt.contains("progress|question|review|artifact|error|done"));
        assert!(prompt.contains("1 to 20 actions"));
        assert!(prompt.ends_with("no markdown.\n"));
    }

    #[test]
    fn user_prompt_layout() {
        let prompt = PromptEngine::new()
            .expect("engine")
            .user_prompt("Fix the <bug>", "M a.py", "")
            .expect("render");
        assert_eq!(
            prompt,
            "Task:\nFix the <bug>\n\nRepo status:\nM a.py\n\nCurrent diff (truncated):\n\n"
        );
    }
}
