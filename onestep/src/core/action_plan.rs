//! ActionPlan contract and its fail-closed validator.
//!
//! Model output is untrusted text. [`parse_action_plan`] is the only way to
//! obtain an [`ActionPlan`]; it either returns a fully valid plan or the first
//! violated rule, never a partially valid plan.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::{EventType, Payload};

pub const MAX_SUMMARY_CHARS: usize = 400;
pub const MIN_ACTIONS: usize = 1;
pub const MAX_ACTIONS: usize = 20;

const TOP_LEVEL_KEYS: [&str; 2] = ["summary", "actions"];
const ACTION_KEYS: [&str; 8] = [
    "kind",
    "path",
    "content",
    "command",
    "event_type",
    "message",
    "blocking",
    "payload",
];

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Read {
        path: String,
    },
    Write {
        path: String,
        content: String,
    },
    Run {
        command: String,
    },
    Emit {
        event_type: EventType,
        message: String,
        blocking: bool,
        payload: Option<Payload>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Read { .. } => "read",
            Action::Write { .. } => "write",
            Action::Run { .. } => "run",
            Action::Emit { .. } => "emit",
        }
    }

    /// Path or command the action targets, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Action::Read { path } | Action::Write { path, .. } => Some(path),
            Action::Run { command } => Some(command),
            Action::Emit { .. } => None,
        }
    }
}

/// Validated output of one planning call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub summary: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionPlanError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("top-level must be an object")]
    NotAnObject,
    #[error("unexpected top-level keys: {}", format_keys(.0))]
    UnexpectedTopLevelKeys(Vec<String>),
    #[error("missing top-level keys: {}", format_keys(.0))]
    MissingTopLevelKeys(Vec<String>),
    #[error("summary must be non-empty string up to {} chars", MAX_SUMMARY_CHARS)]
    InvalidSummary,
    #[error("actions must be an array with {}..{} items (got {})", MIN_ACTIONS, MAX_ACTIONS, .0)]
    InvalidActionCount(String),
    #[error("actions[{index}] must be object")]
    ActionNotObject { index: usize },
    #[error("actions[{index}] unexpected keys: {}", format_keys(.keys))]
    UnexpectedActionKeys { index: usize, keys: Vec<String> },
    #[error("actions[{index}] invalid kind: {found} (expected read, write, run or emit)")]
    InvalidKind { index: usize, found: String },
    #[error("actions[{index}] {kind} requires {requirement}")]
    MissingRequirement {
        index: usize,
        kind: &'static str,
        requirement: &'static str,
    },
    #[error("actions[{index}] emit payload must be object")]
    InvalidPayload { index: usize },
}

fn format_keys(keys: &[String]) -> String {
    format!("[{}]", keys.join(", "))
}

/// Parse raw model output into a valid [`ActionPlan`].
pub fn parse_action_plan(raw: &str) -> Result<ActionPlan, ActionPlanError> {
    let data: Value =
        serde_json::from_str(raw).map_err(|err| ActionPlanError::InvalidJson(err.to_string()))?;
    let Value::Object(top) = data else {
        return Err(ActionPlanError::NotAnObject);
    };

    let extra = unexpected_keys(&top, &TOP_LEVEL_KEYS);
    if !extra.is_empty() {
        return Err(ActionPlanError::UnexpectedTopLevelKeys(extra));
    }
    let missing: Vec<String> = TOP_LEVEL_KEYS
        .iter()
        .filter(|key| !top.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ActionPlanError::MissingTopLevelKeys(missing));
    }

    let summary = match top.get("summary") {
        Some(Value::String(s))
            if !s.trim().is_empty() && s.chars().count() <= MAX_SUMMARY_CHARS =>
        {
            s.trim().to_string()
        }
        _ => return Err(ActionPlanError::InvalidSummary),
    };

    let items = match top.get("actions") {
        Some(Value::Array(items)) if (MIN_ACTIONS..=MAX_ACTIONS).contains(&items.len()) => items,
        Some(Value::Array(items)) => {
            return Err(ActionPlanError::InvalidActionCount(items.len().to_string()));
        }
        Some(other) => {
            return Err(ActionPlanError::InvalidActionCount(
                json_type_name(other).to_string(),
            ));
        }
        None => return Err(ActionPlanError::MissingTopLevelKeys(vec!["actions".into()])),
    };

    let actions = items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_action(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ActionPlan { summary, actions })
}

fn parse_action(index: usize, item: &Value) -> Result<Action, ActionPlanError> {
    let Value::Object(fields) = item else {
        return Err(ActionPlanError::ActionNotObject { index });
    };
    let extra = unexpected_keys(fields, &ACTION_KEYS);
    if !extra.is_empty() {
        return Err(ActionPlanError::UnexpectedActionKeys { index, keys: extra });
    }

    let missing = |kind: &'static str, requirement: &'static str| {
        ActionPlanError::MissingRequirement {
            index,
            kind,
            requirement,
        }
    };

    match fields.get("kind") {
        Some(Value::String(kind)) if kind == "read" => {
            let path = non_empty_str(fields, "path").ok_or_else(|| missing("read", "path"))?;
            Ok(Action::Read {
                path: path.to_string(),
            })
        }
        Some(Value::String(kind)) if kind == "write" => {
            let path = non_empty_str(fields, "path").ok_or_else(|| missing("write", "path"))?;
            let content = match fields.get("content") {
                Some(Value::String(content)) => content.clone(),
                _ => return Err(missing("write", "content")),
            };
            Ok(Action::Write {
                path: path.to_string(),
                content,
            })
        }
        Some(Value::String(kind)) if kind == "run" => {
            let command = non_blank_str(fields, "command").ok_or_else(|| missing("run", "command"))?;
            Ok(Action::Run {
                command: command.to_string(),
            })
        }
        Some(Value::String(kind)) if kind == "emit" => parse_emit(index, fields),
        Some(Value::String(kind)) => Err(ActionPlanError::InvalidKind {
            index,
            found: format!("'{kind}'"),
        }),
        Some(other) => Err(ActionPlanError::InvalidKind {
            index,
            found: json_type_name(other).to_string(),
        }),
        None => Err(ActionPlanError::InvalidKind {
            index,
            found: "missing".to_string(),
        }),
    }
}

fn parse_emit(index: usize, fields: &Map<String, Value>) -> Result<Action, ActionPlanError> {
    let missing = |requirement: &'static str| ActionPlanError::MissingRequirement {
        index,
        kind: "emit",
        requirement,
    };

    let event_type = fields
        .get("event_type")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<EventType>().ok())
        .ok_or_else(|| missing("valid event_type"))?;
    let message = non_blank_str(fields, "message").ok_or_else(|| missing("message"))?;
    let blocking = fields
        .get("blocking")
        .and_then(Value::as_bool)
        .ok_or_else(|| missing("blocking boolean"))?;
    let payload = match fields.get("payload") {
        None | Some(Value::Null) => None,
        Some(Value::Object(payload)) => Some(payload.clone()),
        Some(_) => return Err(ActionPlanError::InvalidPayload { index }),
    };

    Ok(Action::Emit {
        event_type,
        message: message.to_string(),
        blocking,
        payload,
    })
}

/// Keys outside `allowed`, sorted for stable messages.
fn unexpected_keys(fields: &Map<String, Value>, allowed: &[&str]) -> Vec<String> {
    fields
        .keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn non_empty_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn non_blank_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
