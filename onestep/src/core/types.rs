//! Shared value types for a single step.
//!
//! These types define the stable contracts between the validator, the policy
//! engine and the step orchestrator. They hold no behavior beyond
//! construction helpers and must stay free of I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Insertion-ordered event payload.
pub type Payload = Map<String, Value>;

/// Kind of status record emitted during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Progress,
    Question,
    Review,
    Artifact,
    Error,
    Done,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Progress,
        EventType::Question,
        EventType::Review,
        EventType::Artifact,
        EventType::Error,
        EventType::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Progress => "progress",
            EventType::Question => "question",
            EventType::Review => "review",
            EventType::Artifact => "artifact",
            EventType::Error => "error",
            EventType::Done => "done",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// Immutable status record. Field order here is the wire order of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub one_line_summary: String,
    pub blocking: bool,
    pub payload: Payload,
}

impl Event {
    pub fn new(
        event_type: EventType,
        one_line_summary: impl Into<String>,
        blocking: bool,
        payload: Payload,
    ) -> Self {
        Self {
            event_type,
            one_line_summary: one_line_summary.into(),
            blocking,
            payload,
        }
    }

    pub fn progress(one_line_summary: impl Into<String>, payload: Payload) -> Self {
        Self::new(EventType::Progress, one_line_summary, false, payload)
    }

    pub fn artifact(one_line_summary: impl Into<String>, blocking: bool, payload: Payload) -> Self {
        Self::new(EventType::Artifact, one_line_summary, blocking, payload)
    }

    /// Blocking error event carrying the rendered failure under `payload.error`.
    pub fn error(one_line_summary: impl Into<String>, error: impl Into<String>) -> Self {
        let mut payload = Payload::new();
        payload.insert("error".to_string(), Value::String(error.into()));
        Self::new(EventType::Error, one_line_summary, true, payload)
    }

    /// Terminal event; `blocking` is the negation of `success`.
    pub fn done(one_line_summary: impl Into<String>, success: bool) -> Self {
        let mut payload = Payload::new();
        payload.insert("success".to_string(), Value::Bool(success));
        Self::new(EventType::Done, one_line_summary, !success, payload)
    }
}

/// Command allowlist and size limits for one run. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub allow_commands: Vec<String>,
    pub max_diff_chars: usize,
    pub max_file_read_chars: usize,
}

impl Policy {
    pub fn with_allow_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_commands: commands.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_commands: Vec::new(),
            max_diff_chars: 4000,
            max_file_read_chars: 4000,
        }
    }
}

/// Model selection passed through to the model client untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_style: Option<String>,
}

/// Identifier for one `run_once` call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub task: String,
}

impl Thread {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
        }
    }
}

/// Terminal value of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub events: Vec<Event>,
}

impl StepResult {
    pub fn event_types(&self) -> Vec<EventType> {
        self.events.iter().map(|event| event.event_type).collect()
    }
}
