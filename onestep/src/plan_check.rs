//! Offline validation report for `onestep plan-check`.

use serde::Serialize;

use crate::core::action_plan::{Action, ActionPlan, ActionPlanError, parse_action_plan};

pub const HINTS: [&str; 3] = [
    "ensure top-level keys are exactly: summary, actions",
    "ensure each action has required fields by kind",
    "ensure JSON is strict (no trailing commas/comments)",
];

/// One row of the action table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRow {
    pub index: usize,
    pub kind: &'static str,
    pub target: String,
    pub notes: String,
}

impl ActionRow {
    fn from_action(index: usize, action: &Action) -> Self {
        let notes = match action {
            Action::Write { content, .. } => format!("bytes={}", content.len()),
            Action::Emit {
                event_type,
                blocking,
                ..
            } => format!("event={event_type}, blocking={blocking}"),
            Action::Read { .. } | Action::Run { .. } => "-".to_string(),
        };
        Self {
            index,
            kind: action.kind(),
            target: action.target().unwrap_or("-").to_string(),
            notes,
        }
    }
}

/// Outcome of checking one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PlanReport {
    Passed {
        source: String,
        summary: String,
        actions: Vec<ActionRow>,
    },
    Failed {
        source: String,
        error: String,
        hints: Vec<String>,
    },
}

impl PlanReport {
    pub fn passed(&self) -> bool {
        matches!(self, PlanReport::Passed { .. })
    }

    /// Plain-text rendering for terminals.
    pub fn render(&self) -> String {
        match self {
            PlanReport::Passed {
                source,
                summary,
                actions,
            } => render_passed(source, summary, actions),
            PlanReport::Failed {
                source,
                error,
                hints,
            } => {
                let mut out = format!("Plan check failed ({source})\n  {error}\n\nHints:\n");
                for hint in hints {
                    out.push_str(&format!("- {hint}\n"));
                }
                out
            }
        }
    }
}

/// Validate `raw` as an action plan read from `source`.
pub fn check_plan(source: &str, raw: &str) -> PlanReport {
    match parse_action_plan(raw) {
        Ok(plan) => passed(source, &plan),
        Err(err) => failed(source, &err),
    }
}

fn passed(source: &str, plan: &ActionPlan) -> PlanReport {
    PlanReport::Passed {
        source: source.to_string(),
        summary: plan.summary.clone(),
        actions: plan
            .actions
            .iter()
            .enumerate()
            .map(|(idx, action)| ActionRow::from_action(idx + 1, action))
            .collect(),
    }
}

fn failed(source: &str, err: &ActionPlanError) -> PlanReport {
    PlanReport::Failed {
        source: source.to_string(),
        error: err.to_string(),
        hints: HINTS.iter().map(|hint| hint.to_string()).collect(),
    }
}

fn render_passed(source: &str, summary: &str, actions: &[ActionRow]) -> String {
    let mut out = format!(
        "Plan check passed ({source})\n  Summary: {summary}\n  Action count: {}\n\n",
        actions.len()
    );
    let rows: Vec<[String; 4]> = actions
        .iter()
        .map(|row| {
            [
                row.index.to_string(),
                row.kind.to_string(),
                row.target.clone(),
                row.notes.clone(),
            ]
        })
        .collect();
    out.push_str(&render_table(["#", "Kind", "Target/Command", "Notes"], &rows));
    out
}

/// Left-aligned plain-text table, columns separated by two spaces.
pub(crate) fn render_table<const N: usize>(header: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = header.map(|cell| cell.chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let line = |cells: [&str; N]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };
    let mut out = line(header);
    for row in rows {
        out.push_str(&line(row.each_ref().map(String::as_str)));
    }
    out
}
