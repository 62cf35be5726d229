//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Replay
//!
//! ```text
//! Session recolor for user_1
//! 001 upload artifyai/beach [staged]
//! 002 edit prompt = "umbrella"
//! 003 wait 1000ms → 2 staged [staged]
//! 004 apply → balance 2 [committed]
//! 005 save → record 3f2a9c0d1b7e4a65 [committed]
//!
//! Config
//!     recolor: {"prompt":"umbrella","to":"#ff0000"}
//! Credits: 2 left, 1 deduction
//! ```
//!
//! ## Presets
//!
//! ```text
//! 1:1   Square (1:1)             1000×1000
//! 3:4   Standard Portrait (3:4)  1000×1334
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions do no I/O.

use crate::controller::{FailureKind, TransformState};
use crate::session::{ReplayReport, SessionEvent, StepOutcome};
use crate::sizing::AspectRatioPreset;
use crate::types::TransformConfig;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn state_label(state: TransformState) -> &'static str {
    match state {
        TransformState::Idle => "idle",
        TransformState::Staged => "staged",
        TransformState::Committing => "committing",
        TransformState::Committed => "committed",
        TransformState::Error(FailureKind::InsufficientCredits) => "error: insufficient credits",
        TransformState::Error(FailureKind::LedgerUnavailable) => "error: ledger unavailable",
    }
}

fn event_label(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Upload(image) => format!("upload {}", image.public_id),
        SessionEvent::Edit { field, value } => {
            format!("edit {} = {:?}", field.param_key(), value)
        }
        SessionEvent::Wait { ms } => format!("wait {ms}ms"),
        SessionEvent::SelectAspectRatio { key } => format!("aspect ratio {key}"),
        SessionEvent::TopUp { credits } => format!("top up {credits}"),
        SessionEvent::Apply => "apply".to_string(),
        SessionEvent::Save => "save".to_string(),
    }
}

/// Outcome suffix; empty when the event label says it all.
fn outcome_detail(outcome: &StepOutcome) -> Option<String> {
    match outcome {
        StepOutcome::Uploaded { .. } | StepOutcome::PresetSelected { .. } => None,
        StepOutcome::Edited { staged: 0 } | StepOutcome::Waited { staged: 0, .. } => None,
        StepOutcome::Edited { staged } | StepOutcome::Waited { staged, .. } => {
            Some(format!("{staged} staged"))
        }
        StepOutcome::ToppedUp { balance } | StepOutcome::Applied { balance } => {
            Some(format!("balance {balance}"))
        }
        StepOutcome::Saved { record } => Some(format!("record {record}")),
        StepOutcome::Failed { reason } => Some(format!("failed: {reason}")),
    }
}

/// One line per tag: `tag: <compact json>`.
pub fn format_config(config: &TransformConfig, depth: usize) -> Vec<String> {
    if config.is_empty() {
        return vec![format!("{}(empty)", indent(depth))];
    }
    config
        .iter()
        .map(|(tag, value)| format!("{}{}: {}", indent(depth), tag, value))
        .collect()
}

/// Format a replay report as a numbered step list plus the final config.
pub fn format_replay_report(report: &ReplayReport) -> Vec<String> {
    let mut lines = vec![format!("Session {} for {}", report.kind, report.account)];

    for (i, step) in report.steps.iter().enumerate() {
        let mut line = format!("{} {}", format_index(i + 1), event_label(&step.event));
        if let Some(detail) = outcome_detail(&step.outcome) {
            line.push_str(" → ");
            line.push_str(&detail);
        }
        line.push_str(&format!(" [{}]", state_label(step.state)));
        lines.push(line);
    }

    lines.push(String::new());
    lines.push("Config".to_string());
    lines.extend(format_config(&report.final_config, 1));

    let plural = if report.deductions == 1 { "" } else { "s" };
    lines.push(format!(
        "Credits: {} left, {} deduction{}",
        report.final_balance, report.deductions, plural
    ));
    if let Some(record) = &report.record {
        lines.push(format!("Saved as {record}"));
    }
    lines
}

pub fn print_replay_report(report: &ReplayReport) {
    for line in format_replay_report(report) {
        println!("{}", line);
    }
}

/// Format the preset table with aligned columns.
pub fn format_presets(presets: &[AspectRatioPreset]) -> Vec<String> {
    let key_width = presets.iter().map(|p| p.key.len()).max().unwrap_or(0);
    let label_width = presets.iter().map(|p| p.label.len()).max().unwrap_or(0);
    presets
        .iter()
        .map(|p| {
            format!(
                "{:<kw$}  {:<lw$}  {}×{}",
                p.key,
                p.label,
                p.width,
                p.height,
                kw = key_width,
                lw = label_width
            )
        })
        .collect()
}

pub fn print_presets(presets: &[AspectRatioPreset]) {
    for line in format_presets(presets) {
        println!("{}", line);
    }
}
