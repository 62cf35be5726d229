//! Scripted editing sessions.
//!
//! A session script is a JSON description of what a user did in the
//! editor: which transform page they opened, their credit balance, and a
//! list of events. [`replay`] runs the events through a
//! [`TransformController`] on a virtual clock (`wait` advances it; nothing
//! sleeps) and records the outcome of each step.
//!
//! ```json
//! {
//!   "account": "user_1",
//!   "balance": 3,
//!   "kind": "recolor",
//!   "title": "Red umbrella",
//!   "events": [
//!     { "upload": { "public_id": "artifyai/beach", "width": 800, "height": 600 } },
//!     { "edit": { "field": "prompt", "value": "umbrella" } },
//!     { "edit": { "field": "color", "value": "#ff0000" } },
//!     { "wait": { "ms": 1000 } },
//!     "apply",
//!     "save"
//!   ]
//! }
//! ```
//!
//! Failures of individual steps (insufficient credits, nothing staged, ...)
//! are part of the report, not errors of the replay itself; only an
//! unreadable script fails [`load_script`].

use crate::controller::{ControllerError, ControllerSettings, TransformController, TransformState};
use crate::descriptor::TransformUrlBuilder;
use crate::ledger::{CreditLedger, MemoryLedger};
use crate::persist::{PersistenceAdapter, RecordId};
use crate::types::{FormField, ImageState, TransformConfig, TransformKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A recorded editing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionScript {
    pub account: String,
    /// Opening credit balance of the account.
    pub balance: u64,
    pub kind: TransformKind,
    #[serde(default)]
    pub title: String,
    pub events: Vec<SessionEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Upload(ImageState),
    Edit { field: FormField, value: String },
    Wait { ms: u64 },
    SelectAspectRatio { key: String },
    /// Credits added to the account, e.g. after a purchase.
    TopUp { credits: u64 },
    Apply,
    Save,
}

/// What happened at one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Uploaded { public_id: String },
    /// Text changed; `staged` counts edits that fired during the step.
    Edited { staged: usize },
    Waited { ms: u64, staged: usize },
    PresetSelected { key: String },
    ToppedUp { balance: u64 },
    Applied { balance: u64 },
    Saved { record: RecordId },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct ReplayStep {
    pub event: SessionEvent,
    pub outcome: StepOutcome,
    pub state: TransformState,
}

/// Everything a replay produced.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub kind: TransformKind,
    pub account: String,
    pub steps: Vec<ReplayStep>,
    pub final_config: TransformConfig,
    pub final_balance: u64,
    pub deductions: usize,
    pub record: Option<RecordId>,
}

impl ReplayReport {
    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
            .count()
    }
}

pub fn load_script(path: &Path) -> Result<SessionScript, SessionError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Run a script against a fresh in-memory ledger and the given store.
pub fn replay<S, B>(
    script: &SessionScript,
    settings: ControllerSettings,
    store: &mut S,
    builder: &B,
) -> ReplayReport
where
    S: PersistenceAdapter,
    B: TransformUrlBuilder,
{
    let mut ledger = MemoryLedger::with_account(script.account.clone(), script.balance);
    let mut controller = TransformController::new(script.kind, script.account.clone(), settings);
    controller.set_title(script.title.clone());

    let mut now = Instant::now();
    let mut steps = Vec::with_capacity(script.events.len());

    for event in &script.events {
        let outcome = match event {
            SessionEvent::Upload(image) => {
                controller.upload(image.clone());
                StepOutcome::Uploaded {
                    public_id: image.public_id.clone(),
                }
            }
            SessionEvent::Edit { field, value } => {
                controller.edit_field(*field, value.clone(), now);
                StepOutcome::Edited {
                    staged: controller.poll(now),
                }
            }
            SessionEvent::Wait { ms } => {
                now += Duration::from_millis(*ms);
                StepOutcome::Waited {
                    ms: *ms,
                    staged: controller.poll(now),
                }
            }
            SessionEvent::SelectAspectRatio { key } => match controller.select_aspect_ratio(key) {
                Ok(()) => StepOutcome::PresetSelected { key: key.clone() },
                Err(e) => failed(&e),
            },
            SessionEvent::TopUp { credits } => {
                ledger.credit(script.account.clone(), *credits);
                controller.acknowledge_error();
                StepOutcome::ToppedUp {
                    balance: ledger.balance(&script.account).unwrap_or_default(),
                }
            }
            SessionEvent::Apply => match controller.apply(&mut ledger) {
                Ok(balance) => StepOutcome::Applied { balance },
                Err(e) => failed(&e),
            },
            SessionEvent::Save => match controller.save(store, builder) {
                Ok(record) => StepOutcome::Saved { record },
                Err(e) => failed(&e),
            },
        };
        debug!(?event, ?outcome, "session step");
        steps.push(ReplayStep {
            event: event.clone(),
            outcome,
            state: controller.state(),
        });
    }

    let report = ReplayReport {
        kind: script.kind,
        account: script.account.clone(),
        steps,
        final_config: controller.accumulated().clone(),
        final_balance: ledger.balance(&script.account).unwrap_or_default(),
        deductions: ledger.deductions().len(),
        record: controller.record_id().cloned(),
    };
    controller.teardown();
    report
}

fn failed(error: &ControllerError) -> StepOutcome {
    StepOutcome::Failed {
        reason: error.to_string(),
    }
}
