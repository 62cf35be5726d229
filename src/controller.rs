//! The transform controller: staged edits, credit-gated commits, saves.
//!
//! One controller owns everything about a single editing session: the
//! uploaded [`ImageState`], the accumulated [`TransformConfig`], the staged
//! [`Directive`] and one debounce timer per text field.
//!
//! # States
//!
//! ```text
//!            edit fires / preset            begin_apply
//!   Idle ─────────────────────────▶ Staged ─────────────▶ Committing
//!    ▲                               ▲  ▲                   │    │
//!    │ acknowledge_error             │  │ acknowledge_error  │ ok │ ledger error
//!    └──────────────── Error ◀───────┘  └──── Error ◀────────┘    ▼
//!                                                             Committed
//! ```
//!
//! # Suspension points
//!
//! Credit deduction and persistence are the only calls that may be pending.
//! Each is split into a `begin_*` step that validates and snapshots, and a
//! `complete_*` step that takes the external result. The shell runs the
//! external call in between. At most one commit and one save may be in
//! flight; a second `begin_*` fails with
//! [`ControllerError::CommitInProgress`]. [`TransformController::apply`] and
//! [`TransformController::save`] drive both halves synchronously.
//!
//! # Atomicity
//!
//! `begin_apply` computes the merged config but does not install it. Only a
//! successful deduction in `complete_apply` replaces the accumulated config
//! and clears the staged directive. Every failure leaves both untouched.

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::descriptor::{TransformDescriptor, TransformUrlBuilder};
use crate::ledger::{CreditLedger, LedgerError};
use crate::merge::{merge, merge_values};
use crate::persist::{PersistenceAdapter, PersistenceError, RecordId};
use crate::sizing::{self, SizeResolver};
use crate::types::{Directive, FormField, ImageState, TransformConfig, TransformKind};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which guarded operation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Apply,
    Save,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Apply => f.write_str("apply"),
            Operation::Save => f.write_str("save"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("insufficient credits: balance {balance}, fee {fee}")]
    InsufficientCredits { balance: u64, fee: u64 },
    #[error("{0} already in progress")]
    CommitInProgress(Operation),
    #[error("no transformation staged")]
    NothingStaged,
    #[error("no transformation applied yet")]
    NothingCommitted,
    #[error("no image uploaded")]
    NoImage,
    #[error("unknown aspect ratio preset: {0}")]
    UnknownPreset(String),
    #[error("{0} completion does not match the operation in flight")]
    StaleCommit(Operation),
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Why the controller is in the error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InsufficientCredits,
    LedgerUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformState {
    Idle,
    Staged,
    Committing,
    Committed,
    Error(FailureKind),
}

/// Tunables taken from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub fee: u64,
    pub debounce: Duration,
    pub sizing: SizeResolver,
}

impl ControllerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            fee: config.credits.fee,
            debounce: config.editing.debounce(),
            sizing: SizeResolver::new(config.sizing.default_dimension),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Form values that are persisted alongside the config.
///
/// These update on every keystroke; only the staged directive is debounced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues {
    pub title: String,
    pub prompt: Option<String>,
    pub color: Option<String>,
    pub aspect_ratio: Option<String>,
}

/// One `begin_*` call: the issuing controller and its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    controller: Uuid,
    seq: u64,
}

/// A commit between `begin_apply` and `complete_apply`.
#[derive(Debug)]
pub struct PendingCommit {
    ticket: Ticket,
    staged_rev: u64,
    account: String,
    fee: u64,
    merged: TransformConfig,
}

impl PendingCommit {
    /// Account to charge.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Credits to deduct.
    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// The config that will be installed if the deduction succeeds.
    pub fn merged(&self) -> &TransformConfig {
        &self.merged
    }
}

/// A save between `begin_save` and `complete_save`.
#[derive(Debug)]
pub struct PendingSave {
    ticket: Ticket,
    descriptor: TransformDescriptor,
}

impl PendingSave {
    pub fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }
}

/// What a torn-down controller left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    /// A deduction was issued and must still be awaited by the shell.
    pub commit_in_flight: bool,
    pub save_in_flight: bool,
    /// Debounced edits that never fired.
    pub discarded_edits: usize,
}

pub struct TransformController {
    id: Uuid,
    next_seq: u64,
    kind: TransformKind,
    account: String,
    settings: ControllerSettings,
    image: Option<ImageState>,
    form: FormValues,
    accumulated: TransformConfig,
    staged: Option<Directive>,
    staged_rev: u64,
    state: TransformState,
    edits: BTreeMap<FormField, Debouncer<String>>,
    credit_balance: Option<u64>,
    has_commit: bool,
    record_id: Option<RecordId>,
    commit_in_flight: Option<Ticket>,
    save_in_flight: Option<Ticket>,
}

impl TransformController {
    /// A fresh session for a new image.
    pub fn new(kind: TransformKind, account: impl Into<String>, settings: ControllerSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            next_seq: 0,
            kind,
            account: account.into(),
            settings,
            image: None,
            form: FormValues::default(),
            accumulated: TransformConfig::new(),
            staged: None,
            staged_rev: 0,
            state: TransformState::Idle,
            edits: BTreeMap::new(),
            credit_balance: None,
            has_commit: false,
            record_id: None,
            commit_in_flight: None,
            save_in_flight: None,
        }
    }

    /// Reopen a saved record; the next save updates it in place.
    pub fn open(
        descriptor: TransformDescriptor,
        account: impl Into<String>,
        settings: ControllerSettings,
    ) -> Self {
        let mut controller = Self::new(descriptor.transformation_type, account, settings);
        controller.image = Some(ImageState {
            public_id: descriptor.public_id,
            width: Some(descriptor.width),
            height: Some(descriptor.height),
            secure_url: descriptor.secure_url,
            aspect_ratio: descriptor.aspect_ratio.clone(),
        });
        controller.form = FormValues {
            title: descriptor.title,
            prompt: descriptor.prompt,
            color: descriptor.color,
            aspect_ratio: descriptor.aspect_ratio,
        };
        controller.has_commit = !descriptor.config.is_empty();
        controller.accumulated = descriptor.config;
        controller.record_id = descriptor.record_id;
        controller
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn state(&self) -> TransformState {
        self.state
    }

    pub fn image(&self) -> Option<&ImageState> {
        self.image.as_ref()
    }

    pub fn form(&self) -> &FormValues {
        &self.form
    }

    pub fn accumulated(&self) -> &TransformConfig {
        &self.accumulated
    }

    pub fn staged(&self) -> Option<&Directive> {
        self.staged.as_ref()
    }

    pub fn credit_balance(&self) -> Option<u64> {
        self.credit_balance
    }

    pub fn record_id(&self) -> Option<&RecordId> {
        self.record_id.as_ref()
    }

    pub fn is_committing(&self) -> bool {
        self.commit_in_flight.is_some()
    }

    pub fn is_saving(&self) -> bool {
        self.save_in_flight.is_some()
    }

    /// Whether the apply trigger should be enabled.
    pub fn can_apply(&self) -> bool {
        self.staged.is_some() && self.commit_in_flight.is_none()
    }

    /// Whether the save trigger should be enabled.
    pub fn can_save(&self) -> bool {
        self.has_commit && self.image.is_some() && self.save_in_flight.is_none()
    }

    /// Earliest pending debounce deadline, for shells that sleep until then.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.edits.values().filter_map(Debouncer::deadline).min()
    }

    /// Record the balance read from the ledger.
    pub fn set_credit_balance(&mut self, balance: u64) {
        self.credit_balance = Some(balance);
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.form.title = title.into();
    }

    /// Replace the image wholesale.
    ///
    /// Kinds that need no input stage their default directive right away.
    pub fn upload(&mut self, image: ImageState) {
        info!(public_id = %image.public_id, kind = %self.kind, "image uploaded");
        self.image = Some(image);
        if self.kind.stages_on_upload() {
            self.stage(self.kind.default_directive());
        }
    }

    /// A keystroke in a text field. The form value changes immediately; the
    /// directive is staged once the field has been quiet for the debounce
    /// delay (see [`poll`](Self::poll)).
    pub fn edit_field(&mut self, field: FormField, value: impl Into<String>, now: Instant) {
        let value = value.into();
        match field {
            FormField::Prompt => self.form.prompt = Some(value.clone()),
            FormField::Color => self.form.color = Some(value.clone()),
        }
        let delay = self.settings.debounce;
        let superseded = self
            .edits
            .entry(field)
            .or_insert_with(|| Debouncer::new(delay))
            .schedule(value, now);
        if superseded.is_some() {
            debug!(?field, "pending edit superseded");
        }
    }

    /// Stage every field edit whose debounce delay has elapsed.
    ///
    /// Returns how many edits were staged.
    pub fn poll(&mut self, now: Instant) -> usize {
        let tag = self.kind.tag();
        let fired: Vec<(FormField, String)> = self
            .edits
            .iter_mut()
            .filter_map(|(field, timer)| timer.fire(now).map(|value| (*field, value)))
            .collect();
        let count = fired.len();
        for (field, value) in fired {
            let edit = Directive::param(tag, field.param_key(), value);
            let directive = match self.staged.take() {
                Some(staged) if staged.tag == edit.tag => {
                    Directive::new(edit.tag, merge_values(staged.params, edit.params))
                }
                _ => edit,
            };
            self.stage(directive);
        }
        count
    }

    /// Pick an aspect-ratio preset.
    ///
    /// A discrete choice, so it bypasses debouncing: the image size changes
    /// and the kind's default directive is staged immediately.
    pub fn select_aspect_ratio(&mut self, key: &str) -> Result<(), ControllerError> {
        let preset =
            sizing::preset(key).ok_or_else(|| ControllerError::UnknownPreset(key.to_string()))?;
        if let Some(image) = self.image.as_mut() {
            image.aspect_ratio = Some(preset.aspect_ratio.to_string());
            image.width = Some(preset.width);
            image.height = Some(preset.height);
        }
        self.form.aspect_ratio = Some(preset.key.to_string());
        debug!(preset = preset.key, "aspect ratio selected");
        self.stage(self.kind.default_directive());
        Ok(())
    }

    fn stage(&mut self, directive: Directive) {
        debug!(tag = %directive.tag, "directive staged");
        self.staged = Some(directive);
        self.staged_rev += 1;
        // An unacknowledged error stays visible; acknowledging it then
        // lands on `Staged`.
        if self.commit_in_flight.is_none() && !matches!(self.state, TransformState::Error(_)) {
            self.state = TransformState::Staged;
        }
    }

    fn issue_ticket(&mut self) -> Ticket {
        self.next_seq += 1;
        Ticket {
            controller: self.id,
            seq: self.next_seq,
        }
    }

    fn ensure_can_apply(&self) -> Result<(), ControllerError> {
        if self.commit_in_flight.is_some() {
            return Err(ControllerError::CommitInProgress(Operation::Apply));
        }
        if self.staged.is_none() {
            return Err(ControllerError::NothingStaged);
        }
        Ok(())
    }

    /// Start applying the staged directive.
    ///
    /// Fails without touching the ledger if the known balance is below the
    /// fee. Any refusal for insufficient credits forgets the known balance,
    /// so the next attempt after a top-up goes to the ledger.
    pub fn begin_apply(&mut self) -> Result<PendingCommit, ControllerError> {
        self.ensure_can_apply()?;
        let fee = self.settings.fee;
        if let Some(balance) = self.credit_balance
            && balance < fee
        {
            warn!(balance, fee, "apply refused: insufficient credits");
            self.credit_balance = None;
            self.state = TransformState::Error(FailureKind::InsufficientCredits);
            return Err(ControllerError::InsufficientCredits { balance, fee });
        }
        let Some(staged) = self.staged.as_ref() else {
            return Err(ControllerError::NothingStaged);
        };
        let merged = merge(staged, &self.accumulated);
        let ticket = self.issue_ticket();
        self.commit_in_flight = Some(ticket);
        self.state = TransformState::Committing;
        debug!(seq = ticket.seq, fee, "commit started");
        Ok(PendingCommit {
            ticket,
            staged_rev: self.staged_rev,
            account: self.account.clone(),
            fee,
            merged,
        })
    }

    /// Finish a commit with the ledger's answer. Returns the new balance.
    pub fn complete_apply(
        &mut self,
        pending: PendingCommit,
        outcome: Result<u64, LedgerError>,
    ) -> Result<u64, ControllerError> {
        if self.commit_in_flight != Some(pending.ticket) {
            return Err(ControllerError::StaleCommit(Operation::Apply));
        }
        self.commit_in_flight = None;
        match outcome {
            Ok(balance) => {
                self.accumulated = pending.merged;
                self.credit_balance = Some(balance);
                self.has_commit = true;
                if self.staged_rev == pending.staged_rev {
                    self.staged = None;
                    self.state = TransformState::Committed;
                } else {
                    // Something new was staged while the deduction was pending.
                    self.state = TransformState::Staged;
                }
                info!(
                    seq = pending.ticket.seq,
                    fee = pending.fee,
                    balance,
                    tags = self.accumulated.len(),
                    "transformation applied"
                );
                Ok(balance)
            }
            Err(LedgerError::InsufficientCredits { balance, requested }) => {
                warn!(balance, requested, "ledger refused deduction");
                self.credit_balance = None;
                self.state = TransformState::Error(FailureKind::InsufficientCredits);
                Err(ControllerError::InsufficientCredits {
                    balance,
                    fee: requested,
                })
            }
            Err(e) => {
                warn!(error = %e, "ledger call failed");
                self.state = TransformState::Error(FailureKind::LedgerUnavailable);
                Err(ControllerError::Ledger(e))
            }
        }
    }

    /// Apply the staged directive, charging the ledger synchronously.
    ///
    /// Reads the balance first so an underfunded account never reaches the
    /// deduction call.
    #[tracing::instrument(skip_all, fields(kind = %self.kind, account = %self.account))]
    pub fn apply<L: CreditLedger>(&mut self, ledger: &mut L) -> Result<u64, ControllerError> {
        self.ensure_can_apply()?;
        match ledger.balance(&self.account) {
            Ok(balance) => self.credit_balance = Some(balance),
            Err(e) => {
                warn!(error = %e, "balance lookup failed");
                self.state = TransformState::Error(FailureKind::LedgerUnavailable);
                return Err(ControllerError::Ledger(e));
            }
        }
        let pending = self.begin_apply()?;
        let outcome = ledger.deduct(pending.account(), pending.fee());
        self.complete_apply(pending, outcome)
    }

    /// Surface and clear the error state.
    ///
    /// Returns to `Staged` when the failed directive is still staged.
    pub fn acknowledge_error(&mut self) -> Option<FailureKind> {
        match self.state {
            TransformState::Error(kind) => {
                self.state = if self.staged.is_some() {
                    TransformState::Staged
                } else {
                    TransformState::Idle
                };
                Some(kind)
            }
            _ => None,
        }
    }

    /// Package the image and committed config for storage.
    pub fn begin_save<B: TransformUrlBuilder>(
        &mut self,
        builder: &B,
    ) -> Result<PendingSave, ControllerError> {
        if self.save_in_flight.is_some() {
            return Err(ControllerError::CommitInProgress(Operation::Save));
        }
        if !self.has_commit {
            return Err(ControllerError::NothingCommitted);
        }
        let image = self.image.as_ref().ok_or(ControllerError::NoImage)?;
        let (width, height) = self
            .settings
            .sizing
            .resolve_dimensions(self.kind.tag(), image);
        let transformation_url = builder.build(&image.public_id, width, height, &self.accumulated);
        let descriptor = TransformDescriptor {
            record_id: self.record_id.clone(),
            title: self.form.title.clone(),
            transformation_type: self.kind,
            public_id: image.public_id.clone(),
            width,
            height,
            config: self.accumulated.clone(),
            secure_url: image.secure_url.clone(),
            transformation_url,
            aspect_ratio: self.form.aspect_ratio.clone(),
            prompt: self.form.prompt.clone(),
            color: self.form.color.clone(),
        };
        let ticket = self.issue_ticket();
        self.save_in_flight = Some(ticket);
        debug!(seq = ticket.seq, url = %descriptor.transformation_url, "save started");
        Ok(PendingSave { ticket, descriptor })
    }

    /// Finish a save with the store's answer.
    ///
    /// After the first successful save, later saves update the same record.
    pub fn complete_save(
        &mut self,
        pending: PendingSave,
        outcome: Result<RecordId, PersistenceError>,
    ) -> Result<RecordId, ControllerError> {
        if self.save_in_flight != Some(pending.ticket) {
            return Err(ControllerError::StaleCommit(Operation::Save));
        }
        self.save_in_flight = None;
        match outcome {
            Ok(id) => {
                info!(record = %id, "image saved");
                self.record_id = Some(id.clone());
                Ok(id)
            }
            Err(e) => {
                warn!(error = %e, "save failed");
                Err(e.into())
            }
        }
    }

    /// Save synchronously through a persistence adapter.
    #[tracing::instrument(skip_all, fields(kind = %self.kind))]
    pub fn save<S, B>(&mut self, store: &mut S, builder: &B) -> Result<RecordId, ControllerError>
    where
        S: PersistenceAdapter,
        B: TransformUrlBuilder,
    {
        let pending = self.begin_save(builder)?;
        let outcome = store.save(pending.descriptor());
        self.complete_save(pending, outcome)
    }

    /// Discard the controller, cancelling its debounce timers.
    ///
    /// A deduction already issued cannot be recalled: when
    /// `commit_in_flight` is set the shell must still await the ledger and
    /// drop the result.
    pub fn teardown(mut self) -> Teardown {
        let discarded_edits = self
            .edits
            .values_mut()
            .filter_map(Debouncer::cancel)
            .count();
        let teardown = Teardown {
            commit_in_flight: self.commit_in_flight.is_some(),
            save_in_flight: self.save_in_flight.is_some(),
            discarded_edits,
        };
        debug!(?teardown, "controller torn down");
        teardown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CdnUrlBuilder;
    use crate::ledger::MemoryLedger;
    use crate::test_helpers::{RecordingStore, controller_with_fee, ms, sample_image};
    use serde_json::json;

    // =========================================================================
    // Staging
    // =========================================================================

    #[test]
    fn new_controller_is_idle() {
        let c = controller_with_fee(TransformKind::Recolor, 1);
        assert_eq!(c.state(), TransformState::Idle);
        assert!(c.staged().is_none());
        assert!(!c.can_apply());
        assert!(c.accumulated().is_empty());
    }

    #[test]
    fn edit_is_staged_only_after_debounce() {
        let t0 = Instant::now();
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.edit_field(FormField::Prompt, "sky", t0);

        assert_eq!(c.form().prompt.as_deref(), Some("sky"));
        assert_eq!(c.poll(t0 + ms(999)), 0);
        assert!(c.staged().is_none());

        assert_eq!(c.poll(t0 + ms(1000)), 1);
        assert_eq!(c.state(), TransformState::Staged);
        assert_eq!(c.staged().unwrap().params, json!({ "prompt": "sky" }));
        assert!(c.accumulated().is_empty());
    }

    #[test]
    fn typing_burst_stages_last_value() {
        let t0 = Instant::now();
        let mut c = controller_with_fee(TransformKind::Remove, 1);
        for (i, text) in ["c", "ca", "car"].into_iter().enumerate() {
            c.edit_field(FormField::Prompt, text, t0 + ms(200 * i as u64));
        }
        assert_eq!(c.poll(t0 + ms(1399)), 0);
        assert_eq!(c.poll(t0 + ms(1400)), 1);
        assert_eq!(c.staged().unwrap().params, json!({ "prompt": "car" }));
    }

    #[test]
    fn fields_debounce_independently() {
        let t0 = Instant::now();
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.edit_field(FormField::Prompt, "sky", t0);
        c.edit_field(FormField::Color, "#ff0000", t0 + ms(500));

        assert_eq!(c.poll(t0 + ms(1000)), 1);
        assert_eq!(c.poll(t0 + ms(1500)), 1);
        assert_eq!(
            c.staged().unwrap().params,
            json!({ "prompt": "sky", "to": "#ff0000" })
        );
    }

    #[test]
    fn next_deadline_tracks_earliest_edit() {
        let t0 = Instant::now();
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        assert_eq!(c.next_deadline(), None);
        c.edit_field(FormField::Color, "#fff", t0 + ms(300));
        c.edit_field(FormField::Prompt, "sky", t0);
        assert_eq!(c.next_deadline(), Some(t0 + ms(1000)));
    }

    #[test]
    fn preset_selection_resizes_and_stages_immediately() {
        let mut c = controller_with_fee(TransformKind::Fill, 1);
        c.upload(sample_image());
        c.select_aspect_ratio("9:16").unwrap();

        let image = c.image().unwrap();
        assert_eq!(image.aspect_ratio.as_deref(), Some("9:16"));
        assert_eq!((image.width, image.height), (Some(1000), Some(1778)));
        assert_eq!(c.state(), TransformState::Staged);
        assert_eq!(c.staged(), Some(&TransformKind::Fill.default_directive()));
    }

    #[test]
    fn unknown_preset_changes_nothing() {
        let mut c = controller_with_fee(TransformKind::Fill, 1);
        c.upload(sample_image());
        let err = c.select_aspect_ratio("16:9").unwrap_err();
        assert!(matches!(err, ControllerError::UnknownPreset(k) if k == "16:9"));
        assert_eq!(c.image(), Some(&sample_image()));
        assert!(c.staged().is_none());
    }

    #[test]
    fn inputless_kinds_stage_on_upload() {
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        assert_eq!(c.staged().unwrap().tag, "restore");

        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.upload(sample_image());
        assert!(c.staged().is_none());
    }

    // =========================================================================
    // Apply
    // =========================================================================

    #[test]
    fn apply_without_staged_directive_is_rejected() {
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        assert!(matches!(c.begin_apply(), Err(ControllerError::NothingStaged)));
    }

    #[test]
    fn apply_commits_and_charges_once() {
        let mut ledger = MemoryLedger::with_account("user_1", 10);
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());

        assert_eq!(c.apply(&mut ledger).unwrap(), 0);
        assert_eq!(c.state(), TransformState::Committed);
        assert!(c.staged().is_none());
        assert_eq!(c.accumulated().get("restore"), Some(&json!(true)));
        assert_eq!(c.credit_balance(), Some(0));
        assert_eq!(ledger.deductions().len(), 1);
    }

    #[test]
    fn insufficient_balance_leaves_config_unchanged() {
        let mut ledger = MemoryLedger::with_account("user_1", 5);
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());
        let staged_before = c.staged().cloned();

        let err = c.apply(&mut ledger).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::InsufficientCredits { balance: 5, fee: 10 }
        ));
        assert!(c.accumulated().is_empty());
        assert_eq!(c.staged().cloned(), staged_before);
        assert_eq!(
            c.state(),
            TransformState::Error(FailureKind::InsufficientCredits)
        );
        assert!(ledger.deductions().is_empty());
    }

    #[test]
    fn ledger_refusal_in_complete_leaves_config_unchanged() {
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());
        let pending = c.begin_apply().unwrap();
        let err = c
            .complete_apply(
                pending,
                Err(LedgerError::InsufficientCredits {
                    balance: 5,
                    requested: 10,
                }),
            )
            .unwrap_err();

        assert!(matches!(err, ControllerError::InsufficientCredits { .. }));
        assert!(c.accumulated().is_empty());
        assert!(c.staged().is_some());
        assert_eq!(c.credit_balance(), None);
    }

    #[test]
    fn concurrent_apply_is_rejected_and_charged_once() {
        let mut ledger = MemoryLedger::with_account("user_1", 10);
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());

        let first = c.begin_apply().unwrap();
        assert_eq!(c.state(), TransformState::Committing);
        assert!(matches!(
            c.begin_apply(),
            Err(ControllerError::CommitInProgress(Operation::Apply))
        ));
        assert!(matches!(
            c.apply(&mut ledger),
            Err(ControllerError::CommitInProgress(Operation::Apply))
        ));

        let outcome = ledger.deduct(first.account(), first.fee());
        c.complete_apply(first, outcome).unwrap();

        assert_eq!(ledger.deductions().len(), 1);
        assert_eq!(ledger.balance("user_1"), Ok(0));
        assert!(matches!(c.begin_apply(), Err(ControllerError::NothingStaged)));
    }

    #[test]
    fn merged_config_is_installed_only_on_success() {
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        let pending = c.begin_apply().unwrap();
        assert_eq!(pending.merged().get("restore"), Some(&json!(true)));
        assert!(c.accumulated().is_empty());
        c.complete_apply(pending, Ok(9)).unwrap();
        assert_eq!(c.accumulated().get("restore"), Some(&json!(true)));
    }

    #[test]
    fn ledger_outage_rolls_back_and_reports() {
        let mut ledger = MemoryLedger::with_account("user_1", 10);
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        ledger.set_offline(true);

        let err = c.apply(&mut ledger).unwrap_err();
        assert!(matches!(err, ControllerError::Ledger(LedgerError::Unavailable(_))));
        assert_eq!(c.state(), TransformState::Error(FailureKind::LedgerUnavailable));
        assert!(c.accumulated().is_empty());
        assert!(!c.is_committing());
    }

    #[test]
    fn acknowledged_error_returns_to_staged_then_retry_succeeds() {
        let mut ledger = MemoryLedger::with_account("user_1", 5);
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());
        assert!(c.apply(&mut ledger).is_err());

        assert_eq!(c.acknowledge_error(), Some(FailureKind::InsufficientCredits));
        assert_eq!(c.state(), TransformState::Staged);
        assert_eq!(c.acknowledge_error(), None);

        ledger.credit("user_1", 5);
        assert_eq!(c.apply(&mut ledger).unwrap(), 0);
        assert_eq!(ledger.deductions().len(), 1);
    }

    #[test]
    fn known_low_balance_fails_before_ledger_call() {
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());
        c.set_credit_balance(3);
        assert!(matches!(
            c.begin_apply(),
            Err(ControllerError::InsufficientCredits { balance: 3, fee: 10 })
        ));
        assert!(!c.is_committing());
        assert_eq!(c.credit_balance(), None);
    }

    #[test]
    fn begin_apply_after_external_top_up_reaches_the_ledger() {
        let mut ledger = MemoryLedger::with_account("user_1", 5);
        let mut c = controller_with_fee(TransformKind::Restore, 10);
        c.upload(sample_image());

        let pending = c.begin_apply().unwrap();
        let outcome = ledger.deduct(pending.account(), pending.fee());
        assert!(c.complete_apply(pending, outcome).is_err());

        // Topped up elsewhere; the shell never calls set_credit_balance.
        ledger.credit("user_1", 5);
        c.acknowledge_error();
        let pending = c.begin_apply().unwrap();
        let outcome = ledger.deduct(pending.account(), pending.fee());
        assert_eq!(c.complete_apply(pending, outcome).unwrap(), 0);
        assert_eq!(ledger.deductions().len(), 1);
    }

    #[test]
    fn edit_fired_during_error_keeps_error_until_acknowledged() {
        let t0 = Instant::now();
        let mut ledger = MemoryLedger::with_account("user_1", 0);
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.upload(sample_image());
        c.edit_field(FormField::Prompt, "sky", t0);
        c.poll(t0 + ms(1000));
        assert!(c.apply(&mut ledger).is_err());

        c.edit_field(FormField::Color, "#00ff00", t0 + ms(1100));
        assert_eq!(c.poll(t0 + ms(2100)), 1);
        assert_eq!(
            c.state(),
            TransformState::Error(FailureKind::InsufficientCredits)
        );
        assert_eq!(c.staged().unwrap().params, json!({ "prompt": "sky", "to": "#00ff00" }));

        assert_eq!(c.acknowledge_error(), Some(FailureKind::InsufficientCredits));
        assert_eq!(c.state(), TransformState::Staged);
    }

    #[test]
    fn successive_applies_accumulate_same_tag() {
        let t0 = Instant::now();
        let mut ledger = MemoryLedger::with_account("user_1", 10);
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.upload(sample_image());

        c.edit_field(FormField::Color, "#ff0000", t0);
        c.poll(t0 + ms(1000));
        c.apply(&mut ledger).unwrap();

        c.edit_field(FormField::Prompt, "sky", t0 + ms(2000));
        c.poll(t0 + ms(3000));
        c.apply(&mut ledger).unwrap();

        assert_eq!(
            c.accumulated().get("recolor"),
            Some(&json!({ "prompt": "sky", "to": "#ff0000" }))
        );
        assert_eq!(ledger.deductions().len(), 2);
    }

    #[test]
    fn directive_staged_during_commit_survives_completion() {
        let t0 = Instant::now();
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.edit_field(FormField::Prompt, "sky", t0);
        c.poll(t0 + ms(1000));
        let pending = c.begin_apply().unwrap();

        c.edit_field(FormField::Prompt, "sea", t0 + ms(1100));
        c.poll(t0 + ms(2100));
        assert_eq!(c.state(), TransformState::Committing);

        c.complete_apply(pending, Ok(9)).unwrap();
        assert_eq!(c.state(), TransformState::Staged);
        assert_eq!(c.accumulated().get("recolor"), Some(&json!({ "prompt": "sky" })));
        assert_eq!(c.staged().unwrap().params, json!({ "prompt": "sea" }));
    }

    #[test]
    fn completion_from_another_controller_is_stale() {
        let mut a = controller_with_fee(TransformKind::Restore, 1);
        let mut b = controller_with_fee(TransformKind::Restore, 1);
        a.upload(sample_image());
        b.upload(sample_image());
        let pa = a.begin_apply().unwrap();
        let pb = b.begin_apply().unwrap();

        assert!(matches!(
            a.complete_apply(pb, Ok(0)),
            Err(ControllerError::StaleCommit(Operation::Apply))
        ));
        assert!(a.is_committing());
        assert!(a.accumulated().is_empty());

        a.complete_apply(pa, Ok(9)).unwrap();
        assert_eq!(a.state(), TransformState::Committed);
    }

    #[test]
    fn same_sequence_from_another_controller_is_stale() {
        let mut a = controller_with_fee(TransformKind::Restore, 1);
        let mut b = controller_with_fee(TransformKind::Restore, 1);
        a.upload(sample_image());
        b.upload(sample_image());
        let pa = a.begin_apply().unwrap();
        let pb = b.begin_apply().unwrap();
        assert_eq!(pa.ticket.seq, pb.ticket.seq);

        assert!(matches!(
            b.complete_apply(pa, Ok(0)),
            Err(ControllerError::StaleCommit(Operation::Apply))
        ));
        b.complete_apply(pb, Ok(0)).unwrap();
        assert!(b.accumulated().contains("restore"));
    }

    // =========================================================================
    // Save
    // =========================================================================

    #[test]
    fn save_requires_a_commit() {
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        let builder = CdnUrlBuilder::new("https://cdn.test/upload");
        assert!(matches!(
            c.begin_save(&builder),
            Err(ControllerError::NothingCommitted)
        ));
    }

    #[test]
    fn save_packages_descriptor_and_records_id() {
        let mut ledger = MemoryLedger::with_account("user_1", 10);
        let mut store = RecordingStore::new();
        let builder = CdnUrlBuilder::new("https://cdn.test/upload");
        let mut c = controller_with_fee(TransformKind::Fill, 1);
        c.set_title("Beach");
        c.upload(sample_image());
        c.select_aspect_ratio("3:4").unwrap();
        c.apply(&mut ledger).unwrap();

        let id = c.save(&mut store, &builder).unwrap();
        assert_eq!(c.record_id(), Some(&id));

        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        let d = &saved[0];
        assert_eq!(d.title, "Beach");
        assert_eq!(d.transformation_type, TransformKind::Fill);
        assert_eq!((d.width, d.height), (1000, 1334));
        assert_eq!(d.aspect_ratio.as_deref(), Some("3:4"));
        assert_eq!(
            d.transformation_url,
            "https://cdn.test/upload/w_1000,h_1334/e_fill/artifyai/beach"
        );
        assert!(d.record_id.is_none());
    }

    #[test]
    fn second_save_updates_the_same_record() {
        let mut ledger = MemoryLedger::with_account("user_1", 10);
        let mut store = RecordingStore::new();
        let builder = CdnUrlBuilder::new("https://cdn.test/upload");
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        c.apply(&mut ledger).unwrap();

        let id = c.save(&mut store, &builder).unwrap();
        c.save(&mut store, &builder).unwrap();
        assert_eq!(store.saved()[1].record_id.as_ref(), Some(&id));
    }

    #[test]
    fn concurrent_save_is_rejected() {
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        let pending = c.begin_apply().unwrap();
        c.complete_apply(pending, Ok(9)).unwrap();

        let builder = CdnUrlBuilder::new("https://cdn.test/upload");
        let first = c.begin_save(&builder).unwrap();
        assert!(matches!(
            c.begin_save(&builder),
            Err(ControllerError::CommitInProgress(Operation::Save))
        ));
        c.complete_save(first, Ok(RecordId("r1".into()))).unwrap();
        assert!(!c.is_saving());
    }

    #[test]
    fn failed_save_is_surfaced_without_state_change() {
        let mut c = controller_with_fee(TransformKind::Restore, 1);
        c.upload(sample_image());
        let pending = c.begin_apply().unwrap();
        c.complete_apply(pending, Ok(9)).unwrap();
        let accumulated = c.accumulated().clone();

        let mut store = RecordingStore::failing();
        let builder = CdnUrlBuilder::new("https://cdn.test/upload");
        let err = c.save(&mut store, &builder).unwrap_err();

        assert!(matches!(err, ControllerError::Persistence(_)));
        assert_eq!(c.accumulated(), &accumulated);
        assert_eq!(c.state(), TransformState::Committed);
        assert!(c.record_id().is_none());
        assert!(c.can_save());
    }

    #[test]
    fn reopened_record_can_be_saved_as_update() {
        let mut store = RecordingStore::new();
        let builder = CdnUrlBuilder::new("https://cdn.test/upload");
        let mut descriptor = crate::test_helpers::sample_descriptor();
        descriptor.record_id = Some(RecordId("abc".into()));

        let mut c = TransformController::open(descriptor.clone(), "user_1", ControllerSettings::default());
        assert_eq!(c.kind(), descriptor.transformation_type);
        assert_eq!(c.accumulated(), &descriptor.config);
        assert!(c.can_save());

        c.save(&mut store, &builder).unwrap();
        assert_eq!(store.saved()[0].record_id, Some(RecordId("abc".into())));
        assert_eq!(store.saved()[0].title, descriptor.title);
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    #[test]
    fn teardown_reports_in_flight_commit_and_cancels_edits() {
        let t0 = Instant::now();
        let mut c = controller_with_fee(TransformKind::Recolor, 1);
        c.edit_field(FormField::Prompt, "sky", t0);
        c.poll(t0 + ms(1000));
        let _pending = c.begin_apply().unwrap();
        c.edit_field(FormField::Color, "#000", t0 + ms(1100));

        let teardown = c.teardown();
        assert_eq!(
            teardown,
            Teardown {
                commit_in_flight: true,
                save_in_flight: false,
                discarded_edits: 1,
            }
        );
    }
}
