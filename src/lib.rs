//! # Artify Transform
//!
//! The configuration engine behind an AI image editor. A user uploads an
//! image, picks a transform (restore, remove background, generative fill,
//! object removal, object recolor), types a prompt or a color, and applies
//! it. Each apply costs credits; the result can be saved as a record.
//!
//! # Architecture: Stage, Commit, Save
//!
//! ```text
//! 1. Stage    upload / debounced edit / preset  →  staged directive
//! 2. Commit   staged + accumulated  →  merged config     (one credit fee)
//! 3. Save     merged config + image →  descriptor record (CDN URL + sizes)
//! ```
//!
//! Staging is free and can happen any number of times; only a commit talks
//! to the credit ledger, and only a save talks to persistence. Both are
//! split into a `begin_*` step that hands out a ticket and a `complete_*`
//! step that takes the external result back, so the controller holds no
//! I/O handles and an out-of-date completion is detectable.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`controller`] | The per-page state machine: staging, credit-gated apply, save |
//! | [`merge`] | Deep merge of a staged directive onto the accumulated config |
//! | [`debounce`] | Trailing-edge debouncer driven by caller-supplied instants |
//! | [`sizing`] | Output width/height from presets, image metadata, or a fallback |
//! | [`ledger`] | Credit ledger contract and an in-memory ledger |
//! | [`descriptor`] | Saved-record shape and the CDN transformation URL builder |
//! | [`persist`] | Persistence contract and a JSON-file record store |
//! | [`session`] | Scripted session replay on a virtual clock |
//! | [`config`] | `artify.toml` loading and validation |
//! | [`types`] | Shared value types (`ImageState`, `Directive`, `TransformConfig`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Newest Value Wins
//!
//! The merger never fails. When a staged directive and the accumulated
//! config disagree on the shape of a key (a flag on one side, a parameter
//! map on the other), the staged value replaces the old one. Only two maps
//! are merged key by key.
//!
//! ## Explicit Time
//!
//! Debouncing takes `Instant`s as arguments instead of spawning timers.
//! The caller polls with the current time; tests and session replays use a
//! virtual clock and never sleep.
//!
//! ## Content-Addressed Records
//!
//! New records are stored under a hash of their canonical JSON, so saving
//! the same transformation twice reuses the same file. See
//! [`persist::content_record_id`].

pub mod config;
pub mod controller;
pub mod debounce;
pub mod descriptor;
pub mod ledger;
pub mod merge;
pub mod output;
pub mod persist;
pub mod session;
pub mod sizing;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
