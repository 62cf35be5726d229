//! Storage of finalized transform descriptors.
//!
//! The engine only needs the [`PersistenceAdapter`] contract: hand over a
//! descriptor, get back a record id or an error. It never retries; a failed
//! save is surfaced to the caller as-is.
//!
//! # JsonStore
//!
//! [`JsonStore`] is the file-backed reference adapter used by the CLI. Each
//! record is one pretty-printed JSON file, `<dir>/<record_id>.json`.
//!
//! ## Record ids
//!
//! New records are **content-addressed**: the id is the first 16 hex digits
//! of the SHA-256 of the serialized descriptor. Saving the same descriptor
//! twice yields the same id and the same file, so a duplicated "add" does
//! not produce a second record.
//!
//! A record keeps its id when it is updated, so the file under a content
//! id may no longer hold that content. A new record never overwrites a
//! file that holds something else; it takes the first free `<hash>-<n>`
//! instead.
//!
//! A descriptor that already carries a `record_id` is an update: the file
//! for that id must exist and is overwritten in place, keeping the id.
//!
//! ## Versioning
//!
//! Every file carries a format `version`. Files written under another
//! version are reported as not found rather than misread.

use crate::descriptor::TransformDescriptor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Version of the record file format.
const RECORD_VERSION: u32 = 1;

/// Hex digits of the content hash kept in a record id.
const RECORD_ID_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    NotFound(RecordId),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Identifier of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stores descriptors.
pub trait PersistenceAdapter {
    fn save(&mut self, descriptor: &TransformDescriptor) -> Result<RecordId, PersistenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    version: u32,
    record_id: RecordId,
    descriptor: TransformDescriptor,
}

/// One JSON file per record in a directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing a record.
    pub fn record_path(&self, id: &RecordId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    /// Read a stored descriptor back. The returned descriptor carries its id.
    pub fn load(&self, id: &RecordId) -> Result<TransformDescriptor, PersistenceError> {
        let path = self.record_path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let record: StoredRecord = serde_json::from_str(&content)?;
        if record.version != RECORD_VERSION {
            return Err(PersistenceError::NotFound(id.clone()));
        }
        let mut descriptor = record.descriptor;
        descriptor.record_id = Some(record.record_id);
        Ok(descriptor)
    }

    /// Content id for a new record, suffixed past any file holding other content.
    fn new_record_id(
        &self,
        descriptor: &TransformDescriptor,
    ) -> Result<RecordId, PersistenceError> {
        let base = content_record_id(descriptor)?;
        let mut candidate = base.clone();
        let mut suffix = 0u32;
        loop {
            if self.holds(&candidate, descriptor)? {
                return Ok(candidate);
            }
            suffix += 1;
            debug!(taken = %candidate, "record id taken by other content");
            candidate = RecordId(format!("{}-{}", base, suffix));
        }
    }

    /// True when `id` is free or already stores exactly `descriptor`.
    fn holds(
        &self,
        id: &RecordId,
        descriptor: &TransformDescriptor,
    ) -> Result<bool, PersistenceError> {
        if !self.record_path(id).exists() {
            return Ok(true);
        }
        match self.load(id) {
            Ok(mut stored) => {
                stored.record_id = None;
                Ok(stored == *descriptor)
            }
            Err(PersistenceError::NotFound(_) | PersistenceError::Json(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl PersistenceAdapter for JsonStore {
    fn save(&mut self, descriptor: &TransformDescriptor) -> Result<RecordId, PersistenceError> {
        let record_id = match &descriptor.record_id {
            Some(id) => {
                if !self.record_path(id).exists() {
                    return Err(PersistenceError::NotFound(id.clone()));
                }
                id.clone()
            }
            None => self.new_record_id(descriptor)?,
        };
        let record = StoredRecord {
            version: RECORD_VERSION,
            record_id: record_id.clone(),
            descriptor: TransformDescriptor {
                record_id: None,
                ..descriptor.clone()
            },
        };
        let path = self.record_path(&record_id);
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json)?;
        if descriptor.record_id.is_some() {
            info!(record = %record_id, "record updated");
        } else {
            info!(record = %record_id, "record created");
        }
        debug!(path = %path.display(), "record written");
        Ok(record_id)
    }
}

/// Content-addressed id for a new record.
pub fn content_record_id(descriptor: &TransformDescriptor) -> Result<RecordId, PersistenceError> {
    let bytes = serde_json::to_vec(descriptor)?;
    let digest = Sha256::digest(&bytes);
    let hex = format!("{:x}", digest);
    Ok(RecordId(hex[..RECORD_ID_LEN].to_string()))
}
