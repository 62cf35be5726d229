//! Shared test utilities for the artify-transform test suite.
//!
//! Provides sample images and descriptors, a controller builder with a
//! chosen fee, and [`RecordingStore`], an in-memory persistence adapter that
//! records every descriptor it is handed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let mut c = controller_with_fee(TransformKind::Restore, 10);
//! c.upload(sample_image());
//! let mut store = RecordingStore::new();
//! ```

use std::time::Duration;

use crate::controller::{ControllerSettings, TransformController};
use crate::descriptor::TransformDescriptor;
use crate::persist::{PersistenceAdapter, PersistenceError, RecordId};
use crate::types::{ImageState, TransformConfig, TransformKind};

// =========================================================================
// Fixtures
// =========================================================================

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// An 800×600 upload with a secure URL and no preset.
pub fn sample_image() -> ImageState {
    ImageState {
        public_id: "artifyai/beach".into(),
        width: Some(800),
        height: Some(600),
        secure_url: Some("https://res.cloudinary.com/demo/image/upload/artifyai/beach.jpg".into()),
        aspect_ratio: None,
    }
}

/// A saved recolor with prompt and color set.
pub fn sample_descriptor() -> TransformDescriptor {
    let config: TransformConfig = serde_json::from_value(serde_json::json!({
        "recolor": { "prompt": "umbrella", "to": "#ffcc00", "multiple": true }
    }))
    .unwrap();
    TransformDescriptor {
        record_id: None,
        title: "Yellow umbrella".into(),
        transformation_type: TransformKind::Recolor,
        public_id: "artifyai/beach".into(),
        width: 800,
        height: 600,
        config,
        secure_url: Some("https://res.cloudinary.com/demo/image/upload/artifyai/beach.jpg".into()),
        transformation_url:
            "https://res.cloudinary.com/demo/image/upload/w_800,h_600/e_recolor:multiple_true;prompt_umbrella;to_ffcc00/artifyai/beach"
                .into(),
        aspect_ratio: None,
        prompt: Some("umbrella".into()),
        color: Some("#ffcc00".into()),
    }
}

/// Controller for account `user_1` with stock settings and the given fee.
pub fn controller_with_fee(kind: TransformKind, fee: u64) -> TransformController {
    let settings = ControllerSettings {
        fee,
        ..ControllerSettings::default()
    };
    TransformController::new(kind, "user_1", settings)
}

// =========================================================================
// Recording persistence adapter
// =========================================================================

/// Records saved descriptors; optionally fails every save.
#[derive(Debug, Default)]
pub struct RecordingStore {
    saved: Vec<TransformDescriptor>,
    fail: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            saved: Vec::new(),
            fail: true,
        }
    }

    pub fn saved(&self) -> &[TransformDescriptor] {
        &self.saved
    }
}

impl PersistenceAdapter for RecordingStore {
    fn save(&mut self, descriptor: &TransformDescriptor) -> Result<RecordId, PersistenceError> {
        if self.fail {
            return Err(PersistenceError::Unavailable("recording store set to fail".into()));
        }
        self.saved.push(descriptor.clone());
        Ok(descriptor
            .record_id
            .clone()
            .unwrap_or_else(|| RecordId(format!("rec-{}", self.saved.len()))))
    }
}
