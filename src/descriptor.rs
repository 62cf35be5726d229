//! The persisted artifact and the derived-asset URL builder.
//!
//! A [`TransformDescriptor`] is what a save hands to storage: the source
//! asset, the output size, the accumulated config and the derived URL. The
//! URL is opaque to the engine; it comes from a [`TransformUrlBuilder`].
//!
//! [`CdnUrlBuilder`] renders one path segment per config tag in tag order:
//!
//! ```text
//! {base}/w_1000,h_1334/e_fill/e_recolor:prompt_sky;to_ff0000/{public_id}
//! ```

use crate::persist::RecordId;
use crate::types::{TransformConfig, TransformKind};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turns a config plus target size into a derived-asset locator.
pub trait TransformUrlBuilder {
    fn build(&self, source: &str, width: u32, height: u32, config: &TransformConfig) -> String;
}

/// Builds CDN upload URLs with effect segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnUrlBuilder {
    base_url: String,
}

impl CdnUrlBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl TransformUrlBuilder for CdnUrlBuilder {
    fn build(&self, source: &str, width: u32, height: u32, config: &TransformConfig) -> String {
        let mut segments = vec![format!("w_{width},h_{height}")];
        segments.extend(config.iter().filter_map(|(tag, value)| effect_segment(tag, value)));
        format!("{}/{}/{}", self.base_url, segments.join("/"), source)
    }
}

/// Render one tag; `false`, `null` and empty bags disable the effect.
fn effect_segment(tag: &str, value: &Value) -> Option<String> {
    match value {
        Value::Bool(false) | Value::Null => None,
        Value::Object(bag) => {
            let params: Vec<String> = bag
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|text| format!("{k}_{text}")))
                .collect();
            if params.is_empty() {
                Some(format!("e_{tag}"))
            } else {
                Some(format!("e_{tag}:{}", params.join(";")))
            }
        }
        Value::Bool(true) => Some(format!("e_{tag}")),
        other => match scalar_text(other) {
            Some(text) => Some(format!("e_{tag}:{text}")),
            None => Some(format!("e_{tag}")),
        },
    }
}

/// Bytes escaped inside a parameter value: everything a path segment
/// escapes plus the separators of the effect syntax itself.
const PARAM_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'_')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// URL-safe text for a scalar; empty strings and nested values are skipped.
/// A leading `#` (hex colors) is dropped.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => {
            Some(utf8_percent_encode(s.strip_prefix('#').unwrap_or(s), PARAM_VALUE).to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A finalized image + config record, ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformDescriptor {
    /// Set when saving over an existing record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    pub title: String,
    pub transformation_type: TransformKind,
    pub public_id: String,
    pub width: u32,
    pub height: u32,
    pub config: TransformConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_url: Option<String>,
    pub transformation_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}
