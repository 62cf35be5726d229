//! Merging staged directives into the accumulated transform config.
//!
//! The accumulated config is a mapping from transform tag to parameters.
//! Merging a directive must leave every other tag exactly as it was, and
//! must layer the new parameters over any earlier ones for the same tag:
//!
//! ```text
//! existing:  { recolor: { to: "#ff0000" }, restore: true }
//! directive: { recolor: { prompt: "sky" } }
//! merged:    { recolor: { prompt: "sky", to: "#ff0000" }, restore: true }
//! ```
//!
//! ## Conflicting shapes
//!
//! When one side holds a mapping and the other a scalar at the same key,
//! the newer value replaces the older one outright. This is a deliberate
//! policy, not an error: no merge ever fails.

use crate::types::{Directive, TransformConfig};
use serde_json::{Map, Value};

/// Merge a staged directive on top of the existing config.
///
/// Pure: `existing` is not modified. Merging the same directive twice gives
/// the same result as merging it once.
pub fn merge(directive: &Directive, existing: &TransformConfig) -> TransformConfig {
    merge_configs(&directive.to_config(), existing)
}

/// Merge every tag of `overlay` on top of `base`.
pub fn merge_configs(overlay: &TransformConfig, base: &TransformConfig) -> TransformConfig {
    TransformConfig(merge_maps(base.0.clone(), overlay.0.clone()))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Objects are merged key-by-key (overlay keys override base keys).
/// - Any other overlay value replaces the base value entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            Value::Object(merge_maps(base_map, overlay_map))
        }
        (_, overlay) => overlay,
    }
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, overlay_val) in overlay {
        let merged = match base.remove(&key) {
            Some(base_val) => merge_values(base_val, overlay_val),
            None => overlay_val,
        };
        base.insert(key, merged);
    }
    base
}
