//! Shared types used by the controller, the merger and the storage layer.
//!
//! Parameter values are plain [`serde_json::Value`]s so that any transform
//! type can contribute directives without the engine knowing its shape.
//! The known kinds ([`TransformKind`]) only supply labels and a default
//! directive; nothing downstream branches on them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// A bag of transform parameters, e.g. `{ "prompt": "sky", "to": "#ff0000" }`.
pub type ParamBag = Map<String, Value>;

/// The uploaded source asset being edited.
///
/// Replaced wholesale on upload; the dimensions and `aspect_ratio` are
/// rewritten in place when a preset is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageState {
    /// Identifier of the asset on the CDN.
    pub public_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_url: Option<String>,
    /// Key into the aspect-ratio preset table (`"1:1"`, `"3:4"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

impl ImageState {
    pub fn new(public_id: impl Into<String>) -> Self {
        Self {
            public_id: public_id.into(),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// The transform types offered by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformKind {
    Restore,
    RemoveBackground,
    Fill,
    Remove,
    Recolor,
}

impl TransformKind {
    pub const ALL: [TransformKind; 5] = [
        TransformKind::Restore,
        TransformKind::RemoveBackground,
        TransformKind::Fill,
        TransformKind::Remove,
        TransformKind::Recolor,
    ];

    /// The tag this kind uses as its key in a transform config.
    pub fn tag(self) -> &'static str {
        match self {
            TransformKind::Restore => "restore",
            TransformKind::RemoveBackground => "removeBackground",
            TransformKind::Fill => "fill",
            TransformKind::Remove => "remove",
            TransformKind::Recolor => "recolor",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn title(self) -> &'static str {
        match self {
            TransformKind::Restore => "Restore Image",
            TransformKind::RemoveBackground => "Background Remove",
            TransformKind::Fill => "Generative Fill",
            TransformKind::Remove => "Object Remove",
            TransformKind::Recolor => "Object Recolor",
        }
    }

    pub fn subtitle(self) -> &'static str {
        match self {
            TransformKind::Restore => "Refine images by removing noise and imperfections",
            TransformKind::RemoveBackground => "Removes the background of the image using AI",
            TransformKind::Fill => "Enhance an image's dimensions using AI outpainting",
            TransformKind::Remove => "Identify and eliminate objects from images",
            TransformKind::Recolor => "Identify and recolor objects from the image",
        }
    }

    /// Directive staged when the kind is selected without free-text input.
    ///
    /// Flag-only kinds carry `true`; prompt-driven kinds carry their
    /// parameter bag with empty text fields.
    pub fn default_directive(self) -> Directive {
        let params = match self {
            TransformKind::Restore | TransformKind::RemoveBackground | TransformKind::Fill => {
                Value::Bool(true)
            }
            TransformKind::Remove => json!({ "prompt": "", "removeShadow": true, "multiple": true }),
            TransformKind::Recolor => json!({ "prompt": "", "to": "", "multiple": true }),
        };
        Directive::new(self.tag(), params)
    }

    /// Kinds that need no user input and are staged as soon as an image exists.
    pub fn stages_on_upload(self) -> bool {
        matches!(self, TransformKind::Restore | TransformKind::RemoveBackground)
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Free-text form fields whose edits are debounced into directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    Prompt,
    Color,
}

impl FormField {
    /// Parameter name the field writes in the directive's bag.
    pub fn param_key(self) -> &'static str {
        match self {
            FormField::Prompt => "prompt",
            FormField::Color => "to",
        }
    }
}

/// A single staged update: one transform tag mapped to its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub tag: String,
    pub params: Value,
}

impl Directive {
    pub fn new(tag: impl Into<String>, params: Value) -> Self {
        Self {
            tag: tag.into(),
            params,
        }
    }

    /// Directive setting a single parameter of a tag's bag.
    pub fn param(tag: impl Into<String>, key: &str, value: impl Into<Value>) -> Self {
        let mut bag = ParamBag::new();
        bag.insert(key.to_string(), value.into());
        Self::new(tag, Value::Object(bag))
    }

    /// The directive in config shape: `{ tag: params }`.
    pub fn to_config(&self) -> TransformConfig {
        let mut map = Map::new();
        map.insert(self.tag.clone(), self.params.clone());
        TransformConfig(map)
    }
}

/// Everything committed for an asset, keyed by transform tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformConfig(pub Map<String, Value>);

impl TransformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.0.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains_key(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Tags in key order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<Map<String, Value>> for TransformConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
