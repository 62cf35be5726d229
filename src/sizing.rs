//! Output dimension resolution.
//!
//! All functions here are pure and testable without any I/O.
//!
//! Generative fill is the only dimension-sensitive transform: its output
//! size comes from the selected aspect-ratio preset. Every other transform
//! keeps the image's own size. Whenever neither source knows a value, the
//! resolver falls back to a fixed default rather than failing.

use crate::types::{ImageState, TransformKind};
use serde::Serialize;
use std::sync::LazyLock;

/// Fallback size in pixels for either side.
pub const DEFAULT_DIMENSION: u32 = 1000;

/// Which side of the output to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Width,
    Height,
}

/// A named output shape for generative fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AspectRatioPreset {
    pub key: &'static str,
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: &'static str,
}

impl AspectRatioPreset {
    pub fn dimension(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Width => self.width,
            Dimension::Height => self.height,
        }
    }
}

static PRESETS: LazyLock<Vec<AspectRatioPreset>> = LazyLock::new(|| {
    vec![
        AspectRatioPreset {
            key: "1:1",
            label: "Square (1:1)",
            width: 1000,
            height: 1000,
            aspect_ratio: "1:1",
        },
        AspectRatioPreset {
            key: "3:4",
            label: "Standard Portrait (3:4)",
            width: 1000,
            height: 1334,
            aspect_ratio: "3:4",
        },
        AspectRatioPreset {
            key: "9:16",
            label: "Phone Portrait (9:16)",
            width: 1000,
            height: 1778,
            aspect_ratio: "9:16",
        },
    ]
});

/// The process-wide preset table, in display order.
pub fn presets() -> &'static [AspectRatioPreset] {
    &PRESETS
}

/// Look up a preset by key.
pub fn preset(key: &str) -> Option<&'static AspectRatioPreset> {
    PRESETS.iter().find(|p| p.key == key)
}

/// Resolves output dimensions with a configurable fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeResolver {
    fallback: u32,
}

impl Default for SizeResolver {
    fn default() -> Self {
        Self {
            fallback: DEFAULT_DIMENSION,
        }
    }
}

impl SizeResolver {
    /// A zero fallback is replaced by [`DEFAULT_DIMENSION`] so the output
    /// stays positive.
    pub fn new(fallback: u32) -> Self {
        Self {
            fallback: if fallback == 0 {
                DEFAULT_DIMENSION
            } else {
                fallback
            },
        }
    }

    /// Resolve one side of the output for a transform tag.
    ///
    /// # Examples
    /// ```
    /// # use artify_transform::sizing::{Dimension, SizeResolver};
    /// # use artify_transform::types::ImageState;
    /// let resolver = SizeResolver::default();
    /// let image = ImageState {
    ///     aspect_ratio: Some("9:16".into()),
    ///     ..ImageState::default()
    /// };
    /// assert_eq!(resolver.resolve("fill", &image, Dimension::Height), 1778);
    /// assert_eq!(resolver.resolve("recolor", &image, Dimension::Height), 1000);
    /// ```
    pub fn resolve(&self, tag: &str, image: &ImageState, dimension: Dimension) -> u32 {
        if tag == TransformKind::Fill.tag() {
            return image
                .aspect_ratio
                .as_deref()
                .and_then(preset)
                .map(|p| p.dimension(dimension))
                .unwrap_or(self.fallback);
        }
        let known = match dimension {
            Dimension::Width => image.width,
            Dimension::Height => image.height,
        };
        known.filter(|&v| v > 0).unwrap_or(self.fallback)
    }

    /// Resolve `(width, height)` in one call.
    pub fn resolve_dimensions(&self, tag: &str, image: &ImageState) -> (u32, u32) {
        (
            self.resolve(tag, image, Dimension::Width),
            self.resolve(tag, image, Dimension::Height),
        )
    }
}

/// [`SizeResolver::resolve`] with the stock fallback.
pub fn resolve(tag: &str, image: &ImageState, dimension: Dimension) -> u32 {
    SizeResolver::default().resolve(tag, image, dimension)
}
