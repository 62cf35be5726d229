//! Engine configuration.
//!
//! Handles loading and validating `artify.toml`. Every key has a stock
//! default, so a config file only needs the values it wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [credits]
//! fee = 1                   # Credits deducted per applied transformation
//!
//! [editing]
//! debounce_ms = 1000        # Quiet period before a text edit is staged
//!
//! [sizing]
//! default_dimension = 1000  # Fallback output width/height in pixels
//!
//! [cdn]
//! base_url = "https://res.cloudinary.com/demo/image/upload"
//! ```
//!
//! ## Partial Configuration
//!
//! ```toml
//! # Only raise the fee
//! [credits]
//! fee = 5
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `artify.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Billing for applied transformations.
    pub credits: CreditsConfig,
    /// Field edit coalescing.
    pub editing: EditingConfig,
    /// Output size fallback.
    pub sizing: SizingConfig,
    /// Derived-asset URL construction.
    pub cdn: CdnConfig,
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credits.fee == 0 {
            return Err(ConfigError::Validation(
                "credits.fee must be at least 1".into(),
            ));
        }
        if self.sizing.default_dimension == 0 {
            return Err(ConfigError::Validation(
                "sizing.default_dimension must be non-zero".into(),
            ));
        }
        if self.cdn.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cdn.base_url must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreditsConfig {
    /// Credits deducted per successful apply.
    pub fee: u64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self { fee: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditingConfig {
    /// Milliseconds a text field must stay unchanged before it is staged.
    pub debounce_ms: u64,
}

impl EditingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for EditingConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizingConfig {
    pub default_dimension: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_dimension: crate::sizing::DEFAULT_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CdnConfig {
    /// Upload endpoint that derived-asset paths are appended to.
    pub base_url: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: "https://res.cloudinary.com/demo/image/upload".to_string(),
        }
    }
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file.
///
/// A missing file yields the stock defaults; a file that exists must parse
/// and validate.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented stock `artify.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Artify Transform Configuration
# ==============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Credits
# ---------------------------------------------------------------------------
[credits]
# Credits deducted from the account each time a transformation is applied.
fee = 1

# ---------------------------------------------------------------------------
# Editing
# ---------------------------------------------------------------------------
[editing]
# Milliseconds a prompt or color field must stay unchanged before the edit
# is staged. Faster typing within the window only stages the last value.
debounce_ms = 1000

# ---------------------------------------------------------------------------
# Sizing
# ---------------------------------------------------------------------------
[sizing]
# Output width/height used when neither the aspect-ratio preset nor the
# uploaded image provides one.
default_dimension = 1000

# ---------------------------------------------------------------------------
# CDN
# ---------------------------------------------------------------------------
[cdn]
# Upload endpoint; transformation segments and the asset id are appended.
base_url = "https://res.cloudinary.com/demo/image/upload"
"##
}
