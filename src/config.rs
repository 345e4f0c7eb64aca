//! Ledger configuration.
//!
//! Handles loading and validating `site-ledger.toml`. Stock defaults are
//! serialized to a TOML table and the user file is merged on top, so a
//! config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! site_path = "site-ledger.json"   # Persisted path → publication mapping
//! template_path = "templates"      # One template file per name
//! # publish_path = "staging"       # Staging dir (default: .site-ledger-<millis>-<pid>)
//! content_type = "collection"      # Content type sent with every publish
//! flush_threshold = 10             # Force a ledger save after this many publishes
//! max_concurrent_publishes = 20    # Page publishes in flight per group
//!
//! # identity = "publisher-id"     # Passed through to the storage service
//! # secret = "..."
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up by [`load_config`].
pub const CONFIG_FILENAME: &str = "site-ledger.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Ledger configuration loaded from `site-ledger.toml`.
///
/// All fields have defaults. Relative paths are resolved against the
/// process working directory when the ledger opens them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Ledger file holding the path → publication mapping.
    pub site_path: PathBuf,
    /// Directory holding one template file per template name.
    pub template_path: PathBuf,
    /// Staging directory for rendered artifacts. When absent, a fresh
    /// directory name is derived from the current time and process id so
    /// concurrent runs never share one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_path: Option<PathBuf>,
    /// Content type sent with every publish call.
    pub content_type: String,
    /// Number of publishes after which the ledger is force-saved.
    pub flush_threshold: usize,
    /// Upper bound on page publishes in flight within one group.
    pub max_concurrent_publishes: usize,
    /// Publisher identity forwarded to the storage service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Publisher secret forwarded to the storage service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            site_path: PathBuf::from("site-ledger.json"),
            template_path: PathBuf::from("templates"),
            publish_path: None,
            content_type: "collection".to_string(),
            flush_threshold: 10,
            max_concurrent_publishes: 20,
            identity: None,
            secret: None,
        }
    }
}

impl LedgerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::Validation(
                "flush_threshold must be at least 1".into(),
            ));
        }
        if self.max_concurrent_publishes == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_publishes must be at least 1".into(),
            ));
        }
        if self.content_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "content_type must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Staging directory to use for this run.
    pub fn staging_dir(&self) -> PathBuf {
        self.publish_path
            .clone()
            .unwrap_or_else(default_publish_path)
    }
}

/// `.site-ledger-<unix-millis>-<pid>` in the working directory.
pub fn default_publish_path() -> PathBuf {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    PathBuf::from(format!(".site-ledger-{}-{}", millis, std::process::id()))
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(LedgerConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<LedgerConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: LedgerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `site-ledger.toml` from the given directory.
///
/// A missing file yields the stock defaults. A file with invalid TOML or
/// unknown keys is an error.
pub fn load_config(dir: &Path) -> Result<LedgerConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `site-ledger.toml`.
pub fn stock_config_toml() -> &'static str {
    r##"# site-ledger configuration
# =========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Ledger file with the path -> publication mapping. The previous version is
# kept next to it as <site_path>.bak.
site_path = "site-ledger.json"

# Directory with one template per file. The template name is the file name
# without its .jinja / .j2 / .hbs / .tmpl extension.
template_path = "templates"

# Staging directory for rendered artifacts. Omit to get a fresh
# .site-ledger-<millis>-<pid> directory per run.
# publish_path = "staging"

# Content type sent with every publish call.
content_type = "collection"

# Save the ledger after this many publishes, so a crash in a long run loses
# at most this much bookkeeping.
flush_threshold = 10

# Maximum page publishes in flight within one group.
max_concurrent_publishes = 20

# Credentials forwarded to the storage service.
# identity = "publisher-id"
# secret = "..."
"##
}
