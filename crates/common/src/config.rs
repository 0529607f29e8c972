//! Materialstore configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::metadata::IgnoreMetadataKeys;
use crate::Error;

/// Top-level configuration, usually read from `materialstore.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialstoreConfig {
    pub store: StoreConfig,
    pub inspector: InspectorConfig,
    pub report: ReportConfig,
}

/// Where the store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root directory
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: crate::default_store_path(),
        }
    }
}

/// What happens when a pair cannot be compared: no comparator for its
/// file type, or a payload that cannot be read or decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    /// Classify the pair as different and attach a diagnostic
    #[default]
    Degrade,
    /// Abort the reduction
    Fail,
}

/// Pairing and reduction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Metadata keys ignored when matching materials
    pub ignore_keys: Vec<String>,

    /// Scores above this count as warnings (0.0 - 1.0)
    pub threshold: f64,

    /// Per-channel difference tolerated before a pixel counts as changed
    pub pixel_tolerance: u8,

    pub unsupported: UnsupportedPolicy,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            ignore_keys: Vec::new(),
            threshold: 0.0,
            pixel_tolerance: 5,
            unsupported: UnsupportedPolicy::Degrade,
        }
    }
}

impl InspectorConfig {
    pub fn ignore_metadata_keys(&self) -> IgnoreMetadataKeys {
        IgnoreMetadataKeys::of(self.ignore_keys.iter().cloned())
    }
}

/// Report emission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Bytes of text payload quoted in report entries
    pub excerpt_bytes: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { excerpt_bytes: 256 }
    }
}

impl MaterialstoreConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        validate_threshold(self.inspector.threshold)
    }
}

/// Warning thresholds are scores, so they must lie in [0, 1]; NaN is rejected
pub fn validate_threshold(threshold: f64) -> crate::Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::InvalidConfig(format!(
            "threshold must be within [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}
