//! Configuration management for Keymove
//!
//! Handles loading, parsing, and hot-reloading of the YAML gesture library.
//! The engine itself only ever sees an `EngineConfig` value passed in by the
//! caller.

pub mod watcher;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::fs;

use crate::pattern::{Pattern, PatternDef};

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub patterns: Vec<PatternDef>,
}

/// Engine tuning, injected at construction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Cooldown applied to patterns that don't set their own
    #[serde(default)]
    pub default_cooldown_ms: u64,
    /// Delay before a completed candidate is emitted
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Trigger tolerance for steps that don't set their own
    #[serde(default = "default_tolerance_ms")]
    pub default_tolerance_ms: u64,
    /// Overall budget for multi-step sequences that don't set their own
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Nominal producer rate, used to pace ticks in live mode
    #[serde(default = "default_frame_rate_hz")]
    pub frame_rate_hz: u32,
    /// Per-frame step traces at debug level
    #[serde(default)]
    pub debug_trace: bool,
}

/// Frame buffer bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct BufferConfig {
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            default_cooldown_ms: 0,
            grace_ms: default_grace_ms(),
            default_tolerance_ms: default_tolerance_ms(),
            default_timeout_ms: default_timeout_ms(),
            frame_rate_hz: default_frame_rate_hz(),
            debug_trace: false,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            max_age_ms: default_max_age_ms(),
        }
    }
}

impl EngineConfig {
    /// Validate engine parameters
    pub fn validate(&self) -> Result<()> {
        if self.buffer.max_frames == 0 {
            anyhow::bail!("buffer.max_frames must be at least 1");
        }
        if self.buffer.max_age_ms == Some(0) {
            anyhow::bail!("buffer.max_age_ms must be positive (omit it to disable age pruning)");
        }
        if self.frame_rate_hz == 0 {
            anyhow::bail!("frame_rate_hz must be positive");
        }
        if self.default_timeout_ms == 0 {
            anyhow::bail!("default_timeout_ms must be positive");
        }
        Ok(())
    }

    /// Nominal interval between frames
    pub fn frame_interval_ms(&self) -> u64 {
        (1000 / u64::from(self.frame_rate_hz.max(1))).max(1)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("Invalid engine section")?;

        let mut seen = HashSet::new();
        for (idx, def) in self.patterns.iter().enumerate() {
            if !seen.insert(def.id.as_str()) {
                anyhow::bail!("Duplicate pattern id '{}' (pattern #{})", def.id, idx);
            }
            Pattern::compile(def, &self.engine, 0)
                .with_context(|| format!("Invalid pattern #{}", idx))?;
        }

        Ok(())
    }

    /// JSON schema of the configuration file, for editors and external stores
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(AppConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize schema")
    }
}

// Default value functions
fn default_grace_ms() -> u64 { 100 }
fn default_tolerance_ms() -> u64 { 100 }
fn default_timeout_ms() -> u64 { 1500 }
fn default_frame_rate_hz() -> u32 { 60 }
fn default_max_frames() -> usize { 120 }
fn default_max_age_ms() -> Option<u64> { Some(2000) }

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"
engine:
  grace_ms: 50
  buffer:
    max_frames: 60
patterns:
  - id: charge
    steps:
      - kind: hold
        keys: [a]
        trigger_ms: 750
  - id: save
    priority: 5
    steps:
      - kind: combo
        keys: [ctrl, s]
        strict: true
"#;

    #[test]
    fn test_parse_library_with_defaults() {
        let config = AppConfig::from_yaml(LIBRARY).unwrap();

        assert_eq!(config.engine.grace_ms, 50);
        assert_eq!(config.engine.buffer.max_frames, 60);
        assert_eq!(config.engine.buffer.max_age_ms, Some(2000));
        assert_eq!(config.engine.default_tolerance_ms, 100);
        assert_eq!(config.patterns.len(), 2);
        assert_eq!(config.patterns[1].priority, Some(5));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.patterns.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
patterns:
  - id: x
    steps: [{kind: press, keys: [a]}]
  - id: x
    steps: [{kind: press, keys: [b]}]
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate pattern id"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let yaml = r#"
patterns:
  - id: broken
    steps: [{kind: hold, keys: [a], min_ms: 900, max_ms: 100}]
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        assert!(AppConfig::from_yaml("engine:\n  buffer:\n    max_frames: 0\n").is_err());
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(EngineConfig::default().frame_interval_ms(), 16);
    }

    #[test]
    fn test_schema_mentions_steps() {
        let schema = AppConfig::json_schema().unwrap();
        assert!(schema.contains("patterns"));
        assert!(schema.contains("trigger_ms"));
    }

    #[tokio::test]
    async fn test_load_from_file() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("gestures.yaml");
        std::fs::write(&path, LIBRARY)?;

        let config = AppConfig::load(&path.to_string_lossy()).await?;
        assert_eq!(config.patterns[0].id, "charge");

        assert!(AppConfig::load("/nonexistent/gestures.yaml").await.is_err());
        Ok(())
    }
}
