//! Application configuration and persistence

use crate::event_store::DisplayOptions;
use crate::live_tail::TailOptions;
use crate::log_entry::{ParseOptions, SkipRule};
use crate::notation::Notation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Parsing configuration
    pub ingest: IngestConfig,
    /// Display configuration
    pub display: DisplayConfig,
    /// Live capture configuration
    pub live: LiveConfig,
    /// Highlight configuration
    pub highlight: HighlightConfig,
}

impl AppConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Configuration directory
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to get config directory")?
            .join("logtree"))
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory holding saved highlight filters
    pub fn filters_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("filters"))
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            skip: self.ingest.skip.clone(),
            capture_all_text_files: self.ingest.capture_all_text_files,
        }
    }

    pub fn display_options(&self) -> DisplayOptions {
        DisplayOptions {
            notation: self.display.notation,
            value_display_limit: self.display.value_display_limit,
            show_art_in_value: self.display.show_art_in_value,
            show_error_code_in_value: self.display.show_error_code_in_value,
        }
    }

    pub fn tail_options(&self) -> TailOptions {
        TailOptions {
            interval: Duration::from_millis(self.live.interval_ms.max(1)),
            max_events: self.live.max_events,
            name_filters: self.live.name_filters.clone(),
        }
    }
}

/// Parsing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Event keys dropped on load
    pub skip: Vec<SkipRule>,
    /// Admit plain-text files from directories
    pub capture_all_text_files: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let defaults = ParseOptions::default();
        Self {
            skip: defaults.skip,
            capture_all_text_files: defaults.capture_all_text_files,
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Notation for structured values
    pub notation: Notation,
    /// Maximum characters in a Value cell
    pub value_display_limit: usize,
    pub show_art_in_value: bool,
    pub show_error_code_in_value: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let defaults = DisplayOptions::default();
        Self {
            notation: defaults.notation,
            value_display_limit: defaults.value_display_limit,
            show_art_in_value: defaults.show_art_in_value,
            show_error_code_in_value: defaults.show_error_code_in_value,
        }
    }
}

/// Live capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Poll interval in milliseconds
    pub interval_ms: u64,
    /// Maximum events kept while capturing
    pub max_events: usize,
    /// File name patterns watched in directories
    pub name_filters: Vec<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        let defaults = TailOptions::default();
        Self {
            interval_ms: defaults.interval.as_millis() as u64,
            max_events: defaults.max_events,
            name_filters: defaults.name_filters,
        }
    }
}

/// Highlight configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// Saved filter applied to every new model
    pub default_filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let mut config = AppConfig::default();
        config.display.notation = Notation::Json;
        config.live.max_events = 500;
        config.highlight.default_filter = Some("errors".to_string());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [display]
            notation = "flat"

            [ingest]
            capture_all_text_files = false
            "#,
        )
        .unwrap();

        assert_eq!(parsed.display.notation, Notation::Flat);
        assert_eq!(parsed.display.value_display_limit, 300);
        assert!(!parsed.parse_options().capture_all_text_files);
        assert!(parsed.parse_options().is_skipped("dll-version-info"));
        assert_eq!(parsed.tail_options(), TailOptions::default());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.ingest.skip.push(SkipRule::new("heartbeat", false));
        config.live.interval_ms = 1000;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.tail_options().interval, Duration::from_secs(1));
        assert!(!loaded.parse_options().is_skipped("heartbeat"));
    }
}
