//! Configuration management
//!
//! Manages extraction thresholds and the assistant command used by `execute`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pattern extraction tuning
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// External assistant invocation
    #[serde(default)]
    pub assistant: AssistantConfig,
}

/// Tuning knobs for the pattern extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Minimum occurrences before a signature becomes a candidate pattern
    #[serde(default = "default_min_support")]
    pub min_support: usize,
    /// Levenshtein distance below which two signatures merge
    #[serde(default = "default_merge_distance")]
    pub merge_distance: usize,
    /// Maximum length kept from raw assistant output
    #[serde(default = "default_max_excerpt_len")]
    pub max_excerpt_len: usize,
}

fn default_min_support() -> usize {
    2
}

fn default_merge_distance() -> usize {
    3
}

fn default_max_excerpt_len() -> usize {
    400
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            merge_distance: default_merge_distance(),
            max_excerpt_len: default_max_excerpt_len(),
        }
    }
}

/// How `execute` reaches the underlying coding assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Command to invoke; receives the task as its final argument
    #[serde(default = "default_assistant_command")]
    pub command: String,
    /// Extra arguments placed before the task
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before an invocation is abandoned as Partial
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_assistant_command() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: default_assistant_command(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "seldon", "seldon")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "seldon", "seldon")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.extraction.min_support, 2);
        assert_eq!(config.extraction.merge_distance, 3);
        assert_eq!(config.assistant.timeout_secs, 300);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[extraction]\nmin_support = 5\n").unwrap();
        assert_eq!(config.extraction.min_support, 5);
        assert_eq!(config.extraction.merge_distance, 3);
        assert_eq!(config.assistant.command, "claude");
    }
}
