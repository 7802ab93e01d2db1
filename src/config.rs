//! Configuration management for HyperMD
//!
//! Handles the tokenizer options and the token-hiding options. Configuration
//! is plain serde data so embedders can keep it in a JSON file.

use crate::error::{ConfigError, ConfigResult};
use crate::markdown::SpanType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier following reverse-DNS convention
pub const APP_ID: &str = "org.hypermd.HyperMD";

/// Name of the configuration file inside the configuration directory
pub const CONFIG_FILE: &str = "hypermd.json";

/// Default tab width used when expanding indentation
pub const DEFAULT_TAB_SIZE: usize = 4;

/// Default quiet interval before the visibility engine recomputes
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Largest tab width accepted
pub const MAX_TAB_SIZE: usize = 16;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tokenizer configuration
    pub mode: ModeConfig,

    /// Token visibility configuration
    pub hide_token: HideTokenConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse configuration from JSON text and validate it
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user's configuration file if there is one, defaults otherwise
    pub fn load_or_default() -> ConfigResult<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Get the configuration directory path
    pub fn config_dir() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(APP_ID))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Reject values the tokenizer cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.mode.tab_size == 0 || self.mode.tab_size > MAX_TAB_SIZE {
            return Err(ConfigError::InvalidValue {
                key: "mode.tab_size".to_string(),
                reason: format!("must be between 1 and {}", MAX_TAB_SIZE),
            });
        }
        if self.hide_token.hide_class.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "hide_token.hide_class".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Tokenizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Detect YAML front matter on the first line
    pub front_matter: bool,

    /// Grammar used inside front matter
    pub front_matter_mode: String,

    /// Fall back to a pass-through grammar if `front_matter_mode` is missing
    pub front_matter_fallback: bool,

    /// Detect `$..$` and `$$..$$`
    pub math: bool,

    /// Grammar used inside math
    pub math_mode: String,

    /// Fall back to a pass-through grammar if `math_mode` is missing
    pub math_fallback: bool,

    /// Detect pipe tables
    pub table: bool,

    /// Detect `[TOC]` lines
    pub toc: bool,

    /// Detect `#+KEY: value` lines
    pub org_mode_markup: bool,

    /// Detect `#tag` and `#multi word#`
    pub hashtag: bool,

    /// Detect `[[custom links]]`
    pub custom_link: bool,

    /// Detect `==highlight==`
    pub highlight: bool,

    /// Detect `~sub~`
    pub subscript: bool,

    /// Detect `^super^`
    pub superscript: bool,

    /// Turn bare URLs and emails into `url` tokens
    pub autolink: bool,

    /// `~~strikethrough~~`
    pub strikethrough: bool,

    /// `- [ ]` task items
    pub task_lists: bool,

    /// Delegate fenced code to a registered grammar named by the info string
    pub fenced_code_highlighting: bool,

    /// Tab width used for indentation
    pub tab_size: usize,

    /// Deepest quote level that gets its own class (0 = unlimited)
    pub max_blockquote_depth: usize,

    /// Replacement styles for some base token types
    pub token_type_overrides: TokenTypeOverrides,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            front_matter: true,
            front_matter_mode: "yaml".to_string(),
            front_matter_fallback: true,
            math: true,
            math_mode: "stex".to_string(),
            math_fallback: true,
            table: true,
            toc: true,
            org_mode_markup: true,
            hashtag: false,
            custom_link: true,
            highlight: true,
            subscript: true,
            superscript: true,
            autolink: true,
            strikethrough: true,
            task_lists: true,
            fenced_code_highlighting: true,
            tab_size: DEFAULT_TAB_SIZE,
            max_blockquote_depth: 0,
            token_type_overrides: TokenTypeOverrides::default(),
        }
    }
}

/// Styles substituted for base grammar token types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenTypeOverrides {
    pub hr: String,
    pub list1: String,
    pub list2: String,
    pub list3: String,
    pub code: String,
    pub hashtag: String,
}

impl Default for TokenTypeOverrides {
    fn default() -> Self {
        Self {
            hr: "line-HyperMD-hr line-background-HyperMD-hr-bg hr".to_string(),
            list1: "list-1".to_string(),
            list2: "list-2".to_string(),
            list3: "list-3".to_string(),
            code: "inline-code".to_string(),
            hashtag: "hashtag meta".to_string(),
        }
    }
}

/// Token visibility configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HideTokenConfig {
    /// Whether markers are hidden at all
    pub enabled: bool,

    /// Span types whose markers are hidden
    pub watch: Vec<SpanType>,

    /// Quiet interval after cursor activity before recomputing
    pub debounce_ms: u64,

    /// Class put on a hidden marker's element
    pub hide_class: String,

    /// Class put on a line without any selection touching it
    pub inactive_line_class: String,
}

impl Default for HideTokenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch: vec![
                SpanType::Em,
                SpanType::Strong,
                SpanType::Strikethrough,
                SpanType::Code,
                SpanType::LinkText,
                SpanType::Task,
                SpanType::CustomLink,
            ],
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            hide_class: "hmd-hidden-token".to_string(),
            inactive_line_class: "hmd-inactive-line".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.mode.math);
        assert!(config.mode.front_matter);
        assert!(!config.mode.hashtag);
        assert_eq!(config.hide_token.debounce_ms, 100);
        assert!(config.hide_token.watch.contains(&SpanType::CustomLink));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{ "mode": { "hashtag": true } }"#).unwrap();
        assert!(config.mode.hashtag);
        assert!(config.mode.table);
        assert_eq!(config.mode.tab_size, DEFAULT_TAB_SIZE);
    }

    #[test]
    fn test_watch_list_names() {
        let config =
            Config::from_json(r#"{ "hide_token": { "watch": ["linkText", "highlightText"] } }"#)
                .unwrap();
        assert_eq!(
            config.hide_token.watch,
            vec![SpanType::LinkText, SpanType::HighlightText]
        );
    }

    #[test]
    fn test_invalid_tab_size() {
        let err = Config::from_json(r#"{ "mode": { "tab_size": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
