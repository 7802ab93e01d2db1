//! Error types for HyperMD
//!
//! Errors are organized by category. Only configuration problems are fatal:
//! every tokenizer detection miss degrades to plain markdown instead of
//! producing an error.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type encompassing all error categories
#[derive(Error, Debug)]
pub enum AppError {
    /// Mode construction errors
    #[error(transparent)]
    Mode(#[from] ModeError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Editor operation errors
    #[error(transparent)]
    Editor(#[from] EditorError),
}

impl AppError {
    /// Short message suitable for a status line
    pub fn user_message(&self) -> String {
        match self {
            AppError::Mode(err) => err.user_message(),
            err => err.to_string(),
        }
    }
}

/// Errors raised while building a mode and its sub-grammars
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    /// A sub-mode was requested by name, the registry does not know it and
    /// no fallback was supplied
    #[error("No grammar registered for mode \"{name}\" and no fallback supplied")]
    UnresolvedMode { name: String },

    /// A mode option holds a value the tokenizer cannot work with
    #[error("Invalid mode option {key}: {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Could not load configuration: {path}")]
    LoadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing configuration
    #[error("Invalid configuration format: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Configuration directory error
    #[error("Could not access configuration directory")]
    DirectoryError,
}

/// Editor operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    /// Position outside the document
    #[error("Invalid cursor position: line {line}, column {column}")]
    InvalidCursorPosition { line: usize, column: usize },

    /// Range whose end lies before its start
    #[error("Invalid range: {start} to {end}")]
    InvalidRange { start: usize, end: usize },

    /// Column not on a UTF-8 character boundary
    #[error("Column {column} on line {line} is not a character boundary")]
    NotCharBoundary { line: usize, column: usize },
}

/// Result type alias for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for mode construction
pub type ModeResult<T> = Result<T, ModeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for editor operations
pub type EditorResult<T> = Result<T, EditorError>;

impl ModeError {
    /// Short message suitable for a status line
    pub fn user_message(&self) -> String {
        match self {
            ModeError::UnresolvedMode { name } => {
                format!("Highlighting disabled: grammar \"{}\" is not available.", name)
            }
            ModeError::InvalidOption { .. } => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_error_display() {
        let err = ModeError::UnresolvedMode {
            name: "toml".to_string(),
        };
        assert!(err.to_string().contains("toml"));
        assert!(err.user_message().contains("toml"));
    }

    #[test]
    fn test_app_error_from_mode_error() {
        let err: AppError = ModeError::UnresolvedMode {
            name: "x".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Mode(_)));
    }

    #[test]
    fn test_editor_error_display() {
        let err = EditorError::InvalidCursorPosition { line: 3, column: 9 };
        assert_eq!(err.to_string(), "Invalid cursor position: line 3, column 9");
    }
}
