//! HyperMD - incremental markdown tokenizing for text-editor widgets
//!
//! A CodeMirror-style line mode classifies markdown (plus math, tables,
//! front matter and the HyperMD extensions) into styled tokens. On top of
//! the tokens sit a per-line span extractor and an engine that hides
//! formatting markers away from the caret.

pub mod config;
pub mod editor;
pub mod error;
pub mod markdown;
pub mod mode;
pub mod state;
pub mod utils;

pub use config::{Config, HideTokenConfig, ModeConfig};
pub use editor::Editor;
pub use error::{AppError, AppResult};
