//! Editor module for HyperMD
//!
//! The host side the tokenizer runs in:
//! - Text buffer management (using ropey)
//! - Per-line tokenizing over a cached state chain
//! - Selections
//! - The span extractor, invalidated together with the state chain on edit

pub mod buffer;
pub mod highlight;

pub use buffer::{LineEnding, TextBuffer};
pub use highlight::{Highlighter, Token};

use crate::config::Config;
use crate::error::{AppResult, EditorError, EditorResult, ModeResult};
use crate::markdown::spans::{LineSpanExtractor, LineTokens, Span, SpanType};
use crate::mode::{GrammarRegistry, HyperMdMode};
use crate::state::{CursorPosition, Selection};
use std::path::Path;

/// A document with its tokenizer, selections and span cache
#[derive(Debug, Clone)]
pub struct Editor {
    /// The text buffer
    buffer: TextBuffer,
    /// Primary selection first
    selections: Vec<Selection>,
    highlighter: Highlighter,
    spans: LineSpanExtractor,
    config: Config,
}

impl Editor {
    /// Create an empty editor
    pub fn new(config: Config) -> ModeResult<Self> {
        Self::with_content("", config)
    }

    /// Create editor with initial content, using the bundled grammars
    pub fn with_content(content: &str, config: Config) -> ModeResult<Self> {
        Self::with_registry(content, config, GrammarRegistry::with_defaults())
    }

    /// Create editor with initial content and the configuration at
    /// `config_path`, or the user's configuration when there is none
    pub fn open(content: &str, config_path: Option<&Path>) -> AppResult<Self> {
        let config = match config_path {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default().unwrap_or_else(|e| {
                log::warn!("{}, using defaults", e);
                Config::default()
            }),
        };
        Ok(Self::with_content(content, config)?)
    }

    /// Create editor with initial content and a custom grammar registry
    pub fn with_registry(content: &str, config: Config, registry: GrammarRegistry) -> ModeResult<Self> {
        let mode = HyperMdMode::new(config.mode.clone(), registry)?;
        let buffer = TextBuffer::from_str(content);
        log::debug!("editor opened with {} lines", buffer.len_lines());
        Ok(Self {
            buffer,
            selections: vec![Selection::default()],
            highlighter: Highlighter::new(mode),
            spans: LineSpanExtractor::new(),
            config,
        })
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> &HyperMdMode {
        self.highlighter.mode()
    }

    /// Text of a line without its newline
    pub fn line(&self, line: usize) -> Option<String> {
        self.buffer.line(line)
    }

    pub fn line_count(&self) -> usize {
        self.buffer.len_lines()
    }

    /// Get the entire content
    pub fn content(&self) -> String {
        self.buffer.to_string()
    }

    /// Caret of the primary selection
    pub fn cursor(&self) -> CursorPosition {
        self.selections
            .first()
            .map(|s| s.head)
            .unwrap_or_default()
    }

    /// Collapse all selections to one caret
    pub fn set_cursor(&mut self, pos: CursorPosition) -> EditorResult<()> {
        self.buffer.position_to_byte(pos)?;
        self.selections = vec![Selection::collapsed(pos)];
        Ok(())
    }

    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    /// Replace every selection; the first one becomes primary
    pub fn set_selections(&mut self, selections: Vec<Selection>) -> EditorResult<()> {
        for selection in &selections {
            self.buffer.position_to_byte(selection.anchor)?;
            self.buffer.position_to_byte(selection.head)?;
        }
        self.selections = if selections.is_empty() {
            vec![Selection::default()]
        } else {
            selections
        };
        Ok(())
    }

    /// Replace `from..to` with `text`
    ///
    /// The state chain and the span cache are both dropped from the edit's
    /// first line onward. Selections end up as one caret after the insert.
    pub fn replace_range(&mut self, from: CursorPosition, to: CursorPosition, text: &str) -> EditorResult<()> {
        if to < from {
            return Err(EditorError::InvalidRange {
                start: self.buffer.position_to_byte(from)?,
                end: self.buffer.position_to_byte(to)?,
            });
        }
        let start = self.buffer.position_to_byte(from)?;
        self.buffer.replace(from, to, text)?;
        self.highlighter.invalidate_from(from.line);
        self.spans.invalidate_from(from.line);
        let normalized_len = text.replace("\r\n", "\n").len();
        let caret = self.buffer.byte_to_position(start + normalized_len);
        self.selections = vec![Selection::collapsed(caret)];
        log::debug!(
            "edit at {}:{} ({} bytes inserted), version {}",
            from.line,
            from.column,
            normalized_len,
            self.buffer.version()
        );
        Ok(())
    }

    /// Replace the whole document
    pub fn set_content(&mut self, content: &str) {
        self.buffer.set_content(content);
        self.highlighter.invalidate_from(0);
        self.spans.invalidate_from(0);
        self.selections = vec![Selection::default()];
        log::debug!("content replaced, {} lines", self.buffer.len_lines());
    }

    /// Tokens of `line`
    pub fn get_line_tokens(&mut self, line: usize, precise: bool) -> Vec<Token> {
        self.highlighter.get_line_tokens(&self.buffer, line, precise)
    }

    /// Span access for this document
    pub fn get_line_span_extractor(&mut self) -> SpanExtractorRef<'_> {
        SpanExtractorRef {
            extractor: &mut self.spans,
            source: EditorTokens {
                highlighter: &mut self.highlighter,
                buffer: &self.buffer,
            },
        }
    }
}

struct EditorTokens<'e> {
    highlighter: &'e mut Highlighter,
    buffer: &'e TextBuffer,
}

impl LineTokens for EditorTokens<'_> {
    fn line_tokens(&mut self, line: usize) -> Vec<Token> {
        self.highlighter.get_line_tokens(self.buffer, line, true)
    }
}

/// The document's span extractor bound to its tokenizer
pub struct SpanExtractorRef<'e> {
    extractor: &'e mut LineSpanExtractor,
    source: EditorTokens<'e>,
}

impl SpanExtractorRef<'_> {
    /// Spans of `line`, from the cache when present
    pub fn extract(&mut self, line: usize) -> &[Span] {
        self.extractor.extract(&mut self.source, line, false)
    }

    /// Spans of `line`, recomputed
    pub fn extract_fresh(&mut self, line: usize) -> &[Span] {
        self.extractor.extract(&mut self.source, line, true)
    }

    /// Cached spans of `line` without computing them
    pub fn cached(&self, line: usize) -> Option<&[Span]> {
        self.extractor.cached(line)
    }

    pub fn find_spans_at(&mut self, pos: CursorPosition) -> Vec<&Span> {
        self.extractor
            .find_spans_at(&mut self.source, pos.line, pos.column)
    }

    pub fn find_span_with_type_at(&mut self, pos: CursorPosition, kind: SpanType) -> Option<&Span> {
        self.extractor
            .find_span_with_type_at(&mut self.source, pos.line, pos.column, kind)
    }
}
