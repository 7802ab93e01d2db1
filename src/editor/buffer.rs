//! Text buffer implementation using ropey
//!
//! Stores the document for the tokenizer. Positions are `(line, column)`
//! pairs where the column is a UTF-8 byte offset inside the line, matching
//! the offsets tokens and spans use.

use crate::error::{EditorError, EditorResult};
use crate::mode::LineSource;
use crate::state::CursorPosition;
use ropey::Rope;
use std::borrow::Cow;

/// Line ending style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// Unix-style line endings (LF: \n)
    #[default]
    Lf,
    /// Windows-style line endings (CRLF: \r\n)
    Crlf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }

    /// Detect line ending from text
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            LineEnding::Crlf
        } else {
            LineEnding::Lf
        }
    }
}

/// Text buffer wrapping ropey::Rope with additional metadata
#[derive(Debug, Clone)]
pub struct TextBuffer {
    /// The underlying rope, always LF internally
    rope: Rope,

    /// Line ending the document was loaded with
    line_ending: LineEnding,

    /// Version number, incremented on each change
    version: u64,
}

impl TextBuffer {
    /// Create an empty text buffer
    pub fn new() -> Self {
        Self {
            rope: Rope::new(),
            line_ending: LineEnding::default(),
            version: 0,
        }
    }

    /// Create a buffer from a string
    pub fn from_str(text: &str) -> Self {
        let line_ending = LineEnding::detect(text);
        // Normalize to LF internally
        let normalized = text.replace("\r\n", "\n");
        Self {
            rope: Rope::from_str(&normalized),
            line_ending,
            version: 0,
        }
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    /// Get the current version number
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Get total byte count
    pub fn len_bytes(&self) -> usize {
        self.rope.len_bytes()
    }

    /// Get total line count; a trailing newline starts one more empty line
    pub fn len_lines(&self) -> usize {
        self.rope.len_lines()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    /// Text of a line without its newline
    pub fn line(&self, line_idx: usize) -> Option<String> {
        if line_idx >= self.rope.len_lines() {
            return None;
        }
        let mut text = self.rope.line(line_idx).to_string();
        if text.ends_with('\n') {
            text.pop();
        }
        Some(text)
    }

    /// Byte length of a line, excluding the newline
    pub fn line_len(&self, line_idx: usize) -> Option<usize> {
        self.line(line_idx).map(|s| s.len())
    }

    /// Absolute byte offset of a position
    pub fn position_to_byte(&self, pos: CursorPosition) -> EditorResult<usize> {
        let invalid = EditorError::InvalidCursorPosition {
            line: pos.line,
            column: pos.column,
        };
        let line_len = self.line_len(pos.line).ok_or(invalid.clone())?;
        if pos.column > line_len {
            return Err(invalid);
        }
        let byte = self.rope.line_to_byte(pos.line) + pos.column;
        // round-trip through a char index to catch offsets inside a char
        if self.rope.char_to_byte(self.rope.byte_to_char(byte)) != byte {
            return Err(EditorError::NotCharBoundary {
                line: pos.line,
                column: pos.column,
            });
        }
        Ok(byte)
    }

    /// Position of an absolute byte offset, clamped to the document
    pub fn byte_to_position(&self, byte: usize) -> CursorPosition {
        let byte = byte.min(self.rope.len_bytes());
        let line = self.rope.byte_to_line(byte);
        let column = byte - self.rope.line_to_byte(line);
        CursorPosition::new(line, column)
    }

    /// Replace the text between two positions
    pub fn replace(&mut self, from: CursorPosition, to: CursorPosition, text: &str) -> EditorResult<()> {
        let start = self.position_to_byte(from)?;
        let end = self.position_to_byte(to)?;
        if end < start {
            return Err(EditorError::InvalidRange { start, end });
        }
        let start_char = self.rope.byte_to_char(start);
        let end_char = self.rope.byte_to_char(end);
        if start_char < end_char {
            self.rope.remove(start_char..end_char);
        }
        let normalized = text.replace("\r\n", "\n");
        if !normalized.is_empty() {
            self.rope.insert(start_char, &normalized);
        }
        self.version += 1;
        Ok(())
    }

    /// Set the entire buffer contents
    pub fn set_content(&mut self, text: &str) {
        self.line_ending = LineEnding::detect(text);
        let normalized = text.replace("\r\n", "\n");
        self.rope = Rope::from_str(&normalized);
        self.version += 1;
    }

    /// Get the entire buffer contents with the original line endings
    pub fn to_string(&self) -> String {
        let content = self.rope.to_string();
        if self.line_ending == LineEnding::Crlf {
            content.replace('\n', "\r\n")
        } else {
            content
        }
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TextBuffer {
    fn from(text: &str) -> Self {
        Self::from_str(text)
    }
}

impl LineSource for TextBuffer {
    fn line_text(&self, line: usize) -> Option<Cow<'_, str>> {
        self.line(line).map(Cow::Owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize, column: usize) -> CursorPosition {
        CursorPosition::new(line, column)
    }

    #[test]
    fn test_empty_buffer() {
        let buf = TextBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len_lines(), 1); // Rope always has at least 1 line
        assert_eq!(buf.line(0), Some(String::new()));
    }

    #[test]
    fn test_lines_strip_newline() {
        let buf = TextBuffer::from_str("Hello\nWorld\n");
        assert_eq!(buf.len_lines(), 3);
        assert_eq!(buf.line(0).as_deref(), Some("Hello"));
        assert_eq!(buf.line(2).as_deref(), Some(""));
        assert_eq!(buf.line(3), None);
    }

    #[test]
    fn test_line_ending_detection() {
        let crlf_buf = TextBuffer::from_str("Hello\r\nWorld");
        assert_eq!(crlf_buf.line_ending(), LineEnding::Crlf);
        assert_eq!(crlf_buf.line(0).as_deref(), Some("Hello"));
        assert_eq!(crlf_buf.to_string(), "Hello\r\nWorld");
    }

    #[test]
    fn test_byte_columns() {
        let buf = TextBuffer::from_str("é*\nab");
        assert_eq!(buf.position_to_byte(pos(0, 2)), Ok(2));
        assert_eq!(buf.position_to_byte(pos(1, 1)), Ok(5));
        assert_eq!(
            buf.position_to_byte(pos(0, 1)),
            Err(EditorError::NotCharBoundary { line: 0, column: 1 })
        );
        assert!(buf.position_to_byte(pos(1, 3)).is_err());
        assert_eq!(buf.byte_to_position(5), pos(1, 1));
    }

    #[test]
    fn test_replace() {
        let mut buf = TextBuffer::from_str("Hello World\nsecond");
        buf.replace(pos(0, 5), pos(0, 5), ",").unwrap();
        assert_eq!(buf.line(0).as_deref(), Some("Hello, World"));
        buf.replace(pos(0, 7), pos(1, 0), "").unwrap();
        assert_eq!(buf.to_string(), "Hello, second");
        assert_eq!(buf.version(), 2);
        assert!(buf.replace(pos(0, 3), pos(0, 1), "x").is_err());
    }

    #[test]
    fn test_line_source() {
        let buf = TextBuffer::from_str("a | b\n---|---");
        assert_eq!(buf.line_text(1).as_deref(), Some("---|---"));
        assert!(buf.line_text(2).is_none());
    }
}
