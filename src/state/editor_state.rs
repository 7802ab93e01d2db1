//! Cursor and selection state
//!
//! Positions are `(line, column)` with the column a UTF-8 byte offset, the
//! same unit tokens and spans use.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Cursor position in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Line number (0-indexed)
    pub line: usize,

    /// Byte offset within the line (0-indexed)
    pub column: usize,
}

impl CursorPosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Get 1-indexed line number for display
    pub fn display_line(&self) -> usize {
        self.line + 1
    }

    /// Get 1-indexed column for display
    pub fn display_column(&self) -> usize {
        self.column + 1
    }
}

impl PartialOrd for CursorPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CursorPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line
            .cmp(&other.line)
            .then(self.column.cmp(&other.column))
    }
}

impl std::fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ln {}, Col {}", self.display_line(), self.display_column())
    }
}

/// Text selection range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Where the selection started
    pub anchor: CursorPosition,

    /// Where the caret is
    pub head: CursorPosition,
}

impl Selection {
    pub fn new(anchor: CursorPosition, head: CursorPosition) -> Self {
        Self { anchor, head }
    }

    /// Create a collapsed selection (cursor with no selection)
    pub fn collapsed(position: CursorPosition) -> Self {
        Self {
            anchor: position,
            head: position,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    /// Earlier end of the selection
    pub fn from(&self) -> CursorPosition {
        self.anchor.min(self.head)
    }

    /// Later end of the selection
    pub fn to(&self) -> CursorPosition {
        self.anchor.max(self.head)
    }

    /// Whether the selection touches `line`
    pub fn touches_line(&self, line: usize) -> bool {
        self.from().line <= line && line <= self.to().line
    }

    /// Byte range the selection covers inside `line`, whose length is `line_len`
    pub fn range_in_line(&self, line: usize, line_len: usize) -> Option<(usize, usize)> {
        if !self.touches_line(line) {
            return None;
        }
        let (from, to) = (self.from(), self.to());
        let start = if from.line == line { from.column } else { 0 };
        let end = if to.line == line { to.column } else { line_len };
        Some((start.min(line_len), end.min(line_len)))
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::collapsed(CursorPosition::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_position_display() {
        let pos = CursorPosition::new(9, 4);
        assert_eq!(pos.to_string(), "Ln 10, Col 5");
    }

    #[test]
    fn test_selection_normalized() {
        let sel = Selection::new(CursorPosition::new(3, 2), CursorPosition::new(1, 7));
        assert_eq!(sel.from(), CursorPosition::new(1, 7));
        assert_eq!(sel.to(), CursorPosition::new(3, 2));
        assert!(!sel.is_collapsed());
        assert!(Selection::default().is_collapsed());
    }

    #[test]
    fn test_range_in_line() {
        let sel = Selection::new(CursorPosition::new(1, 4), CursorPosition::new(3, 2));
        assert_eq!(sel.range_in_line(0, 10), None);
        assert_eq!(sel.range_in_line(1, 10), Some((4, 10)));
        assert_eq!(sel.range_in_line(2, 6), Some((0, 6)));
        assert_eq!(sel.range_in_line(3, 10), Some((0, 2)));

        let caret = Selection::collapsed(CursorPosition::new(0, 3));
        assert_eq!(caret.range_in_line(0, 8), Some((3, 3)));
    }
}
