//! Pipe table detection
//!
//! A table starts at an unformatted `|` on a line shaped like a table row,
//! and only if the next line is an alignment row. Rows keep the table alive
//! as long as each new line still looks like a row.

use super::StringStream;
use once_cell::sync::Lazy;
use regex::Regex;

/// `a | b`, no wrapping pipes
static SIMPLE_TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[^|].*?\|.*[^|]\s*$").unwrap());
static SIMPLE_TABLE_LOOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[^|].*\|").unwrap());
/// `| a | b |`
static NORMAL_TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\|[^|]+\|.+\|\s*$").unwrap());
static NORMAL_TABLE_LOOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\|").unwrap());
static ALIGN_CELL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(:)?-{2,}(:)?\s*$").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableType {
    #[default]
    None,
    Simple,
    Normal,
}

impl TableType {
    /// Number used in the `line-HyperMD-table-N` class
    pub fn as_number(self) -> u8 {
        match self {
            TableType::None => 0,
            TableType::Simple => 1,
            TableType::Normal => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColumnAlign {
    #[default]
    Default,
    Left,
    Right,
    Center,
}

impl ColumnAlign {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnAlign::Default => "default",
            ColumnAlign::Left => "left",
            ColumnAlign::Right => "right",
            ColumnAlign::Center => "center",
        }
    }
}

/// Table being tokenized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableState {
    pub kind: TableType,
    /// `T` followed by the line the table starts on
    pub id: Option<String>,
    pub columns: Vec<ColumnAlign>,
    pub col: usize,
    pub row: usize,
}

impl TableState {
    pub fn is_active(&self) -> bool {
        self.kind != TableType::None
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Try to start a table on the stream's line
    ///
    /// The line must look like a table row and the next line must be an
    /// alignment row; otherwise nothing is detected.
    pub fn detect(stream: &StringStream<'_>) -> Option<TableState> {
        let line = stream.string();
        let kind = if SIMPLE_TABLE_RE.is_match(line) {
            TableType::Simple
        } else if NORMAL_TABLE_RE.is_match(line) {
            TableType::Normal
        } else {
            return None;
        };
        let next = stream.look_ahead(1)?;
        let columns = parse_alignment_row(&next, kind)?;
        log::debug!(
            "table T{} detected at line {} ({} columns)",
            stream.line(),
            stream.line(),
            columns.len()
        );
        Some(TableState {
            kind,
            id: Some(format!("T{}", stream.line())),
            columns,
            col: 0,
            row: 0,
        })
    }

    /// Called at the start of every line while a table is open
    ///
    /// Returns false (and resets) when the line no longer looks like a row.
    pub fn continue_row(&mut self, line: &str) -> bool {
        let row_re: &Regex = match self.kind {
            TableType::None => return false,
            TableType::Simple => &SIMPLE_TABLE_LOOSE_RE,
            TableType::Normal => &NORMAL_TABLE_LOOSE_RE,
        };
        if row_re.is_match(line) {
            self.row += 1;
            self.col = 0;
            true
        } else {
            log::trace!("table {:?} ends after {} rows", self.id, self.row + 1);
            self.reset();
            false
        }
    }

    /// Style of a `|` token, moving to the next column
    pub fn separator_style(&mut self, stream: &StringStream<'_>) -> String {
        let leading = stream.string()[..stream.start].trim().is_empty();
        if self.kind == TableType::Normal && leading {
            return "hmd-table-sep hmd-table-sep-dummy".to_string();
        }
        let col = self.col;
        self.col += 1;
        if col + 1 < self.columns.len() {
            format!("hmd-table-sep hmd-table-sep-{}", col)
        } else {
            "hmd-table-sep".to_string()
        }
    }

    /// Style of cell text in the current column
    pub fn cell_style(&self) -> Option<String> {
        self.columns.get(self.col).map(|align| {
            format!(
                "hmd-table-column hmd-table-column-{} hmd-table-column-{}",
                self.col,
                align.as_str()
            )
        })
    }

    /// Line classes of the current row
    pub fn line_style(&self) -> String {
        let id = self.id.as_deref().unwrap_or("T");
        let mut style = format!(
            "line-HyperMD-table_{} line-HyperMD-table-{} line-HyperMD-table-row line-HyperMD-table-row-{}",
            id,
            self.kind.as_number(),
            self.row
        );
        if self.row == 1 {
            style.push_str(" line-HyperMD-table-rowsep");
        }
        style
    }
}

/// Column alignments of an alignment row, `None` if it is not one
pub fn parse_alignment_row(line: &str, kind: TableType) -> Option<Vec<ColumnAlign>> {
    let mut body = line.trim();
    if kind == TableType::Normal {
        body = body.strip_prefix('|').unwrap_or(body);
        body = body.strip_suffix('|').unwrap_or(body);
    }
    if !body.contains('|') && kind == TableType::Simple {
        return None;
    }
    body.split('|')
        .map(|cell| {
            let caps = ALIGN_CELL_RE.captures(cell)?;
            Some(match (caps.get(1).is_some(), caps.get(2).is_some()) {
                (true, true) => ColumnAlign::Center,
                (true, false) => ColumnAlign::Left,
                (false, true) => ColumnAlign::Right,
                (false, false) => ColumnAlign::Default,
            })
        })
        .collect()
}
