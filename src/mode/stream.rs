//! Line cursor handed to grammars
//!
//! A `StringStream` walks one line of text. `start` marks where the current
//! token began and `pos` where the grammar has consumed up to; a token is
//! `string[start..pos]`. Offsets are UTF-8 byte offsets.

use regex::{Captures, Regex};
use std::borrow::Cow;

/// Read access to neighbouring lines, used for look-ahead
pub trait LineSource {
    /// Text of `line` without its line ending
    fn line_text(&self, line: usize) -> Option<Cow<'_, str>>;
}

impl<'b> LineSource for Vec<&'b str> {
    fn line_text(&self, line: usize) -> Option<Cow<'_, str>> {
        self.get(line).map(|s| Cow::Borrowed(*s))
    }
}

impl LineSource for Vec<String> {
    fn line_text(&self, line: usize) -> Option<Cow<'_, str>> {
        self.get(line).map(|s| Cow::Borrowed(s.as_str()))
    }
}

pub struct StringStream<'a> {
    string: &'a str,
    /// Byte offset of the current token's first char
    pub start: usize,
    /// Byte offset the grammar has consumed up to
    pub pos: usize,
    line: usize,
    tab_size: usize,
    lines: Option<&'a dyn LineSource>,
}

impl<'a> std::fmt::Debug for StringStream<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringStream")
            .field("string", &self.string)
            .field("start", &self.start)
            .field("pos", &self.pos)
            .field("line", &self.line)
            .finish()
    }
}

impl<'a> StringStream<'a> {
    pub fn new(string: &'a str, line: usize, tab_size: usize) -> Self {
        Self {
            string,
            start: 0,
            pos: 0,
            line,
            tab_size: tab_size.max(1),
            lines: None,
        }
    }

    /// Attach the document so `look_ahead` can see following lines
    pub fn with_lines(mut self, lines: &'a dyn LineSource) -> Self {
        self.lines = Some(lines);
        self
    }

    /// Whole line text
    pub fn string(&self) -> &'a str {
        self.string
    }

    /// Line number of this stream in the document
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn tab_size(&self) -> usize {
        self.tab_size
    }

    /// At start of line
    pub fn sol(&self) -> bool {
        self.pos == 0
    }

    /// At end of line
    pub fn eol(&self) -> bool {
        self.pos >= self.string.len()
    }

    /// Unconsumed rest of the line
    pub fn rest(&self) -> &'a str {
        &self.string[self.pos.min(self.string.len())..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Consume and return the next char
    pub fn next(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    pub fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn eat_if(&mut self, pred: impl Fn(char) -> bool) -> Option<char> {
        match self.peek() {
            Some(ch) if pred(ch) => {
                self.pos += ch.len_utf8();
                Some(ch)
            }
            _ => None,
        }
    }

    /// Consume while `pred` holds; true if anything was consumed
    pub fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> bool {
        let begin = self.pos;
        while self.eat_if(&pred).is_some() {}
        self.pos > begin
    }

    pub fn eat_space(&mut self) -> bool {
        self.eat_while(char::is_whitespace)
    }

    pub fn skip_to_end(&mut self) {
        self.pos = self.string.len();
    }

    /// Move to the next occurrence of `ch`; false (and no move) if absent
    pub fn skip_to(&mut self, ch: char) -> bool {
        match self.rest().find(ch) {
            Some(found) => {
                self.pos += found;
                true
            }
            None => false,
        }
    }

    /// Step back `n` bytes, never before the token start
    ///
    /// Lands on the char boundary at or before the target.
    pub fn back_up(&mut self, n: usize) {
        let mut pos = self.pos.saturating_sub(n).max(self.start);
        while !self.string.is_char_boundary(pos) {
            pos -= 1;
        }
        self.pos = pos.max(self.start);
    }

    /// Move to an absolute offset inside the line
    pub fn set_pos(&mut self, pos: usize) {
        let mut pos = pos.min(self.string.len());
        while !self.string.is_char_boundary(pos) {
            pos += 1;
        }
        self.pos = pos;
    }

    /// Match a literal at the current position
    pub fn match_str(&mut self, pattern: &str, consume: bool) -> bool {
        if self.rest().starts_with(pattern) {
            if consume {
                self.pos += pattern.len();
            }
            true
        } else {
            false
        }
    }

    /// Match an anchored regex at the current position
    ///
    /// Capture offsets are relative to `rest()` as it was before the call.
    pub fn match_re(&mut self, re: &Regex, consume: bool) -> Option<Captures<'a>> {
        let rest = self.rest();
        let caps = re.captures(rest)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 {
            return None;
        }
        if consume {
            self.pos += whole.end();
        }
        Some(caps)
    }

    /// Non-consuming regex probe
    pub fn looking_at(&self, re: &Regex) -> bool {
        re.find(self.rest()).map_or(false, |m| m.start() == 0)
    }

    /// Text of the current token
    pub fn current(&self) -> &'a str {
        let end = self.pos.min(self.string.len());
        &self.string[self.start.min(end)..end]
    }

    /// Visual column of the token start
    pub fn column(&self) -> usize {
        crate::utils::text::column_of(self.string, self.start, self.tab_size)
    }

    /// Visual indentation of the line
    pub fn indentation(&self) -> usize {
        crate::utils::text::indentation(self.string, self.tab_size)
    }

    /// Text of the line `n` lines below this one
    pub fn look_ahead(&self, n: usize) -> Option<Cow<'a, str>> {
        self.lines.and_then(|lines| lines.line_text(self.line + n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_movement() {
        let mut s = StringStream::new("ab  cd", 0, 4);
        assert!(s.sol());
        assert_eq!(s.next(), Some('a'));
        assert!(s.eat('b'));
        assert!(s.eat_space());
        assert_eq!(s.current(), "ab  ");
        s.start = s.pos;
        s.skip_to_end();
        assert_eq!(s.current(), "cd");
        assert!(s.eol());
    }

    #[test]
    fn test_back_up_stops_at_start() {
        let mut s = StringStream::new("hello", 0, 4);
        s.start = 2;
        s.pos = 4;
        s.back_up(10);
        assert_eq!(s.pos, 2);
    }

    #[test]
    fn test_match_re_anchored() {
        let re = Regex::new(r"^\d+").unwrap();
        let mut s = StringStream::new("12ab", 0, 4);
        assert!(s.match_re(&re, true).is_some());
        assert_eq!(s.pos, 2);
        assert!(s.match_re(&re, true).is_none());
    }

    #[test]
    fn test_look_ahead() {
        let lines: Vec<String> = vec!["a | b".into(), "--|--".into()];
        let s = StringStream::new(&lines[0], 0, 4).with_lines(&lines);
        assert_eq!(s.look_ahead(1).as_deref(), Some("--|--"));
        assert_eq!(s.look_ahead(2), None);
    }

    #[test]
    fn test_multibyte() {
        let mut s = StringStream::new("é#", 0, 4);
        assert_eq!(s.next(), Some('é'));
        assert_eq!(s.pos, 2);
        assert_eq!(s.peek(), Some('#'));

        let mut s = StringStream::new(">\u{a0}\u{a0}x", 0, 4);
        s.pos = 5;
        s.back_up(3);
        assert_eq!(s.pos, 1);
        s.pos = 5;
        s.back_up(1);
        assert_eq!(s.pos, 3);
    }
}
