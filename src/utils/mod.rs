//! Utilities module for HyperMD
//!
//! Shared helpers:
//! - Debouncing
//! - Marker ids
//! - Text utilities

use std::time::{Duration, Instant};

/// Coalesces bursts of triggers into one call after a quiet interval
///
/// Time is passed in by the caller so the host event loop stays in charge of
/// the clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            deadline: None,
        }
    }

    /// Arm (or re-arm) the pending call; supersedes any earlier one
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Returns true exactly once when the quiet interval has elapsed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a call is waiting
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drop the pending call
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Width of the ids that correlate begin/end markers
pub const MARKER_ID_LEN: usize = 7;

/// Format a sequence number as a fixed-width base-36 marker id
pub fn marker_id(seq: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = [b'0'; MARKER_ID_LEN];
    let mut n = seq;
    for slot in buf.iter_mut().rev() {
        *slot = DIGITS[(n % 36) as usize];
        n /= 36;
        if n == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Text utilities
pub mod text {
    /// Visual width of leading whitespace, tabs expanded to `tab_size` stops
    pub fn indentation(line: &str, tab_size: usize) -> usize {
        column_of(line, leading_ws_len(line), tab_size)
    }

    /// Byte length of the leading whitespace run
    pub fn leading_ws_len(line: &str) -> usize {
        line.len() - line.trim_start().len()
    }

    /// Visual column of byte offset `end`, tabs expanded
    pub fn column_of(line: &str, end: usize, tab_size: usize) -> usize {
        let mut col = 0;
        for ch in line[..end.min(line.len())].chars() {
            if ch == '\t' {
                col += tab_size - (col % tab_size);
            } else {
                col += 1;
            }
        }
        col
    }

    /// Whether the string has no non-whitespace character
    pub fn is_blank(s: &str) -> bool {
        s.chars().all(char::is_whitespace)
    }

    /// Remove backslash escapes (`\x` becomes nothing)
    pub fn strip_escapes(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                chars.next();
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Previous char before byte offset `pos`
    pub fn char_before(s: &str, pos: usize) -> Option<char> {
        s.get(..pos).and_then(|head| head.chars().next_back())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debouncer() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(100);
        assert!(!debouncer.poll(t0));

        debouncer.schedule(t0);
        assert!(debouncer.is_pending());
        assert!(!debouncer.poll(t0 + Duration::from_millis(50)));
        assert!(debouncer.poll(t0 + Duration::from_millis(100)));
        // fires once
        assert!(!debouncer.poll(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn test_debouncer_supersede_and_cancel() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(100);
        debouncer.schedule(t0);
        debouncer.schedule(t0 + Duration::from_millis(80));
        assert!(!debouncer.poll(t0 + Duration::from_millis(120)));
        assert!(debouncer.poll(t0 + Duration::from_millis(180)));

        debouncer.schedule(t0);
        debouncer.cancel();
        assert!(!debouncer.poll(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_marker_id() {
        assert_eq!(marker_id(0), "0000000");
        assert_eq!(marker_id(35), "000000z");
        assert_eq!(marker_id(36), "0000010");
        assert_eq!(marker_id(1).len(), MARKER_ID_LEN);
    }

    #[test]
    fn test_indentation() {
        assert_eq!(text::indentation("    a", 4), 4);
        assert_eq!(text::indentation("\ta", 4), 4);
        assert_eq!(text::indentation("  \ta", 4), 4);
        assert_eq!(text::indentation("a", 4), 0);
    }

    #[test]
    fn test_strip_escapes() {
        assert_eq!(text::strip_escapes(r"a\#b"), "ab");
        assert_eq!(text::strip_escapes("plain"), "plain");
    }

    #[test]
    fn test_char_before() {
        assert_eq!(text::char_before("ab", 1), Some('a'));
        assert_eq!(text::char_before("ab", 0), None);
    }
}
