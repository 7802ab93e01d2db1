//! Hashtags
//!
//! `#tag` runs to the first char that cannot be part of a tag name;
//! `#multi word tag#` runs to the closing `#`. Numeric-only names are not
//! tags.

use super::{style, StringStream};
use crate::utils::text;
use once_cell::sync::Lazy;
use regex::Regex;

static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-()/a-zA-Z0-9_+.]|[^\x00-\x7F])+").unwrap());
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static LEADING_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+").unwrap());
static HEADER_FORMATTING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\bformatting-header(?:-\d+)?\b").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashtagType {
    #[default]
    None,
    Normal,
    WithSpace,
}

pub fn is_tag_char(ch: char) -> bool {
    matches!(ch, '-' | '(' | ')' | '/' | '_' | '+' | '.') || ch.is_ascii_alphanumeric() || !ch.is_ascii()
}

/// Kind of hashtag a `#` ending at `pos` opens, looking at the rest of `line`
pub fn classify(line: &str, pos: usize) -> HashtagType {
    let unescaped = text::strip_escapes(&line[pos..]);
    let Some(name) = HASHTAG_RE.find(&unescaped) else {
        return HashtagType::None;
    };
    if NUMERIC_RE.is_match(name.as_str()) {
        return HashtagType::None;
    }

    let mut rest = &unescaped[name.end()..];
    loop {
        if let Some(after) = rest.strip_prefix('#') {
            if after.chars().next().map_or(true, |c| !is_tag_char(c)) {
                return HashtagType::WithSpace;
            }
        }
        let Some(space) = LEADING_SPACE_RE.find(rest) else {
            break;
        };
        let after_space = &rest[space.end()..];
        match HASHTAG_RE.find(after_space) {
            Some(word) => rest = &after_space[word.end()..],
            None => break,
        }
    }
    HashtagType::Normal
}

/// Run one token through the hashtag machine
///
/// `ans` is the token style so far; `can_begin` is false inside link text and
/// images. A `Normal` tag that meets a char it cannot contain backs the stream
/// up so the tag ends there.
pub fn process(
    kind: &mut HashtagType,
    stream: &mut StringStream<'_>,
    ans: &mut String,
    can_begin: bool,
    tag_style: &str,
) {
    let current = stream.current();
    match *kind {
        HashtagType::None => {
            let after_space = stream.start == 0
                || text::char_before(stream.string(), stream.start).map_or(true, char::is_whitespace);
            if current == "#" && can_begin && after_space {
                *kind = classify(stream.string(), stream.pos);
                if *kind != HashtagType::None {
                    style::push(ans, "formatting formatting-hashtag hmd-hashtag-begin");
                }
            }
        }
        HashtagType::Normal => {
            let mut ended = false;
            if !style::has_class(ans, "formatting") && !text::is_blank(current) {
                let valid = HASHTAG_RE.find(current).map_or(0, |m| m.end());
                if valid < current.len() {
                    stream.back_up(current.len() - valid);
                    ended = true;
                }
            }
            if !ended {
                ended = stream.eol() || !stream.peek().map_or(false, is_tag_char);
            }
            if ended {
                style::push(ans, "hmd-hashtag-end");
                *kind = HashtagType::None;
            }
        }
        HashtagType::WithSpace => {
            if current == "#" {
                *ans = HEADER_FORMATTING_RE.replace_all(ans, "").into_owned();
                style::push(ans, "formatting formatting-hashtag hmd-hashtag-end");
                *kind = HashtagType::None;
            }
        }
    }
    if *kind != HashtagType::None || style::has_class(ans, "hmd-hashtag-end") {
        style::push(ans, tag_style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("#tag1", 1), HashtagType::Normal);
        assert_eq!(classify("#123", 1), HashtagType::None);
        assert_eq!(classify("#multi word#", 1), HashtagType::WithSpace);
        assert_eq!(classify("#multi word", 1), HashtagType::Normal);
        assert_eq!(classify("# heading", 1), HashtagType::None);
        assert_eq!(classify(r"#a\#b", 1), HashtagType::Normal);
    }

    #[test]
    fn test_normal_tag_backs_up_at_invalid_char() {
        let mut kind = HashtagType::Normal;
        let mut stream = StringStream::new("#tag, more", 0, 4);
        stream.start = 1;
        stream.pos = 5;
        let mut ans = String::new();
        process(&mut kind, &mut stream, &mut ans, true, "hashtag meta");
        assert_eq!(stream.current(), "tag");
        assert!(ans.contains("hmd-hashtag-end"));
        assert_eq!(kind, HashtagType::None);
    }

    #[test]
    fn test_begin_requires_leading_space() {
        let mut kind = HashtagType::None;
        let mut stream = StringStream::new("a#tag", 0, 4);
        stream.start = 1;
        stream.pos = 2;
        let mut ans = String::new();
        process(&mut kind, &mut stream, &mut ans, true, "hashtag");
        assert_eq!(kind, HashtagType::None);
        assert!(ans.is_empty());
    }
}
