//! Line spans
//!
//! Rebuilds the inline runs of a line (emphasis, code, link text, custom
//! links, ...) from its tokens. Most kinds are found by comparing each
//! token's state with the previous token's; kinds marked with begin/end
//! classes are found from the token style. Results are cached per line.

use crate::editor::Token;
use crate::mode::{style, HashtagType};
use serde::{Deserialize, Serialize};

/// Kind of inline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpanType {
    Em,
    Strong,
    Strikethrough,
    Code,
    LinkText,
    LinkHref,
    Task,
    Hashtag,
    CustomLink,
    HighlightText,
    Superscript,
    Subscript,
    Underline,
    Indent,
}

impl SpanType {
    pub const ALL: [SpanType; 14] = [
        SpanType::Em,
        SpanType::Strong,
        SpanType::Strikethrough,
        SpanType::Code,
        SpanType::LinkText,
        SpanType::LinkHref,
        SpanType::Task,
        SpanType::Hashtag,
        SpanType::CustomLink,
        SpanType::HighlightText,
        SpanType::Superscript,
        SpanType::Subscript,
        SpanType::Underline,
        SpanType::Indent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpanType::Em => "em",
            SpanType::Strong => "strong",
            SpanType::Strikethrough => "strikethrough",
            SpanType::Code => "code",
            SpanType::LinkText => "linkText",
            SpanType::LinkHref => "linkHref",
            SpanType::Task => "task",
            SpanType::Hashtag => "hashtag",
            SpanType::CustomLink => "customLink",
            SpanType::HighlightText => "highlightText",
            SpanType::Superscript => "superscript",
            SpanType::Subscript => "subscript",
            SpanType::Underline => "underline",
            SpanType::Indent => "indent",
        }
    }

    /// Begin/end classes for kinds delimited by markers
    fn marker_classes(self) -> Option<(&'static str, &'static str)> {
        match self {
            SpanType::CustomLink => Some(("hmd-customlink-begin", "hmd-customlink-end")),
            SpanType::HighlightText => Some(("hmd-highlight-begin", "hmd-highlight-end")),
            SpanType::Superscript => Some(("hmd-superscript-begin", "hmd-superscript-end")),
            SpanType::Subscript => Some(("hmd-subscript-begin", "hmd-subscript-end")),
            SpanType::Underline => Some(("hmd-underline-begin", "hmd-underline-end")),
            _ => None,
        }
    }
}

/// Boundary token of a span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanToken {
    pub start: usize,
    pub end: usize,
    pub string: String,
    pub style: Option<String>,
}

impl From<&Token> for SpanToken {
    fn from(token: &Token) -> Self {
        Self {
            start: token.start,
            end: token.end,
            string: token.string.clone(),
            style: token.style.clone(),
        }
    }
}

impl SpanToken {
    /// Whether this token is a formatting marker
    pub fn is_formatting(&self) -> bool {
        self.style
            .as_deref()
            .map_or(false, |s| style::has_class_prefix(s, "formatting"))
    }
}

/// One inline run inside a line
///
/// `head.start == begin`; when `tail` is set, `tail.end == end`. A span
/// without a tail runs to the end of the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "type")]
    pub kind: SpanType,
    pub begin: usize,
    pub end: usize,
    pub head: SpanToken,
    pub tail: Option<SpanToken>,
    pub text: String,
}

impl Span {
    pub fn is_closed(&self) -> bool {
        self.tail.is_some()
    }

    /// Inclusive containment of a column
    pub fn contains(&self, column: usize) -> bool {
        self.begin <= column && column <= self.end
    }
}

/// Is the token inside a kind tracked by state flags
fn state_flag(kind: SpanType, token: &Token) -> bool {
    let md = &token.state.md;
    match kind {
        SpanType::Em => md.em.is_some(),
        SpanType::Strong => md.strong.is_some(),
        SpanType::Strikethrough => md.strikethrough,
        SpanType::Code => md.code > 0,
        SpanType::LinkText => md.link_text,
        SpanType::LinkHref => md.link_href,
        SpanType::Hashtag => token.state.hashtag != HashtagType::None,
        _ => false,
    }
}

/// Whether a token that leaves `kind` is that kind's closing marker
fn closes_with(kind: SpanType, token: &SpanToken) -> bool {
    match kind {
        SpanType::Hashtag => token
            .style
            .as_deref()
            .map_or(false, |s| style::has_class(s, "hmd-hashtag-end")),
        _ => token.is_formatting(),
    }
}

/// Spans of one tokenized line, in order of `begin`
pub fn extract_from_tokens(tokens: &[Token]) -> Vec<Span> {
    let line_text: String = tokens.iter().map(|t| t.string.as_str()).collect();
    let line_len = line_text.len();
    let mut spans: Vec<Span> = Vec::new();
    let mut open: Vec<(SpanType, usize)> = Vec::new();
    let mut prev: Option<&Token> = None;

    let open_span = |spans: &mut Vec<Span>, open: &mut Vec<(SpanType, usize)>, kind, token: &Token| {
        open.push((kind, spans.len()));
        spans.push(Span {
            kind,
            begin: token.start,
            end: line_len,
            head: SpanToken::from(token),
            tail: None,
            text: line_text[token.start..].to_string(),
        });
    };

    for token in tokens.iter().filter(|t| t.end > t.start) {
        let token_style = token.style.as_deref().unwrap_or("");
        let marker = SpanToken::from(token);

        for kind in SpanType::ALL {
            let is_open = open.iter().position(|(k, _)| *k == kind);
            match kind {
                SpanType::Task | SpanType::Indent => {
                    let hit = match kind {
                        SpanType::Task => style::has_class(token_style, "formatting-task"),
                        _ => {
                            style::has_class(token_style, "hmd-list-indent")
                                || style::has_class(token_style, "hmd-indent-in-quote")
                        }
                    };
                    if hit {
                        spans.push(Span {
                            kind,
                            begin: token.start,
                            end: token.end,
                            head: marker.clone(),
                            tail: Some(marker.clone()),
                            text: token.string.clone(),
                        });
                    }
                }
                _ => {
                    if let Some((begin_class, end_class)) = kind.marker_classes() {
                        if is_open.is_none() && style::has_class(token_style, begin_class) {
                            open_span(&mut spans, &mut open, kind, token);
                        } else if let Some(at) = is_open {
                            if style::has_class(token_style, end_class) {
                                let (_, idx) = open.remove(at);
                                close(&mut spans[idx], &marker, &line_text, true);
                            }
                        }
                        continue;
                    }

                    let now = state_flag(kind, token);
                    let before = prev.map_or(false, |p| state_flag(kind, p));
                    if now && is_open.is_none() {
                        open_span(&mut spans, &mut open, kind, token);
                    } else if !now && before {
                        if let Some(at) = is_open {
                            let (_, idx) = open.remove(at);
                            let as_tail = closes_with(kind, &marker);
                            close(&mut spans[idx], &marker, &line_text, as_tail);
                        }
                    }
                }
            }
        }
        prev = Some(token);
    }
    spans
}

/// End `span` at `token`: after it when it is the closing marker, else before it
fn close(span: &mut Span, token: &SpanToken, line_text: &str, as_tail: bool) {
    if as_tail {
        span.end = token.end;
        span.tail = Some(token.clone());
    } else {
        span.end = token.start;
    }
    span.text = line_text[span.begin..span.end].to_string();
}

/// Something that can tokenize a line for the extractor
pub trait LineTokens {
    fn line_tokens(&mut self, line: usize) -> Vec<Token>;
}

/// Per-line span cache
#[derive(Debug, Clone, Default)]
pub struct LineSpanExtractor {
    cache: Vec<Option<Vec<Span>>>,
}

impl LineSpanExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans of `line`, recomputed when missing or when `force` is set
    pub fn extract(&mut self, source: &mut dyn LineTokens, line: usize, force: bool) -> &[Span] {
        if line >= self.cache.len() {
            self.cache.resize(line + 1, None);
        }
        if force || self.cache[line].is_none() {
            let spans = extract_from_tokens(&source.line_tokens(line));
            log::trace!("line {}: {} spans", line, spans.len());
            self.cache[line] = Some(spans);
        }
        self.cache[line].as_deref().unwrap_or(&[])
    }

    /// Cached spans of `line`, without computing them
    pub fn cached(&self, line: usize) -> Option<&[Span]> {
        self.cache.get(line).and_then(|c| c.as_deref())
    }

    /// Drop the cache of `line` and every line after it
    pub fn invalidate_from(&mut self, line: usize) {
        if line < self.cache.len() {
            log::debug!(
                "span cache invalidated from line {} ({} entries dropped)",
                line,
                self.cache.len() - line
            );
            self.cache.truncate(line);
        }
    }

    /// Spans of `line` containing `column`, inclusive at both ends
    pub fn find_spans_at(&mut self, source: &mut dyn LineTokens, line: usize, column: usize) -> Vec<&Span> {
        self.extract(source, line, false)
            .iter()
            .take_while(|span| span.begin <= column)
            .filter(|span| span.contains(column))
            .collect()
    }

    /// First span of `kind` containing the position
    pub fn find_span_with_type_at(
        &mut self,
        source: &mut dyn LineTokens,
        line: usize,
        column: usize,
        kind: SpanType,
    ) -> Option<&Span> {
        self.extract(source, line, false)
            .iter()
            .take_while(|span| span.begin <= column)
            .find(|span| span.kind == kind && span.contains(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeConfig;
    use crate::editor::{Highlighter, TextBuffer};
    use crate::mode::{GrammarRegistry, HyperMdMode};

    struct Doc {
        buffer: TextBuffer,
        highlighter: Highlighter,
        calls: usize,
    }

    impl Doc {
        fn new(text: &str) -> Self {
            let mut config = ModeConfig::default();
            config.hashtag = true;
            let mode = HyperMdMode::new(config, GrammarRegistry::with_defaults()).unwrap();
            Self {
                buffer: TextBuffer::from_str(text),
                highlighter: Highlighter::new(mode),
                calls: 0,
            }
        }
    }

    impl LineTokens for Doc {
        fn line_tokens(&mut self, line: usize) -> Vec<Token> {
            self.calls += 1;
            self.highlighter.get_line_tokens(&self.buffer, line, true)
        }
    }

    fn spans_of(text: &str) -> Vec<Span> {
        let mut doc = Doc::new(text);
        LineSpanExtractor::new().extract(&mut doc, 0, false).to_vec()
    }

    fn find(spans: &[Span], kind: SpanType) -> &Span {
        spans.iter().find(|s| s.kind == kind).unwrap()
    }

    #[test]
    fn test_strong_span() {
        let spans = spans_of("**bold** tail");
        let strong = find(&spans, SpanType::Strong);
        assert_eq!((strong.begin, strong.end), (0, 8));
        assert_eq!(strong.head.string, "**");
        assert_eq!(strong.tail.as_ref().unwrap().start, 6);
        assert_eq!(strong.text, "**bold**");
    }

    #[test]
    fn test_unclosed_span_runs_to_eol() {
        let spans = spans_of("a *open");
        let em = find(&spans, SpanType::Em);
        assert!(!em.is_closed());
        assert_eq!((em.begin, em.end), (2, 7));
    }

    #[test]
    fn test_link_and_code_spans() {
        let spans = spans_of("[text](url) and `x`");
        let text = find(&spans, SpanType::LinkText);
        assert_eq!(text.text, "[text]");
        let href = find(&spans, SpanType::LinkHref);
        assert_eq!(href.text, "(url)");
        let code = find(&spans, SpanType::Code);
        assert_eq!(code.text, "`x`");
        assert!(spans.windows(2).all(|w| w[0].begin <= w[1].begin));
    }

    #[test]
    fn test_marker_spans() {
        let spans = spans_of("[[page]] ==hi== <u>u</u> #tag");
        assert_eq!(find(&spans, SpanType::CustomLink).text, "[[page]]");
        assert_eq!(find(&spans, SpanType::HighlightText).text, "==hi==");
        assert_eq!(find(&spans, SpanType::Underline).text, "<u>u</u>");
        assert_eq!(find(&spans, SpanType::Hashtag).text, "#tag");
    }

    #[test]
    fn test_task_span() {
        let spans = spans_of("- [x] done");
        let task = find(&spans, SpanType::Task);
        assert_eq!(task.head, *task.tail.as_ref().unwrap());
        assert!(task.text.contains("[x]"));
    }

    #[test]
    fn test_span_coverage() {
        for line in ["**a** *b* ~~c~~ `d` [e](f)", "*unclosed **x", "plain"] {
            for span in spans_of(line) {
                assert!(span.end <= line.len());
                if span.is_closed() {
                    assert!(span.begin < span.end);
                    assert_eq!(span.tail.as_ref().unwrap().end, span.end);
                }
                assert_eq!(span.head.start, span.begin);
            }
        }
    }

    #[test]
    fn test_find_spans_at() {
        let mut doc = Doc::new("**a *b* c**");
        let mut ex = LineSpanExtractor::new();
        let kinds: Vec<SpanType> = ex.find_spans_at(&mut doc, 0, 5).iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SpanType::Strong, SpanType::Em]);
        assert!(ex.find_span_with_type_at(&mut doc, 0, 0, SpanType::Em).is_none());
        assert!(ex.find_span_with_type_at(&mut doc, 0, 11, SpanType::Strong).is_some());
        assert_eq!(doc.calls, 1);
    }

    #[test]
    fn test_cache_invalidation() {
        let text = (0..10).map(|n| format!("line *{}*", n)).collect::<Vec<_>>().join("\n");
        let mut doc = Doc::new(&text);
        let mut ex = LineSpanExtractor::new();
        for line in 0..10 {
            ex.extract(&mut doc, line, false);
        }
        let kept: Vec<Vec<Span>> = (0..3).map(|l| ex.cached(l).unwrap().to_vec()).collect();

        ex.invalidate_from(3);
        for line in 3..10 {
            assert!(ex.cached(line).is_none());
        }
        for line in 0..3 {
            assert_eq!(ex.cached(line).unwrap(), kept[line].as_slice());
        }
    }
}
