//! Bundled sub-grammars
//!
//! Small line-oriented grammars the markdown modes delegate to: TeX for math,
//! YAML for front matter, HTML for raw blocks, and a pass-through grammar
//! that only knows its terminator.

use super::{Grammar, GrammarState, StringStream};
use once_cell::sync::Lazy;
use regex::Regex;

static TEX_COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\(?:[A-Za-z@]+|.)").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?").unwrap());
static YAML_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[^\s#:'"\[\]{},][^#:]*?(?:\s*):(?:\s|$)"#).unwrap());
static YAML_SCALAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:true|false|yes|no|on|off|null|~|-?\d+(?:\.\d+)?)\s*(?:#.*)?$").unwrap()
});
static HTML_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][\w:.-]*").unwrap());
static HTML_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[^\s=>/"']+"#).unwrap());
static HTML_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^&(?:#\d+|#x[0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").unwrap());

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Downcast a boxed grammar state, or bail out by consuming the line
macro_rules! downcast_or_skip {
    ($state:expr, $ty:ty, $stream:expr) => {
        match $state.as_any_mut().downcast_mut::<$ty>() {
            Some(state) => state,
            None => {
                log::warn!("grammar handed a foreign state: {:?}", $state);
                $stream.skip_to_end();
                return None;
            }
        }
    };
}

/// Grammar that consumes text up to a terminator and styles nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyGrammar {
    end_tag: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DummyState;

impl DummyGrammar {
    pub fn new(end_tag: impl Into<String>) -> Self {
        Self {
            end_tag: end_tag.into(),
        }
    }

    pub fn end_tag(&self) -> &str {
        &self.end_tag
    }
}

impl Grammar for DummyGrammar {
    fn name(&self) -> &str {
        "null"
    }

    fn start_state(&self) -> Box<dyn GrammarState> {
        Box::new(DummyState)
    }

    fn token(&self, stream: &mut StringStream<'_>, _state: &mut dyn GrammarState) -> Option<String> {
        if self.end_tag.is_empty() {
            stream.skip_to_end();
            return None;
        }
        let from = stream.start;
        match stream.string()[from..].find(self.end_tag.as_str()) {
            None => stream.skip_to_end(),
            Some(0) => stream.set_pos(from + self.end_tag.len()),
            Some(offset) => {
                let at = from + offset;
                stream.set_pos(at);
                // an escaped terminator is plain text
                if stream.string()[..at].ends_with('\\') {
                    stream.set_pos(at + 1);
                }
            }
        }
        None
    }
}

/// TeX math grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct TexGrammar;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TexState {
    /// Open `{` count
    pub depth: usize,
}

impl Grammar for TexGrammar {
    fn name(&self) -> &str {
        "stex"
    }

    fn start_state(&self) -> Box<dyn GrammarState> {
        Box::new(TexState::default())
    }

    fn token(&self, stream: &mut StringStream<'_>, state: &mut dyn GrammarState) -> Option<String> {
        let state = downcast_or_skip!(state, TexState, stream);

        if stream.eat_space() {
            return None;
        }
        if stream.match_re(&TEX_COMMAND_RE, true).is_some() {
            return Some("tag".to_string());
        }
        if stream.match_re(&NUMBER_RE, true).is_some() {
            return Some("number".to_string());
        }
        if stream.eat_while(|c| c.is_ascii_alphabetic()) {
            return Some("variable-2".to_string());
        }
        let ch = stream.next()?;
        match ch {
            '%' => {
                // inline math ends at the next `$` even inside a comment
                if !stream.skip_to('$') {
                    stream.skip_to_end();
                }
                Some("comment".to_string())
            }
            '{' => {
                state.depth += 1;
                Some("bracket".to_string())
            }
            '}' => {
                state.depth = state.depth.saturating_sub(1);
                Some("bracket".to_string())
            }
            '[' | ']' | '(' | ')' => Some("bracket".to_string()),
            '^' | '_' | '&' => Some("keyword".to_string()),
            '+' | '-' | '*' | '/' | '=' | '<' | '>' | '|' | ',' => Some("operator".to_string()),
            _ => None,
        }
    }
}

/// YAML grammar, enough for front matter
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlGrammar;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YamlState {
    /// After a `key:` on the current line
    pub in_value: bool,
    /// Inside a flow collection (`[..]` / `{..}`)
    pub flow_depth: usize,
}

impl Grammar for YamlGrammar {
    fn name(&self) -> &str {
        "yaml"
    }

    fn start_state(&self) -> Box<dyn GrammarState> {
        Box::new(YamlState::default())
    }

    fn token(&self, stream: &mut StringStream<'_>, state: &mut dyn GrammarState) -> Option<String> {
        let state = downcast_or_skip!(state, YamlState, stream);

        if stream.sol() {
            state.in_value = false;
            let trimmed = stream.string().trim_end();
            if trimmed == "---" || trimmed == "..." {
                stream.skip_to_end();
                return Some("def".to_string());
            }
        }
        if stream.eat_space() {
            return None;
        }
        let prev_is_space = stream.pos == 0
            || stream.string()[..stream.pos]
                .chars()
                .next_back()
                .map_or(true, char::is_whitespace);
        if stream.peek() == Some('#') && prev_is_space {
            stream.skip_to_end();
            return Some("comment".to_string());
        }
        if !state.in_value && state.flow_depth == 0 {
            if stream.match_str("- ", true) || stream.string()[stream.pos..].trim_end() == "-" {
                if stream.peek() == Some('-') {
                    stream.next();
                }
                return Some("meta".to_string());
            }
            if let Some(caps) = stream.match_re(&YAML_KEY_RE, false) {
                let key_len = caps
                    .get(0)
                    .map_or(0, |m| m.as_str().trim_end().len().saturating_sub(1));
                if key_len > 0 {
                    let target = stream.pos + key_len;
                    stream.set_pos(target);
                    return Some("atom".to_string());
                }
            }
            if stream.eat(':') {
                state.in_value = true;
                return Some("meta".to_string());
            }
        }
        if stream.peek() == Some(':') && !state.in_value {
            stream.next();
            state.in_value = true;
            return Some("meta".to_string());
        }
        match stream.peek() {
            Some(q @ ('"' | '\'')) => {
                stream.next();
                let mut escaped = false;
                while let Some(ch) = stream.next() {
                    if ch == q && !escaped {
                        break;
                    }
                    escaped = q == '"' && ch == '\\' && !escaped;
                }
                return Some("string".to_string());
            }
            Some('[' | '{') => {
                stream.next();
                state.flow_depth += 1;
                return Some("meta".to_string());
            }
            Some(']' | '}') => {
                stream.next();
                state.flow_depth = state.flow_depth.saturating_sub(1);
                return Some("meta".to_string());
            }
            Some(',') if state.flow_depth > 0 => {
                stream.next();
                return Some("meta".to_string());
            }
            _ => {}
        }
        if stream.match_re(&YAML_SCALAR_RE, false).is_some() {
            let word_end = stream.rest().find(char::is_whitespace).unwrap_or(stream.rest().len());
            let target = stream.pos + word_end;
            stream.set_pos(target);
            let word = stream.current();
            return if word.chars().next().map_or(false, |c| c == '-' || c.is_ascii_digit()) {
                Some("number".to_string())
            } else {
                Some("keyword".to_string())
            };
        }
        // plain scalar up to a comment or a flow delimiter
        let stop = if state.flow_depth > 0 { ",]}" } else { "" };
        let mut last_space = false;
        while let Some(ch) = stream.peek() {
            if (ch == '#' && last_space) || stop.contains(ch) {
                break;
            }
            last_space = ch.is_whitespace();
            stream.next();
        }
        if stream.current().is_empty() {
            stream.next();
        }
        Some("string".to_string())
    }
}

/// Where the HTML tokenizer is
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HtmlTokenize {
    #[default]
    InText,
    /// Inside `<name ...`
    InTag,
    /// Inside a quoted attribute value spanning lines
    InAttrValue(char),
    /// Inside a `<!-- -->`, `<![CDATA[ ]]>`, `<? ?>` or `<! >` block
    InBlock { end: &'static str, style: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlState {
    pub tokenize: HtmlTokenize,
    /// Name of the tag being read (`None` before the name is seen)
    pub tag_name: Option<String>,
    /// The tag being read is a closing tag
    pub closing: bool,
    /// Waiting for the tag name after `<`
    pub expect_name: bool,
    /// Open element names, innermost last
    pub context: Vec<String>,
}

impl HtmlState {
    /// Outside of any tag, block or open element
    pub fn is_idle(&self) -> bool {
        self.tokenize == HtmlTokenize::InText && self.context.is_empty()
    }
}

/// HTML grammar tracking open elements
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlGrammar;

impl HtmlGrammar {
    /// Token step on a concrete state, shared with the markdown mode
    pub fn step(&self, stream: &mut StringStream<'_>, state: &mut HtmlState) -> Option<String> {
        match state.tokenize.clone() {
            HtmlTokenize::InText => self.in_text(stream, state),
            HtmlTokenize::InTag => self.in_tag(stream, state),
            HtmlTokenize::InAttrValue(quote) => {
                if stream.skip_to(quote) {
                    stream.next();
                    state.tokenize = HtmlTokenize::InTag;
                } else {
                    stream.skip_to_end();
                }
                Some("string".to_string())
            }
            HtmlTokenize::InBlock { end, style } => {
                match stream.rest().find(end) {
                    Some(offset) => {
                        let target = stream.pos + offset + end.len();
                        stream.set_pos(target);
                        state.tokenize = HtmlTokenize::InText;
                    }
                    None => stream.skip_to_end(),
                }
                Some(style.to_string())
            }
        }
    }

    fn in_text(&self, stream: &mut StringStream<'_>, state: &mut HtmlState) -> Option<String> {
        if stream.eat('<') {
            let blocks: [(&str, &'static str, &'static str); 4] = [
                ("!--", "-->", "comment"),
                ("![CDATA[", "]]>", "atom"),
                ("?", "?>", "meta"),
                ("!", ">", "meta"),
            ];
            for (open, end, style) in blocks {
                if stream.match_str(open, true) {
                    state.tokenize = HtmlTokenize::InBlock { end, style };
                    return self.step(stream, state);
                }
            }
            state.closing = stream.eat('/');
            state.expect_name = true;
            state.tag_name = None;
            state.tokenize = HtmlTokenize::InTag;
            return Some("tag bracket".to_string());
        }
        if stream.match_re(&HTML_ENTITY_RE, true).is_some() {
            return Some("atom".to_string());
        }
        stream.eat_while(|c| c != '<' && c != '&');
        if stream.current().is_empty() {
            stream.next();
        }
        None
    }

    fn in_tag(&self, stream: &mut StringStream<'_>, state: &mut HtmlState) -> Option<String> {
        if stream.eat_space() {
            return None;
        }
        if state.expect_name {
            state.expect_name = false;
            if let Some(caps) = stream.match_re(&HTML_NAME_RE, true) {
                state.tag_name = caps.get(0).map(|m| m.as_str().to_ascii_lowercase());
                return Some("tag".to_string());
            }
        }
        if stream.match_str("/>", true) {
            self.end_tag(state, true);
            return Some("tag bracket".to_string());
        }
        if stream.eat('>') {
            self.end_tag(state, false);
            return Some("tag bracket".to_string());
        }
        if stream.eat('=') {
            return None;
        }
        if let Some(quote) = stream.eat_if(|c| c == '"' || c == '\'') {
            if stream.skip_to(quote) {
                stream.next();
            } else {
                stream.skip_to_end();
                state.tokenize = HtmlTokenize::InAttrValue(quote);
            }
            return Some("string".to_string());
        }
        if stream.match_re(&HTML_ATTR_RE, true).is_some() {
            return Some("attribute".to_string());
        }
        stream.next();
        Some("error".to_string())
    }

    fn end_tag(&self, state: &mut HtmlState, self_closing: bool) {
        state.tokenize = HtmlTokenize::InText;
        let name = state.tag_name.take();
        let closing = std::mem::take(&mut state.closing);
        let Some(name) = name else { return };
        if closing {
            if let Some(idx) = state.context.iter().rposition(|open| *open == name) {
                state.context.truncate(idx);
            }
        } else if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            state.context.push(name);
        }
    }
}

impl Grammar for HtmlGrammar {
    fn name(&self) -> &str {
        "html"
    }

    fn start_state(&self) -> Box<dyn GrammarState> {
        Box::new(HtmlState::default())
    }

    fn token(&self, stream: &mut StringStream<'_>, state: &mut dyn GrammarState) -> Option<String> {
        let state = downcast_or_skip!(state, HtmlState, stream);
        self.step(stream, state)
    }

    fn indent(&self, state: &dyn GrammarState, _text_after: &str) -> Option<usize> {
        state
            .as_any()
            .downcast_ref::<HtmlState>()
            .map(|s| s.context.len() * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(grammar: &dyn Grammar, line: &str) -> Vec<(String, Option<String>)> {
        let mut state = grammar.start_state();
        let mut stream = StringStream::new(line, 0, 4);
        let mut out = Vec::new();
        while !stream.eol() {
            stream.start = stream.pos;
            let style = grammar.token(&mut stream, &mut *state);
            assert!(stream.pos > stream.start, "grammar must advance on {:?}", line);
            out.push((stream.current().to_string(), style));
        }
        out
    }

    #[test]
    fn test_tex_tokens() {
        let toks = run(&TexGrammar, r"\frac{a}{2}");
        assert_eq!(toks[0], (r"\frac".to_string(), Some("tag".to_string())));
        assert_eq!(toks[1].1.as_deref(), Some("bracket"));
        assert_eq!(toks[2].1.as_deref(), Some("variable-2"));
        assert!(toks.iter().any(|(t, s)| t == "2" && s.as_deref() == Some("number")));
    }

    #[test]
    fn test_tex_stops_at_dollar() {
        let toks = run(&TexGrammar, "x+y$");
        let texts: Vec<&str> = toks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["x", "+", "y", "$"]);
    }

    #[test]
    fn test_yaml_key_value() {
        let toks = run(&YamlGrammar, "title: Hello # note");
        assert_eq!(toks[0], ("title".to_string(), Some("atom".to_string())));
        assert_eq!(toks[1].1.as_deref(), Some("meta"));
        assert!(toks.iter().any(|(_, s)| s.as_deref() == Some("comment")));
    }

    #[test]
    fn test_yaml_document_marker() {
        let toks = run(&YamlGrammar, "---");
        assert_eq!(toks, vec![("---".to_string(), Some("def".to_string()))]);
    }

    #[test]
    fn test_html_context() {
        let mut state = HtmlState::default();
        let grammar = HtmlGrammar;
        let mut stream = StringStream::new("<div class=\"a\">text", 0, 4);
        while !stream.eol() {
            stream.start = stream.pos;
            grammar.step(&mut stream, &mut state);
        }
        assert_eq!(state.context, vec!["div".to_string()]);
        assert!(!state.is_idle());

        let mut stream = StringStream::new("</div>", 1, 4);
        while !stream.eol() {
            stream.start = stream.pos;
            grammar.step(&mut stream, &mut state);
        }
        assert!(state.is_idle());
    }

    #[test]
    fn test_html_void_and_comment() {
        let toks = run(&HtmlGrammar, "<br><!-- c -->");
        assert_eq!(toks.last().unwrap().1.as_deref(), Some("comment"));
        let mut state = HtmlState::default();
        let mut stream = StringStream::new("<img src=x>", 0, 4);
        while !stream.eol() {
            stream.start = stream.pos;
            HtmlGrammar.step(&mut stream, &mut state);
        }
        assert!(state.is_idle());
    }

    #[test]
    fn test_dummy_stops_before_end_tag() {
        let grammar = DummyGrammar::new("]]");
        let mut state = grammar.start_state();
        let mut stream = StringStream::new("abc]]", 0, 4);
        grammar.token(&mut stream, &mut *state);
        assert_eq!(stream.pos, 3);
    }
}
