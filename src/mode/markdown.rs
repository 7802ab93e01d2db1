//! Base markdown grammar
//!
//! Line-at-a-time markdown tokenizer. Block structure (headers, quotes,
//! lists, fenced and indented code, rules, raw HTML) is decided by the first
//! tokens of a line; inline structure (emphasis, code spans, links, images)
//! by the rest. Everything the next line needs lives in `MarkdownState`.

use super::grammars::{HtmlGrammar, HtmlState};
use super::{style, Grammar, GrammarRegistry, GrammarState, InnerModeRef, Mode, StringStream};
use crate::config::{ModeConfig, TokenTypeOverrides};
use crate::utils::text;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

static TEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[^#!\[\]*_\\<>` "'(~:]+"#).unwrap());
static LIST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[*\-+]|[0-9]+([.)]))\s+").unwrap());
static TASK_LIST_PROBE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[xX ]\]\s").unwrap());
static TASK_LIST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([xX ])\]").unwrap());
static ATX_HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#+)(?: |$)").unwrap());
static SETEXT_HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}(?:=+|-{2,})\s*$").unwrap());
static FENCED_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(~~~+|```+)[ \t]*([\w/+#-]*)[^\n`]*$").unwrap());
static LINK_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[[^\]]+?\]:.*$").unwrap());
static HEADER_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#+$").unwrap());
static IMAGE_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[^\]]*\] ?(?:\(|\[)").unwrap());
static IMAGE_ALT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\]]*\](?:\(.*?\)| ?\[.*?\])").unwrap());
static LINK_TEXT_CONT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.*?\]").unwrap());
static LINK_HREF_PROBE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\(.*?\)| ?\[.*?\])").unwrap());
static AUTOLINK_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:https?|ftps?)://(?:[^\\>]|\\.)+>").unwrap());
static AUTOLINK_EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^> \\]+@(?:[^\\>]|\\.)+>").unwrap());
static HTML_OPEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:!--|\?|!\[CDATA\[|[a-z][a-z0-9-]*(?:\s+[a-z_:.\-]+(?:\s*=\s*[^>]+)?)*\s*(?:>|$))",
    )
    .unwrap()
});
static HTML_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/\w*?>").unwrap());
static MD_INSIDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"markdown\s*=\s*['"]?1['"]?"#).unwrap());
static LINK_INLINE_REST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^>]+").unwrap());
static FOOTNOTE_PROBE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[^\]\\]|\\.)*\]:").unwrap());
static FOOTNOTE_INSIDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[^\]\\]|\\.)+").unwrap());
static NON_SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+").unwrap());
static LINK_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:\s+(?:"(?:[^"\\]|\\.)+"|'(?:[^'\\]|\\.)+'|\((?:[^)\\]|\\.)+\)))?"#).unwrap()
});
static TRAILING_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ +$").unwrap());
static NOT_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S").unwrap());

/// Give up on a token that refuses to advance after this many tries
const MAX_ATTEMPTS: usize = 10;

/// Which tokenizer function handles the next token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BlockNormal,
    HtmlBlock,
    /// Inside a fenced code block
    Local,
    InlineNormal,
    /// After `]` of a link, expecting `(` or `[`
    LinkHref,
    /// Inside the link destination, until the given closing char
    LinkHrefInside(char),
    FootnoteLink,
    FootnoteLinkInside,
    FootnoteUrl,
    /// Inside `<https://...>`
    LinkInline,
}

/// Whether the line is part of a list, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListState {
    #[default]
    NotList,
    /// The list marker of this line has just been read
    Bullet,
    /// Text belonging to a list item
    ContinuationText,
}

/// Facts about a line other lines look back at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineInfo {
    /// `None` for a blank line (or before the first line)
    pub line: Option<usize>,
    pub header: bool,
    pub hr: bool,
    pub fenced_code_end: bool,
}

impl LineInfo {
    fn at(line: usize) -> Self {
        Self {
            line: Some(line),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_none()
    }
}

/// Grammar running inside a fenced code block
pub struct LocalMode {
    pub grammar: Arc<dyn Grammar>,
    pub state: Box<dyn GrammarState>,
}

impl Clone for LocalMode {
    fn clone(&self) -> Self {
        Self {
            grammar: Arc::clone(&self.grammar),
            state: self.grammar.copy_state(&*self.state),
        }
    }
}

impl fmt::Debug for LocalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMode")
            .field("grammar", &self.grammar.name())
            .field("state", &self.state)
            .finish()
    }
}

impl PartialEq for LocalMode {
    fn eq(&self, other: &Self) -> bool {
        self.grammar.name() == other.grammar.name() && self.state.eq_state(&*other.state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownState {
    pub f: Step,
    pub block: Step,
    pub inline: Step,

    pub prev_line: LineInfo,
    pub this_line: LineInfo,

    pub html_state: Option<HtmlState>,
    /// Raw HTML opened with `markdown="1"`
    pub md_inside: bool,
    pub local: Option<LocalMode>,
    /// Opening fence of the current code block
    pub fenced_end: Option<String>,

    pub indentation: usize,
    pub indentation_diff: Option<usize>,
    pub indented_code: bool,

    /// Formatting markers of the token being produced
    pub formatting: Vec<&'static str>,

    pub link_text: bool,
    pub link_href: bool,
    pub link_title: bool,
    pub image: bool,
    pub image_marker: bool,
    pub image_alt_text: bool,

    /// 0 outside code, -1 in a fenced block, else the backtick count
    pub code: i32,
    pub em: Option<char>,
    pub strong: Option<char>,
    pub strikethrough: bool,

    pub header: u8,
    pub setext: u8,
    pub hr: bool,

    pub task_list: bool,
    pub task_open: bool,
    pub task_closed: bool,

    pub list: ListState,
    /// Content indentation of every open list item, innermost last
    pub list_stack: Vec<usize>,
    pub quote: usize,

    pub trailing_space: usize,
    pub trailing_space_new_line: bool,
}

impl Default for MarkdownState {
    fn default() -> Self {
        Self {
            f: Step::BlockNormal,
            block: Step::BlockNormal,
            inline: Step::InlineNormal,
            prev_line: LineInfo::default(),
            this_line: LineInfo::default(),
            html_state: None,
            md_inside: false,
            local: None,
            fenced_end: None,
            indentation: 0,
            indentation_diff: None,
            indented_code: false,
            formatting: Vec::new(),
            link_text: false,
            link_href: false,
            link_title: false,
            image: false,
            image_marker: false,
            image_alt_text: false,
            code: 0,
            em: None,
            strong: None,
            strikethrough: false,
            header: 0,
            setext: 0,
            hr: false,
            task_list: false,
            task_open: false,
            task_closed: false,
            list: ListState::NotList,
            list_stack: Vec::new(),
            quote: 0,
            trailing_space: 0,
            trailing_space_new_line: false,
        }
    }
}

impl MarkdownState {
    /// Tokens are currently handed to the raw HTML grammar
    pub fn is_in_html_block(&self) -> bool {
        self.f == Step::HtmlBlock
    }

    pub fn is_in_fenced_code(&self) -> bool {
        self.code == -1
    }

    /// List nesting depth, 0 outside lists
    pub fn list_depth(&self) -> usize {
        if self.list == ListState::NotList {
            0
        } else {
            self.list_stack.len()
        }
    }
}

/// Styles emitted for each kind of token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTypes {
    pub header: String,
    pub code: String,
    pub quote: String,
    pub list1: String,
    pub list2: String,
    pub list3: String,
    pub hr: String,
    pub image: String,
    pub image_alt_text: String,
    pub image_marker: String,
    pub formatting: String,
    pub link_inline: String,
    pub link_email: String,
    pub link_text: String,
    pub link_href: String,
    pub em: String,
    pub strong: String,
    pub strikethrough: String,
}

impl Default for TokenTypes {
    fn default() -> Self {
        Self {
            header: "header".to_string(),
            code: "comment".to_string(),
            quote: "quote".to_string(),
            list1: "variable-2".to_string(),
            list2: "variable-3".to_string(),
            list3: "keyword".to_string(),
            hr: "hr".to_string(),
            image: "image".to_string(),
            image_alt_text: "image-alt-text".to_string(),
            image_marker: "image-marker".to_string(),
            formatting: "formatting".to_string(),
            link_inline: "link".to_string(),
            link_email: "link".to_string(),
            link_text: "link".to_string(),
            link_href: "string".to_string(),
            em: "em".to_string(),
            strong: "strong".to_string(),
            strikethrough: "strikethrough".to_string(),
        }
    }
}

impl TokenTypes {
    pub fn with_overrides(overrides: &TokenTypeOverrides) -> Self {
        Self {
            hr: overrides.hr.clone(),
            list1: overrides.list1.clone(),
            list2: overrides.list2.clone(),
            list3: overrides.list3.clone(),
            code: overrides.code.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownMode {
    types: TokenTypes,
    strikethrough: bool,
    task_lists: bool,
    fenced_code_highlighting: bool,
    max_blockquote_depth: usize,
    tab_size: usize,
    registry: GrammarRegistry,
    html: HtmlGrammar,
}

impl MarkdownMode {
    pub fn new(config: &ModeConfig, registry: GrammarRegistry) -> Self {
        Self {
            types: TokenTypes::with_overrides(&config.token_type_overrides),
            strikethrough: config.strikethrough,
            task_lists: config.task_lists,
            fenced_code_highlighting: config.fenced_code_highlighting,
            max_blockquote_depth: config.max_blockquote_depth,
            tab_size: config.tab_size.max(1),
            registry,
            html: HtmlGrammar,
        }
    }

    pub fn types(&self) -> &TokenTypes {
        &self.types
    }

    fn token_once(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        state.formatting.clear();

        if state.this_line.line != Some(stream.line()) {
            state.header = 0;
            state.hr = false;

            if text::is_blank(stream.rest()) {
                stream.skip_to_end();
                self.blank_line(state);
                return None;
            }

            state.prev_line = std::mem::replace(&mut state.this_line, LineInfo::at(stream.line()));
            state.task_list = false;
            state.trailing_space = 0;
            state.trailing_space_new_line = false;

            if state.local.is_none() {
                state.f = state.block;
                if state.f != Step::HtmlBlock {
                    let ws_len = text::leading_ws_len(stream.rest());
                    let ws = &stream.rest()[..ws_len];
                    let indentation = ws
                        .chars()
                        .map(|c| if c == '\t' { self.tab_size } else { 1 })
                        .sum();
                    stream.pos += ws_len;
                    state.indentation = indentation;
                    state.indentation_diff = None;
                    if indentation > 0 {
                        return None;
                    }
                }
            }
        }
        self.dispatch(stream, state)
    }

    fn dispatch(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        match state.f {
            Step::BlockNormal => self.block_normal(stream, state),
            Step::HtmlBlock => self.html_block(stream, state),
            Step::Local => self.local(stream, state),
            Step::InlineNormal => self.inline_normal(stream, state),
            Step::LinkHref => self.link_href(stream, state),
            Step::LinkHrefInside(end) => self.link_href_inside(stream, state, end),
            Step::FootnoteLink => self.footnote_link(stream, state),
            Step::FootnoteLinkInside => self.footnote_link_inside(stream, state),
            Step::FootnoteUrl => self.footnote_url(stream, state),
            Step::LinkInline => self.link_inline(stream, state),
        }
    }

    fn switch_inline(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut MarkdownState,
        step: Step,
    ) -> Option<String> {
        state.f = step;
        state.inline = step;
        self.dispatch(stream, state)
    }

    fn switch_block(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut MarkdownState,
        step: Step,
    ) -> Option<String> {
        state.f = step;
        state.block = step;
        self.dispatch(stream, state)
    }

    fn block_normal(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        let first_token_on_line = stream.column() == state.indentation;
        let prev_line_is_empty = state.prev_line.is_empty();
        let prev_line_is_indented_code = state.indented_code;
        let prev_line_is_hr = state.prev_line.hr;
        let prev_line_is_list = state.list != ListState::NotList;
        let max_non_code_indentation = state.list_stack.last().copied().unwrap_or(0) + 3;

        state.indented_code = false;
        let line_indentation = state.indentation;
        if state.indentation_diff.is_none() {
            state.indentation_diff = Some(state.indentation);
            if prev_line_is_list {
                state.list = ListState::ContinuationText;
                while state
                    .list_stack
                    .last()
                    .map_or(false, |&top| line_indentation < top)
                {
                    state.list_stack.pop();
                    if let Some(&top) = state.list_stack.last() {
                        state.indentation = top;
                    }
                }
                match state.list_stack.last() {
                    Some(&top) => {
                        state.indentation_diff = Some(line_indentation.saturating_sub(top));
                    }
                    None => state.list = ListState::NotList,
                }
            }
        }

        let allows_inline_continuation = !prev_line_is_empty
            && !prev_line_is_hr
            && !state.prev_line.header
            && (!prev_line_is_list || !prev_line_is_indented_code)
            && !state.prev_line.fenced_code_end;

        let is_hr = (state.list == ListState::NotList || prev_line_is_hr || prev_line_is_empty)
            && state.indentation <= max_non_code_indentation
            && is_hr_line(stream.rest());

        if state.indentation_diff.unwrap_or(0) >= 4
            && (prev_line_is_indented_code
                || state.prev_line.fenced_code_end
                || state.prev_line.header
                || prev_line_is_empty)
        {
            stream.skip_to_end();
            state.indented_code = true;
            return Some(self.types.code.clone());
        }
        if stream.eat_space() {
            return None;
        }

        let may_open_block = state.indentation <= max_non_code_indentation;
        if first_token_on_line && may_open_block {
            let level = stream
                .match_re(&ATX_HEADER_RE, false)
                .and_then(|caps| caps.get(1).map(|m| m.as_str().len()));
            if let Some(level) = level.filter(|&l| l <= 6) {
                stream.match_re(&ATX_HEADER_RE, true);
                state.quote = 0;
                state.header = level as u8;
                state.this_line.header = true;
                state.formatting = vec!["header"];
                state.f = state.inline;
                return self.get_type(state);
            }
        }

        if may_open_block && stream.eat('>') {
            state.quote = if first_token_on_line { 1 } else { state.quote + 1 };
            state.formatting = vec!["quote"];
            stream.eat_space();
            return self.get_type(state);
        }

        if !is_hr && state.setext == 0 && first_token_on_line && may_open_block {
            if let Some(caps) = stream.match_re(&LIST_RE, true) {
                let ordered = caps.get(1).is_some();
                state.indentation = line_indentation + stream.current().len();
                state.list = ListState::Bullet;
                state.quote = 0;
                state.list_stack.push(state.indentation);
                state.em = None;
                state.strong = None;
                state.code = 0;
                state.strikethrough = false;
                if self.task_lists && stream.looking_at(&TASK_LIST_PROBE_RE) {
                    state.task_list = true;
                }
                state.f = state.inline;
                state.formatting = vec!["list", if ordered { "list-ol" } else { "list-ul" }];
                return self.get_type(state);
            }
        }

        if first_token_on_line && may_open_block {
            if let Some(caps) = stream.match_re(&FENCED_CODE_RE, true) {
                state.quote = 0;
                state.fenced_end = caps.get(1).map(|m| m.as_str().to_string());
                let lang = caps.get(2).map_or("", |m| m.as_str());
                state.local = if self.fenced_code_highlighting && !lang.is_empty() {
                    self.registry.get(lang).map(|grammar| LocalMode {
                        state: grammar.start_state(),
                        grammar,
                    })
                } else {
                    None
                };
                state.f = Step::Local;
                state.block = Step::Local;
                state.formatting = vec!["code-block"];
                state.code = -1;
                return self.get_type(state);
            }
        }

        let setext_level = if state.setext != 0 {
            None
        } else if (!allows_inline_continuation || !prev_line_is_list)
            && state.quote == 0
            && state.list == ListState::NotList
            && state.code == 0
            && !is_hr
            && !LINK_DEF_RE.is_match(stream.string())
        {
            stream.look_ahead(1).and_then(|next| {
                SETEXT_HEADER_RE
                    .find(&next)
                    .map(|m| if m.as_str().trim_start().starts_with('=') { 1 } else { 2 })
            })
        } else {
            None
        };
        if state.setext != 0 || setext_level.is_some() {
            match setext_level {
                Some(level) => {
                    state.header = level;
                    state.setext = level;
                }
                None => {
                    state.header = state.setext;
                    state.setext = 0;
                    stream.skip_to_end();
                    state.formatting = vec!["header"];
                }
            }
            state.this_line.header = true;
            state.f = state.inline;
            return self.get_type(state);
        }

        if is_hr {
            stream.skip_to_end();
            state.hr = true;
            state.this_line.hr = true;
            return Some(self.types.hr.clone());
        }
        if stream.peek() == Some('[') {
            return self.switch_inline(stream, state, Step::FootnoteLink);
        }
        let inline = state.inline;
        self.switch_inline(stream, state, inline)
    }

    fn html_block(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        let html = state.html_state.get_or_insert_with(HtmlState::default);
        let style = self.html.step(stream, html);
        if html.is_idle() || (state.md_inside && stream.current().contains('>')) {
            state.f = Step::InlineNormal;
            state.block = Step::BlockNormal;
            state.html_state = None;
        }
        style
    }

    fn local(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        let curr_list_ind = state.list_stack.last().copied().unwrap_or(0);
        let has_exited_list = state.indentation < curr_list_ind;
        let max_fenced_end_ind = curr_list_ind + 3;
        if let Some(fence) = state.fenced_end.clone() {
            if state.indentation <= max_fenced_end_ind {
                let end_len = if has_exited_list {
                    None
                } else {
                    fence_end_len(stream.rest(), &fence, stream.sol())
                };
                if has_exited_list || end_len.is_some() {
                    if let Some(len) = end_len {
                        stream.pos += len;
                    }
                    state.formatting = vec!["code-block"];
                    let ret = if has_exited_list {
                        None
                    } else {
                        self.get_type(state)
                    };
                    state.local = None;
                    state.block = Step::BlockNormal;
                    state.f = Step::InlineNormal;
                    state.fenced_end = None;
                    state.code = 0;
                    state.this_line.fenced_code_end = true;
                    if has_exited_list {
                        return self.switch_block(stream, state, Step::BlockNormal);
                    }
                    return ret;
                }
            }
        }
        if let Some(local) = state.local.as_mut() {
            let style = local.grammar.token(stream, &mut *local.state);
            if stream.pos <= stream.start {
                stream.next();
            }
            return style;
        }
        stream.skip_to_end();
        Some(self.types.code.clone())
    }

    fn inline_normal(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        if stream.match_re(&TEXT_RE, true).is_some() {
            return self.get_type(state);
        }

        if state.list == ListState::Bullet {
            state.list = ListState::ContinuationText;
            return self.get_type(state);
        }

        if state.task_list {
            state.task_list = false;
            if let Some(caps) = stream.match_re(&TASK_LIST_RE, true) {
                if caps.get(1).map_or(false, |m| m.as_str() == " ") {
                    state.task_open = true;
                } else {
                    state.task_closed = true;
                }
                state.formatting = vec!["task"];
                return self.get_type(state);
            }
        }

        state.task_open = false;
        state.task_closed = false;

        if state.header != 0 && stream.match_re(&HEADER_CLOSE_RE, true).is_some() {
            state.formatting = vec!["header"];
            return self.get_type(state);
        }

        let Some(ch) = stream.next() else {
            return self.get_type(state);
        };

        if state.link_title {
            state.link_title = false;
            let end = if ch == '(' { ')' } else { ch };
            if let Some(len) = scan_link_title(stream.rest(), end) {
                stream.pos += len;
                return Some(self.types.link_href.clone());
            }
        }

        if ch == '`' {
            let previous = std::mem::replace(&mut state.formatting, vec!["code"]);
            stream.eat_while(|c| c == '`');
            let count = stream.current().len() as i32;
            if state.code == 0 && (state.quote == 0 || count == 1) {
                state.code = count;
                return self.get_type(state);
            } else if count == state.code {
                let t = self.get_type(state);
                state.code = 0;
                return t;
            } else {
                state.formatting = previous;
                return self.get_type(state);
            }
        } else if state.code != 0 {
            return self.get_type(state);
        }

        if ch == '\\' {
            stream.next();
            let escape = format!("{}-escape", self.types.formatting);
            return Some(match self.get_type(state) {
                Some(t) => format!("{} {}", t, escape),
                None => escape,
            });
        }

        if ch == '!' && stream.looking_at(&IMAGE_MARKER_RE) {
            state.image_marker = true;
            state.image = true;
            state.formatting = vec!["image"];
            return self.get_type(state);
        }

        if ch == '[' && state.image_marker && stream.looking_at(&IMAGE_ALT_RE) {
            state.image_marker = false;
            state.image_alt_text = true;
            state.formatting = vec!["image"];
            return self.get_type(state);
        }

        if ch == ']' && state.image_alt_text {
            state.formatting = vec!["image"];
            let t = self.get_type(state);
            state.image_alt_text = false;
            state.image = false;
            state.inline = Step::LinkHref;
            state.f = Step::LinkHref;
            return t;
        }

        if ch == '[' && !state.image {
            if state.link_text && stream.match_re(&LINK_TEXT_CONT_RE, true).is_some() {
                return self.get_type(state);
            }
            state.link_text = true;
            state.formatting = vec!["link"];
            return self.get_type(state);
        }

        if ch == ']' && state.link_text {
            state.formatting = vec!["link"];
            let t = self.get_type(state);
            state.link_text = false;
            let next = if stream.looking_at(&LINK_HREF_PROBE_RE) {
                Step::LinkHref
            } else {
                Step::InlineNormal
            };
            state.inline = next;
            state.f = next;
            return t;
        }

        if ch == '<' {
            let link_kind = if stream.looking_at(&AUTOLINK_URL_RE) {
                Some(&self.types.link_inline)
            } else if stream.looking_at(&AUTOLINK_EMAIL_RE) {
                Some(&self.types.link_email)
            } else {
                None
            };
            if let Some(kind) = link_kind {
                state.f = Step::LinkInline;
                state.inline = Step::LinkInline;
                state.formatting = vec!["link"];
                let mut t = self.get_type(state).unwrap_or_default();
                style::push(&mut t, kind);
                return Some(t);
            }

            if stream.looking_at(&HTML_OPEN_RE) {
                if let Some(end) = stream.rest().find('>') {
                    let attrs = &stream.string()[stream.start..stream.pos + end];
                    if MD_INSIDE_RE.is_match(attrs) {
                        state.md_inside = true;
                    }
                }
                stream.back_up(1);
                state.html_state = Some(HtmlState::default());
                return self.switch_block(stream, state, Step::HtmlBlock);
            }

            if stream.match_re(&HTML_CLOSE_RE, true).is_some() {
                state.md_inside = false;
                return Some("tag".to_string());
            }
        } else if ch == '*' || ch == '_' {
            if let Some(t) = self.emphasis(stream, state, ch) {
                return t;
            }
        } else if ch == ' ' && (stream.eat('*') || stream.eat('_')) {
            if stream.peek() == Some(' ') {
                return self.get_type(state);
            }
            stream.back_up(1);
        }

        if self.strikethrough {
            if ch == '~' && stream.eat_while(|c| c == '~') {
                if state.strikethrough {
                    state.formatting = vec!["strikethrough"];
                    let t = self.get_type(state);
                    state.strikethrough = false;
                    return t;
                } else if stream.looking_at(&NOT_SPACE_RE) {
                    state.strikethrough = true;
                    state.formatting = vec!["strikethrough"];
                    return self.get_type(state);
                }
            } else if ch == ' ' && stream.match_str("~~", true) {
                if stream.peek() == Some(' ') {
                    return self.get_type(state);
                }
                stream.back_up(2);
            }
        }

        if ch == ' ' {
            if stream.looking_at(&TRAILING_SPACE_RE) {
                state.trailing_space += 1;
            } else if state.trailing_space > 0 {
                state.trailing_space_new_line = true;
            }
        }

        self.get_type(state)
    }

    /// `*`/`_` runs, following the flanking rules
    ///
    /// Returns `None` when the run neither opens nor closes anything.
    fn emphasis(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut MarkdownState,
        ch: char,
    ) -> Option<Option<String>> {
        let before = text::char_before(stream.string(), stream.pos - ch.len_utf8()).unwrap_or(' ');
        let mut len = 1;
        while len < 3 && stream.eat(ch) {
            len += 1;
        }
        let after = stream.peek().unwrap_or(' ');

        let left_flanking = !after.is_whitespace()
            && (!is_punctuation(after) || before.is_whitespace() || is_punctuation(before));
        let right_flanking = !before.is_whitespace()
            && (!is_punctuation(before) || after.is_whitespace() || is_punctuation(after));

        let mut set_em = None;
        let mut set_strong = None;
        if len % 2 == 1 {
            if state.em.is_none()
                && left_flanking
                && (ch == '*' || !right_flanking || is_punctuation(before))
            {
                set_em = Some(true);
            } else if state.em == Some(ch)
                && right_flanking
                && (ch == '*' || !left_flanking || is_punctuation(after))
            {
                set_em = Some(false);
            }
        }
        if len > 1 {
            if state.strong.is_none()
                && left_flanking
                && (ch == '*' || !right_flanking || is_punctuation(before))
            {
                set_strong = Some(true);
            } else if state.strong == Some(ch)
                && right_flanking
                && (ch == '*' || !left_flanking || is_punctuation(after))
            {
                set_strong = Some(false);
            }
        }

        if set_em.is_none() && set_strong.is_none() {
            return None;
        }
        state.formatting = match (set_strong, set_em) {
            (Some(_), None) => vec!["strong"],
            (None, Some(_)) => vec!["em"],
            _ => vec!["strong", "em"],
        };
        if set_em == Some(true) {
            state.em = Some(ch);
        }
        if set_strong == Some(true) {
            state.strong = Some(ch);
        }
        let t = self.get_type(state);
        if set_em == Some(false) {
            state.em = None;
        }
        if set_strong == Some(false) {
            state.strong = None;
        }
        Some(t)
    }

    fn link_inline(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        if stream.next() == Some('>') {
            state.f = Step::InlineNormal;
            state.inline = Step::InlineNormal;
            state.formatting = vec!["link"];
            let mut t = self.get_type(state).unwrap_or_default();
            style::push(&mut t, &self.types.link_inline);
            return Some(t);
        }
        stream.match_re(&LINK_INLINE_REST_RE, true);
        Some(self.types.link_inline.clone())
    }

    fn link_href(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        if stream.eat_space() {
            return None;
        }
        match stream.next() {
            Some(ch @ ('(' | '[')) => {
                let end = if ch == '(' { ')' } else { ']' };
                state.f = Step::LinkHrefInside(end);
                state.inline = Step::LinkHrefInside(end);
                state.formatting = vec!["link-string"];
                state.link_href = true;
                self.get_type(state)
            }
            _ => Some("error".to_string()),
        }
    }

    fn link_href_inside(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut MarkdownState,
        end: char,
    ) -> Option<String> {
        if stream.next() == Some(end) {
            state.f = Step::InlineNormal;
            state.inline = Step::InlineNormal;
            state.formatting = vec!["link-string"];
            let t = self.get_type(state);
            state.link_href = false;
            return t;
        }
        if let Some(len) = scan_href(stream.rest(), end) {
            stream.pos += len;
        }
        state.link_href = true;
        self.get_type(state)
    }

    fn footnote_link(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        if stream.looking_at(&FOOTNOTE_PROBE_RE) {
            state.f = Step::FootnoteLinkInside;
            stream.next();
            state.formatting = vec!["link"];
            state.link_text = true;
            return self.get_type(state);
        }
        self.switch_inline(stream, state, Step::InlineNormal)
    }

    fn footnote_link_inside(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut MarkdownState,
    ) -> Option<String> {
        if stream.match_str("]:", true) {
            state.f = Step::FootnoteUrl;
            state.inline = Step::FootnoteUrl;
            state.formatting = vec!["link"];
            let t = self.get_type(state);
            state.link_text = false;
            return t;
        }
        stream.match_re(&FOOTNOTE_INSIDE_RE, true);
        Some(self.types.link_text.clone())
    }

    fn footnote_url(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        if stream.eat_space() {
            return None;
        }
        stream.match_re(&NON_SPACE_RUN_RE, true);
        if stream.eol() {
            state.link_title = true;
        } else {
            stream.match_re(&LINK_TITLE_RE, true);
        }
        state.f = Step::InlineNormal;
        state.inline = Step::InlineNormal;
        Some(format!("{} url", self.types.link_href))
    }

    /// Style of the current token from the state flags
    pub fn get_type(&self, state: &MarkdownState) -> Option<String> {
        let types = &self.types;
        let mut styles: Vec<String> = Vec::new();

        if !state.formatting.is_empty() {
            styles.push(types.formatting.clone());
            for fmt in &state.formatting {
                styles.push(format!("{}-{}", types.formatting, fmt));
                if *fmt == "header" {
                    styles.push(format!("{}-{}-{}", types.formatting, fmt, state.header));
                }
                if *fmt == "quote" {
                    if self.max_blockquote_depth == 0 || self.max_blockquote_depth >= state.quote {
                        styles.push(format!("{}-{}-{}", types.formatting, fmt, state.quote));
                    } else {
                        styles.push("error".to_string());
                    }
                }
            }
        }

        if state.task_open {
            styles.push("meta".to_string());
            return style::finish(&styles.join(" "));
        }
        if state.task_closed {
            styles.push("property".to_string());
            return style::finish(&styles.join(" "));
        }

        if state.link_href {
            styles.push(types.link_href.clone());
            styles.push("url".to_string());
        } else {
            if state.strong.is_some() {
                styles.push(types.strong.clone());
            }
            if state.em.is_some() {
                styles.push(types.em.clone());
            }
            if state.strikethrough {
                styles.push(types.strikethrough.clone());
            }
            if state.link_text {
                styles.push(types.link_text.clone());
            }
            if state.code != 0 {
                styles.push(types.code.clone());
            }
            if state.image {
                styles.push(types.image.clone());
            }
            if state.image_alt_text {
                styles.push(types.image_alt_text.clone());
                styles.push("link".to_string());
            }
            if state.image_marker {
                styles.push(types.image_marker.clone());
            }
        }

        if state.header != 0 {
            styles.push(types.header.clone());
            styles.push(format!("{}-{}", types.header, state.header));
        }

        if state.quote != 0 {
            styles.push(types.quote.clone());
            let level = if self.max_blockquote_depth == 0 {
                state.quote
            } else {
                state.quote.min(self.max_blockquote_depth)
            };
            styles.push(format!("{}-{}", types.quote, level));
        }

        if state.list != ListState::NotList {
            let list_mod = state.list_stack.len().saturating_sub(1) % 3;
            styles.push(match list_mod {
                0 => types.list1.clone(),
                1 => types.list2.clone(),
                _ => types.list3.clone(),
            });
        }

        if state.trailing_space_new_line {
            styles.push("trailing-space-new-line".to_string());
        } else if state.trailing_space > 0 {
            let parity = if state.trailing_space % 2 == 1 { "a" } else { "b" };
            styles.push(format!("trailing-space-{}", parity));
        }

        style::finish(&styles.join(" "))
    }
}

impl Mode for MarkdownMode {
    type State = MarkdownState;

    fn name(&self) -> &str {
        "markdown"
    }

    fn start_state(&self) -> MarkdownState {
        MarkdownState::default()
    }

    fn token(&self, stream: &mut StringStream<'_>, state: &mut MarkdownState) -> Option<String> {
        // some steps only flip state and leave the text to the next attempt
        for _ in 0..MAX_ATTEMPTS {
            let style = self.token_once(stream, state);
            if stream.pos > stream.start || stream.eol() {
                return style;
            }
        }
        log::warn!(
            "markdown tokenizer stalled at {}:{}",
            stream.line(),
            stream.pos
        );
        stream.next();
        None
    }

    fn blank_line(&self, state: &mut MarkdownState) -> Option<String> {
        state.link_title = false;
        state.link_href = false;
        state.link_text = false;
        state.em = None;
        state.strong = None;
        state.strikethrough = false;
        state.quote = 0;
        state.indented_code = false;
        if state.f == Step::HtmlBlock && state.html_state.as_ref().map_or(true, HtmlState::is_idle)
        {
            state.f = Step::InlineNormal;
            state.block = Step::BlockNormal;
            state.html_state = None;
        }
        state.trailing_space = 0;
        state.trailing_space_new_line = false;
        state.prev_line = std::mem::take(&mut state.this_line);
        None
    }

    fn indent(&self, state: &MarkdownState, text_after: &str) -> Option<usize> {
        if state.block == Step::HtmlBlock {
            let html = state.html_state.clone().unwrap_or_default();
            return self.html.indent(&html, text_after);
        }
        state
            .local
            .as_ref()
            .and_then(|local| local.grammar.indent(&*local.state, text_after))
    }

    fn inner_mode<'s>(&'s self, state: &'s MarkdownState) -> Option<InnerModeRef<'s>> {
        if state.block == Step::HtmlBlock {
            if let Some(html) = &state.html_state {
                return Some(InnerModeRef {
                    name: "html",
                    state: html,
                });
            }
        }
        state.local.as_ref().map(|local| InnerModeRef {
            name: local.grammar.name(),
            state: &*local.state,
        })
    }
}

/// A thematic break: three or more of the same `*`, `-` or `_`, spaces allowed
fn is_hr_line(rest: &str) -> bool {
    let mut chars = rest.chars().filter(|c| !c.is_whitespace());
    let Some(first) = chars.next() else {
        return false;
    };
    if !matches!(first, '*' | '-' | '_') {
        return false;
    }
    let mut count = 1;
    for c in chars {
        if c != first {
            return false;
        }
        count += 1;
    }
    count >= 3 && rest.starts_with(first)
}

/// Length of a closing fence at the start of `rest`, if there is one
fn fence_end_len(rest: &str, fence: &str, at_sol: bool) -> Option<usize> {
    let ch = fence.chars().next()?;
    let lead = if at_sol {
        rest.len() - rest.trim_start_matches(' ').len()
    } else {
        0
    };
    if lead > 3 {
        return None;
    }
    let body = &rest[lead..];
    let run = body.len() - body.trim_start_matches(ch).len();
    if run < fence.len() || !body[run..].chars().all(|c| c == ' ') {
        return None;
    }
    Some(rest.len())
}

/// Length of a link title after a footnote URL line, through the closing char
fn scan_link_title(rest: &str, end: char) -> Option<usize> {
    let lead = text::leading_ws_len(rest);
    let mut chars = rest[lead..].char_indices();
    let mut seen = false;
    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            seen = true;
        } else if c == end {
            return if seen { Some(lead + idx + c.len_utf8()) } else { None };
        } else {
            seen = true;
        }
    }
    None
}

/// Length of a link destination up to (not including) its closing char
fn scan_href(rest: &str, end: char) -> Option<usize> {
    let open = if end == ')' { '(' } else { '[' };
    let mut depth = 0usize;
    let mut chars = rest.char_indices();
    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == open {
            depth += 1;
        } else if c == end {
            if depth == 0 {
                return Some(idx);
            }
            depth -= 1;
        }
    }
    None
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || (!c.is_ascii() && !c.is_alphanumeric() && !c.is_whitespace())
}
