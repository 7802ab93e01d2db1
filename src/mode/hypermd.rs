//! HyperMD markdown mode
//!
//! Extends the base markdown grammar. Each token request goes through:
//! 1. a pending [`Override`] (sub-mode delegation or a split token's second
//!    half), if any
//! 2. front matter detection on the very first line
//! 3. extension probes in fixed order (math, custom link, highlight,
//!    subscript, superscript, org-mode markup, TOC, bare URLs, `<u>`,
//!    CDATA and processing instructions)
//! 4. the base grammar, with a one-token buffer so a token can be cut short
//!    at a character that may start an extension
//! 5. post-processing that decorates the base style (code blocks, headers,
//!    quotes, lists, link kinds, tables, hashtags)

use super::hashtag::{self, HashtagType};
use super::inner::{self, EnterOptions, ExitChecker, InnerMode, ModeSpec};
use super::markdown::{ListState, MarkdownMode, MarkdownState, Step};
use super::table::TableState;
use super::{style, DummyGrammar, Grammar, GrammarRegistry, InnerModeRef, Mode, StringStream};
use crate::config::ModeConfig;
use crate::error::{ModeError, ModeResult};
use crate::utils::{marker_id, text};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static MATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\${1,2}").unwrap());
static MATH_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\\]\$").unwrap());
static ORG_MODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\+(\w+:?)\s*").unwrap());
static TOC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\[TOCM?\]\s*$").unwrap());
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:(?:https?|ftps?)://|www\.)[^\s<>"'\[\]]+"#).unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap());
static QUOTE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}>").unwrap());
static CDATA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<(?:!\[CDATA\[|\?|![A-Za-z])").unwrap());

/// What kind of link-like construct the tokenizer is inside
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkType {
    #[default]
    None,
    /// `[text]`
    BareLink,
    /// `[^ref]`
    FootRef,
    /// `[text](url)` or `[text][ref]`
    Normal,
    /// `[^ref]: ...` or `[ref]: ...`
    Footnote,
    /// Right after a footnote definition's `]:`
    MaybeFootnoteUrl,
    /// `[text][]`
    BareLink2,
    /// `[^ref][]`
    FootRef2,
    CustomLink,
    HighlightText,
    Superscript,
    Subscript,
}

impl LinkType {
    /// Class put on every token of the link
    pub fn class(self) -> Option<&'static str> {
        match self {
            LinkType::BareLink => Some("hmd-barelink"),
            LinkType::FootRef => Some("hmd-footref"),
            LinkType::Footnote => Some("hmd-footnote line-HyperMD-footnote"),
            LinkType::BareLink2 => Some("hmd-barelink2"),
            LinkType::FootRef2 => Some("hmd-footref2"),
            _ => None,
        }
    }

    /// Link kinds introduced by `[` in the base grammar
    fn is_bracket_link(self) -> bool {
        matches!(
            self,
            LinkType::BareLink
                | LinkType::FootRef
                | LinkType::Normal
                | LinkType::Footnote
                | LinkType::BareLink2
                | LinkType::FootRef2
        )
    }

    /// Kinds that live exactly as long as a delegated region
    fn is_region(self) -> bool {
        matches!(
            self,
            LinkType::CustomLink | LinkType::HighlightText | LinkType::Superscript | LinkType::Subscript
        )
    }
}

/// Front matter detection progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NextMaybe {
    #[default]
    None,
    /// Nothing tokenized yet; a first line of `---` opens front matter
    FrontMatter,
    /// Inside front matter
    FrontMatterEnd,
}

/// Action that takes over the next token request
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Override {
    #[default]
    None,
    /// A delegated region; persists until its exit checker fires
    InnerMode(Box<InnerMode>),
    /// The char after a backslash, split off the escape token
    EscapedChar { len: usize, style: String },
    /// Whitespace after a quote marker
    QuoteIndent { len: usize, style: String },
    /// Everything up to the end of the line
    RestOfLine { style: String },
}

/// Rest of a base token that was cut short
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextToken {
    /// Where the base grammar ended the token
    pub pos: usize,
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HyperMdState {
    /// Base grammar state
    pub md: MarkdownState,

    pub table: TableState,
    pub link_type: LinkType,
    pub hashtag: HashtagType,
    pub pending: Override,
    pub next_maybe: NextMaybe,
    /// Buffered remainder of the last base token
    pub next: Option<NextToken>,
    /// Source of begin/end marker ids
    pub marker_seq: u64,
    /// Between `<u>` and `</u>`
    pub underline: bool,

    /// Line the tokenizer is on
    pub line: Option<usize>,
    /// List line classes already emitted for this line
    pub list_line_classed: bool,
}

impl HyperMdState {
    pub fn is_in_inner_mode(&self) -> bool {
        matches!(self.pending, Override::InnerMode(_))
    }
}

/// Base state bits the post-processing compares against
struct Before {
    in_html: bool,
    in_fence: bool,
    code: i32,
    indented_code: bool,
    link_text: bool,
    link_href: bool,
    setext: u8,
}

impl Before {
    fn of(md: &MarkdownState) -> Self {
        Self {
            in_html: md.is_in_html_block(),
            in_fence: md.is_in_fenced_code(),
            code: md.code,
            indented_code: md.indented_code,
            link_text: md.link_text,
            link_href: md.link_href,
            setext: md.setext,
        }
    }

    fn in_markdown(&self) -> bool {
        !(self.in_fence || self.in_html)
    }

    fn in_markdown_inline(&self) -> bool {
        self.in_markdown() && self.code == 0 && !self.indented_code && !self.link_href
    }
}

/// One delegated region opened by a probe
struct Region<'r> {
    grammar: Arc<dyn Grammar>,
    open_len: usize,
    end_tag: &'r str,
    inner_style: String,
    begin_style: String,
    end_style: Option<String>,
    link_type: LinkType,
}

#[derive(Debug, Clone)]
pub struct HyperMdMode {
    config: ModeConfig,
    md: MarkdownMode,
    math: Option<Arc<dyn Grammar>>,
    front_matter: Option<Arc<dyn Grammar>>,
    /// A char that may start an extension, not at the token start
    token_break: Option<Regex>,
}

fn dummy(end_tag: &str) -> Arc<dyn Grammar> {
    Arc::new(DummyGrammar::new(end_tag))
}

impl HyperMdMode {
    /// Build the mode, resolving every sub-grammar it may delegate to
    pub fn new(config: ModeConfig, registry: GrammarRegistry) -> ModeResult<Self> {
        if config.tab_size == 0 {
            return Err(ModeError::InvalidOption {
                key: "tab_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let math = if config.math {
            let fallback = config.math_fallback.then(|| dummy("$"));
            let spec = ModeSpec::Named(config.math_mode.clone());
            Some(inner::resolve_mode(&registry, &spec, fallback)?)
        } else {
            None
        };
        let front_matter = if config.front_matter {
            let fallback = config.front_matter_fallback.then(|| dummy("---"));
            let spec = ModeSpec::Named(config.front_matter_mode.clone());
            Some(inner::resolve_mode(&registry, &spec, fallback)?)
        } else {
            None
        };

        let mut breaks = Vec::new();
        if config.math {
            breaks.push(r"\$");
        }
        if config.table {
            breaks.push(r"\|");
        }
        if config.highlight {
            breaks.push("==");
        }
        if config.superscript {
            breaks.push(r"\^");
        }
        let token_break = if breaks.is_empty() {
            None
        } else {
            Regex::new(&format!(r"[^\\](?:{})", breaks.join("|"))).ok()
        };

        log::debug!(
            "hypermd mode: math={:?} front_matter={:?} table={} hashtag={}",
            math.as_ref().map(|g| g.name().to_string()),
            front_matter.as_ref().map(|g| g.name().to_string()),
            config.table,
            config.hashtag
        );

        let md = MarkdownMode::new(&config, registry);
        Ok(Self {
            config,
            md,
            math,
            front_matter,
            token_break,
        })
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    pub fn markdown(&self) -> &MarkdownMode {
        &self.md
    }

    fn begin_line(&self, stream: &StringStream<'_>, state: &mut HyperMdState) {
        state.line = Some(stream.line());
        state.list_line_classed = false;
        state.hashtag = HashtagType::None;
        state.next = None;
        if state.link_type == LinkType::MaybeFootnoteUrl {
            state.link_type = LinkType::None;
        }
        if state.table.is_active() {
            state.table.continue_row(stream.string());
        }
    }

    fn inner_token(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut HyperMdState,
        mut inner: Box<InnerMode>,
    ) -> Option<String> {
        let (style, exited) = inner::mode_override(stream, &mut inner);
        if exited {
            if inner.exit == ExitChecker::FrontMatterEnd {
                log::debug!("front matter ends at line {}", stream.line());
                state.next_maybe = NextMaybe::None;
            }
            if state.link_type.is_region() {
                state.link_type = LinkType::None;
            }
        } else {
            state.pending = Override::InnerMode(inner);
        }
        style
    }

    fn next_marker(state: &mut HyperMdState) -> String {
        let id = marker_id(state.marker_seq);
        state.marker_seq += 1;
        id
    }

    /// Enter a delimited region whose opener is at the stream position
    fn enter_region(
        &self,
        stream: &mut StringStream<'_>,
        state: &mut HyperMdState,
        region: Region<'_>,
    ) -> Option<String> {
        let mut opts = EnterOptions::end_tag(region.end_tag, Some(&region.inner_style));
        if let Some(end_style) = &region.end_style {
            opts = opts.with_exit_style(end_style);
        }
        let (inner, mut ans) = inner::enter_mode(stream, region.grammar, opts.skip_first_token());
        stream.pos += region.open_len;
        style::push(&mut ans, &region.begin_style);
        if region.link_type != LinkType::None {
            state.link_type = region.link_type;
        }
        state.pending = Override::InnerMode(Box::new(inner));
        style::finish(&ans)
    }

    /// Extension syntax at the current position, first match wins
    fn probe_extensions(&self, stream: &mut StringStream<'_>, state: &mut HyperMdState) -> Option<String> {
        let cfg = &self.config;
        let rest = stream.rest();

        if let Some(math) = &self.math {
            if let Some(delim) = stream.match_re(&MATH_RE, false).and_then(|c| c.get(0)) {
                let delim = delim.as_str();
                let level = delim.len();
                if level == 2 || MATH_CLOSE_RE.is_match(rest) {
                    return self.enter_region(
                        stream,
                        state,
                        Region {
                            grammar: Arc::clone(math),
                            open_len: level,
                            end_tag: delim,
                            inner_style: "math".to_string(),
                            begin_style: format!(
                                "formatting formatting-math formatting-math-begin math-{}",
                                level
                            ),
                            end_style: Some(format!(
                                "formatting formatting-math formatting-math-end math-{}",
                                level
                            )),
                            link_type: LinkType::None,
                        },
                    );
                }
            }
        }

        if cfg.custom_link && rest.starts_with("[[") && rest[2..].contains("]]") {
            let id = Self::next_marker(state);
            return self.enter_region(
                stream,
                state,
                Region {
                    grammar: dummy("]]"),
                    open_len: 2,
                    end_tag: "]]",
                    inner_style: "hmd-customlink".to_string(),
                    begin_style: format!(
                        "formatting formatting-customlink hmd-customlink-begin hmd-customlink-begin-{}",
                        id
                    ),
                    end_style: Some(format!(
                        "formatting formatting-customlink hmd-customlink-end hmd-customlink-end-{}",
                        id
                    )),
                    link_type: LinkType::CustomLink,
                },
            );
        }

        if cfg.highlight && opens_region(rest, "==") && has_closer(rest, "==") {
            let id = Self::next_marker(state);
            let mut inner_style = "hmd-highlight".to_string();
            if state.md.strong.is_some() {
                style::push(&mut inner_style, &self.md.types().strong);
            }
            if state.md.em.is_some() {
                style::push(&mut inner_style, &self.md.types().em);
            }
            return self.enter_region(
                stream,
                state,
                Region {
                    grammar: dummy("=="),
                    open_len: 2,
                    end_tag: "==",
                    inner_style,
                    begin_style: format!(
                        "formatting formatting-highlight hmd-highlight-begin hmd-highlight-begin-{}",
                        id
                    ),
                    end_style: Some(format!(
                        "formatting formatting-highlight hmd-highlight-end hmd-highlight-end-{}",
                        id
                    )),
                    link_type: LinkType::HighlightText,
                },
            );
        }

        let prev = text::char_before(stream.string(), stream.start);

        if cfg.subscript && opens_region(rest, "~") && prev != Some('~') && has_closer(rest, "~") {
            return self.enter_region(
                stream,
                state,
                Region {
                    grammar: dummy("~"),
                    open_len: 1,
                    end_tag: "~",
                    inner_style: "hmd-subscript".to_string(),
                    begin_style: "formatting formatting-subscript hmd-subscript-begin".to_string(),
                    end_style: Some("formatting formatting-subscript hmd-subscript-end".to_string()),
                    link_type: LinkType::Subscript,
                },
            );
        }

        if cfg.superscript && opens_region(rest, "^") && prev != Some('[') && has_closer(rest, "^") {
            return self.enter_region(
                stream,
                state,
                Region {
                    grammar: dummy("^"),
                    open_len: 1,
                    end_tag: "^",
                    inner_style: "hmd-superscript".to_string(),
                    begin_style: "formatting formatting-superscript hmd-superscript-begin"
                        .to_string(),
                    end_style: Some(
                        "formatting formatting-superscript hmd-superscript-end".to_string(),
                    ),
                    link_type: LinkType::Superscript,
                },
            );
        }

        if cfg.org_mode_markup && stream.start == 0 && stream.match_re(&ORG_MODE_RE, true).is_some() {
            if !stream.eol() {
                state.pending = Override::RestOfLine {
                    style: "string hmd-orgmode-markup".to_string(),
                };
            }
            return Some("meta formatting-hmd-orgmode-markup hmd-orgmode-markup".to_string());
        }

        if cfg.toc && stream.start == 0 && stream.match_re(&TOC_RE, true).is_some() {
            return Some("meta line-HyperMD-toc hmd-toc".to_string());
        }

        let md = &state.md;
        if cfg.autolink
            && state.link_type == LinkType::None
            && !md.link_text
            && !md.link_href
            && !md.image
            && prev.map_or(true, |c| !(c.is_alphanumeric() || matches!(c, '_' | '/' | '@' | '.')))
        {
            if let Some(len) = autolink_len(rest) {
                stream.pos += len;
                state.md.formatting.clear();
                let mut ans = self.md.get_type(&state.md).unwrap_or_default();
                style::push(&mut ans, "url");
                return style::finish(&ans);
            }
        }

        if stream.match_str("<u>", true) {
            state.underline = true;
            return Some("formatting formatting-underline hmd-underline-begin".to_string());
        }
        if stream.match_str("</u>", true) {
            state.underline = false;
            return Some("formatting formatting-underline hmd-underline-end".to_string());
        }

        if let Some(opener) = stream.match_re(&CDATA_RE, false).and_then(|c| c.get(0)) {
            let (open_len, end_tag) = match opener.as_str() {
                "<![CDATA[" => (9, "]]>"),
                "<?" => (2, "?>"),
                _ => (2, ">"),
            };
            return self.enter_region(
                stream,
                state,
                Region {
                    grammar: dummy(end_tag),
                    open_len,
                    end_tag,
                    inner_style: "comment hmd-cdata-html".to_string(),
                    begin_style: String::new(),
                    end_style: None,
                    link_type: LinkType::None,
                },
            );
        }

        None
    }

    /// Offset inside `current` where the token should be cut
    fn token_break_at(&self, current: &str) -> Option<usize> {
        let re = self.token_break.as_ref()?;
        let m = re.find(current)?;
        let first = m.as_str().chars().next()?;
        Some(m.start() + first.len_utf8())
    }

    fn classify_link(
        &self,
        stream: &StringStream<'_>,
        state: &mut HyperMdState,
        before: &Before,
        ans: &mut String,
    ) {
        if !before.link_text && state.md.link_text && style::has_class(ans, "formatting-link") {
            state.link_type = link_type_at(stream.string(), stream.pos);
        }
        let link_type = state.link_type;
        if link_type == LinkType::MaybeFootnoteUrl {
            if style::has_class(ans, "url") {
                style::push(ans, "hmd-footnote-url");
                state.link_type = LinkType::None;
            } else if !text::is_blank(stream.current()) {
                state.link_type = LinkType::None;
            }
        } else if link_type.is_bracket_link() {
            let md = &state.md;
            let in_link = before.link_text || before.link_href || md.link_text || md.link_href;
            if in_link {
                if let Some(class) = link_type.class() {
                    style::push(ans, class);
                }
            }
            if !md.link_text && !md.link_href && md.f != Step::LinkHref {
                state.link_type = if link_type == LinkType::Footnote {
                    LinkType::MaybeFootnoteUrl
                } else {
                    LinkType::None
                };
            }
        }
    }

    fn decorate_list(&self, stream: &StringStream<'_>, state: &mut HyperMdState, ans: &mut String) {
        let md = &state.md;
        if md.list == ListState::NotList {
            return;
        }
        let current = stream.current();
        if stream.start == 0 && ans.is_empty() && text::is_blank(current) {
            let levels = md
                .list_stack
                .iter()
                .filter(|&&threshold| threshold <= md.indentation)
                .count();
            if levels > 0 {
                style::push(ans, &format!("hmd-list-indent hmd-list-indent-{}", levels));
            }
        } else if !state.list_line_classed && !text::is_blank(current) {
            let depth = md.list_stack.len();
            if style::has_class(ans, "formatting-list") {
                style::push(
                    ans,
                    &format!("line-HyperMD-list-line line-HyperMD-list-line-{}", depth),
                );
            } else {
                style::push(
                    ans,
                    &format!(
                        "line-HyperMD-list-line line-HyperMD-list-line-nobullet line-HyperMD-list-line-{}",
                        depth
                    ),
                );
            }
            state.list_line_classed = true;
        }
    }

    fn decorate_quote(&self, stream: &mut StringStream<'_>, state: &mut HyperMdState, ans: &mut String) {
        let level = state.md.quote;
        if level == 0 {
            return;
        }
        let line_classes = format!("line-HyperMD-quote line-HyperMD-quote-{}", level);
        style::push(ans, &line_classes);
        if !QUOTE_LINE_RE.is_match(stream.string()) {
            style::push(ans, "line-HyperMD-quote-lazy");
        }
        if style::has_class(ans, "formatting-quote") && state.pending == Override::None {
            let current = stream.current();
            let trailing = &current[current.trim_end().len()..];
            let mut spaces = trailing.chars();
            let first = spaces.next().map_or(0, char::len_utf8);
            if spaces.next().is_some() {
                let extra = trailing.len() - first;
                stream.back_up(extra);
                state.pending = Override::QuoteIndent {
                    len: extra,
                    style: format!("hmd-indent-in-quote {}", line_classes),
                };
            }
        }
    }
}

impl Mode for HyperMdMode {
    type State = HyperMdState;

    fn name(&self) -> &str {
        "hypermd"
    }

    fn start_state(&self) -> HyperMdState {
        HyperMdState {
            md: self.md.start_state(),
            table: TableState::default(),
            link_type: LinkType::None,
            hashtag: HashtagType::None,
            pending: Override::None,
            next_maybe: if self.front_matter.is_some() {
                NextMaybe::FrontMatter
            } else {
                NextMaybe::None
            },
            next: None,
            marker_seq: 0,
            underline: false,
            line: None,
            list_line_classed: false,
        }
    }

    fn token(&self, stream: &mut StringStream<'_>, state: &mut HyperMdState) -> Option<String> {
        if state.line != Some(stream.line()) {
            self.begin_line(stream, state);
        }

        match std::mem::take(&mut state.pending) {
            Override::None => {}
            Override::InnerMode(inner) => return self.inner_token(stream, state, inner),
            Override::EscapedChar { len, style } | Override::QuoteIndent { len, style } => {
                stream.set_pos(stream.start + len);
                return style::finish(&style);
            }
            Override::RestOfLine { style } => {
                stream.skip_to_end();
                return Some(style);
            }
        }

        if state.next_maybe == NextMaybe::FrontMatter {
            state.next_maybe = NextMaybe::None;
            if let Some(grammar) = &self.front_matter {
                if stream.start == 0 && stream.string() == "---" {
                    log::debug!("front matter starts at line {}", stream.line());
                    state.next_maybe = NextMaybe::FrontMatterEnd;
                    let opts = EnterOptions {
                        exit: ExitChecker::FrontMatterEnd,
                        style: Some("hmd-frontmatter".to_string()),
                        skip_first_token: false,
                    };
                    let (inner, ans) = inner::enter_mode(stream, Arc::clone(grammar), opts);
                    state.pending = Override::InnerMode(Box::new(inner));
                    return style::finish(&ans);
                }
            }
        }

        let before = Before::of(&state.md);
        let in_markdown = before.in_markdown();
        let in_markdown_inline = before.in_markdown_inline();

        if in_markdown_inline {
            if let Some(ans) = self.probe_extensions(stream, state) {
                state.next = None;
                return Some(ans);
            }
        }

        let mut ans = match state.next.take() {
            Some(next) => {
                stream.set_pos(next.pos);
                next.style.unwrap_or_default()
            }
            None => {
                let mut ans = self.md.token(stream, &mut state.md).unwrap_or_default();
                if state.md.indented_code && state.md.list != ListState::NotList {
                    // indented text inside a list item stays text
                    state.md.indented_code = false;
                    state.md.f = Step::InlineNormal;
                    state.md.inline = Step::InlineNormal;
                    stream.pos = stream.start;
                    ans = self.md.token(stream, &mut state.md).unwrap_or_default();
                }
                ans
            }
        };

        if in_markdown_inline
            && stream.current().len() > 1
            && state.md.code == 0
            && !style::has_class(&ans, "formatting")
            && !style::has_class(&ans, "url")
        {
            let cut = if self.config.table && stream.current().starts_with('|') {
                Some(1)
            } else {
                self.token_break_at(stream.current())
            };
            if let Some(at) = cut {
                state.next = Some(NextToken {
                    pos: stream.pos,
                    style: style::finish(&ans),
                });
                stream.pos = stream.start + at;
            }
        }

        if style::has_class(&ans, "formatting-escape") && stream.current().len() > 1 {
            let escaped_len = stream.current().len() - 1;
            let escaped_style = format!(
                "{} hmd-escape-char",
                ans.replace("formatting-escape", "escape")
            );
            state.pending = Override::EscapedChar {
                len: escaped_len,
                style: escaped_style,
            };
            style::push(&mut ans, "hmd-escape-backslash");
            stream.back_up(escaped_len);
        }

        let now_html = state.md.is_in_html_block();
        if !before.in_html && now_html {
            style::push(&mut ans, "hmd-html-begin");
        } else if before.in_html && !now_html {
            style::push(&mut ans, "hmd-html-end");
        }

        if style::has_class(&ans, "formatting-code-block") {
            style::push(
                &mut ans,
                "line-HyperMD-codeblock line-background-HyperMD-codeblock-bg",
            );
            if state.md.is_in_fenced_code() {
                style::push(
                    &mut ans,
                    "line-HyperMD-codeblock-begin line-background-HyperMD-codeblock-begin-bg",
                );
            } else {
                style::push(
                    &mut ans,
                    "line-HyperMD-codeblock-end line-background-HyperMD-codeblock-end-bg",
                );
            }
        } else if state.md.is_in_fenced_code() {
            style::push(
                &mut ans,
                "line-HyperMD-codeblock line-background-HyperMD-codeblock-bg",
            );
        }

        if in_markdown {
            if state.md.header != 0 {
                style::push(
                    &mut ans,
                    &format!(
                        "line-HyperMD-header line-HyperMD-header-{}",
                        state.md.header
                    ),
                );
            }
            if before.setext != 0 && state.md.setext == 0 {
                style::push(
                    &mut ans,
                    &format!(
                        "line-HyperMD-header-line line-HyperMD-header-line-{}",
                        before.setext
                    ),
                );
            }
            if state.md.indented_code && !ans.is_empty() {
                style::push(&mut ans, "hmd-indented-code");
            }
            self.decorate_quote(stream, state, &mut ans);
            self.decorate_list(stream, state, &mut ans);
            self.classify_link(stream, state, &before, &mut ans);
        }

        if self.config.table && in_markdown_inline {
            let current = stream.current();
            if current == "|" && !style::has_class(&ans, "formatting") {
                if !state.table.is_active() {
                    if let Some(table) = TableState::detect(stream) {
                        state.table = table;
                    }
                }
                if state.table.is_active() {
                    let sep = state.table.separator_style(stream);
                    style::push(&mut ans, &sep);
                    style::push(&mut ans, &state.table.line_style());
                }
            } else if state.table.is_active() && !text::is_blank(current) {
                if let Some(cell) = state.table.cell_style() {
                    style::push(&mut ans, &cell);
                }
            }
        }

        if self.config.hashtag && in_markdown_inline {
            let can_begin = !state.md.link_text && !state.md.image;
            hashtag::process(
                &mut state.hashtag,
                stream,
                &mut ans,
                can_begin,
                &self.config.token_type_overrides.hashtag,
            );
        }

        if state.underline {
            style::push(&mut ans, "hmd-underline");
        }

        style::finish(&ans)
    }

    fn blank_line(&self, state: &mut HyperMdState) -> Option<String> {
        let mut ans = match &mut state.pending {
            Override::InnerMode(inner) => inner.grammar.blank_line(&mut *inner.state).unwrap_or_default(),
            _ => {
                state.pending = Override::None;
                if state.next_maybe == NextMaybe::FrontMatter {
                    state.next_maybe = NextMaybe::None;
                }
                state.next = None;
                state.hashtag = HashtagType::None;
                state.underline = false;
                if state.link_type.is_bracket_link() || state.link_type == LinkType::MaybeFootnoteUrl {
                    state.link_type = LinkType::None;
                }
                self.md.blank_line(&mut state.md).unwrap_or_default()
            }
        };
        if state.md.is_in_fenced_code() {
            style::push(
                &mut ans,
                "line-HyperMD-codeblock line-background-HyperMD-codeblock-bg",
            );
        }
        if state.table.is_active() {
            log::trace!("table {:?} ends at a blank line", state.table.id);
            state.table.reset();
        }
        style::finish(&ans)
    }

    fn indent(&self, state: &HyperMdState, text_after: &str) -> Option<usize> {
        match &state.pending {
            Override::InnerMode(inner) => inner.grammar.indent(&*inner.state, text_after),
            _ => self.md.indent(&state.md, text_after),
        }
    }

    fn inner_mode<'s>(&'s self, state: &'s HyperMdState) -> Option<InnerModeRef<'s>> {
        match &state.pending {
            Override::InnerMode(inner) => Some(InnerModeRef {
                name: inner.grammar.name(),
                state: &*inner.state,
            }),
            _ => self.md.inner_mode(&state.md),
        }
    }
}

/// `marker` at the start of `rest`, not doubled and not followed by space
fn opens_region(rest: &str, marker: &str) -> bool {
    let Some(after) = rest.strip_prefix(marker) else {
        return false;
    };
    let first = marker.chars().next();
    match after.chars().next() {
        None => false,
        Some(c) => !c.is_whitespace() && Some(c) != first,
    }
}

/// An unescaped `marker` somewhere after the opening one
fn has_closer(rest: &str, marker: &str) -> bool {
    let body = &rest[marker.len()..];
    let mut search = 0;
    while let Some(found) = body[search..].find(marker) {
        let at = search + found;
        if at > 0 && !body[..at].ends_with('\\') {
            return true;
        }
        search = at + marker.len();
    }
    false
}

/// Length of a bare URL or email at the start of `rest`
fn autolink_len(rest: &str) -> Option<usize> {
    if let Some(m) = URL_RE.find(rest) {
        let url = m.as_str().trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'));
        let scheme_only = url.ends_with("://") || url == "www.";
        if !url.is_empty() && !scheme_only {
            return Some(url.len());
        }
    }
    EMAIL_RE.find(rest).map(|m| m.end())
}

/// Kind of link whose text starts at `pos` (just after `[`)
fn link_type_at(line: &str, pos: usize) -> LinkType {
    let rest = &line[pos..];
    let mut depth = 0usize;
    let mut close = None;
    let mut chars = rest.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' => depth += 1,
            ']' if depth == 0 => {
                close = Some(idx);
                break;
            }
            ']' => depth -= 1,
            _ => {}
        }
    }
    let Some(close) = close else {
        return LinkType::BareLink;
    };
    let footnote = rest.starts_with('^');
    let after = &rest[close + 1..];
    if after.starts_with(':') {
        LinkType::Footnote
    } else if after.starts_with('(') {
        LinkType::Normal
    } else if after.starts_with("[]") {
        if footnote {
            LinkType::FootRef2
        } else {
            LinkType::BareLink2
        }
    } else if after.starts_with('[') {
        LinkType::Normal
    } else if footnote {
        LinkType::FootRef
    } else {
        LinkType::BareLink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{run_lines, ColumnAlign, TableType};

    type Tok = (String, Option<String>);

    fn mode_with(f: impl FnOnce(&mut ModeConfig)) -> HyperMdMode {
        let mut config = ModeConfig::default();
        f(&mut config);
        HyperMdMode::new(config, GrammarRegistry::with_defaults()).unwrap()
    }

    fn mode() -> HyperMdMode {
        mode_with(|_| {})
    }

    /// Tokens of every line with the state after each token
    fn run_with_states(mode: &HyperMdMode, lines: &[&str]) -> Vec<Vec<(Tok, HyperMdState)>> {
        let sources: Vec<&str> = lines.to_vec();
        let mut state = mode.start_state();
        let mut out = Vec::new();
        for (n, line) in lines.iter().enumerate() {
            let mut tokens = Vec::new();
            if line.is_empty() {
                mode.blank_line(&mut state);
            }
            let mut stream = StringStream::new(line, n, 4).with_lines(&sources);
            while !stream.eol() {
                stream.start = stream.pos;
                let style = mode.token(&mut stream, &mut state);
                assert!(stream.pos > stream.start);
                tokens.push(((stream.current().to_string(), style), state.clone()));
            }
            out.push(tokens);
        }
        out
    }

    fn texts(line: &[Tok]) -> Vec<&str> {
        line.iter().map(|(t, _)| t.as_str()).collect()
    }

    fn style_of<'t>(line: &'t [Tok], idx: usize) -> &'t str {
        line[idx].1.as_deref().unwrap_or("")
    }

    #[test]
    fn test_math_round_trip() {
        let out = run_with_states(&mode(), &["a $x+y$ b"]);
        let line = &out[0];
        let toks: Vec<Tok> = line.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(texts(&toks), vec!["a", " ", "$", "x", "+", "y", "$", " ", "b"]);

        assert!(style_of(&toks, 2).contains("formatting-math-begin"));
        assert!(style_of(&toks, 3).contains("math"));
        assert!(style_of(&toks, 6).contains("formatting-math-end"));
        assert_eq!(toks[7].1, None);
        assert_eq!(toks[8].1, None);

        // host block state is untouched by the math region
        let before_math = &line[1].1;
        let after_math = &line[6].1;
        assert_eq!(before_math.md, after_math.md);
        assert!(line[2].1.is_in_inner_mode());
        assert!(!after_math.is_in_inner_mode());
    }

    #[test]
    fn test_single_dollar_needs_closer() {
        let out = run_lines(&mode(), &["costs $5"]);
        assert!(out[0]
            .iter()
            .all(|(_, s)| !s.as_deref().unwrap_or("").contains("math")));
    }

    #[test]
    fn test_custom_link_ids_match() {
        let out = run_lines(&mode(), &["[[term]] and [[other]]"]);
        let line = &out[0];
        assert_eq!(line[0].0, "[[");
        assert_eq!(line[1].0, "term");
        assert_eq!(line[2].0, "]]");
        let begin = style::class_suffix(style_of(line, 0), "hmd-customlink-begin-").unwrap();
        let end = style::class_suffix(style_of(line, 2), "hmd-customlink-end-").unwrap();
        assert_eq!(begin, end);
        assert_eq!(begin.len(), crate::utils::MARKER_ID_LEN);

        let second = line
            .iter()
            .find_map(|(_, s)| {
                s.as_deref()
                    .and_then(|s| style::class_suffix(s, "hmd-customlink-begin-"))
                    .filter(|id| *id != begin)
            })
            .unwrap();
        assert_ne!(second, begin);
    }

    #[test]
    fn test_highlight_mirrors_strong() {
        let out = run_lines(&mode(), &["**a ==b== c**"]);
        let line = &out[0];
        let inner = line.iter().find(|(t, _)| t == "b").unwrap();
        let style = inner.1.as_deref().unwrap();
        assert!(style::has_class(style, "hmd-highlight"));
        assert!(style::has_class(style, "strong"));
    }

    #[test]
    fn test_sub_and_superscript() {
        let out = run_lines(&mode(), &["H~2~O and x^2^ and ~~gone~~"]);
        let line = &out[0];
        let sub = line.iter().find(|(t, _)| t == "2").unwrap();
        assert!(sub.1.as_deref().unwrap().contains("hmd-subscript"));
        assert!(line
            .iter()
            .any(|(_, s)| s.as_deref().unwrap_or("").contains("hmd-superscript-begin")));
        let gone = line.iter().find(|(t, _)| t == "gone").unwrap();
        assert!(style::has_class(gone.1.as_deref().unwrap(), "strikethrough"));
    }

    #[test]
    fn test_footnote_ref_is_not_superscript() {
        let out = run_lines(&mode(), &["see [^1] and [^2]"]);
        assert!(out[0]
            .iter()
            .all(|(_, s)| !s.as_deref().unwrap_or("").contains("hmd-superscript")));
        assert!(out[0]
            .iter()
            .any(|(_, s)| s.as_deref().unwrap_or("").contains("hmd-footref")));
    }

    #[test]
    fn test_hashtag_rules() {
        let m = mode_with(|c| c.hashtag = true);

        let out = run_with_states(&m, &["#123"]);
        assert!(out[0].iter().all(|((_, s), st)| {
            st.hashtag == HashtagType::None && !s.as_deref().unwrap_or("").contains("hmd-hashtag")
        }));

        let out = run_with_states(&m, &["#tag1 rest"]);
        let line = &out[0];
        assert!(line[0].0 .1.as_deref().unwrap().contains("hmd-hashtag-begin"));
        assert_eq!(line[0].1.hashtag, HashtagType::Normal);
        assert_eq!(line[1].0 .0, "tag1");
        assert!(line[1].0 .1.as_deref().unwrap().contains("hmd-hashtag-end"));
        assert_eq!(line[1].1.hashtag, HashtagType::None);

        let out = run_with_states(&m, &["#multi word# after"]);
        let line = &out[0];
        assert_eq!(line[0].1.hashtag, HashtagType::WithSpace);
        let close = 1 + line[1..].iter().position(|((t, _), _)| t == "#").unwrap();
        let ((_, style), state) = &line[close];
        assert!(style.as_deref().unwrap().contains("hmd-hashtag-end"));
        assert_eq!(state.hashtag, HashtagType::None);
        let consumed: usize = line[..=close].iter().map(|((t, _), _)| t.len()).sum();
        assert_eq!(consumed, "#multi word#".len());
    }

    #[test]
    fn test_table_requires_alignment_row() {
        let out = run_with_states(&mode(), &["a | b", "c"]);
        assert!(out[0].iter().all(|(_, st)| !st.table.is_active()));

        let out = run_with_states(&mode(), &["a | b", "---|---"]);
        let (_, state) = out[0].last().unwrap();
        assert_eq!(state.table.kind, TableType::Simple);
        assert_eq!(state.table.columns, vec![ColumnAlign::Default; 2]);
        let sep = out[0].iter().find(|((t, _), _)| t == "|").unwrap();
        let style = sep.0 .1.as_deref().unwrap();
        assert!(style.contains("hmd-table-sep hmd-table-sep-0"));
        assert!(style.contains("line-HyperMD-table_T0"));
        assert_eq!(out[1].last().unwrap().1.table.row, 1);
    }

    #[test]
    fn test_compact_normal_table() {
        let out = run_with_states(&mode(), &["|a|b|", "|--|--|", "|1|2|"]);
        let row0: Vec<Tok> = out[0].iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(texts(&row0), vec!["|", "a", "|", "b", "|"]);
        assert!(style_of(&row0, 0).contains("hmd-table-sep-dummy"));
        assert!(style_of(&row0, 1).contains("hmd-table-column-0"));
        assert!(style_of(&row0, 2).contains("hmd-table-sep hmd-table-sep-0"));
        assert!(style_of(&row0, 3).contains("hmd-table-column-1"));
        assert!(style_of(&row0, 0).contains("line-HyperMD-table-2"));
        assert_eq!(out[0][0].1.table.kind, TableType::Normal);
        assert_eq!(out[0][0].1.table.id.as_deref(), Some("T0"));

        let row1: Vec<Tok> = out[1].iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(texts(&row1), vec!["|", "--", "|", "--", "|"]);

        let row2: Vec<Tok> = out[2].iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(texts(&row2), vec!["|", "1", "|", "2", "|"]);
        assert!(style_of(&row2, 1).contains("hmd-table-column-0"));
        assert!(style_of(&row2, 3).contains("hmd-table-column-1"));
        let (_, last) = out[2].last().unwrap();
        assert_eq!(last.table.row, 2);
        assert_eq!(last.table.col, 2);
    }

    #[test]
    fn test_token_break_with_adjacent_triggers() {
        let out = run_lines(&mode(), &["a$|b"]);
        assert_eq!(texts(&out[0]), vec!["a", "$", "|", "b"]);

        let out = run_lines(&mode(), &["$a$|b"]);
        assert_eq!(texts(&out[0]), vec!["$", "a", "$", "|", "b"]);
        assert!(style_of(&out[0], 2).contains("formatting-math-end"));

        let out = run_lines(&mode(), &["x\\$|y"]);
        assert!(out[0].iter().all(|(_, s)| !s.as_deref().unwrap_or("").contains("math")));
    }

    #[test]
    fn test_escape_split() {
        let out = run_lines(&mode(), &["\\*a"]);
        let line = &out[0];
        assert_eq!(line[0].0, "\\");
        assert!(style_of(line, 0).contains("hmd-escape-backslash"));
        assert_eq!(line[1].0, "*");
        assert_eq!(style_of(line, 1), "escape hmd-escape-char");
    }

    #[test]
    fn test_front_matter() {
        let m = mode();
        let lines = ["---", "title: x", "---", "# H"];
        let out = run_with_states(&m, &lines);
        assert!(out[0][0].0 .1.as_deref().unwrap().contains("hmd-frontmatter"));
        assert!(out[1][0].0 .1.as_deref().unwrap().contains("hmd-frontmatter"));
        let (_, after) = out[2].last().unwrap();
        assert!(!after.is_in_inner_mode());
        assert_eq!(after.next_maybe, NextMaybe::None);
        let header = out[3][0].0 .1.as_deref().unwrap();
        assert!(header.contains("line-HyperMD-header-1"));
    }

    #[test]
    fn test_front_matter_only_on_first_line() {
        let out = run_with_states(&mode(), &["text", "---", "a: b"]);
        assert!(out
            .iter()
            .flatten()
            .all(|((_, s), _)| !s.as_deref().unwrap_or("").contains("hmd-frontmatter")));
    }

    #[test]
    fn test_org_mode_and_toc() {
        let out = run_lines(&mode(), &["#+TITLE: Notes", "[TOC]"]);
        assert!(style_of(&out[0], 0).contains("hmd-orgmode-markup"));
        assert_eq!(out[0][1], ("Notes".to_string(), Some("string hmd-orgmode-markup".to_string())));
        assert_eq!(out[1].len(), 1);
        assert!(style_of(&out[1], 0).contains("hmd-toc"));
    }

    #[test]
    fn test_autolink() {
        let out = run_lines(&mode(), &["see https://example.com/x. ok"]);
        let url = out[0].iter().find(|(t, _)| t == "https://example.com/x").unwrap();
        assert!(style::has_class(url.1.as_deref().unwrap(), "url"));
    }

    #[test]
    fn test_link_types() {
        let out = run_lines(&mode(), &["[foo] and [^1] and [x](y)"]);
        let line = &out[0];
        assert!(style_of(line, 0).contains("hmd-barelink"));
        assert!(line
            .iter()
            .any(|(_, s)| s.as_deref().unwrap_or("").contains("hmd-footref")));
        let x = line.iter().find(|(t, _)| t == "x").unwrap();
        assert!(!x.1.as_deref().unwrap().contains("hmd-barelink"));

        let out = run_lines(&mode(), &["[^1]: http://a.b"]);
        let url = out[0].iter().find(|(t, _)| t == "http://a.b").unwrap();
        assert!(url.1.as_deref().unwrap().contains("hmd-footnote-url"));
        assert!(style_of(&out[0], 0).contains("line-HyperMD-footnote"));
    }

    #[test]
    fn test_line_decorations() {
        let out = run_lines(
            &mode(),
            &["> a", "lazy", "", "- item", "  more", "", "```", "code", "```"],
        );
        assert!(style_of(&out[0], 0).contains("line-HyperMD-quote-1"));
        assert!(style_of(&out[1], 0).contains("line-HyperMD-quote-lazy"));
        assert!(style_of(&out[3], 0).contains("line-HyperMD-list-line-1"));
        assert!(style_of(&out[4], 0).contains("hmd-list-indent-1"));
        assert!(out[4]
            .iter()
            .any(|(_, s)| s.as_deref().unwrap_or("").contains("line-HyperMD-list-line-nobullet")));
        assert!(style_of(&out[6], 0).contains("line-HyperMD-codeblock-begin"));
        assert!(style_of(&out[7], 0).contains("line-HyperMD-codeblock"));
        assert!(style_of(&out[8], 0).contains("line-HyperMD-codeblock-end"));
    }

    #[test]
    fn test_quote_indent_split() {
        let out = run_lines(&mode(), &[">   deep"]);
        let line = &out[0];
        assert_eq!(line[0].0, "> ");
        assert_eq!(line[1].0, "  ");
        assert!(style_of(line, 1).contains("hmd-indent-in-quote"));

        let out = run_lines(&mode(), &[">\u{a0}\u{a0}quoted", ">\u{3000}\u{3000}\u{3000}x"]);
        assert_eq!(out[0][0].0, ">\u{a0}");
        assert_eq!(out[0][1].0, "\u{a0}");
        assert!(style_of(&out[0], 1).contains("hmd-indent-in-quote"));
        assert_eq!(out[1][1].0, "\u{3000}\u{3000}");
        let joined: String = out[1].iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(joined, ">\u{3000}\u{3000}\u{3000}x");
    }

    #[test]
    fn test_html_boundaries_and_cdata() {
        let out = run_lines(&mode(), &["<b>x</b> <!DOCTYPE html> <u>under</u>"]);
        let line = &out[0];
        assert!(style_of(line, 0).contains("hmd-html-begin"));
        assert!(line
            .iter()
            .any(|(_, s)| s.as_deref().unwrap_or("").contains("hmd-html-end")));
        assert!(line
            .iter()
            .any(|(t, s)| t == "<!" && s.as_deref() == Some("comment hmd-cdata-html")));
        let under = line.iter().find(|(t, _)| t == "under").unwrap();
        assert!(under.1.as_deref().unwrap().contains("hmd-underline"));
    }

    #[test]
    fn test_tokenizing_is_idempotent() {
        let m = mode_with(|c| c.hashtag = true);
        let lines = [
            "---",
            "k: v",
            "---",
            "# Title $x$",
            "- [ ] task **b** ==h== [[link]]",
            "a | b",
            "---|---",
            "1 | 2",
            "",
            "> quote #tag",
        ];
        let first = run_with_states(&m, &lines);
        let second = run_with_states(&m, &lines);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolved_mode_is_an_error() {
        let mut config = ModeConfig::default();
        config.math_mode = "asciimath".to_string();
        config.math_fallback = false;
        let err = HyperMdMode::new(config, GrammarRegistry::with_defaults()).unwrap_err();
        assert_eq!(
            err,
            ModeError::UnresolvedMode {
                name: "asciimath".to_string()
            }
        );

        let mut config = ModeConfig::default();
        config.math_mode = "asciimath".to_string();
        assert!(HyperMdMode::new(config, GrammarRegistry::with_defaults()).is_ok());
    }

    #[test]
    fn test_link_type_at() {
        assert_eq!(link_type_at("[a]", 1), LinkType::BareLink);
        assert_eq!(link_type_at("[a](b)", 1), LinkType::Normal);
        assert_eq!(link_type_at("[a][]", 1), LinkType::BareLink2);
        assert_eq!(link_type_at("[^a][]", 1), LinkType::FootRef2);
        assert_eq!(link_type_at("[^a]: x", 1), LinkType::Footnote);
    }
}
