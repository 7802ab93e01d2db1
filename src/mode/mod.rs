//! Tokenizer modes
//!
//! A mode turns one line at a time into styled tokens while carrying a
//! per-line state forward:
//! - `Mode`: the interface the host editor drives (start/copy/token/blank
//!   line/indent/inner mode)
//! - `Grammar`: the object-safe capability every pluggable sub-grammar
//!   implements so it can be delegated to at runtime
//! - `GrammarRegistry`: name to grammar lookup
//!
//! Styles are space separated class strings. Classes prefixed with `line-`
//! (or `line-background-`) belong to the whole line rather than the token.

pub mod grammars;
pub mod hashtag;
pub mod hypermd;
pub mod inner;
pub mod markdown;
pub mod stream;
pub mod table;

pub use grammars::{DummyGrammar, HtmlGrammar, HtmlState, TexGrammar, YamlGrammar};
pub use hashtag::HashtagType;
pub use hypermd::{HyperMdMode, HyperMdState, LinkType, NextMaybe, Override};
pub use inner::{ExitChecker, ExitInfo, InnerMode, ModeSpec};
pub use markdown::{ListState, MarkdownMode, MarkdownState};
pub use stream::{LineSource, StringStream};
pub use table::{ColumnAlign, TableType};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tokenizer interface driven by the host editor
pub trait Mode {
    type State: Clone + fmt::Debug;

    fn name(&self) -> &str;

    /// State at the start of a document
    fn start_state(&self) -> Self::State;

    /// Independent copy of `state` (nested sub-grammar state included)
    fn copy_state(&self, state: &Self::State) -> Self::State {
        state.clone()
    }

    /// Consume one token from `stream`, returning its style
    fn token(&self, stream: &mut StringStream<'_>, state: &mut Self::State) -> Option<String>;

    /// Called instead of `token` for lines with no non-whitespace text
    fn blank_line(&self, _state: &mut Self::State) -> Option<String> {
        None
    }

    /// Suggested indentation for a new line; `None` means "no opinion"
    fn indent(&self, _state: &Self::State, _text_after: &str) -> Option<usize> {
        None
    }

    /// The grammar currently doing the work, if it is not this mode itself
    fn inner_mode<'s>(&'s self, _state: &'s Self::State) -> Option<InnerModeRef<'s>> {
        None
    }
}

/// Borrowed view of an active inner grammar
#[derive(Debug)]
pub struct InnerModeRef<'s> {
    pub name: &'s str,
    pub state: &'s dyn GrammarState,
}

/// State of a pluggable grammar, boxed so grammars of any shape can nest
pub trait GrammarState: Any + fmt::Debug + Send + Sync {
    fn box_clone(&self) -> Box<dyn GrammarState>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn eq_state(&self, other: &dyn GrammarState) -> bool;
}

impl<T> GrammarState for T
where
    T: Any + fmt::Debug + Clone + PartialEq + Send + Sync,
{
    fn box_clone(&self) -> Box<dyn GrammarState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn eq_state(&self, other: &dyn GrammarState) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| other == self)
    }
}

impl Clone for Box<dyn GrammarState> {
    fn clone(&self) -> Self {
        (**self).box_clone()
    }
}

/// Capability interface of a delegatable grammar
pub trait Grammar: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn start_state(&self) -> Box<dyn GrammarState>;

    /// Copy through the grammar so it can rebuild what a plain clone cannot
    fn copy_state(&self, state: &dyn GrammarState) -> Box<dyn GrammarState> {
        state.box_clone()
    }

    fn token(&self, stream: &mut StringStream<'_>, state: &mut dyn GrammarState) -> Option<String>;

    fn blank_line(&self, _state: &mut dyn GrammarState) -> Option<String> {
        None
    }

    fn indent(&self, _state: &dyn GrammarState, _text_after: &str) -> Option<usize> {
        None
    }
}

/// Name to grammar lookup, case-insensitive
#[derive(Debug, Clone, Default)]
pub struct GrammarRegistry {
    grammars: HashMap<String, Arc<dyn Grammar>>,
}

impl GrammarRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled TeX, YAML and HTML grammars
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let tex: Arc<dyn Grammar> = Arc::new(TexGrammar);
        let yaml: Arc<dyn Grammar> = Arc::new(YamlGrammar);
        let html: Arc<dyn Grammar> = Arc::new(HtmlGrammar);
        registry.register_shared(&["stex", "tex", "latex"], tex);
        registry.register_shared(&["yaml", "yml"], yaml);
        registry.register_shared(&["html", "xml"], html);
        registry
    }

    pub fn register(&mut self, name: &str, grammar: impl Grammar + 'static) {
        self.grammars
            .insert(name.to_ascii_lowercase(), Arc::new(grammar));
    }

    /// Register one grammar under several names
    pub fn register_shared(&mut self, names: &[&str], grammar: Arc<dyn Grammar>) {
        for name in names {
            self.grammars
                .insert(name.to_ascii_lowercase(), Arc::clone(&grammar));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Grammar>> {
        self.grammars.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.grammars.contains_key(&name.to_ascii_lowercase())
    }
}

/// Style string helpers
pub mod style {
    /// Whether `style` carries `class` as a whole word
    pub fn has_class(style: &str, class: &str) -> bool {
        style.split_whitespace().any(|c| c == class)
    }

    /// Whether any class in `style` starts with `prefix`
    pub fn has_class_prefix(style: &str, prefix: &str) -> bool {
        style.split_whitespace().any(|c| c.starts_with(prefix))
    }

    /// Value following `prefix` in the first class that starts with it
    pub fn class_suffix<'s>(style: &'s str, prefix: &str) -> Option<&'s str> {
        style
            .split_whitespace()
            .find_map(|c| c.strip_prefix(prefix))
    }

    /// Remove every occurrence of `class`
    pub fn remove_class(style: &str, class: &str) -> String {
        style
            .split_whitespace()
            .filter(|c| *c != class)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Append `extra` to `style`, keeping single spaces
    pub fn push(style: &mut String, extra: &str) {
        let extra = extra.trim();
        if extra.is_empty() {
            return;
        }
        if !style.is_empty() {
            style.push(' ');
        }
        style.push_str(extra);
    }

    /// Collapse runs of whitespace; empty becomes `None`
    pub fn finish(style: &str) -> Option<String> {
        let joined = style.split_whitespace().collect::<Vec<_>>().join(" ");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    /// A style string split into token classes and line-level classes
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StyleParts {
        pub token: Vec<String>,
        pub line: Vec<String>,
        pub background: Vec<String>,
    }

    /// Move `line-` and `line-background-` classes out of a token style
    pub fn split_line_classes(style: &str) -> StyleParts {
        let mut parts = StyleParts::default();
        for class in style.split_whitespace() {
            if let Some(bg) = class.strip_prefix("line-background-") {
                parts.background.push(bg.to_string());
            } else if let Some(line) = class.strip_prefix("line-") {
                parts.line.push(line.to_string());
            } else {
                parts.token.push(class.to_string());
            }
        }
        parts
    }
}

/// Tokenize `lines` from the start state, one `(text, style)` list per line
#[cfg(test)]
pub(crate) fn run_lines<M: Mode>(mode: &M, lines: &[&str]) -> Vec<Vec<(String, Option<String>)>> {
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
            assert!(stream.pos > stream.start, "no progress on line {}", n);
            tokens.push((stream.current().to_string(), style));
        }
        out.push(tokens);
    }
    out
}
