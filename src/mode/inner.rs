//! Sub-mode delegation
//!
//! A bounded inline region (math, custom link, front matter, ...) can be
//! handed to another grammar. While delegated, the host grammar's state is
//! left alone; every token goes through [`mode_override`], which asks the
//! region's [`ExitChecker`] whether control goes back to the host.

use super::{Grammar, GrammarRegistry, GrammarState, StringStream};
use crate::error::{ModeError, ModeResult};
use std::fmt;
use std::sync::Arc;

/// A grammar given by name or by value
#[derive(Debug, Clone)]
pub enum ModeSpec {
    Named(String),
    Grammar(Arc<dyn Grammar>),
}

impl From<&str> for ModeSpec {
    fn from(name: &str) -> Self {
        ModeSpec::Named(name.to_string())
    }
}

/// Resolve `spec` against the registry
///
/// A name the registry does not know resolves to `fallback`; with no fallback
/// this is a configuration error.
pub fn resolve_mode(
    registry: &GrammarRegistry,
    spec: &ModeSpec,
    fallback: Option<Arc<dyn Grammar>>,
) -> ModeResult<Arc<dyn Grammar>> {
    match spec {
        ModeSpec::Grammar(grammar) => Ok(Arc::clone(grammar)),
        ModeSpec::Named(name) => match registry.get(name) {
            Some(grammar) => Ok(grammar),
            None => match fallback {
                Some(fallback) => {
                    log::debug!(
                        "Grammar \"{}\" not registered, falling back to \"{}\"",
                        name,
                        fallback.name()
                    );
                    Ok(fallback)
                }
                None => Err(ModeError::UnresolvedMode { name: name.clone() }),
            },
        },
    }
}

/// What an exit checker reports when the region ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Where the last token of the region ends (absolute byte offset)
    pub end_pos: Option<usize>,
    /// Do not run the inner grammar on the last token
    pub skip_inner_mode: bool,
    /// Extra classes for the last token
    pub style: Option<String>,
}

pub type ExitFn = dyn Fn(&StringStream<'_>) -> Option<ExitInfo> + Send + Sync;

/// Decides, token by token, when a delegated region ends
///
/// Checkers only look at the stream; they never move it.
#[derive(Clone)]
pub enum ExitChecker {
    /// A literal terminator at the token start
    EndTag { tag: String, style: Option<String> },
    /// A line that is exactly `---`
    FrontMatterEnd,
    Custom(Arc<ExitFn>),
}

impl ExitChecker {
    pub fn check(&self, stream: &StringStream<'_>) -> Option<ExitInfo> {
        match self {
            ExitChecker::EndTag { tag, style } => {
                let at = stream.start;
                if stream.string()[at..].starts_with(tag.as_str()) {
                    Some(ExitInfo {
                        end_pos: Some(at + tag.len()),
                        skip_inner_mode: false,
                        style: style.clone(),
                    })
                } else {
                    None
                }
            }
            ExitChecker::FrontMatterEnd => {
                if stream.string() == "---" {
                    Some(ExitInfo {
                        end_pos: Some(3),
                        ..ExitInfo::default()
                    })
                } else {
                    None
                }
            }
            ExitChecker::Custom(check) => check(stream),
        }
    }
}

impl fmt::Debug for ExitChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitChecker::EndTag { tag, style } => f
                .debug_struct("EndTag")
                .field("tag", tag)
                .field("style", style)
                .finish(),
            ExitChecker::FrontMatterEnd => write!(f, "FrontMatterEnd"),
            ExitChecker::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl PartialEq for ExitChecker {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                ExitChecker::EndTag { tag: a, style: sa },
                ExitChecker::EndTag { tag: b, style: sb },
            ) => a == b && sa == sb,
            (ExitChecker::FrontMatterEnd, ExitChecker::FrontMatterEnd) => true,
            (ExitChecker::Custom(a), ExitChecker::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Checker matching `end_tag` at the current token start
pub fn create_simple_exit_checker(end_tag: &str, style: Option<&str>) -> ExitChecker {
    ExitChecker::EndTag {
        tag: end_tag.to_string(),
        style: style.map(str::to_string),
    }
}

/// An active delegation
pub struct InnerMode {
    pub grammar: Arc<dyn Grammar>,
    pub state: Box<dyn GrammarState>,
    /// Classes added to every token of the region
    pub style: Option<String>,
    pub exit: ExitChecker,
}

impl Clone for InnerMode {
    fn clone(&self) -> Self {
        Self {
            grammar: Arc::clone(&self.grammar),
            state: self.grammar.copy_state(&*self.state),
            style: self.style.clone(),
            exit: self.exit.clone(),
        }
    }
}

impl fmt::Debug for InnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerMode")
            .field("grammar", &self.grammar.name())
            .field("state", &self.state)
            .field("style", &self.style)
            .field("exit", &self.exit)
            .finish()
    }
}

impl PartialEq for InnerMode {
    fn eq(&self, other: &Self) -> bool {
        self.grammar.name() == other.grammar.name()
            && self.state.eq_state(&*other.state)
            && self.style == other.style
            && self.exit == other.exit
    }
}

/// How to enter a region
#[derive(Debug, Clone)]
pub struct EnterOptions {
    pub exit: ExitChecker,
    pub style: Option<String>,
    /// Leave the current token to the caller instead of running the inner
    /// grammar on it
    pub skip_first_token: bool,
}

impl EnterOptions {
    pub fn end_tag(tag: &str, style: Option<&str>) -> Self {
        Self {
            exit: create_simple_exit_checker(tag, None),
            style: style.map(str::to_string),
            skip_first_token: false,
        }
    }

    /// Region ended by a caller-supplied checker
    pub fn custom(
        exit: impl Fn(&StringStream<'_>) -> Option<ExitInfo> + Send + Sync + 'static,
        style: Option<&str>,
    ) -> Self {
        Self {
            exit: ExitChecker::Custom(Arc::new(exit)),
            style: style.map(str::to_string),
            skip_first_token: false,
        }
    }

    pub fn with_exit_style(mut self, style: &str) -> Self {
        if let ExitChecker::EndTag { style: exit_style, .. } = &mut self.exit {
            *exit_style = Some(style.to_string());
        }
        self
    }

    pub fn skip_first_token(mut self) -> Self {
        self.skip_first_token = true;
        self
    }
}

/// Start delegating to `grammar`
///
/// Returns the new delegation and the style of the current token: the region
/// style, plus the inner grammar's first token unless `skip_first_token`.
pub fn enter_mode(
    stream: &mut StringStream<'_>,
    grammar: Arc<dyn Grammar>,
    opts: EnterOptions,
) -> (InnerMode, String) {
    let mut inner = InnerMode {
        state: grammar.start_state(),
        grammar,
        style: opts.style,
        exit: opts.exit,
    };
    let mut style = inner.style.clone().unwrap_or_default();
    if !opts.skip_first_token {
        if let Some(first) = inner.grammar.token(stream, &mut *inner.state) {
            super::style::push(&mut style, &first);
        }
        advance_at_least_one(stream);
    }
    log::trace!(
        "enter {} at {}:{}",
        inner.grammar.name(),
        stream.line(),
        stream.start
    );
    (inner, style)
}

/// One token inside a delegated region
///
/// Returns the token style and whether the region ended with this token.
pub fn mode_override(stream: &mut StringStream<'_>, inner: &mut InnerMode) -> (Option<String>, bool) {
    let exit = inner.exit.check(stream);
    let mut style = String::new();
    if !exit.as_ref().map_or(false, |e| e.skip_inner_mode) {
        if let Some(s) = inner.grammar.token(stream, &mut *inner.state) {
            style = s;
        }
    }
    if let Some(extra) = &inner.style {
        super::style::push(&mut style, extra);
    }
    let exited = match exit {
        Some(info) => {
            if let Some(extra) = &info.style {
                super::style::push(&mut style, extra);
            }
            if let Some(end) = info.end_pos {
                stream.set_pos(end);
            }
            true
        }
        None => false,
    };
    advance_at_least_one(stream);
    (super::style::finish(&style), exited)
}

/// A grammar that returns without consuming would stall the line
fn advance_at_least_one(stream: &mut StringStream<'_>) {
    if stream.pos <= stream.start && !stream.eol() {
        stream.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{DummyGrammar, TexGrammar};

    #[test]
    fn test_resolve_mode() {
        let registry = GrammarRegistry::with_defaults();
        let found = resolve_mode(&registry, &"stex".into(), None).unwrap();
        assert_eq!(found.name(), "stex");

        let err = resolve_mode(&registry, &"asciimath".into(), None).unwrap_err();
        assert_eq!(
            err,
            ModeError::UnresolvedMode {
                name: "asciimath".to_string()
            }
        );

        let fallback: Arc<dyn Grammar> = Arc::new(DummyGrammar::new("$"));
        let found = resolve_mode(&registry, &"asciimath".into(), Some(fallback)).unwrap();
        assert_eq!(found.name(), "null");
    }

    #[test]
    fn test_simple_exit_checker() {
        let checker = create_simple_exit_checker("]]", Some("end"));
        let mut stream = StringStream::new("ab]]", 0, 4);
        assert!(checker.check(&stream).is_none());
        stream.start = 2;
        stream.pos = 2;
        let info = checker.check(&stream).unwrap();
        assert_eq!(info.end_pos, Some(4));
        assert_eq!(info.style.as_deref(), Some("end"));
        // checking never moves the stream
        assert_eq!(stream.pos, 2);
    }

    #[test]
    fn test_delegated_region() {
        let mut stream = StringStream::new("$x$ b", 0, 4);
        stream.next();
        let opts = EnterOptions::end_tag("$", Some("math"))
            .with_exit_style("end")
            .skip_first_token();
        let (mut inner, style) = enter_mode(&mut stream, Arc::new(TexGrammar), opts);
        assert_eq!(style, "math");
        assert_eq!(stream.pos, 1);

        stream.start = stream.pos;
        let (style, exited) = mode_override(&mut stream, &mut inner);
        assert_eq!(style.as_deref(), Some("variable-2 math"));
        assert!(!exited);

        stream.start = stream.pos;
        let (style, exited) = mode_override(&mut stream, &mut inner);
        assert!(exited);
        assert_eq!(stream.pos, 3);
        assert!(style.unwrap().ends_with("math end"));
    }

    /// One char per token, counting its calls
    #[derive(Debug)]
    struct CharGrammar;

    impl Grammar for CharGrammar {
        fn name(&self) -> &str {
            "char"
        }

        fn start_state(&self) -> Box<dyn GrammarState> {
            Box::new(0usize)
        }

        fn token(&self, stream: &mut StringStream<'_>, state: &mut dyn GrammarState) -> Option<String> {
            if let Some(calls) = state.as_any_mut().downcast_mut::<usize>() {
                *calls += 1;
            }
            stream.next();
            Some("char".to_string())
        }
    }

    fn calls(inner: &InnerMode) -> usize {
        inner.state.as_any().downcast_ref::<usize>().copied().unwrap()
    }

    #[test]
    fn test_custom_exit_skips_inner_grammar() {
        let mut stream = StringStream::new("<<ab>>tail", 0, 4);
        stream.pos = 2;
        let opts = EnterOptions::custom(
            |stream: &StringStream<'_>| {
                let at = stream.start;
                stream.string()[at..].starts_with(">>").then(|| ExitInfo {
                    end_pos: Some(at + 2),
                    skip_inner_mode: true,
                    style: Some("region-end".to_string()),
                })
            },
            Some("region"),
        )
        .skip_first_token();
        let (mut inner, style) = enter_mode(&mut stream, Arc::new(CharGrammar), opts);
        assert_eq!(style, "region");
        assert_eq!(calls(&inner), 0);

        for _ in 0..2 {
            stream.start = stream.pos;
            let (style, exited) = mode_override(&mut stream, &mut inner);
            assert_eq!(style.as_deref(), Some("char region"));
            assert!(!exited);
        }
        assert_eq!(calls(&inner), 2);

        stream.start = stream.pos;
        let (style, exited) = mode_override(&mut stream, &mut inner);
        assert!(exited);
        assert_eq!(style.as_deref(), Some("region region-end"));
        assert_eq!(stream.pos, 6);
        assert_eq!(calls(&inner), 2);
    }

    #[test]
    fn test_inner_mode_clone_is_deep() {
        let mut stream = StringStream::new("{", 0, 4);
        let (inner, _) = enter_mode(
            &mut stream,
            Arc::new(TexGrammar),
            EnterOptions::end_tag("$", None),
        );
        let copy = inner.clone();
        assert_eq!(copy, inner);
    }
}
