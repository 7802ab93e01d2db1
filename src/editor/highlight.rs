//! Per-line tokenizing over a cached state chain
//!
//! The end state of every tokenized line is kept; `states[n]` is the state
//! after line `n`. An edit truncates the chain at its start line and later
//! requests re-lex forward from the last valid state (the frontier).

use super::TextBuffer;
use crate::mode::{HyperMdMode, HyperMdState, Mode, StringStream};

/// How far back a non-precise request starts from a fresh state instead of
/// lexing the whole gap from the frontier
const APPROXIMATE_LOOKBACK: usize = 100;

/// One token of a line with the state right after it
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Byte offset in the line
    pub start: usize,
    pub end: usize,
    pub string: String,
    pub style: Option<String>,
    pub state: HyperMdState,
}

#[derive(Debug, Clone)]
pub struct Highlighter {
    mode: HyperMdMode,
    tab_size: usize,
    states: Vec<HyperMdState>,
}

impl Highlighter {
    pub fn new(mode: HyperMdMode) -> Self {
        let tab_size = mode.config().tab_size;
        Self {
            mode,
            tab_size,
            states: Vec::new(),
        }
    }

    pub fn mode(&self) -> &HyperMdMode {
        &self.mode
    }

    /// First line whose start state is not cached
    pub fn frontier(&self) -> usize {
        self.states.len()
    }

    /// Forget end states from `line` onward
    pub fn invalidate_from(&mut self, line: usize) {
        if line < self.states.len() {
            log::trace!(
                "state chain truncated at line {} (was {})",
                line,
                self.states.len()
            );
            self.states.truncate(line);
        }
    }

    /// Tokens of `line`, each carrying a copy of the state after it
    ///
    /// An empty line yields a single zero-width token when the mode gives it
    /// a blank-line style, otherwise nothing. With `precise` false a line far
    /// past the frontier is lexed from a fresh state a bounded distance back.
    pub fn get_line_tokens(&mut self, buffer: &TextBuffer, line: usize, precise: bool) -> Vec<Token> {
        if line >= buffer.len_lines() {
            return Vec::new();
        }
        let mut state = self.state_before(buffer, line, precise);
        let mut tokens = Vec::new();
        let blank = self.run_line(buffer, line, &mut state, |stream, style, state| {
            tokens.push(Token {
                start: stream.start,
                end: stream.pos,
                string: stream.current().to_string(),
                style,
                state: state.clone(),
            });
        });
        if let Some(style) = blank {
            tokens.push(Token {
                start: 0,
                end: 0,
                string: String::new(),
                style: Some(style),
                state: state.clone(),
            });
        }
        if self.states.len() == line {
            self.states.push(state);
        }
        tokens
    }

    /// State at the start of `line`
    fn state_before(&mut self, buffer: &TextBuffer, line: usize, precise: bool) -> HyperMdState {
        if !precise && line > self.states.len() + APPROXIMATE_LOOKBACK {
            let from = line - APPROXIMATE_LOOKBACK;
            log::trace!("approximate state for line {} from line {}", line, from);
            let mut state = self.mode.start_state();
            for n in from..line {
                self.run_line(buffer, n, &mut state, |_, _, _| {});
            }
            return state;
        }
        while self.states.len() < line {
            let n = self.states.len();
            let mut state = self.chain_state(n);
            self.run_line(buffer, n, &mut state, |_, _, _| {});
            self.states.push(state);
        }
        self.chain_state(line)
    }

    fn chain_state(&self, line: usize) -> HyperMdState {
        match line.checked_sub(1).and_then(|prev| self.states.get(prev)) {
            Some(state) => self.mode.copy_state(state),
            None => self.mode.start_state(),
        }
    }

    /// Tokenize one line, returning the blank-line style for empty lines
    fn run_line(
        &self,
        buffer: &TextBuffer,
        line: usize,
        state: &mut HyperMdState,
        mut on_token: impl FnMut(&StringStream<'_>, Option<String>, &HyperMdState),
    ) -> Option<String> {
        let text = buffer.line(line).unwrap_or_default();
        if text.is_empty() {
            return self.mode.blank_line(state);
        }
        let mut stream = StringStream::new(&text, line, self.tab_size).with_lines(buffer);
        while !stream.eol() {
            stream.start = stream.pos;
            let style = self.mode.token(&mut stream, state);
            if stream.pos <= stream.start {
                log::warn!("mode made no progress at {}:{}", line, stream.start);
                stream.pos = stream.start;
                stream.next();
            }
            on_token(&stream, style, state);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeConfig;
    use crate::mode::GrammarRegistry;

    fn highlighter() -> Highlighter {
        let mode = HyperMdMode::new(ModeConfig::default(), GrammarRegistry::with_defaults()).unwrap();
        Highlighter::new(mode)
    }

    #[test]
    fn test_tokens_cover_line() {
        let buffer = TextBuffer::from_str("# Title\n\n**bold** and `code`");
        let mut hl = highlighter();
        let tokens = hl.get_line_tokens(&buffer, 2, true);
        let joined: String = tokens.iter().map(|t| t.string.as_str()).collect();
        assert_eq!(joined, "**bold** and `code`");
        assert_eq!(tokens[0].start, 0);
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(hl.frontier(), 3);
    }

    #[test]
    fn test_blank_line_in_fence_keeps_line_classes() {
        let buffer = TextBuffer::from_str("```\n\ncode\n```");
        let mut hl = highlighter();
        let tokens = hl.get_line_tokens(&buffer, 1, true);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].start, tokens[0].end);
        assert!(tokens[0]
            .style
            .as_deref()
            .unwrap()
            .contains("line-HyperMD-codeblock"));

        let plain = TextBuffer::from_str("a\n\nb");
        assert!(hl_fresh_tokens(&plain, 1).is_empty());
    }

    fn hl_fresh_tokens(buffer: &TextBuffer, line: usize) -> Vec<Token> {
        highlighter().get_line_tokens(buffer, line, true)
    }

    #[test]
    fn test_invalidate_and_relex_is_stable() {
        let mut buffer = TextBuffer::from_str("> quote\ntext $x$\n- item\n  more");
        let mut hl = highlighter();
        let before: Vec<Vec<Token>> = (0..4).map(|n| hl.get_line_tokens(&buffer, n, true)).collect();
        assert_eq!(hl.frontier(), 4);

        hl.invalidate_from(1);
        assert_eq!(hl.frontier(), 1);
        let after: Vec<Vec<Token>> = (0..4).map(|n| hl.get_line_tokens(&buffer, n, true)).collect();
        assert_eq!(before, after);

        use crate::state::CursorPosition;
        buffer
            .replace(CursorPosition::new(0, 0), CursorPosition::new(0, 2), "")
            .unwrap();
        hl.invalidate_from(0);
        let line1 = hl.get_line_tokens(&buffer, 1, true);
        assert!(line1.iter().all(|t| t.state.md.quote == 0));
    }

    #[test]
    fn test_approximate_state_does_not_extend_chain() {
        let text = vec!["line"; 300].join("\n");
        let buffer = TextBuffer::from_str(&text);
        let mut hl = highlighter();
        let tokens = hl.get_line_tokens(&buffer, 250, false);
        assert_eq!(tokens[0].string, "line");
        assert_eq!(hl.frontier(), 0);
        hl.get_line_tokens(&buffer, 5, false);
        assert_eq!(hl.frontier(), 6);
    }
}
