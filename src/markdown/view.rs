//! Rendered line views
//!
//! `RenderSurface` is what the visibility engine needs from whatever draws
//! the lines: a node map per mounted line and class toggles. `VirtualView`
//! keeps rendered lines in memory, built from tokens the way a widget
//! materializes them.

use crate::editor::{Editor, Token};
use crate::mode::style;
use std::collections::{BTreeMap, BTreeSet};

/// Handle of a rendered text node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// A node covering `start..end` of the line text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextNode {
    pub start: usize,
    pub end: usize,
    pub node: NodeId,
}

pub trait RenderSurface {
    /// Node map of `line`, `None` while the line is not rendered
    fn line_map(&self, line: usize) -> Option<Vec<TextNode>>;

    /// Add or remove a class on a node; true if the class changed
    fn set_node_class(&mut self, line: usize, node: NodeId, class: &str, on: bool) -> bool;

    /// Add or remove a class on the line element; true if the class changed
    fn set_line_class(&mut self, line: usize, class: &str, on: bool) -> bool;

    /// Drop cached measurements of `line`
    fn invalidate_measurements(&mut self, line: usize);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedNode {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub classes: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedLine {
    pub nodes: Vec<RenderedNode>,
    pub classes: BTreeSet<String>,
    pub background_classes: BTreeSet<String>,
}

impl RenderedLine {
    /// Build a line from its tokens
    ///
    /// Adjacent tokens with the same style share one node; `line-` and
    /// `line-background-` classes go to the line element.
    pub fn from_tokens(tokens: &[Token]) -> Self {
        let mut line = RenderedLine::default();
        let mut last_style: Option<&str> = None;
        for token in tokens {
            let parts = style::split_line_classes(token.style.as_deref().unwrap_or(""));
            line.classes.extend(parts.line);
            line.background_classes.extend(parts.background);
            if token.end == token.start {
                continue;
            }
            let token_style = token.style.as_deref();
            match line.nodes.last_mut() {
                Some(node) if last_style == token_style && node.end == token.start => {
                    node.end = token.end;
                    node.text.push_str(&token.string);
                }
                _ => line.nodes.push(RenderedNode {
                    start: token.start,
                    end: token.end,
                    text: token.string.clone(),
                    classes: parts.token.into_iter().collect(),
                }),
            }
            last_style = token_style;
        }
        line
    }

    /// Text of the whole line
    pub fn text(&self) -> String {
        self.nodes.iter().map(|n| n.text.as_str()).collect()
    }

    /// Node covering byte `offset`
    pub fn node_at(&self, offset: usize) -> Option<&RenderedNode> {
        self.nodes.iter().find(|n| n.start <= offset && offset < n.end)
    }
}

/// In-memory rendered lines, keyed by line number
#[derive(Debug, Clone, Default)]
pub struct VirtualView {
    lines: BTreeMap<usize, RenderedLine>,
    measure_invalidations: BTreeMap<usize, usize>,
}

impl VirtualView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_line(&mut self, line: usize, tokens: &[Token]) {
        self.lines.insert(line, RenderedLine::from_tokens(tokens));
    }

    /// Render every line of the editor
    pub fn render_all(&mut self, editor: &mut Editor) {
        for line in 0..editor.line_count() {
            let tokens = editor.get_line_tokens(line, true);
            self.render_line(line, &tokens);
        }
    }

    /// Take `line` out of the view, as when it scrolls out
    pub fn unmount(&mut self, line: usize) {
        self.lines.remove(&line);
    }

    pub fn line(&self, line: usize) -> Option<&RenderedLine> {
        self.lines.get(&line)
    }

    /// Mounted line numbers in order
    pub fn mounted_lines(&self) -> Vec<usize> {
        self.lines.keys().copied().collect()
    }

    /// How many times measurements of `line` were invalidated
    pub fn measure_invalidations(&self, line: usize) -> usize {
        self.measure_invalidations.get(&line).copied().unwrap_or(0)
    }
}

fn toggle(classes: &mut BTreeSet<String>, class: &str, on: bool) -> bool {
    if on {
        classes.insert(class.to_string())
    } else {
        classes.remove(class)
    }
}

impl RenderSurface for VirtualView {
    fn line_map(&self, line: usize) -> Option<Vec<TextNode>> {
        self.lines.get(&line).map(|rendered| {
            rendered
                .nodes
                .iter()
                .enumerate()
                .map(|(idx, node)| TextNode {
                    start: node.start,
                    end: node.end,
                    node: NodeId(idx),
                })
                .collect()
        })
    }

    fn set_node_class(&mut self, line: usize, node: NodeId, class: &str, on: bool) -> bool {
        self.lines
            .get_mut(&line)
            .and_then(|rendered| rendered.nodes.get_mut(node.0))
            .map_or(false, |node| toggle(&mut node.classes, class, on))
    }

    fn set_line_class(&mut self, line: usize, class: &str, on: bool) -> bool {
        self.lines
            .get_mut(&line)
            .map_or(false, |rendered| toggle(&mut rendered.classes, class, on))
    }

    fn invalidate_measurements(&mut self, line: usize) {
        *self.measure_invalidations.entry(line).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_render_moves_line_classes() {
        let mut editor = Editor::with_content("# Title", Config::default()).unwrap();
        let mut view = VirtualView::new();
        view.render_all(&mut editor);
        let line = view.line(0).unwrap();
        assert_eq!(line.text(), "# Title");
        assert!(line.classes.contains("HyperMD-header-1"));
        assert!(line
            .nodes
            .iter()
            .all(|n| n.classes.iter().all(|c| !c.starts_with("line-"))));
    }

    #[test]
    fn test_node_map_and_toggles() {
        let mut editor = Editor::with_content("**b**", Config::default()).unwrap();
        let mut view = VirtualView::new();
        view.render_all(&mut editor);
        let map = view.line_map(0).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!((map[1].start, map[1].end), (2, 3));
        assert_eq!(view.line(0).unwrap().node_at(2).unwrap().text, "b");
        assert!(view.line(0).unwrap().node_at(5).is_none());

        assert!(view.set_node_class(0, map[0].node, "x", true));
        assert!(!view.set_node_class(0, map[0].node, "x", true));
        assert!(view.set_line_class(0, "y", true));
        assert!(view.set_node_class(0, map[0].node, "x", false));

        view.unmount(0);
        assert!(view.line_map(0).is_none());
        assert!(!view.set_line_class(0, "y", false));
    }
}
