//! Hide formatting markers away from the caret
//!
//! Markers (`**`, `[`, `` ` ``, ...) of a watched span stay hidden unless a
//! selection range in the same line touches the span. Lines with no range
//! at all get the inactive-line class. Updates after cursor activity are
//! debounced; render events reprocess a single line right away.

use super::spans::SpanToken;
use super::view::{RenderSurface, TextNode};
use crate::config::HideTokenConfig;
use crate::editor::Editor;
use crate::utils::Debouncer;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Selection ranges per line, as `(from, to)` byte columns
pub type RangesInLine = BTreeMap<usize, Vec<(usize, usize)>>;

#[derive(Debug, Clone)]
pub struct HideToken {
    config: HideTokenConfig,
    debouncer: Debouncer,
    ranges_in_line: RangesInLine,
}

impl HideToken {
    pub fn new(config: HideTokenConfig) -> Self {
        let debouncer = Debouncer::new(config.debounce_ms);
        Self {
            config,
            debouncer,
            ranges_in_line: RangesInLine::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &HideTokenConfig {
        &self.config
    }

    /// Ranges used by the last update
    pub fn ranges_in_line(&self) -> &RangesInLine {
        &self.ranges_in_line
    }

    /// The selection moved or the text changed
    pub fn on_cursor_activity(&mut self, now: Instant) {
        if self.config.enabled {
            self.debouncer.schedule(now);
        }
    }

    /// Whether a debounced update is waiting
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Run the debounced update if it is due; returns the lines that changed
    pub fn tick(&mut self, now: Instant, editor: &mut Editor, surface: &mut dyn RenderSurface) -> Vec<usize> {
        if self.debouncer.poll(now) {
            self.update(editor, surface)
        } else {
            Vec::new()
        }
    }

    /// Reprocess every line whose selection ranges changed since last time
    pub fn update(&mut self, editor: &mut Editor, surface: &mut dyn RenderSurface) -> Vec<usize> {
        if !self.config.enabled {
            return Vec::new();
        }
        let new_ranges = ranges_by_line(editor);
        let touched: BTreeSet<usize> = self
            .ranges_in_line
            .keys()
            .chain(new_ranges.keys())
            .copied()
            .filter(|line| self.ranges_in_line.get(line) != new_ranges.get(line))
            .collect();
        self.ranges_in_line = new_ranges;

        let changed: Vec<usize> = touched
            .into_iter()
            .filter(|&line| self.process_line(line, editor, surface))
            .collect();

        let caret_lines: BTreeSet<usize> = editor.selections().iter().map(|s| s.head.line).collect();
        for &line in changed.iter().filter(|line| caret_lines.contains(line)) {
            surface.invalidate_measurements(line);
        }
        log::debug!("hide-token update: {} lines changed", changed.len());
        changed
    }

    /// A line was (re)rendered; returns whether any class changed
    pub fn on_render_line(&mut self, line: usize, editor: &mut Editor, surface: &mut dyn RenderSurface) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.process_line(line, editor, surface)
    }

    /// Turn the engine on or off; turning it off reveals every marker
    pub fn set_enabled(&mut self, enabled: bool, editor: &mut Editor, surface: &mut dyn RenderSurface) {
        if enabled == self.config.enabled {
            return;
        }
        self.config.enabled = enabled;
        if enabled {
            self.ranges_in_line = ranges_by_line(editor);
            for line in 0..editor.line_count() {
                self.process_line(line, editor, surface);
            }
        } else {
            self.debouncer.cancel();
            self.ranges_in_line.clear();
            for line in 0..editor.line_count() {
                let Some(map) = surface.line_map(line) else {
                    continue;
                };
                for node in map {
                    surface.set_node_class(line, node.node, &self.config.hide_class, false);
                }
                surface.set_line_class(line, &self.config.inactive_line_class, false);
            }
        }
        log::debug!("hide-token {}", if enabled { "enabled" } else { "disabled" });
    }

    fn process_line(&self, line: usize, editor: &mut Editor, surface: &mut dyn RenderSurface) -> bool {
        let Some(map) = surface.line_map(line) else {
            log::trace!("line {} not rendered, skipped", line);
            return false;
        };
        let ranges = self.ranges_in_line.get(&line).map_or(&[][..], Vec::as_slice);
        let spans = editor.get_line_span_extractor().extract(line).to_vec();

        let mut changed = false;
        for span in spans.iter().filter(|s| self.config.watch.contains(&s.kind)) {
            let hide = !ranges
                .iter()
                .any(|&(from, to)| from <= span.end && to >= span.begin);
            let markers = std::iter::once(&span.head).chain(span.tail.as_ref());
            for marker in markers.filter(|m| m.is_formatting()) {
                if let Some(node) = node_of(&map, marker) {
                    changed |= surface.set_node_class(line, node.node, &self.config.hide_class, hide);
                }
            }
        }
        changed |= surface.set_line_class(line, &self.config.inactive_line_class, ranges.is_empty());
        changed
    }
}

fn node_of<'m>(map: &'m [TextNode], marker: &SpanToken) -> Option<&'m TextNode> {
    map.iter()
        .find(|n| n.start <= marker.start && marker.start < n.end)
}

/// Current selection ranges grouped by line
fn ranges_by_line(editor: &Editor) -> RangesInLine {
    let mut ranges = RangesInLine::new();
    for selection in editor.selections() {
        for line in selection.from().line..=selection.to().line {
            let line_len = editor.line(line).map_or(0, |l| l.len());
            if let Some(range) = selection.range_in_line(line, line_len) {
                ranges.entry(line).or_default().push(range);
            }
        }
    }
    for list in ranges.values_mut() {
        list.sort_unstable();
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::markdown::view::VirtualView;
    use crate::state::{CursorPosition, Selection};
    use std::time::Duration;

    const HIDE: &str = "hmd-hidden-token";

    fn setup(text: &str, caret: CursorPosition) -> (Editor, VirtualView, HideToken) {
        let config = Config::default();
        let mut editor = Editor::with_content(text, config.clone()).unwrap();
        editor.set_cursor(caret).unwrap();
        let mut view = VirtualView::new();
        view.render_all(&mut editor);
        let mut hide = HideToken::new(config.hide_token);
        hide.update(&mut editor, &mut view);
        for line in view.mounted_lines() {
            hide.on_render_line(line, &mut editor, &mut view);
        }
        (editor, view, hide)
    }

    fn hidden(view: &VirtualView, line: usize) -> Vec<bool> {
        view.line(line)
            .unwrap()
            .nodes
            .iter()
            .map(|n| n.classes.contains(HIDE))
            .collect()
    }

    #[test]
    fn test_markers_hidden_then_revealed() {
        let (mut editor, mut view, mut hide) =
            setup("**bold**\nplain *em*", CursorPosition::new(1, 0));
        assert_eq!(hidden(&view, 0), vec![true, false, true]);
        assert!(view.line(0).unwrap().classes.contains("hmd-inactive-line"));
        let other_before = view.line(1).unwrap().clone();

        let t0 = Instant::now();
        editor.set_cursor(CursorPosition::new(0, 4)).unwrap();
        hide.on_cursor_activity(t0);
        assert!(hide.tick(t0 + Duration::from_millis(50), &mut editor, &mut view).is_empty());
        assert_eq!(hidden(&view, 0), vec![true, false, true]);

        let changed = hide.tick(t0 + Duration::from_millis(100), &mut editor, &mut view);
        assert!(changed.contains(&0));
        assert_eq!(hidden(&view, 0), vec![false, false, false]);
        assert!(!view.line(0).unwrap().classes.contains("hmd-inactive-line"));
        assert_eq!(view.measure_invalidations(0), 1);

        // line 1 lost its caret and turns inactive
        let after = view.line(1).unwrap();
        assert_ne!(*after, other_before);
        assert!(after.classes.contains("hmd-inactive-line"));
    }

    #[test]
    fn test_every_caret_line_is_remeasured() {
        let (mut editor, mut view, mut hide) = setup("**a**\n`b`\nplain", CursorPosition::new(2, 0));
        editor
            .set_selections(vec![
                Selection::collapsed(CursorPosition::new(0, 2)),
                Selection::collapsed(CursorPosition::new(1, 1)),
            ])
            .unwrap();
        let changed = hide.update(&mut editor, &mut view);
        assert!(changed.contains(&0) && changed.contains(&1));
        assert_eq!(hidden(&view, 0), vec![false, false, false]);
        assert_eq!(hidden(&view, 1), vec![false, false, false]);
        assert_eq!(view.measure_invalidations(0), 1);
        assert_eq!(view.measure_invalidations(1), 1);
        // lost its caret, changed, but holds no caret now
        assert!(changed.contains(&2));
        assert_eq!(view.measure_invalidations(2), 0);
    }

    #[test]
    fn test_bursts_are_coalesced() {
        let (mut editor, mut view, mut hide) = setup("**a**\n\n**b**", CursorPosition::new(1, 0));
        let t0 = Instant::now();
        for ms in [0u64, 40, 80] {
            hide.on_cursor_activity(t0 + Duration::from_millis(ms));
        }
        editor.set_cursor(CursorPosition::new(2, 3)).unwrap();
        assert!(hide.tick(t0 + Duration::from_millis(150), &mut editor, &mut view).is_empty());
        assert!(hide.is_pending());
        let changed = hide.tick(t0 + Duration::from_millis(180), &mut editor, &mut view);
        assert!(changed.contains(&2));
        assert!(!hide.is_pending());
        assert_eq!(hidden(&view, 0), vec![true, false, true]);
        assert_eq!(hidden(&view, 2), vec![false, false, false]);
    }

    #[test]
    fn test_unmounted_line_is_skipped() {
        let (mut editor, mut view, mut hide) = setup("**a**\n**b**", CursorPosition::new(0, 0));
        view.unmount(1);
        editor.set_cursor(CursorPosition::new(1, 2)).unwrap();
        let changed = hide.update(&mut editor, &mut view);
        assert_eq!(changed, vec![0]);
        assert_eq!(hidden(&view, 0), vec![true, false, true]);
    }

    #[test]
    fn test_disable_reveals_everything() {
        let (mut editor, mut view, mut hide) = setup("**a** `c`", CursorPosition::new(0, 0));
        editor.set_cursor(CursorPosition::new(0, 6)).unwrap();
        hide.on_cursor_activity(Instant::now());
        hide.set_enabled(false, &mut editor, &mut view);
        assert!(!hide.is_enabled());
        assert!(!hide.is_pending());
        assert!(hidden(&view, 0).iter().all(|h| !h));
        assert!(!view.line(0).unwrap().classes.contains("hmd-inactive-line"));

        hide.set_enabled(true, &mut editor, &mut view);
        let line = view.line(0).unwrap();
        assert!(line.nodes[0].classes.contains(HIDE));
        assert!(!line.nodes.last().unwrap().classes.contains(HIDE));
    }
}
