//! Markdown module for HyperMD
//!
//! Works on top of the tokenizer output:
//! - Span extraction per line
//! - Rendered line views
//! - Hiding formatting markers away from the caret

pub mod hide_token;
pub mod spans;
pub mod view;

pub use hide_token::{HideToken, RangesInLine};
pub use spans::{extract_from_tokens, LineSpanExtractor, LineTokens, Span, SpanToken, SpanType};
pub use view::{NodeId, RenderSurface, RenderedLine, RenderedNode, TextNode, VirtualView};
