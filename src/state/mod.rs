//! State types shared by the editor and the visibility engine
//!
//! - `editor_state`: caret positions and selections

mod editor_state;

pub use editor_state::*;
