//! Bundled tools.
//!
//! The engine treats every handler as opaque; these exist so a fresh
//! install has something to call.

pub mod stories;

pub use stories::{register_story_tools, StoryStore};
