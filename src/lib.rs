//! quick-sticky engine
//!
//! Core of a page-anchored sticky-notes system: the in-memory note store,
//! the storage synchronization engine, the defensive content sanitizer and
//! the history query engine. Rendering, input handling and host messaging
//! live outside this crate and talk to it through [`session::NoteSession`].

pub mod config;
pub mod error;
pub mod history;
pub mod metadata;
pub mod sanitizer;
pub mod session;
pub mod store;
pub mod sync;
