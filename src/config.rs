//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the engine.

// ===== Storage =====

/// The single namespaced key under which the whole pageKey -> notes
/// mapping is stored in the backend.
pub const STORAGE_KEY: &str = "quickStickyNotesByPage";

/// Quiescence window for the debounced save timer in milliseconds.
/// Bursts of edits (keystrokes, drags) within this window coalesce
/// into a single backend write.
pub const SAVE_DEBOUNCE_MS: u64 = 150;

// ===== Item Quotas =====

/// Maximum number of items (of any type) attached to a single note.
pub const MAX_ITEMS_PER_NOTE: usize = 24;

/// Maximum number of image items attached to a single note.
pub const MAX_IMAGE_ITEMS_PER_NOTE: usize = 12;

/// Maximum decoded size of a single embedded image in bytes (5 MiB).
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Maximum cumulative decoded image size per note in bytes (24 MiB).
/// Keeps a single note's record well under backend value-size limits.
pub const MAX_TOTAL_IMAGE_BYTES: usize = 24 * 1024 * 1024;

// ===== Content Allow-Lists =====

/// Image MIME subtypes accepted inside `data:image/...` URLs.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["png", "jpeg", "jpg", "gif", "webp", "bmp"];

/// Hosts (after stripping a leading "www.") a YouTube link may point at.
pub const ALLOWED_VIDEO_HOSTS: &[&str] = &["youtube.com", "m.youtube.com", "youtu.be"];

/// Hosts a YouTube thumbnail URL may point at. Exact match, no stripping.
pub const ALLOWED_THUMBNAIL_HOSTS: &[&str] = &["i.ytimg.com", "img.youtube.com", "i3.ytimg.com"];

/// Length of a YouTube video id.
pub const VIDEO_ID_LEN: usize = 11;

// ===== Fallbacks =====

/// Title used when link metadata is missing or the lookup failed.
pub const DEFAULT_VIDEO_TITLE: &str = "YouTube Video";

/// Name used for image items stored without one.
pub const DEFAULT_IMAGE_NAME: &str = "image";

/// Domain sentinel for notes whose page key cannot be parsed.
pub const UNKNOWN_DOMAIN: &str = "unknown-domain";
