//! Note store
//!
//! Authoritative in-memory collection of notes for one page session:
//! notes belonging to the active page plus any notes reopened here from
//! other pages' history. All operations are total over malformed input;
//! unknown ids are logged no-ops, never errors.

pub mod models;

use crate::sanitizer::{self, VideoRef};
use models::{new_note_id, now_millis, Item, Note, NoteSpec, Position};
use std::collections::BTreeSet;

/// In-memory note collection for the current page session.
///
/// Constructed per page session and discarded on navigation; there are no
/// process-wide singletons behind it.
pub struct NoteStore {
    page_key: String,
    notes: Vec<Note>,
    /// Every page-identity key that held a note this session. Snapshot
    /// builds write all of these, even when a key has no notes left, so
    /// deletions are observable in storage.
    active_keys: BTreeSet<String>,
    fallback_position: Position,
}

impl NoteStore {
    pub fn new(page_key: impl Into<String>) -> Self {
        let page_key = page_key.into();
        let mut active_keys = BTreeSet::new();
        active_keys.insert(page_key.clone());
        Self {
            page_key,
            notes: Vec::new(),
            active_keys,
            fallback_position: Position::default(),
        }
    }

    pub fn page_key(&self) -> &str {
        &self.page_key
    }

    /// Default position for new notes and for records whose coordinates
    /// were unusable. The renderer keeps this at the last pointer spot.
    pub fn set_fallback_position(&mut self, position: Position) {
        if position.x.is_finite() && position.y.is_finite() {
            self.fallback_position = position;
        }
    }

    pub fn fallback_position(&self) -> Position {
        self.fallback_position
    }

    /// Create a note, or re-create one from a stored snapshot when the
    /// spec carries an id. Items pass sanitizer admission; the owner key
    /// is registered as active for persistence.
    pub fn create(&mut self, spec: NoteSpec) -> String {
        let now = now_millis();
        let id = spec
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_note_id);
        let position = spec
            .position
            .filter(|p| p.x.is_finite() && p.y.is_finite())
            .unwrap_or(self.fallback_position);
        let owner_page_key = spec
            .owner_page_key
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| self.page_key.clone());
        let domain = sanitizer::normalize_domain("", &owner_page_key);
        let created_at = spec.created_at.unwrap_or(now);
        let updated_at = spec.updated_at.unwrap_or(created_at);

        let mut items = Vec::new();
        for item in spec.items {
            if let Some(item) = sanitizer::admit_item(item, &items) {
                items.push(item);
            }
        }

        let note = Note {
            id: id.clone(),
            position,
            text: spec.text,
            items,
            created_at,
            updated_at,
            is_closed: spec.is_closed,
            owner_page_key: owner_page_key.clone(),
            domain,
        };

        self.active_keys.insert(owner_page_key);
        match self.notes.iter_mut().find(|n| n.id == id) {
            Some(existing) => *existing = note,
            None => self.notes.push(note),
        }

        tracing::debug!("created note: {}", id);
        id
    }

    fn edit(&mut self, id: &str, op: &str, mutate: impl FnOnce(&mut Note)) {
        match self.notes.iter_mut().find(|n| n.id == id) {
            Some(note) => {
                mutate(note);
                // Strictly monotonic so close/reopen cycles within one
                // millisecond still move updatedAt forward.
                note.updated_at = now_millis().max(note.updated_at + 1);
            }
            None => tracing::warn!("{} ignored: unknown note {}", op, id),
        }
    }

    pub fn update_text(&mut self, id: &str, text: impl Into<String>) {
        let text = text.into();
        self.edit(id, "update_text", |note| note.text = text);
    }

    pub fn move_to(&mut self, id: &str, position: Position) {
        let fallback = self.fallback_position;
        self.edit(id, "move_to", |note| {
            note.position = Position {
                x: if position.x.is_finite() { position.x } else { fallback.x },
                y: if position.y.is_finite() { position.y } else { fallback.y },
            };
        });
    }

    /// Append an attachment, subject to sanitizer admission against the
    /// note's current items. Returns false when the item was dropped or
    /// the id is unknown.
    pub fn append_item(&mut self, id: &str, item: Item) -> bool {
        let note = match self.notes.iter_mut().find(|n| n.id == id) {
            Some(note) => note,
            None => {
                tracing::warn!("append_item ignored: unknown note {}", id);
                return false;
            }
        };
        match sanitizer::admit_item(item, &note.items) {
            Some(item) => {
                note.items.push(item);
                note.updated_at = now_millis().max(note.updated_at + 1);
                true
            }
            None => false,
        }
    }

    /// If the line under the caret is a valid YouTube URL, remove that
    /// line from the note's text and return the validated reference. The
    /// caller fetches metadata and appends the item separately.
    pub fn extract_video_line(&mut self, id: &str, caret: usize) -> Option<VideoRef> {
        let note = self.notes.iter_mut().find(|n| n.id == id)?;
        let (start, end) = line_bounds(&note.text, caret);
        let video = sanitizer::validate_youtube_url(note.text[start..end].trim())?;
        note.text = remove_line(&note.text, start, end);
        note.updated_at = now_millis().max(note.updated_at + 1);
        Some(video)
    }

    /// Soft delete: the note stays in the collection and in storage but
    /// leaves the rendering surface.
    pub fn close(&mut self, id: &str) {
        self.edit(id, "close", |note| note.is_closed = true);
    }

    pub fn reopen(&mut self, id: &str) {
        self.edit(id, "reopen", |note| note.is_closed = false);
    }

    /// Re-create a note from its stored snapshot (found via history on a
    /// possibly different page) in the open state.
    pub fn insert_reopened(&mut self, note: Note) -> String {
        self.create(NoteSpec {
            id: Some(note.id),
            position: Some(note.position),
            text: note.text,
            items: note.items,
            created_at: Some(note.created_at),
            updated_at: Some(now_millis().max(note.updated_at + 1)),
            is_closed: false,
            owner_page_key: Some(note.owner_page_key),
        })
    }

    /// Permanently remove a note. Irreversible; the next snapshot no
    /// longer contains it.
    pub fn delete(&mut self, id: &str) {
        let before = self.notes.len();
        self.notes.retain(|n| n.id != id);
        if self.notes.len() == before {
            tracing::warn!("delete ignored: unknown note {}", id);
        } else {
            tracing::info!("deleted note: {}", id);
        }
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn open_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| !n.is_closed)
    }

    pub fn active_keys(&self) -> &BTreeSet<String> {
        &self.active_keys
    }
}

/// Byte bounds of the line containing `caret`, clamped to the text.
fn line_bounds(text: &str, caret: usize) -> (usize, usize) {
    let mut caret = caret.min(text.len());
    while !text.is_char_boundary(caret) {
        caret -= 1;
    }
    let start = text[..caret].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[caret..]
        .find('\n')
        .map(|i| caret + i)
        .unwrap_or(text.len());
    (start, end)
}

/// Remove a line span, merging the surrounding newlines so the text does
/// not grow blank runs: adjacent newlines collapse to one, a removed
/// trailing line takes its leading newline with it, and runs of three or
/// more newlines collapse to two.
fn remove_line(text: &str, start: usize, end: usize) -> String {
    let before = &text[..start];
    let after = &text[end..];
    let merged = if before.ends_with('\n') && after.starts_with('\n') {
        format!("{}{}", before, &after[1..])
    } else if after.is_empty() {
        before.strip_suffix('\n').unwrap_or(before).to_string()
    } else {
        format!("{}{}", before, after)
    };

    let mut out = String::with_capacity(merged.len());
    let mut run = 0usize;
    for c in merged.chars() {
        if c == '\n' {
            run += 1;
            if run <= 2 {
                out.push(c);
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}
