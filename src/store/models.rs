//! Note data model
//!
//! Domain types for notes and their attachments, the camelCase wire
//! shape written to storage, and the boundary normalization that turns
//! duck-typed stored records into trusted `Note` values.

use crate::sanitizer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Viewport coordinates of a note. Always finite; anything non-finite is
/// replaced with a fallback point at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

/// An attachment embedded in a note.
///
/// Every `Item` held by the store has passed sanitizer validation; the
/// tagged wire shape matches what the original records used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Image {
        /// Base64 `data:image/...` URL, never a remote reference.
        src: String,
        name: String,
    },
    Youtube {
        /// Canonical `https://www.youtube.com/watch?v=<id>` URL.
        url: String,
        #[serde(rename = "videoId")]
        video_id: String,
        title: String,
        thumbnail: String,
    },
}

/// One user-visible annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Opaque unique id, immutable for the note's lifetime.
    pub id: String,
    pub position: Position,
    pub text: String,
    /// Insertion order is display order.
    pub items: Vec<Item>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds; bumped by every mutation.
    pub updated_at: i64,
    /// Closed notes are hidden from the page but kept in storage.
    pub is_closed: bool,
    /// Page-identity key (origin + path + query) the note is filed under.
    pub owner_page_key: String,
    /// Lower-cased hostname cached from `owner_page_key`.
    pub domain: String,
}

/// Wire shape of a stored note: camelCase keys, position flattened to
/// top-level `x`/`y`, exactly as the original records were written.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredNote {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub text: String,
    pub items: Vec<Item>,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_closed: bool,
    pub owner_page_key: String,
    pub domain: String,
}

impl From<&Note> for StoredNote {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            x: note.position.x,
            y: note.position.y,
            text: note.text.clone(),
            items: note.items.clone(),
            created_at: note.created_at,
            updated_at: note.updated_at,
            is_closed: note.is_closed,
            owner_page_key: note.owner_page_key.clone(),
            domain: note.domain.clone(),
        }
    }
}

/// Request shape for creating a note. Absent fields take the data-model
/// defaults; id and timestamps are supplied when re-creating a note from
/// a stored record.
#[derive(Debug, Clone, Default)]
pub struct NoteSpec {
    pub id: Option<String>,
    pub position: Option<Position>,
    pub text: String,
    pub items: Vec<Item>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub is_closed: bool,
    pub owner_page_key: Option<String>,
}

/// Mint a fresh note id.
pub fn new_note_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Result of normalizing one raw stored record.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub note: Note,
    /// True when any field was defaulted, coerced, upgraded from a legacy
    /// shape or dropped by the sanitizer; a changed record triggers a
    /// migration write after hydration.
    pub changed: bool,
}

/// Normalize an untrusted stored record into a `Note`.
///
/// Total over malformed input: wrong-typed or missing fields fall back to
/// defaults, items go through the sanitizer, and the legacy
/// `storagePageKey` field is accepted as an alias of `ownerPageKey`.
/// The `changed` flag is computed structurally, field by field, so a
/// record that merely serialized its keys in a different order is not
/// spuriously migrated.
pub fn normalize_record(
    raw: &Value,
    fallback_page_key: &str,
    fallback_position: Position,
) -> NormalizedRecord {
    let now = now_millis();
    let obj = raw.as_object();
    let not_object = obj.is_none();
    let get = |key: &str| obj.and_then(|o| o.get(key));

    let raw_id = get("id").and_then(Value::as_str).unwrap_or("");
    let (id, id_changed) = if raw_id.is_empty() {
        (new_note_id(), true)
    } else {
        (raw_id.to_string(), false)
    };

    let raw_text = get("text").and_then(Value::as_str);
    let text = raw_text.unwrap_or("").to_string();
    let text_changed = raw_text.is_none();

    let coord = |key: &str, fallback: f64| -> (f64, bool) {
        match get(key).and_then(Value::as_f64) {
            Some(v) if v.is_finite() => (v, false),
            _ => (fallback, true),
        }
    };
    let (x, x_changed) = coord("x", fallback_position.x);
    let (y, y_changed) = coord("y", fallback_position.y);

    let timestamp = |key: &str, fallback: i64| -> (i64, bool) {
        match get(key).and_then(Value::as_f64) {
            Some(v) if v.is_finite() => {
                let millis = v as i64;
                (millis, get(key).and_then(Value::as_i64) != Some(millis))
            }
            _ => (fallback, true),
        }
    };
    let (created_at, created_changed) = timestamp("createdAt", now);
    let (updated_at, updated_changed) = timestamp("updatedAt", created_at);

    let raw_closed = get("isClosed").and_then(Value::as_bool);
    let is_closed = raw_closed.unwrap_or(false);
    let closed_changed = raw_closed.is_none();

    let (owner_page_key, owner_changed) = match get("ownerPageKey").and_then(Value::as_str) {
        Some(key) if !key.is_empty() => (key.to_string(), false),
        _ => match get("storagePageKey").and_then(Value::as_str) {
            // Legacy records filed the key under storagePageKey.
            Some(key) if !key.is_empty() => (key.to_string(), true),
            _ => (fallback_page_key.to_string(), true),
        },
    };

    let raw_domain = get("domain").and_then(Value::as_str).unwrap_or("");
    let domain = sanitizer::normalize_domain(raw_domain, &owner_page_key);
    let domain_changed = raw_domain != domain;

    let empty = Vec::new();
    let raw_items = get("items").and_then(Value::as_array);
    let items_field_changed = raw_items.is_none();
    let raw_items = raw_items.unwrap_or(&empty);
    let items = sanitizer::sanitize_item_list(raw_items);
    let items_changed = items_field_changed
        || items.len() != raw_items.len()
        || items
            .iter()
            .zip(raw_items.iter())
            .any(|(item, raw_item)| match serde_json::to_value(item) {
                Ok(value) => &value != raw_item,
                Err(_) => true,
            });

    let changed = not_object
        || id_changed
        || text_changed
        || x_changed
        || y_changed
        || created_changed
        || updated_changed
        || closed_changed
        || owner_changed
        || domain_changed
        || items_changed;

    NormalizedRecord {
        note: Note {
            id,
            position: Position { x, y },
            text,
            items,
            created_at,
            updated_at,
            is_closed,
            owner_page_key,
            domain,
        },
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = "https://www.example.com/article?id=7";

    #[test]
    fn test_stored_note_wire_shape() {
        let note = Note {
            id: "n1".to_string(),
            position: Position { x: 10.0, y: 20.0 },
            text: "hello".to_string(),
            items: vec![Item::Youtube {
                url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
                video_id: "dQw4w9WgXcQ".to_string(),
                title: "YouTube Video".to_string(),
                thumbnail: "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg".to_string(),
            }],
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_001,
            is_closed: false,
            owner_page_key: PAGE.to_string(),
            domain: "example.com".to_string(),
        };

        let value = serde_json::to_value(StoredNote::from(&note)).unwrap();
        assert_eq!(value["id"], "n1");
        assert_eq!(value["x"], 10.0);
        assert_eq!(value["createdAt"], 1_700_000_000_000_i64);
        assert_eq!(value["isClosed"], false);
        assert_eq!(value["ownerPageKey"], PAGE);
        assert_eq!(value["items"][0]["type"], "youtube");
        assert_eq!(value["items"][0]["videoId"], "dQw4w9WgXcQ");
    }

    #[test]
    fn test_normalize_record_round_trips_clean_records_unchanged() {
        let raw = json!({
            "id": "n1",
            "x": 10.0,
            "y": 20.0,
            "text": "hello",
            "items": [],
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": 1_700_000_000_001_i64,
            "isClosed": false,
            "ownerPageKey": PAGE,
            "domain": "example.com",
        });

        let normalized = normalize_record(&raw, PAGE, Position::default());
        assert!(!normalized.changed);
        assert_eq!(normalized.note.id, "n1");
        assert_eq!(normalized.note.text, "hello");
        assert_eq!(normalized.note.domain, "example.com");
    }

    #[test]
    fn test_normalize_record_defaults_malformed_fields() {
        let raw = json!({
            "id": "n1",
            "x": "NaN-ish",
            "text": 42,
            "createdAt": "yesterday",
            "ownerPageKey": PAGE,
            "domain": "example.com",
            "items": [],
            "isClosed": false,
        });

        let fallback = Position { x: 7.0, y: 9.0 };
        let normalized = normalize_record(&raw, PAGE, fallback);
        assert!(normalized.changed);
        assert_eq!(normalized.note.position, fallback);
        assert_eq!(normalized.note.text, "");
        assert!(normalized.note.created_at > 0);
        assert_eq!(normalized.note.updated_at, normalized.note.created_at);
    }

    #[test]
    fn test_normalize_record_upgrades_legacy_page_key_field() {
        let raw = json!({
            "id": "n1",
            "x": 1.0, "y": 2.0,
            "text": "",
            "items": [],
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": 1_700_000_000_000_i64,
            "isClosed": false,
            "storagePageKey": "https://old.example.net/page",
        });

        let normalized = normalize_record(&raw, PAGE, Position::default());
        assert!(normalized.changed);
        assert_eq!(normalized.note.owner_page_key, "https://old.example.net/page");
        assert_eq!(normalized.note.domain, "old.example.net");
    }

    #[test]
    fn test_normalize_record_mints_id_for_non_object() {
        let normalized = normalize_record(&json!("garbage"), PAGE, Position::default());
        assert!(normalized.changed);
        assert!(!normalized.note.id.is_empty());
        assert_eq!(normalized.note.owner_page_key, PAGE);
    }

    #[test]
    fn test_normalize_record_flags_sanitized_items() {
        let raw = json!({
            "id": "n1",
            "x": 1.0, "y": 2.0,
            "text": "",
            "items": [{"type": "image", "src": "http://evil.example/x.png"}],
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": 1_700_000_000_000_i64,
            "isClosed": false,
            "ownerPageKey": PAGE,
            "domain": "example.com",
        });

        let normalized = normalize_record(&raw, PAGE, Position::default());
        assert!(normalized.changed);
        assert!(normalized.note.items.is_empty());
    }

    #[test]
    fn test_normalize_record_ignores_item_key_order() {
        // The same youtube item with keys in two different orders must not
        // be reported as changed.
        let raw = json!({
            "id": "n1",
            "x": 1.0, "y": 2.0,
            "text": "",
            "items": [{
                "videoId": "dQw4w9WgXcQ",
                "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg",
                "type": "youtube",
                "title": "A Video",
                "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            }],
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": 1_700_000_000_000_i64,
            "isClosed": false,
            "ownerPageKey": PAGE,
            "domain": "example.com",
        });

        let normalized = normalize_record(&raw, PAGE, Position::default());
        assert!(!normalized.changed, "key order must not trigger migration");
    }
}
