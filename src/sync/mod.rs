//! Sync engine
//!
//! Keeps the persistent backend eventually consistent with the note
//! store. The backend write primitive is asynchronous, may fail, and has
//! no multi-key transaction, so every write replaces the whole
//! pageKey -> notes mapping with a freshly built snapshot.
//!
//! Scheduling is debounced (bursts of edits coalesce into one write) and
//! writes are serialized through a single-flight gate: a flush requested
//! while one is in progress is recorded as pending and re-run with fresh
//! state when the in-flight write completes, so the backend always ends
//! up reflecting the latest state without overlapping writes.

pub mod backend;

use crate::config::{SAVE_DEBOUNCE_MS, STORAGE_KEY};
use crate::error::Result;
use crate::store::models::{normalize_record, Note, NoteSpec, StoredNote};
use crate::store::NoteStore;
use self::backend::StorageBackend;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Handle to the per-session note store, shared with the sync engine's
/// timer tasks.
pub type SharedNoteStore = Arc<Mutex<NoteStore>>;

/// Single-flight state for backend writes.
///
/// Transitions: idle -> in_flight (flush starts); in_flight + request ->
/// pending set; write completes + pending -> loop repeats with pending
/// cleared; write completes + !pending -> idle.
#[derive(Default)]
struct FlightState {
    in_flight: bool,
    pending: bool,
}

struct Inner<B> {
    backend: B,
    store: SharedNoteStore,
    /// Last snapshot loaded from or written to the backend. Keys not
    /// touched this session are copied forward from here on every write.
    cache: Mutex<Map<String, Value>>,
    flight: Mutex<FlightState>,
    /// Pending debounce timer, reset by every mutation.
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Set once the backend reports its context invalidated; from then on
    /// the session degrades to in-memory only.
    disabled: AtomicBool,
}

pub struct SyncEngine<B: StorageBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: StorageBackend> Clone for SyncEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: StorageBackend> SyncEngine<B> {
    pub fn new(store: SharedNoteStore, backend: B) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                cache: Mutex::new(Map::new()),
                flight: Mutex::new(FlightState::default()),
                timer: std::sync::Mutex::new(None),
                disabled: AtomicBool::new(false),
            }),
        }
    }

    /// Whether persistence has been permanently disabled for this session.
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Load the backend value, normalize and adopt the active page's
    /// records into the store, and rewrite storage once if any record
    /// needed migration.
    pub async fn hydrate(&self) -> Result<()> {
        let loaded = match self.inner.backend.get(STORAGE_KEY).await {
            Ok(value) => value,
            Err(e) if e.is_context_invalidated() => {
                tracing::error!("storage context invalidated during load, persistence disabled");
                self.inner.disabled.store(true, Ordering::SeqCst);
                None
            }
            Err(e) => {
                tracing::warn!("failed to load stored notes: {}", e);
                None
            }
        };

        let snapshot: Map<String, Value> = loaded
            .and_then(|raw| match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Some(map),
                Ok(_) => {
                    tracing::warn!("stored value is not an object, starting empty");
                    None
                }
                Err(e) => {
                    tracing::warn!("stored value is not valid JSON, starting empty: {}", e);
                    None
                }
            })
            .unwrap_or_default();

        *self.inner.cache.lock().await = snapshot.clone();

        let needs_migration = {
            let mut store = self.inner.store.lock().await;
            let page_key = store.page_key().to_string();
            let fallback = store.fallback_position();
            let records = snapshot
                .get(&page_key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let mut changed_any = false;
            for raw in &records {
                let normalized = normalize_record(raw, &page_key, fallback);
                if normalized.changed {
                    changed_any = true;
                }
                let note = normalized.note;
                store.create(NoteSpec {
                    id: Some(note.id),
                    position: Some(note.position),
                    text: note.text,
                    items: note.items,
                    created_at: Some(note.created_at),
                    updated_at: Some(note.updated_at),
                    is_closed: note.is_closed,
                    owner_page_key: Some(note.owner_page_key),
                });
            }
            tracing::info!(
                "hydrated {} notes for {}",
                records.len(),
                page_key
            );
            changed_any
        };

        if needs_migration {
            tracing::info!("legacy records normalized during load, rewriting storage");
            self.save_now().await?;
        }
        Ok(())
    }

    /// Request a write after the quiescence window. Each call resets the
    /// timer, so a burst of edits produces a single write.
    pub fn schedule_save(&self) {
        if self.is_disabled() {
            return;
        }
        let mut timer = self.inner.timer.lock().unwrap();
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        let engine = self.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SAVE_DEBOUNCE_MS)).await;
            if let Err(e) = engine.flush().await {
                tracing::warn!("debounced save failed: {}", e);
            }
        }));
    }

    /// Cancel any pending debounce timer and flush immediately. Used for
    /// close/delete, where losing the last write on tab close would be
    /// user-visible data loss.
    pub async fn save_now(&self) -> Result<()> {
        if let Some(handle) = self.inner.timer.lock().unwrap().take() {
            handle.abort();
        }
        self.flush().await
    }

    /// Coalesced single-flight flush. If a write is already in progress
    /// the request is recorded as pending and this call returns; the
    /// in-flight loop repeats with a fresh snapshot until no request
    /// remains.
    pub async fn flush(&self) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }
        {
            let mut flight = self.inner.flight.lock().await;
            if flight.in_flight {
                flight.pending = true;
                tracing::debug!("flush coalesced into in-flight write");
                return Ok(());
            }
            flight.in_flight = true;
        }

        loop {
            self.inner.flight.lock().await.pending = false;

            let snapshot = self.build_snapshot().await;
            let payload = match serde_json::to_string(&snapshot) {
                Ok(payload) => payload,
                Err(e) => {
                    self.end_flight().await;
                    return Err(e.into());
                }
            };

            match self.inner.backend.set(STORAGE_KEY, payload).await {
                Ok(()) => {
                    *self.inner.cache.lock().await = snapshot;
                }
                Err(e) if e.is_context_invalidated() => {
                    tracing::error!(
                        "storage context invalidated, persistence disabled for this session"
                    );
                    self.inner.disabled.store(true, Ordering::SeqCst);
                    self.end_flight().await;
                    return Ok(());
                }
                Err(e) => {
                    // Transient failure: nothing to undo, state is
                    // level-triggered and the next mutation retries.
                    tracing::warn!("backend write failed: {}", e);
                    self.end_flight().await;
                    return Ok(());
                }
            }

            let mut flight = self.inner.flight.lock().await;
            if !flight.pending {
                flight.in_flight = false;
                return Ok(());
            }
        }
    }

    async fn end_flight(&self) {
        self.inner.flight.lock().await.in_flight = false;
    }

    /// Serialize the full pageKey -> notes mapping: every active key is
    /// written (an empty array when its notes are gone, so deletions are
    /// observable), untouched keys are copied forward from the cache.
    async fn build_snapshot(&self) -> Map<String, Value> {
        let store = self.inner.store.lock().await;
        let cache = self.inner.cache.lock().await;

        let mut next = cache.clone();
        for key in store.active_keys() {
            next.insert(key.clone(), Value::Array(Vec::new()));
        }
        for note in store.notes() {
            let entry = next
                .entry(note.owner_page_key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                match serde_json::to_value(StoredNote::from(note)) {
                    Ok(value) => list.push(value),
                    Err(e) => tracing::error!("failed to serialize note {}: {}", note.id, e),
                }
            }
        }
        next
    }

    /// A clone of the cached snapshot, for history queries.
    pub async fn snapshot_cache(&self) -> Map<String, Value> {
        self.inner.cache.lock().await.clone()
    }

    /// Normalized lookup of a stored note in the cached snapshot, used
    /// when reopening a note found via history.
    pub async fn stored_note(&self, page_key: &str, note_id: &str) -> Option<Note> {
        let fallback = self.inner.store.lock().await.fallback_position();
        let cache = self.inner.cache.lock().await;
        let raw = cache
            .get(page_key)?
            .as_array()?
            .iter()
            .find(|raw| raw.get("id").and_then(Value::as_str) == Some(note_id))?;
        Some(normalize_record(raw, page_key, fallback).note)
    }
}
