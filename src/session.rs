//! Page session service
//!
//! High-level entry point for one page's note lifecycle. Wires the note
//! store to the sync engine so callers (the renderer) never touch
//! persistence or sanitization directly: edits schedule a debounced
//! write, state transitions flush immediately.

use crate::error::Result;
use crate::history::{self, HistoryEntry};
use crate::metadata::{self, LinkMetadataFetcher};
use crate::store::models::{Item, Note, NoteSpec, Position};
use crate::store::NoteStore;
use crate::sync::backend::StorageBackend;
use crate::sync::{SharedNoteStore, SyncEngine};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct NoteSession<B: StorageBackend> {
    store: SharedNoteStore,
    sync: SyncEngine<B>,
}

impl<B: StorageBackend> NoteSession<B> {
    /// Construct a session for one page and hydrate it from storage.
    pub async fn start(page_key: impl Into<String>, backend: B) -> Result<Self> {
        let store: SharedNoteStore = Arc::new(Mutex::new(NoteStore::new(page_key)));
        let sync = SyncEngine::new(Arc::clone(&store), backend);
        sync.hydrate().await?;
        Ok(Self { store, sync })
    }

    /// Track the pointer so new notes and unusable stored coordinates
    /// land somewhere sensible.
    pub async fn set_pointer(&self, position: Position) {
        self.store.lock().await.set_fallback_position(position);
    }

    pub async fn create_note(&self, position: Option<Position>) -> String {
        let id = self.store.lock().await.create(NoteSpec {
            position,
            ..Default::default()
        });
        self.sync.schedule_save();
        id
    }

    pub async fn update_text(&self, id: &str, text: impl Into<String> + Send) {
        self.store.lock().await.update_text(id, text);
        self.sync.schedule_save();
    }

    pub async fn move_note(&self, id: &str, position: Position) {
        self.store.lock().await.move_to(id, position);
        self.sync.schedule_save();
    }

    /// Attach a dropped or pasted image. Returns false when the sanitizer
    /// dropped it (bad source or quota exhausted).
    pub async fn attach_image(&self, id: &str, src: String, name: String) -> bool {
        let accepted = self
            .store
            .lock()
            .await
            .append_item(id, Item::Image { src, name });
        if accepted {
            self.sync.schedule_save();
        }
        accepted
    }

    /// If the caret's line is a YouTube URL, turn it into an attachment:
    /// the line leaves the text immediately, the metadata lookup runs
    /// without holding the store, and the finished item is appended.
    pub async fn commit_video_line<F>(&self, id: &str, caret: usize, fetcher: &F) -> Option<Item>
    where
        F: LinkMetadataFetcher + ?Sized,
    {
        let video = self.store.lock().await.extract_video_line(id, caret)?;
        self.sync.schedule_save();

        let item = metadata::build_video_item(fetcher, &video).await;
        let appended = self.store.lock().await.append_item(id, item.clone());
        self.sync.schedule_save();
        appended.then_some(item)
    }

    /// Close a note (kept in storage, hidden from the page). Flushes
    /// immediately: losing a close on tab shutdown is user-visible.
    pub async fn close_note(&self, id: &str) -> Result<()> {
        self.store.lock().await.close(id);
        self.sync.save_now().await
    }

    /// Permanently delete a note. Flushes immediately.
    pub async fn delete_note(&self, id: &str) -> Result<()> {
        self.store.lock().await.delete(id);
        self.sync.save_now().await
    }

    /// Reopen a note: in place when the session already holds it, else
    /// re-created from its stored snapshot (a history entry may point at
    /// a note filed under a different page). Returns false when the note
    /// exists nowhere.
    pub async fn reopen_note(&self, id: &str, page_key: &str) -> bool {
        let reopened_locally = {
            let mut store = self.store.lock().await;
            if store.note(id).is_some() {
                store.reopen(id);
                true
            } else {
                false
            }
        };
        if reopened_locally {
            self.sync.schedule_save();
            return true;
        }

        match self.sync.stored_note(page_key, id).await {
            Some(note) => {
                self.store.lock().await.insert_reopened(note);
                self.sync.schedule_save();
                true
            }
            None => {
                tracing::warn!("reopen ignored: note {} not found in storage", id);
                false
            }
        }
    }

    /// Force any pending state out to the backend, e.g. on page unload.
    pub async fn save_now(&self) -> Result<()> {
        self.sync.save_now().await
    }

    /// Flattened history across all pages, from the cached snapshot.
    pub async fn history_entries(&self) -> Vec<HistoryEntry> {
        history::list_entries(&self.sync.snapshot_cache().await)
    }

    pub async fn note(&self, id: &str) -> Option<Note> {
        self.store.lock().await.note(id).cloned()
    }

    pub async fn open_notes(&self) -> Vec<Note> {
        self.store.lock().await.open_notes().cloned().collect()
    }

    /// True once the backend reported its context invalidated and the
    /// session degraded to in-memory only.
    pub fn is_persistence_disabled(&self) -> bool {
        self.sync.is_disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::backend::MemoryBackend;

    const PAGE: &str = "https://www.example.com/article?id=7";

    async fn session() -> NoteSession<Arc<MemoryBackend>> {
        NoteSession::start(PAGE, Arc::new(MemoryBackend::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let session = session().await;
        let id = session
            .create_note(Some(Position { x: 10.0, y: 20.0 }))
            .await;

        let note = session.note(&id).await.unwrap();
        assert_eq!(note.position, Position { x: 10.0, y: 20.0 });
        assert_eq!(note.owner_page_key, PAGE);
        assert_eq!(session.open_notes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_note_leaves_open_set_but_shows_in_history() {
        let session = session().await;
        let id = session.create_note(None).await;
        session.update_text(&id, "remember me").await;
        session.close_note(&id).await.unwrap();

        assert!(session.open_notes().await.is_empty());
        let entries = session.history_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert!(entries[0].is_closed);
    }

    #[tokio::test]
    async fn test_deleted_note_disappears_from_history() {
        let session = session().await;
        let id = session.create_note(None).await;
        session.close_note(&id).await.unwrap();
        session.delete_note(&id).await.unwrap();

        assert!(session.note(&id).await.is_none());
        assert!(session.history_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_unknown_note_is_refused() {
        let session = session().await;
        assert!(!session.reopen_note("missing", PAGE).await);
    }
}
