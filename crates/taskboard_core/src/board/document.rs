//! Per-document board state.
//!
//! # Responsibility
//! - Hold the committed board of one open document.
//! - Gate access until the initial board has been loaded.
//! - Collect operation errors for the host to surface.
//!
//! # Invariants
//! - At most one mutation runs against a document at a time.
//! - Readers always observe a fully committed board.

use crate::board::BoardError;
use crate::model::board::Board;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{watch, Mutex, MutexGuard};

/// Identifier of a board document (its file path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One open board document.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    state: Mutex<Arc<Board>>,
    loaded: watch::Sender<bool>,
    errors: StdMutex<Vec<BoardError>>,
}

impl Document {
    /// Creates a document that is ready with `board`.
    pub fn new(id: impl Into<DocumentId>, board: Board) -> Self {
        let (loaded, _) = watch::channel(true);
        Self {
            id: id.into(),
            state: Mutex::new(Arc::new(board)),
            loaded,
            errors: StdMutex::new(Vec::new()),
        }
    }

    /// Creates a document whose board is still being loaded.
    ///
    /// Mutations and `ready` wait until `finish_loading` is called.
    pub fn loading(id: impl Into<DocumentId>) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            id: id.into(),
            state: Mutex::new(Arc::new(Board::default())),
            loaded,
            errors: StdMutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Installs the initially loaded board and releases waiters.
    pub async fn finish_loading(&self, board: Board) {
        *self.state.lock().await = Arc::new(board);
        self.loaded.send_replace(true);
        debug!("event=document_loaded module=board document={}", self.id);
    }

    pub fn is_ready(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Waits until the document has a loaded board.
    pub async fn ready(&self) {
        let mut receiver = self.loaded.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|loaded| *loaded).await;
    }

    /// Returns the last committed board.
    pub async fn snapshot(&self) -> Arc<Board> {
        self.ready().await;
        self.state.lock().await.clone()
    }

    /// Acquires exclusive access to the committed board.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Arc<Board>> {
        self.ready().await;
        self.state.lock().await
    }

    /// Records an operation failure on the document error channel.
    pub fn report_error(&self, err: BoardError) {
        warn!(
            "event=board_error module=board document={} error={}",
            self.id, err
        );
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(err);
    }

    /// Drains recorded failures.
    pub fn take_errors(&self) -> Vec<BoardError> {
        std::mem::take(
            &mut *self
                .errors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// Registry of open documents keyed by id.
#[derive(Debug, Default)]
pub struct DocumentSet {
    documents: RwLock<HashMap<DocumentId, Arc<Document>>>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `document`, replacing any previous document with the same id.
    pub fn insert(&self, document: Arc<Document>) -> Option<Arc<Document>> {
        self.write().insert(document.id().clone(), document)
    }

    pub fn get(&self, id: &DocumentId) -> Option<Arc<Document>> {
        self.read().get(id).cloned()
    }

    pub fn remove(&self, id: &DocumentId) -> Option<Arc<Document>> {
        self.write().remove(id)
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DocumentId, Arc<Document>>> {
        self.documents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<DocumentId, Arc<Document>>> {
        self.documents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
