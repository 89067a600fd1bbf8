//! Registry of lanes linked to remote task lists, per document.
//!
//! # Responsibility
//! - Track which remote list ids each document has linked lanes for.
//! - Keep the registry in step with link/unlink, rename and delete.
//!
//! # Invariants
//! - Each document appears at most once; each list id at most once per document.
//! - Documents without linked lists are dropped from the registry.
//! - The in-memory state only changes after the store accepted the new state.

use crate::board::DocumentId;
use crate::repo::{RepoError, RepoResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

/// Persisted record: one document and its linked remote list ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDocumentLanes {
    pub file_path: String,
    pub lane_ids: Vec<String>,
}

/// Link registry errors.
#[derive(Debug)]
pub enum RegistryError {
    InvalidDocumentId(String),
    InvalidListId(String),
    Store(RepoError),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDocumentId(value) => write!(f, "document id is invalid: `{value}`"),
            Self::InvalidListId(value) => write!(f, "remote list id is invalid: `{value}`"),
            Self::Store(err) => write!(f, "link registry store failed: {err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidDocumentId(_) | Self::InvalidListId(_) => None,
        }
    }
}

impl From<RepoError> for RegistryError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Persistence contract for the registry.
pub trait LinkRegistryStore: Send + Sync {
    fn load(&self) -> RepoResult<Vec<LinkedDocumentLanes>>;
    /// Replaces the persisted registry with `entries`.
    fn save(&self, entries: &[LinkedDocumentLanes]) -> RepoResult<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryLinkRegistryStore {
    entries: Mutex<Vec<LinkedDocumentLanes>>,
}

impl LinkRegistryStore for MemoryLinkRegistryStore {
    fn load(&self) -> RepoResult<Vec<LinkedDocumentLanes>> {
        Ok(lock(&self.entries).clone())
    }

    fn save(&self, entries: &[LinkedDocumentLanes]) -> RepoResult<()> {
        *lock(&self.entries) = entries.to_vec();
        Ok(())
    }
}

/// In-memory registry view backed by a store.
pub struct LinkRegistry {
    entries: Mutex<Vec<LinkedDocumentLanes>>,
    store: Arc<dyn LinkRegistryStore>,
}

impl LinkRegistry {
    /// Loads the registry from `store`.
    pub fn open(store: Arc<dyn LinkRegistryStore>) -> Result<Self, RegistryError> {
        let entries = store.load()?;
        info!(
            "event=link_registry_open module=sync status=ok documents={}",
            entries.len()
        );
        Ok(Self {
            entries: Mutex::new(entries),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            store: Arc::new(MemoryLinkRegistryStore::default()),
        }
    }

    pub fn entries(&self) -> Vec<LinkedDocumentLanes> {
        lock(&self.entries).clone()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Returns the list ids linked in `document`, in link order.
    pub fn lanes_for(&self, document: &DocumentId) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .find(|entry| entry.file_path == document.as_str())
            .map(|entry| entry.lane_ids.clone())
            .unwrap_or_default()
    }

    /// Records that `document` has a lane linked to `list_id`.
    ///
    /// Returns `false` when the link was already recorded.
    pub fn link(&self, document: &DocumentId, list_id: &str) -> Result<bool, RegistryError> {
        let file_path = normalize_document(document)?;
        let list_id = normalize_list_id(list_id)?;
        self.update("link", move |entries| {
            match entries.iter_mut().find(|entry| entry.file_path == file_path) {
                Some(entry) if entry.lane_ids.contains(&list_id) => false,
                Some(entry) => {
                    entry.lane_ids.push(list_id);
                    true
                }
                None => {
                    entries.push(LinkedDocumentLanes {
                        file_path,
                        lane_ids: vec![list_id],
                    });
                    true
                }
            }
        })
    }

    /// Removes one link. Returns `false` when it was not recorded.
    pub fn unlink(&self, document: &DocumentId, list_id: &str) -> Result<bool, RegistryError> {
        let file_path = normalize_document(document)?;
        let list_id = normalize_list_id(list_id)?;
        self.update("unlink", move |entries| {
            let Some(index) = entries.iter().position(|entry| entry.file_path == file_path) else {
                return false;
            };
            let entry = &mut entries[index];
            let before = entry.lane_ids.len();
            entry.lane_ids.retain(|existing| *existing != list_id);
            let changed = entry.lane_ids.len() != before;
            if entry.lane_ids.is_empty() {
                entries.remove(index);
            }
            changed
        })
    }

    /// Rewrites the document key after a rename.
    ///
    /// Links already recorded under `to` are kept and merged.
    pub fn rename_document(&self, from: &DocumentId, to: &DocumentId) -> Result<bool, RegistryError> {
        let from = normalize_document(from)?;
        let to = normalize_document(to)?;
        if from == to {
            return Ok(false);
        }
        self.update("rename_document", move |entries| {
            let Some(index) = entries.iter().position(|entry| entry.file_path == from) else {
                return false;
            };
            let moved = entries.remove(index);
            match entries.iter_mut().find(|entry| entry.file_path == to) {
                Some(target) => {
                    for lane_id in moved.lane_ids {
                        if !target.lane_ids.contains(&lane_id) {
                            target.lane_ids.push(lane_id);
                        }
                    }
                }
                None => entries.insert(
                    index,
                    LinkedDocumentLanes {
                        file_path: to,
                        lane_ids: moved.lane_ids,
                    },
                ),
            }
            true
        })
    }

    /// Drops every link of a deleted document.
    pub fn remove_document(&self, document: &DocumentId) -> Result<bool, RegistryError> {
        let file_path = normalize_document(document)?;
        self.update("remove_document", move |entries| {
            let before = entries.len();
            entries.retain(|entry| entry.file_path != file_path);
            entries.len() != before
        })
    }

    fn update<F>(&self, op: &str, apply: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&mut Vec<LinkedDocumentLanes>) -> bool,
    {
        let mut entries = lock(&self.entries);
        let mut next = entries.clone();
        if !apply(&mut next) {
            return Ok(false);
        }
        self.store.save(&next)?;
        *entries = next;
        info!(
            "event=link_registry_update module=sync op={} status=ok documents={}",
            op,
            entries.len()
        );
        Ok(true)
    }
}

fn normalize_document(document: &DocumentId) -> Result<String, RegistryError> {
    let value = document.as_str().trim();
    if value.is_empty() {
        return Err(RegistryError::InvalidDocumentId(document.to_string()));
    }
    Ok(value.to_string())
}

fn normalize_list_id(list_id: &str) -> Result<String, RegistryError> {
    let value = list_id.trim();
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidListId(list_id.to_string()));
    }
    Ok(value.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
