//! Remote task-service synchronization.
//!
//! # Responsibility
//! - Map board entities to remote task entities and back.
//! - Reconcile linked lanes with their remote task lists.
//! - Propagate local card edits to the remote service.
//! - Maintain the registry of linked lanes per document.
//!
//! # Invariants
//! - Remote failures never roll back committed local edits.
//! - A failure in one lane or document never aborts its siblings.

pub mod adapter;
pub mod auth;
pub mod cascade;
pub mod client;
pub mod links;
pub mod outbound;
pub mod reconcile;
pub mod registry;

use crate::board::{BoardContext, BoardError, DocumentId};
use crate::model::board::{BlockId, EntityId};
use adapter::TaskAdapter;
use cascade::CascadeError;
use client::{RemoteError, TaskService};
use registry::{LinkRegistry, RegistryError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors from reconciliation and outward propagation.
#[derive(Debug)]
pub enum SyncError {
    /// A card in a linked lane has no block id where one is required.
    MissingLinkage { item_id: EntityId, list_id: BlockId },
    /// A remote call failed; local state is left as-is.
    RemoteCallFailure(RemoteError),
    /// The linked remote list no longer exists.
    RemoteListGone(BlockId),
    /// The document of a registry entry is not open.
    DocumentMissing(DocumentId),
    Board(BoardError),
    Cascade(CascadeError),
    Registry(RegistryError),
}

impl SyncError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingLinkage { .. } => "missing_linkage",
            Self::RemoteCallFailure(_) => "remote_call_failure",
            Self::RemoteListGone(_) => "remote_list_gone",
            Self::DocumentMissing(_) => "document_missing",
            Self::Board(_) => "board_error",
            Self::Cascade(_) => "cascade_incomplete",
            Self::Registry(_) => "registry_error",
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingLinkage { item_id, list_id } => write!(
                f,
                "card {item_id} in linked list `{list_id}` has no remote task id"
            ),
            Self::RemoteCallFailure(err) => write!(f, "remote call failed: {err}"),
            Self::RemoteListGone(list_id) => write!(f, "remote list `{list_id}` no longer exists"),
            Self::DocumentMissing(document) => write!(f, "document not found: {document}"),
            Self::Board(err) => write!(f, "{err}"),
            Self::Cascade(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::RemoteCallFailure(err) => Some(err),
            Self::Board(err) => Some(err),
            Self::Cascade(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::MissingLinkage { .. } | Self::RemoteListGone(_) | Self::DocumentMissing(_) => {
                None
            }
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        Self::RemoteCallFailure(value)
    }
}

impl From<BoardError> for SyncError {
    fn from(value: BoardError) -> Self {
        Self::Board(value)
    }
}

impl From<CascadeError> for SyncError {
    fn from(value: CascadeError) -> Self {
        Self::Cascade(value)
    }
}

impl From<RegistryError> for SyncError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

/// Explicit context shared by reconciliation and propagation.
pub struct SyncContext {
    pub board: BoardContext,
    pub registry: LinkRegistry,
    pub service: Arc<dyn TaskService>,
    pub adapter: TaskAdapter,
}

impl SyncContext {
    pub fn new(
        board: BoardContext,
        registry: LinkRegistry,
        service: Arc<dyn TaskService>,
        adapter: TaskAdapter,
    ) -> Self {
        Self {
            board,
            registry,
            service,
            adapter,
        }
    }
}
