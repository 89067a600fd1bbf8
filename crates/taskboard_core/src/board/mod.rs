//! Board mutation engine.
//!
//! # Responsibility
//! - Own per-document board state and serialize edits against it.
//! - Expose the named board operations used by UI and sync layers.
//! - Publish one typed event per logical change.
//!
//! # Invariants
//! - A failed operation leaves the committed board unchanged and emits nothing.
//! - Events describe the board state before the edit is committed.

mod archive;
mod content;
mod document;
mod events;
mod modifiers;
mod sort;

pub use archive::archive_stamp_text;
pub use content::{ItemContentRewriter, PlainContentRewriter};
pub use document::{Document, DocumentId, DocumentSet};
pub use events::{BoardEvent, BoardObserver, ChannelObserver, EventBus, SubscriptionId};
pub use modifiers::{BoardContext, BoardModifiers, LaneUpsert, LinkAttach};
pub use sort::{sort_lane_by_date, sort_lane_by_title};

use crate::model::board::BlockId;
use crate::tree::TreeError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by board operations.
pub type BoardResult<T> = Result<T, BoardError>;

/// Errors for board operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// Path resolution or structural edit failed.
    Tree(TreeError),
    /// Card text could not be rewritten (archive stamping, annotations).
    ContentRewrite(String),
    /// Another lane of the document is already linked to this block id.
    DuplicateLinkage(BlockId),
}

impl Display for BoardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(err) => write!(f, "{err}"),
            Self::ContentRewrite(message) => write!(f, "card content rewrite failed: {message}"),
            Self::DuplicateLinkage(block_id) => {
                write!(f, "another lane is already linked to `{block_id}`")
            }
        }
    }
}

impl Error for BoardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Tree(err) => Some(err),
            Self::ContentRewrite(_) | Self::DuplicateLinkage(_) => None,
        }
    }
}

impl From<TreeError> for BoardError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}
