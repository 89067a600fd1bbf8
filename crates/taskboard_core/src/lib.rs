//! Core domain logic for taskboard.
//! Kanban boards as immutable trees, synchronized with a remote task service.

pub mod board;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod settings;
pub mod sync;
pub mod tree;

pub use board::{
    BoardContext, BoardError, BoardEvent, BoardModifiers, BoardObserver, BoardResult,
    ChannelObserver, Document, DocumentId, DocumentSet, EventBus, ItemContentRewriter,
    LaneUpsert, LinkAttach, PlainContentRewriter,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::board::{
    Board, BlockId, EntityId, Item, ItemData, ItemMetadata, Lane, LaneData, LaneSort, Linkage,
};
pub use model::task::{NewRemoteTask, RemoteTask, RemoteTaskList, RemoteTaskStatus};
pub use repo::{RepoError, RepoResult};
pub use settings::{BoardSettings, DueZone, Settings, SettingsError, SyncSettings};
pub use sync::adapter::{TaskAdapter, TaskUpdate};
pub use sync::client::{GoogleTasksClient, RemoteError, RemoteResult, TaskService, UpdateMode};
pub use sync::registry::{LinkRegistry, LinkedDocumentLanes, RegistryError};
pub use sync::{SyncContext, SyncError, SyncResult};
pub use tree::{Path, TreeError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
