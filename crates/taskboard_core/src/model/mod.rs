//! Board and remote task domain model.
//!
//! # Responsibility
//! - Define the immutable board tree (board -> lane -> item) used by core logic.
//! - Define the remote task-service entities consumed by synchronization.
//!
//! # Invariants
//! - Every lane and item is identified by a stable `EntityId`.
//! - Correlation with the remote service is an explicit `Linkage` variant.
//! - Tree nodes are shared by `Arc`; mutation always produces new values.

pub mod board;
pub mod task;
