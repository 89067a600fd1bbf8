//! Repository layer: SQLite implementations of the sync stores.
//!
//! # Responsibility
//! - Persist the link registry and the token key-value store.
//! - Isolate SQLite query details from sync orchestration.
//!
//! # Invariants
//! - Repositories only touch tables created by `db::migrations`.
//! - Whole-registry writes are atomic.

use crate::db::{DbError, SharedConnection};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::MutexGuard;

pub mod kv_repo;
pub mod link_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence error for store operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Locks the shared connection; a poisoned lock still yields the connection.
pub(crate) fn lock(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
