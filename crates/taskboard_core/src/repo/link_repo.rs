//! Link registry persistence.
//!
//! # Responsibility
//! - Load and replace the `{file_path, lane_ids}` records of the link registry.
//!
//! # Invariants
//! - Record order and lane order survive a save/load round trip.
//! - `save` replaces the whole table in one transaction.

use crate::db::SharedConnection;
use crate::repo::{lock, RepoResult};
use crate::sync::registry::{LinkRegistryStore, LinkedDocumentLanes};
use log::debug;
use rusqlite::params;

/// SQLite-backed link registry store.
pub struct SqliteLinkRegistryStore {
    conn: SharedConnection,
}

impl SqliteLinkRegistryStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl LinkRegistryStore for SqliteLinkRegistryStore {
    fn load(&self) -> RepoResult<Vec<LinkedDocumentLanes>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT file_path, lane_id
             FROM linked_document_lanes
             ORDER BY document_order ASC, lane_order ASC;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries: Vec<LinkedDocumentLanes> = Vec::new();
        for row in rows {
            let (file_path, lane_id) = row?;
            match entries.last_mut() {
                Some(last) if last.file_path == file_path => last.lane_ids.push(lane_id),
                _ => entries.push(LinkedDocumentLanes {
                    file_path,
                    lane_ids: vec![lane_id],
                }),
            }
        }
        Ok(entries)
    }

    fn save(&self, entries: &[LinkedDocumentLanes]) -> RepoResult<()> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM linked_document_lanes;", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO linked_document_lanes (
                    file_path,
                    lane_id,
                    document_order,
                    lane_order
                ) VALUES (?1, ?2, ?3, ?4);",
            )?;
            for (document_order, entry) in entries.iter().enumerate() {
                for (lane_order, lane_id) in entry.lane_ids.iter().enumerate() {
                    stmt.execute(params![
                        entry.file_path.as_str(),
                        lane_id.as_str(),
                        document_order as i64,
                        lane_order as i64,
                    ])?;
                }
            }
        }
        tx.commit()?;
        debug!(
            "event=link_registry_save module=repo status=ok documents={}",
            entries.len()
        );
        Ok(())
    }
}
