//! Lane link lifecycle.
//!
//! # Responsibility
//! - Link and unlink lanes to remote lists, keeping board and registry in step.
//! - Follow document rename and delete in the registry.

use crate::board::{BoardError, BoardModifiers, Document, DocumentId};
use crate::model::board::Linkage;
use crate::sync::{SyncContext, SyncError, SyncResult};
use crate::tree::require_lane;
use log::info;

/// Links the lane at `path` to the remote list `list_id`.
///
/// The list must exist remotely. The registry is only updated after the
/// board accepted the linkage.
pub async fn link_lane(
    ctx: &SyncContext,
    document: &Document,
    path: &[usize],
    list_id: &str,
) -> SyncResult<()> {
    let lists = ctx.service.list_task_lists().await?;
    if !lists.iter().any(|list| list.id == list_id) {
        return Err(SyncError::RemoteListGone(list_id.to_string()));
    }
    BoardModifiers::new(document, &ctx.board)
        .set_lane_linkage(path, Linkage::linked(list_id))
        .await?;
    ctx.registry.link(document.id(), list_id)?;
    info!(
        "event=link_lane module=sync status=ok document={} list_id={}",
        document.id(),
        list_id
    );
    Ok(())
}

/// Unlinks the lane at `path` and its cards.
///
/// Returns `false` when the lane was not linked.
pub async fn unlink_lane(ctx: &SyncContext, document: &Document, path: &[usize]) -> SyncResult<bool> {
    let snapshot = document.snapshot().await;
    let lane = require_lane(&snapshot, path).map_err(BoardError::from)?;
    let Some(list_id) = lane.block_id().map(str::to_string) else {
        return Ok(false);
    };
    BoardModifiers::new(document, &ctx.board)
        .clear_lane_linkage(path)
        .await?;
    ctx.registry.unlink(document.id(), &list_id)?;
    info!(
        "event=unlink_lane module=sync status=ok document={} list_id={}",
        document.id(),
        list_id
    );
    Ok(true)
}

pub fn on_document_renamed(ctx: &SyncContext, from: &DocumentId, to: &DocumentId) -> SyncResult<bool> {
    Ok(ctx.registry.rename_document(from, to)?)
}

pub fn on_document_deleted(ctx: &SyncContext, document: &DocumentId) -> SyncResult<bool> {
    Ok(ctx.registry.remove_document(document)?)
}
