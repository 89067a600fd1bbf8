//! Outward propagation of local card edits to the remote service.
//!
//! # Responsibility
//! - Turn board events on linked lanes into remote create/update/delete calls.
//! - Attach remote ids to newly created cards; reconciliation reuses this
//!   for cards whose create failed earlier.
//! - Drop registry links of linked lanes that left the board.
//!
//! # Invariants
//! - Remote failures are reported, never rolled back locally.
//! - A card in a linked lane must carry a block id for update and delete.

use crate::board::{
    BoardEvent, BoardModifiers, ChannelObserver, Document, DocumentId, LinkAttach, SubscriptionId,
};
use crate::model::board::{Item, Lane};
use crate::model::task::nest_subtasks;
use crate::sync::cascade::{find_task, set_completion_tree};
use crate::sync::reconcile::DocumentResolver;
use crate::sync::{SyncContext, SyncError, SyncResult};
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What propagating one event did remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    /// Remote task created and linked to the card.
    Created { task_id: String },
    Updated { task_id: String },
    /// Completion change applied to the task and its sub-tasks.
    Cascaded { task_id: String, updated: usize },
    Deleted { task_id: String },
    /// Registry link dropped for a lane that left the board.
    Unlinked { list_id: String },
    /// Nothing to send.
    Skipped,
}

/// Event consumer pushing card edits in linked lanes to the remote service.
pub struct OutboundPropagator {
    ctx: Arc<SyncContext>,
    documents: Arc<dyn DocumentResolver>,
}

impl OutboundPropagator {
    pub fn new(ctx: Arc<SyncContext>, documents: Arc<dyn DocumentResolver>) -> Self {
        Self { ctx, documents }
    }

    /// Subscribes a channel to the board event bus.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<BoardEvent>) {
        let (observer, receiver) = ChannelObserver::channel();
        let id = self.ctx.board.events.subscribe(Arc::new(observer));
        (id, receiver)
    }

    /// Handles events until the channel closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<BoardEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(&event).await;
        }
        debug!("event=outbound_stop module=sync status=ok");
    }

    /// Propagates one event and logs the outcome. Returns `false` on failure.
    pub async fn handle(&self, event: &BoardEvent) -> bool {
        match self.propagate(event).await {
            Ok(Propagation::Skipped) => true,
            Ok(outcome) => {
                debug!(
                    "event=outbound module=sync status=ok name={} document={} outcome={:?}",
                    event.name(),
                    event.document(),
                    outcome
                );
                true
            }
            Err(err) => {
                warn!(
                    "event=outbound module=sync status=error name={} document={} error_code={} error={}",
                    event.name(),
                    event.document(),
                    err.code(),
                    err
                );
                false
            }
        }
    }

    /// Propagates one event.
    ///
    /// Card archiving is local-only: archived cards keep their remote task.
    pub async fn propagate(&self, event: &BoardEvent) -> SyncResult<Propagation> {
        match event {
            BoardEvent::ItemAdded {
                document,
                item,
                lane,
            }
            | BoardEvent::ItemDuplicated {
                document,
                item,
                lane,
                ..
            } => self.create(document, item, lane).await,
            BoardEvent::ItemUpdated {
                old_item,
                item,
                lane,
                ..
            } => {
                // Linkage attached after a create; the remote side is current.
                if !old_item.data.linkage.is_linked() && item.data.linkage.is_linked() {
                    return Ok(Propagation::Skipped);
                }
                self.update(item, lane).await
            }
            BoardEvent::ItemDeleted { item, lane, .. } => self.delete(item, lane).await,
            BoardEvent::LaneDeleted { document, lane }
            | BoardEvent::LaneArchived { document, lane, .. } => {
                let Some(list_id) = lane.block_id() else {
                    return Ok(Propagation::Skipped);
                };
                self.ctx.registry.unlink(document, list_id)?;
                Ok(Propagation::Unlinked {
                    list_id: list_id.to_string(),
                })
            }
            BoardEvent::ItemArchived { .. }
            | BoardEvent::LaneAdded { .. }
            | BoardEvent::LaneUpdated { .. }
            | BoardEvent::LaneItemsArchived { .. }
            | BoardEvent::LaneDuplicated { .. } => Ok(Propagation::Skipped),
        }
    }

    async fn create(
        &self,
        document: &DocumentId,
        item: &Item,
        lane: &Lane,
    ) -> SyncResult<Propagation> {
        let Some(list_id) = lane.block_id() else {
            return Ok(Propagation::Skipped);
        };
        if item.data.linkage.is_linked() {
            return Ok(Propagation::Skipped);
        }

        let document = self
            .documents
            .resolve(document)
            .ok_or_else(|| SyncError::DocumentMissing(document.clone()))?;
        Ok(match push_card(&self.ctx, &document, list_id, item).await? {
            Some(task_id) => Propagation::Created { task_id },
            None => Propagation::Skipped,
        })
    }

    async fn update(&self, item: &Item, lane: &Lane) -> SyncResult<Propagation> {
        let Some(list_id) = lane.block_id() else {
            return Ok(Propagation::Skipped);
        };
        let task_id = required_block_id(item, list_id)?;
        let service = self.ctx.service.as_ref();
        let previous = service.get_task(list_id, task_id).await?;
        let now = Utc::now();
        let mut update = self.ctx.adapter.item_to_task(item, &previous, now);
        if !update.changed {
            return Ok(Propagation::Skipped);
        }

        if update.completion_changed {
            let tasks = nest_subtasks(service.list_tasks(list_id).await?);
            if let Some(node) = find_task(&tasks, task_id) {
                update.task.children = node.children.clone();
            }
            let updated = set_completion_tree(service, &update.task, now).await?;
            return Ok(Propagation::Cascaded {
                task_id: task_id.to_string(),
                updated: updated.len(),
            });
        }

        let mode = update.update_mode();
        service.update_task(&update.task, mode).await?;
        Ok(Propagation::Updated {
            task_id: task_id.to_string(),
        })
    }

    async fn delete(&self, item: &Item, lane: &Lane) -> SyncResult<Propagation> {
        let Some(list_id) = lane.block_id() else {
            return Ok(Propagation::Skipped);
        };
        let task_id = required_block_id(item, list_id)?;
        let service = self.ctx.service.as_ref();
        let previous = match service.get_task(list_id, task_id).await {
            Ok(task) => task,
            Err(err) if err.is_not_found() => return Ok(Propagation::Skipped),
            Err(err) => return Err(err.into()),
        };
        service.delete_task(&previous.self_link).await?;
        Ok(Propagation::Deleted {
            task_id: task_id.to_string(),
        })
    }
}

/// Creates the remote task for an unlinked card and attaches its id.
///
/// When the card is gone or got linked to another task meanwhile, the new
/// task is deleted again and `None` is returned.
pub async fn push_card(
    ctx: &SyncContext,
    document: &Document,
    list_id: &str,
    item: &Item,
) -> SyncResult<Option<String>> {
    let created = ctx
        .service
        .create_task(list_id, &ctx.adapter.item_to_new_task(item))
        .await?;
    let attach = BoardModifiers::new(document, &ctx.board)
        .attach_item_linkage(item.id, &created.id)
        .await?;
    if attach == LinkAttach::Rejected {
        debug!(
            "event=push_card module=sync status=skipped reason=card_unavailable document={} task_id={}",
            document.id(),
            created.id
        );
        ctx.service.delete_task(&created.self_link).await?;
        return Ok(None);
    }
    Ok(Some(created.id))
}

fn required_block_id<'a>(item: &'a Item, list_id: &str) -> SyncResult<&'a str> {
    item.block_id().ok_or_else(|| SyncError::MissingLinkage {
        item_id: item.id,
        list_id: list_id.to_string(),
    })
}
