//! Inbound reconciliation of linked lanes with remote task lists.
//!
//! # Responsibility
//! - Fetch remote lists and tasks for every registry entry.
//! - Create remote tasks for cards of linked lanes that have none yet.
//! - Merge remote state into the linked lanes through board operations.
//! - Report per-document and per-lane outcomes.
//!
//! # Invariants
//! - Documents and lanes reconcile concurrently; failures stay isolated.
//! - Merges are applied only after the document finished loading.
//! - A lane whose merge equals the committed lane is not written.

use crate::board::{BoardModifiers, Document, DocumentId, DocumentSet, LaneUpsert};
use crate::model::board::{Item, Lane};
use crate::model::task::{nest_subtasks, RemoteTask, RemoteTaskList};
use crate::sync::adapter::TaskAdapter;
use crate::sync::outbound::push_card;
use crate::sync::{SyncContext, SyncError, SyncResult};
use crate::tree::find_lane_by_block_id;
use futures::future::join_all;
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Looks up open documents by id.
pub trait DocumentResolver: Send + Sync {
    fn resolve(&self, id: &DocumentId) -> Option<Arc<Document>>;
}

impl DocumentResolver for DocumentSet {
    fn resolve(&self, id: &DocumentId) -> Option<Arc<Document>> {
        self.get(id)
    }
}

/// What reconciliation did to one linked lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneOutcome {
    Unchanged,
    Updated,
    /// Lane was materialized from the remote list.
    Added,
    /// Remote list is gone; lane and registry link were removed.
    Removed,
}

#[derive(Debug)]
pub struct LaneReport {
    pub list_id: String,
    pub result: SyncResult<LaneOutcome>,
}

#[derive(Debug)]
pub struct DocumentReport {
    pub document: DocumentId,
    pub result: SyncResult<Vec<LaneReport>>,
}

impl DocumentReport {
    fn failed(document: DocumentId, err: SyncError) -> Self {
        Self {
            document,
            result: Err(err),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub documents: Vec<DocumentReport>,
}

impl SyncReport {
    /// Number of failed documents plus failed lanes.
    pub fn failures(&self) -> usize {
        self.documents
            .iter()
            .map(|report| match &report.result {
                Ok(lanes) => lanes.iter().filter(|lane| lane.result.is_err()).count(),
                Err(_) => 1,
            })
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }

    /// Outcome of one lane, if it was reconciled.
    pub fn lane(&self, document: &DocumentId, list_id: &str) -> Option<&SyncResult<LaneOutcome>> {
        self.documents
            .iter()
            .find(|report| report.document == *document)
            .and_then(|report| report.result.as_ref().ok())
            .and_then(|lanes| lanes.iter().find(|lane| lane.list_id == list_id))
            .map(|lane| &lane.result)
    }
}

/// Drives inbound reconciliation for registry entries.
pub struct Reconciler {
    ctx: Arc<SyncContext>,
    documents: Arc<dyn DocumentResolver>,
}

impl Reconciler {
    pub fn new(ctx: Arc<SyncContext>, documents: Arc<dyn DocumentResolver>) -> Self {
        Self { ctx, documents }
    }

    /// Reconciles every registry entry.
    pub async fn sync_all(&self) -> SyncReport {
        let started = Instant::now();
        let entries = self.ctx.registry.entries();
        if entries.is_empty() {
            return SyncReport::default();
        }

        let lists = match self.ctx.service.list_task_lists().await {
            Ok(lists) => lists,
            Err(err) => {
                warn!(
                    "event=sync_all module=sync status=error error_code=remote_call_failure error={}",
                    err
                );
                let documents = entries
                    .into_iter()
                    .map(|entry| {
                        DocumentReport::failed(
                            DocumentId::new(entry.file_path),
                            SyncError::RemoteCallFailure(err.clone()),
                        )
                    })
                    .collect();
                return SyncReport { documents };
            }
        };

        let documents = join_all(entries.into_iter().map(|entry| {
            self.sync_document_with(DocumentId::new(entry.file_path), entry.lane_ids, &lists)
        }))
        .await;
        let report = SyncReport { documents };
        info!(
            "event=sync_all module=sync status=ok documents={} failures={} duration_ms={}",
            report.documents.len(),
            report.failures(),
            started.elapsed().as_millis()
        );
        report
    }

    /// Reconciles the linked lanes of one document.
    pub async fn sync_document(&self, document: &DocumentId) -> DocumentReport {
        let lane_ids = self.ctx.registry.lanes_for(document);
        match self.ctx.service.list_task_lists().await {
            Ok(lists) => {
                self.sync_document_with(document.clone(), lane_ids, &lists)
                    .await
            }
            Err(err) => DocumentReport::failed(document.clone(), err.into()),
        }
    }

    async fn sync_document_with(
        &self,
        document_id: DocumentId,
        lane_ids: Vec<String>,
        lists: &[RemoteTaskList],
    ) -> DocumentReport {
        let Some(document) = self.documents.resolve(&document_id) else {
            warn!(
                "event=sync_document module=sync status=error error_code=document_missing document={}",
                document_id
            );
            if let Err(err) = self.ctx.registry.remove_document(&document_id) {
                warn!(
                    "event=sync_document module=sync status=error error_code=registry_error error={}",
                    err
                );
            }
            return DocumentReport::failed(
                document_id.clone(),
                SyncError::DocumentMissing(document_id),
            );
        };

        document.ready().await;
        let lanes = join_all(lane_ids.into_iter().map(|list_id| {
            let document = document.as_ref();
            async move {
                let result = self.reconcile_lane(document, &list_id, lists).await;
                LaneReport { list_id, result }
            }
        }))
        .await;
        DocumentReport {
            document: document_id,
            result: Ok(lanes),
        }
    }

    /// Reconciles one linked lane against the remote list `list_id`.
    ///
    /// `lists` is the current set of remote lists.
    pub async fn reconcile_lane(
        &self,
        document: &Document,
        list_id: &str,
        lists: &[RemoteTaskList],
    ) -> SyncResult<LaneOutcome> {
        let result = self.reconcile_lane_inner(document, list_id, lists).await;
        match &result {
            Ok(outcome) => info!(
                "event=reconcile_lane module=sync status=ok document={} list_id={} outcome={:?}",
                document.id(),
                list_id,
                outcome
            ),
            Err(err) => warn!(
                "event=reconcile_lane module=sync status=error document={} list_id={} error_code={} error={}",
                document.id(),
                list_id,
                err.code(),
                err
            ),
        }
        result
    }

    async fn reconcile_lane_inner(
        &self,
        document: &Document,
        list_id: &str,
        lists: &[RemoteTaskList],
    ) -> SyncResult<LaneOutcome> {
        let modifiers = BoardModifiers::new(document, &self.ctx.board);
        let Some(list) = lists.iter().find(|list| list.id == list_id) else {
            modifiers.remove_linked_lane(list_id).await?;
            self.ctx.registry.unlink(document.id(), list_id)?;
            return Ok(LaneOutcome::Removed);
        };

        // Pushed first so the listing below already contains the new tasks.
        let (pushed, push_error) = self.push_unlinked_cards(document, list_id).await;
        let tasks = nest_subtasks(self.ctx.service.list_tasks(list_id).await?);
        let adapter = &self.ctx.adapter;
        let outcome = modifiers
            .upsert_linked_lane(list_id, |existing| {
                merge_task_list(adapter, list, &tasks, existing)
            })
            .await?;
        let outcome = match outcome {
            LaneUpsert::Unchanged if pushed > 0 => LaneOutcome::Updated,
            LaneUpsert::Unchanged => LaneOutcome::Unchanged,
            LaneUpsert::Updated(_) => LaneOutcome::Updated,
            LaneUpsert::Added(_) => LaneOutcome::Added,
        };
        match push_error {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    /// Creates remote tasks for the unlinked cards of the lane linked to
    /// `list_id`, such as cards whose create failed when they were added.
    ///
    /// Stops at the first failure; the remaining cards wait for the next pass.
    async fn push_unlinked_cards(
        &self,
        document: &Document,
        list_id: &str,
    ) -> (usize, Option<SyncError>) {
        let snapshot = document.snapshot().await;
        let pending: Vec<Arc<Item>> = find_lane_by_block_id(&snapshot, list_id)
            .map(|(_, lane)| {
                lane.children
                    .iter()
                    .filter(|item| !item.data.linkage.is_linked())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut pushed = 0;
        for item in pending {
            match push_card(&self.ctx, document, list_id, &item).await {
                Ok(Some(_)) => pushed += 1,
                Ok(None) => {}
                Err(err) => return (pushed, Some(err)),
            }
        }
        (pushed, None)
    }
}

/// Merges a remote list and its nested tasks into `existing`.
///
/// Top-level, non-deleted tasks become cards in remote order, correlated to
/// local cards by block id. Unlinked local cards follow them until a later
/// pass pushes them. Linked cards
/// with no remote task left are dropped. Cards whose mapping did not change
/// keep their shared allocation.
pub fn merge_task_list(
    adapter: &TaskAdapter,
    list: &RemoteTaskList,
    tasks: &[RemoteTask],
    existing: Option<&Lane>,
) -> Lane {
    let mut children: Vec<Arc<Item>> = tasks
        .iter()
        .filter(|task| !task.deleted)
        .map(|task| {
            match existing.and_then(|lane| lane.find_item_by_block_id(&task.id)) {
                Some(local) => {
                    let mapped = adapter.task_to_item(task, Some(local));
                    if mapped == **local {
                        Arc::clone(local)
                    } else {
                        Arc::new(mapped)
                    }
                }
                None => Arc::new(adapter.task_to_item(task, None)),
            }
        })
        .collect();
    if let Some(lane) = existing {
        children.extend(
            lane.children
                .iter()
                .filter(|item| !item.data.linkage.is_linked())
                .cloned(),
        );
    }
    adapter.task_list_to_lane(list, existing, children)
}
