//! Named board operations.
//!
//! # Responsibility
//! - Compose tree store primitives into user-level operations.
//! - Emit exactly one event per logical change.
//!
//! # Invariants
//! - Every operation holds the document lock from read to commit.
//! - The new board is fully computed before any event is emitted.
//! - Duplicated entities receive ids absent from the whole board.

use super::archive::stamp_items;
use super::sort;
use crate::board::{
    BoardError, BoardEvent, BoardResult, Document, DocumentId, EventBus, ItemContentRewriter,
    PlainContentRewriter,
};
use crate::model::board::{Board, EntityId, Item, Lane, Linkage};
use crate::settings::BoardSettings;
use crate::tree::{
    self, append_entities, find_item_path, find_lane_by_block_id, get_entity_from_path,
    get_entity_stack_from_path, insert_entity, move_entity, prepend_entities, remove_entity,
    replace_entity, require_item, require_lane, Entity, EntityRef, Path, TreeError,
};
use chrono::{Local, NaiveDateTime};
use log::debug;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Explicit context passed to every board operation.
#[derive(Clone)]
pub struct BoardContext {
    pub settings: BoardSettings,
    pub events: EventBus,
    pub rewriter: Arc<dyn ItemContentRewriter>,
    clock: Clock,
}

impl BoardContext {
    /// Creates a context with the plain rewriter and the local wall clock.
    pub fn new(settings: BoardSettings) -> BoardResult<Self> {
        let rewriter = Arc::new(PlainContentRewriter::new(&settings)?);
        Ok(Self {
            settings,
            events: EventBus::new(),
            rewriter,
            clock: Arc::new(|| Local::now().naive_local()),
        })
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn ItemContentRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Replaces the clock used for archive stamps.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }
}

impl Debug for BoardContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardContext")
            .field("settings", &self.settings)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Outcome of merging into the lane linked to one block id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneUpsert {
    /// Merge produced the committed lane; nothing was written.
    Unchanged,
    /// Existing lane at this path was replaced.
    Updated(Path),
    /// A new lane was appended at this path.
    Added(Path),
}

/// Outcome of attaching a remote block id to a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAttach {
    /// The card now carries the block id.
    Attached,
    /// The card already carried the block id.
    Unchanged,
    /// The card is gone or is linked to another block id.
    Rejected,
}

/// Operations over one document.
pub struct BoardModifiers<'a> {
    document: &'a Document,
    ctx: &'a BoardContext,
}

impl<'a> BoardModifiers<'a> {
    pub fn new(document: &'a Document, ctx: &'a BoardContext) -> Self {
        Self { document, ctx }
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Appends cards to the lane at `lane_path`.
    pub async fn append_items(&self, lane_path: &[usize], items: Vec<Item>) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, lane_path)?.clone();
        let items = into_arcs(items);
        let next = append_entities(&board, lane_path, item_entities(&items))?;
        self.emit_items_added(&lane, &items);
        commit(&mut board, next);
        log_mutation("append_items", self.document.id(), items.len());
        Ok(())
    }

    /// Prepends cards to the lane at `lane_path`.
    pub async fn prepend_items(&self, lane_path: &[usize], items: Vec<Item>) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, lane_path)?.clone();
        let items = into_arcs(items);
        let next = prepend_entities(&board, lane_path, item_entities(&items))?;
        self.emit_items_added(&lane, &items);
        commit(&mut board, next);
        log_mutation("prepend_items", self.document.id(), items.len());
        Ok(())
    }

    /// Inserts cards at the item path `path`.
    pub async fn insert_items(&self, path: &[usize], items: Vec<Item>) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, parent_path(path)?)?.clone();
        let items = into_arcs(items);
        let next = insert_entity(&board, path, item_entities(&items))?;
        self.emit_items_added(&lane, &items);
        commit(&mut board, next);
        log_mutation("insert_items", self.document.id(), items.len());
        Ok(())
    }

    /// Replaces the card at `path` with `items`.
    pub async fn split_item(&self, path: &[usize], items: Vec<Item>) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, parent_path(path)?)?.clone();
        require_item(&board, path)?;
        let items = into_arcs(items);
        let removed = remove_entity(&board, path)?;
        let next = insert_entity(&removed, path, item_entities(&items))?;
        self.emit_items_added(&lane, &items);
        commit(&mut board, next);
        log_mutation("split_item", self.document.id(), items.len());
        Ok(())
    }

    pub async fn move_item_to_top(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        require_item(&board, path)?;
        let mut destination = parent_path(path)?.to_vec();
        destination.push(0);
        let next = move_entity(&board, path, &destination)?;
        commit(&mut board, next);
        log_mutation("move_item_to_top", self.document.id(), 1);
        Ok(())
    }

    pub async fn move_item_to_bottom(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        require_item(&board, path)?;
        let lane_path = parent_path(path)?;
        let len = require_lane(&board, lane_path)?.children.len();
        let mut destination = lane_path.to_vec();
        destination.push(len);
        let next = move_entity(&board, path, &destination)?;
        commit(&mut board, next);
        log_mutation("move_item_to_bottom", self.document.id(), 1);
        Ok(())
    }

    /// Appends a lane to the board.
    pub async fn add_lane(&self, lane: Lane) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        self.add_lane_locked(&mut board, lane)?;
        log_mutation("add_lane", self.document.id(), 1);
        Ok(())
    }

    /// Inserts a lane at the lane path `path`.
    pub async fn insert_lane(&self, path: &[usize], lane: Lane) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        ensure_unique_lane_linkage(&board, &lane, None)?;
        let lane = Arc::new(lane);
        let next = insert_entity(&board, path, vec![Entity::Lane(lane.clone())])?;
        self.emit(BoardEvent::LaneAdded {
            document: self.document_id(),
            lane,
        });
        commit(&mut board, next);
        log_mutation("insert_lane", self.document.id(), 1);
        Ok(())
    }

    /// Replaces the lane at `path` with `lane`.
    pub async fn update_lane(&self, path: &[usize], lane: Lane) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        self.update_lane_locked(&mut board, path, lane)?;
        log_mutation("update_lane", self.document.id(), 1);
        Ok(())
    }

    /// Removes the lane at `path` and unshifts its cards onto the archive.
    pub async fn archive_lane(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, path)?.clone();
        let removed = remove_entity(&board, path)?;
        let archived = self.stamp(&lane.children).await?;
        let next = removed.with_archive_prepended(archived);
        self.emit(BoardEvent::LaneArchived {
            document: self.document_id(),
            items: lane.children.clone(),
            lane,
        });
        commit(&mut board, next);
        log_mutation("archive_lane", self.document.id(), 1);
        Ok(())
    }

    /// Moves every card of the lane at `path` onto the archive; the lane survives.
    pub async fn archive_lane_items(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, path)?.clone();
        let cleared = tree::update_lane(&board, path, |lane| lane.with_children(Vec::new()))?;
        let archived = self.stamp(&lane.children).await?;
        let count = archived.len();
        let next = cleared.with_archive_prepended(archived);
        self.emit(BoardEvent::LaneItemsArchived {
            document: self.document_id(),
            items: lane.children.clone(),
            lane,
        });
        commit(&mut board, next);
        log_mutation("archive_lane_items", self.document.id(), count);
        Ok(())
    }

    /// Removes the lane or card at `path`.
    pub async fn delete_entity(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        self.delete_locked(&mut board, path)?;
        log_mutation("delete_entity", self.document.id(), 1);
        Ok(())
    }

    /// Replaces the card at `path` with `item`.
    pub async fn update_item(&self, path: &[usize], item: Item) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        self.update_item_locked(&mut board, path, item)?;
        log_mutation("update_item", self.document.id(), 1);
        Ok(())
    }

    /// Removes the card at `path` and pushes it onto the end of the archive.
    pub async fn archive_item(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, parent_path(path)?)?.clone();
        let item = require_item(&board, path)?.clone();
        let removed = remove_entity(&board, path)?;
        let archived = self.stamp(std::slice::from_ref(&item)).await?;
        let next = archived
            .into_iter()
            .fold(removed, |board, archived| board.with_archive_appended(archived));
        self.emit(BoardEvent::ItemArchived {
            document: self.document_id(),
            path: path.to_vec(),
            item,
            lane,
        });
        commit(&mut board, next);
        log_mutation("archive_item", self.document.id(), 1);
        Ok(())
    }

    /// Inserts an unlinked copy of the node at `path` at the same path.
    ///
    /// The copy (and, for lanes, each copied card) gets a fresh id.
    pub async fn duplicate_entity(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let entity = get_entity_from_path(&board, path)?
            .to_entity()
            .ok_or(TreeError::EmptyPath)?;
        let mut taken = board.collect_ids();

        let (copy, event) = match entity {
            Entity::Lane(lane) => {
                let children = lane
                    .children
                    .iter()
                    .map(|item| {
                        Arc::new(
                            item.with_new_id(fresh_id(&mut taken))
                                .with_linkage(Linkage::Unlinked),
                        )
                    })
                    .collect();
                let mut data = lane.data.clone();
                data.linkage = Linkage::Unlinked;
                let copy = Arc::new(Lane::with_id(fresh_id(&mut taken), data, children));
                let event = BoardEvent::LaneDuplicated {
                    document: self.document_id(),
                    path: path.to_vec(),
                    lane: copy.clone(),
                };
                (Entity::Lane(copy), event)
            }
            Entity::Item(item) => {
                let lane = require_lane(&board, parent_path(path)?)?.clone();
                let copy = Arc::new(
                    item.with_new_id(fresh_id(&mut taken))
                        .with_linkage(Linkage::Unlinked),
                );
                let event = BoardEvent::ItemDuplicated {
                    document: self.document_id(),
                    path: path.to_vec(),
                    item: copy.clone(),
                    lane,
                };
                (Entity::Item(copy), event)
            }
        };

        let next = insert_entity(&board, path, vec![copy])?;
        self.emit(event);
        commit(&mut board, next);
        log_mutation("duplicate_entity", self.document.id(), 1);
        Ok(())
    }

    /// Sorts the lane at `path` by title, toggling direction on repeat.
    pub async fn sort_lane_by_title(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let sorted = sort::sort_lane_by_title(require_lane(&board, path)?);
        self.update_lane_locked(&mut board, path, sorted)?;
        log_mutation("sort_lane_by_title", self.document.id(), 1);
        Ok(())
    }

    /// Sorts the lane at `path` by due date, toggling direction on repeat.
    pub async fn sort_lane_by_date(&self, path: &[usize]) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let sorted = sort::sort_lane_by_date(require_lane(&board, path)?);
        self.update_lane_locked(&mut board, path, sorted)?;
        log_mutation("sort_lane_by_date", self.document.id(), 1);
        Ok(())
    }

    /// Sets the lane's linkage. Unlinking also unlinks the lane's cards.
    pub async fn set_lane_linkage(&self, path: &[usize], linkage: Linkage) -> BoardResult<()> {
        let mut board = self.document.lock().await;
        let lane = require_lane(&board, path)?.clone();
        let children = if linkage.is_linked() {
            lane.children.clone()
        } else {
            lane.children
                .iter()
                .map(|item| {
                    if item.data.linkage.is_linked() {
                        Arc::new(item.with_linkage(Linkage::Unlinked))
                    } else {
                        item.clone()
                    }
                })
                .collect()
        };
        let mut data = lane.data.clone();
        data.linkage = linkage;
        self.update_lane_locked(&mut board, path, Lane::with_id(lane.id, data, children))?;
        log_mutation("set_lane_linkage", self.document.id(), 1);
        Ok(())
    }

    pub async fn clear_lane_linkage(&self, path: &[usize]) -> BoardResult<()> {
        self.set_lane_linkage(path, Linkage::Unlinked).await
    }

    /// Links the card with `item_id` to `block_id`.
    ///
    /// A card of the same lane already carrying `block_id` (materialized by a
    /// reconciliation that ran in between) is dropped in the same commit, so
    /// the lane keeps one card per remote task.
    pub async fn attach_item_linkage(&self, item_id: EntityId, block_id: &str) -> BoardResult<LinkAttach> {
        let mut board = self.document.lock().await;
        let Some(path) = find_item_path(&board, item_id) else {
            return Ok(LinkAttach::Rejected);
        };
        let item = require_item(&board, &path)?.clone();
        match item.block_id() {
            Some(existing) if existing == block_id => return Ok(LinkAttach::Unchanged),
            Some(_) => return Ok(LinkAttach::Rejected),
            None => {}
        }

        let linked = Arc::new(item.with_linkage(Linkage::linked(block_id)));
        let lane_path = parent_path(&path)?;
        let lane = require_lane(&board, lane_path)?.clone();
        let has_twin = lane
            .children
            .iter()
            .any(|card| card.id != item_id && card.block_id() == Some(block_id));
        if has_twin {
            let children = lane
                .children
                .iter()
                .filter_map(|card| {
                    if card.id == item_id {
                        Some(linked.clone())
                    } else if card.block_id() == Some(block_id) {
                        None
                    } else {
                        Some(card.clone())
                    }
                })
                .collect();
            self.update_lane_locked(&mut board, lane_path, lane.with_children(children))?;
            debug!(
                "event=attach_item_linkage module=board status=ok document={} block_id={} dropped_twin=true",
                self.document.id(),
                block_id
            );
        } else {
            self.update_item_locked(&mut board, &path, (*linked).clone())?;
        }
        log_mutation("attach_item_linkage", self.document.id(), 1);
        Ok(LinkAttach::Attached)
    }

    /// Merges into the lane linked to `block_id` against the latest board.
    ///
    /// `merge` receives the current lane, if any, and returns the desired lane.
    /// Nothing is written when the result equals the current lane.
    pub async fn upsert_linked_lane<F>(&self, block_id: &str, merge: F) -> BoardResult<LaneUpsert>
    where
        F: FnOnce(Option<&Lane>) -> Lane,
    {
        let mut board = self.document.lock().await;
        let existing = find_lane_by_block_id(&board, block_id).map(|(path, lane)| (path, lane.clone()));
        let outcome = match existing {
            Some((path, lane)) => {
                let merged = merge(Some(&lane));
                if merged == *lane {
                    LaneUpsert::Unchanged
                } else {
                    self.update_lane_locked(&mut board, &path, merged)?;
                    LaneUpsert::Updated(path)
                }
            }
            None => {
                let path = vec![board.children.len()];
                self.add_lane_locked(&mut board, merge(None))?;
                LaneUpsert::Added(path)
            }
        };
        debug!(
            "event=lane_upsert module=board document={} block_id={} outcome={:?}",
            self.document.id(),
            block_id,
            outcome
        );
        Ok(outcome)
    }

    /// Deletes the lane linked to `block_id`, returning its former path.
    pub async fn remove_linked_lane(&self, block_id: &str) -> BoardResult<Option<Path>> {
        let mut board = self.document.lock().await;
        let Some((path, _)) = find_lane_by_block_id(&board, block_id) else {
            return Ok(None);
        };
        self.delete_locked(&mut board, &path)?;
        log_mutation("remove_linked_lane", self.document.id(), 1);
        Ok(Some(path))
    }

    fn add_lane_locked(&self, board: &mut Arc<Board>, lane: Lane) -> BoardResult<()> {
        ensure_unique_lane_linkage(board, &lane, None)?;
        let lane = Arc::new(lane);
        let next = append_entities(board, &[], vec![Entity::Lane(lane.clone())])?;
        self.emit(BoardEvent::LaneAdded {
            document: self.document_id(),
            lane,
        });
        commit(board, next);
        Ok(())
    }

    fn update_lane_locked(&self, board: &mut Arc<Board>, path: &[usize], lane: Lane) -> BoardResult<()> {
        require_lane(board, path)?;
        ensure_unique_lane_linkage(board, &lane, Some(path))?;
        let lane = Arc::new(lane);
        let next = replace_entity(board, path, Entity::Lane(lane.clone()))?;
        self.emit(BoardEvent::LaneUpdated {
            document: self.document_id(),
            lane,
        });
        commit(board, next);
        Ok(())
    }

    fn update_item_locked(&self, board: &mut Arc<Board>, path: &[usize], item: Item) -> BoardResult<()> {
        let lane = require_lane(board, parent_path(path)?)?.clone();
        let old_item = require_item(board, path)?.clone();
        let item = Arc::new(item);
        let next = replace_entity(board, path, Entity::Item(item.clone()))?;
        self.emit(BoardEvent::ItemUpdated {
            document: self.document_id(),
            old_item,
            item,
            lane,
        });
        commit(board, next);
        Ok(())
    }

    fn delete_locked(&self, board: &mut Arc<Board>, path: &[usize]) -> BoardResult<()> {
        let event = {
            let stack = get_entity_stack_from_path(board, path)?;
            match stack.as_slice() {
                [.., EntityRef::Lane(lane), EntityRef::Item(item)] => BoardEvent::ItemDeleted {
                    document: self.document_id(),
                    item: Arc::clone(item),
                    lane: Arc::clone(lane),
                },
                [.., EntityRef::Lane(lane)] => BoardEvent::LaneDeleted {
                    document: self.document_id(),
                    lane: Arc::clone(lane),
                },
                _ => return Err(TreeError::EmptyPath.into()),
            }
        };
        let next = remove_entity(board, path)?;
        self.emit(event);
        commit(board, next);
        Ok(())
    }

    /// Applies archive stamps; failures go to the document error channel.
    async fn stamp(&self, items: &[Arc<Item>]) -> BoardResult<Vec<Arc<Item>>> {
        let stamped = stamp_items(
            self.ctx.rewriter.as_ref(),
            &self.ctx.settings,
            items,
            self.ctx.now(),
        )
        .await;
        if let Err(err) = &stamped {
            self.document.report_error(err.clone());
        }
        stamped
    }

    fn emit_items_added(&self, lane: &Arc<Lane>, items: &[Arc<Item>]) {
        for item in items {
            self.emit(BoardEvent::ItemAdded {
                document: self.document_id(),
                item: item.clone(),
                lane: lane.clone(),
            });
        }
    }

    fn emit(&self, event: BoardEvent) {
        self.ctx.events.emit(event);
    }

    fn document_id(&self) -> DocumentId {
        self.document.id().clone()
    }
}

fn commit(board: &mut Arc<Board>, next: Board) {
    *board = Arc::new(next);
}

fn parent_path(path: &[usize]) -> Result<&[usize], TreeError> {
    path.split_last()
        .map(|(_, parent)| parent)
        .ok_or(TreeError::EmptyPath)
}

/// Rejects `lane` when another lane, other than the one at `replacing`, is
/// linked to the same block id.
fn ensure_unique_lane_linkage(board: &Board, lane: &Lane, replacing: Option<&[usize]>) -> BoardResult<()> {
    let Some(block_id) = lane.block_id() else {
        return Ok(());
    };
    match find_lane_by_block_id(board, block_id) {
        Some((other, _)) if Some(other.as_slice()) != replacing => {
            Err(BoardError::DuplicateLinkage(block_id.to_string()))
        }
        _ => Ok(()),
    }
}

fn into_arcs(items: Vec<Item>) -> Vec<Arc<Item>> {
    items.into_iter().map(Arc::new).collect()
}

fn item_entities(items: &[Arc<Item>]) -> Vec<Entity> {
    items.iter().cloned().map(Entity::Item).collect()
}

fn fresh_id(taken: &mut HashSet<EntityId>) -> EntityId {
    loop {
        let id = Uuid::new_v4();
        if taken.insert(id) {
            return id;
        }
    }
}

fn log_mutation(op: &str, document: &DocumentId, count: usize) {
    debug!(
        "event=board_mutation module=board op={} document={} count={} status=ok",
        op, document, count
    );
}
