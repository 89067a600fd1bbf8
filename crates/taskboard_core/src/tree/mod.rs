//! Path-addressed tree store.
//!
//! # Responsibility
//! - Resolve paths (`[]` board, `[lane]`, `[lane, item]`) to tree nodes.
//! - Provide pure insert/remove/move/update primitives over `Board`.
//!
//! # Invariants
//! - Input boards are never modified; a new board is returned.
//! - Nodes outside the edited path are shared by `Arc` with the input.
//! - A path that does not resolve fails the whole operation.

mod entity;

pub use entity::{Children, Entity, EntityKind, EntityRef};

use crate::model::board::{Board, EntityId, Item, Lane};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Index sequence addressing a node from the board root.
pub type Path = Vec<usize>;

/// Result type used by tree store operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors from path resolution and structural edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// An index along the path is out of bounds for its parent.
    InvalidPath(Path),
    /// The node at `path` has a different kind than the operation needs.
    KindMismatch {
        path: Path,
        expected: EntityKind,
        actual: EntityKind,
    },
    /// The operation needs a child path but got the board root.
    EmptyPath,
}

impl TreeError {
    /// Rebases a collection-relative error onto the full `path`.
    pub fn at(self, path: &[usize]) -> Self {
        match self {
            Self::InvalidPath(_) => Self::InvalidPath(path.to_vec()),
            Self::KindMismatch {
                expected, actual, ..
            } => Self::KindMismatch {
                path: path.to_vec(),
                expected,
                actual,
            },
            Self::EmptyPath => Self::EmptyPath,
        }
    }
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "path does not resolve: {path:?}"),
            Self::KindMismatch {
                path,
                expected,
                actual,
            } => write!(f, "expected {expected} at {path:?}, found {actual}"),
            Self::EmptyPath => write!(f, "operation requires a non-root path"),
        }
    }
}

impl Error for TreeError {}

/// Resolves `path` to the node it addresses.
pub fn get_entity_from_path<'a>(board: &'a Board, path: &[usize]) -> TreeResult<EntityRef<'a>> {
    let stack = get_entity_stack_from_path(board, path)?;
    stack
        .last()
        .copied()
        .ok_or_else(|| TreeError::InvalidPath(path.to_vec()))
}

/// Resolves `path` and returns every node from the root down to the target.
pub fn get_entity_stack_from_path<'a>(
    board: &'a Board,
    path: &[usize],
) -> TreeResult<Vec<EntityRef<'a>>> {
    let mut stack = Vec::with_capacity(path.len() + 1);
    stack.push(EntityRef::Board(board));
    for &index in path {
        let next = match stack.last().copied() {
            Some(EntityRef::Board(board)) => board.children.get(index).map(EntityRef::Lane),
            Some(EntityRef::Lane(lane)) => lane.children.get(index).map(EntityRef::Item),
            _ => None,
        };
        stack.push(next.ok_or_else(|| TreeError::InvalidPath(path.to_vec()))?);
    }
    Ok(stack)
}

/// Inserts `entities` as siblings at the position named by the last path index.
pub fn insert_entity(board: &Board, path: &[usize], entities: Vec<Entity>) -> TreeResult<Board> {
    let (parent, index) = split_path(path)?;
    modify_children(board, parent, |children| children.insert(index, entities))
        .map_err(|err| err.at(path))
}

/// Appends `entities` to the children of the node at `container_path`.
pub fn append_entities(
    board: &Board,
    container_path: &[usize],
    entities: Vec<Entity>,
) -> TreeResult<Board> {
    modify_children(board, container_path, |children| {
        let len = children.len();
        children.insert(len, entities)
    })
    .map_err(|err| err.at(container_path))
}

/// Prepends `entities` to the children of the node at `container_path`.
pub fn prepend_entities(
    board: &Board,
    container_path: &[usize],
    entities: Vec<Entity>,
) -> TreeResult<Board> {
    modify_children(board, container_path, |children| children.insert(0, entities))
        .map_err(|err| err.at(container_path))
}

/// Removes the node at `path`, shifting later siblings left.
pub fn remove_entity(board: &Board, path: &[usize]) -> TreeResult<Board> {
    let (parent, index) = split_path(path)?;
    modify_children(board, parent, |children| {
        children.remove(index).map(|(children, _)| children)
    })
    .map_err(|err| err.at(path))
}

/// Moves the node at `source` to `destination`.
///
/// When both paths share a parent and the source precedes the destination,
/// the destination index is read against the list after removal, i.e. it is
/// decremented by one.
pub fn move_entity(board: &Board, source: &[usize], destination: &[usize]) -> TreeResult<Board> {
    let (source_parent, source_index) = split_path(source)?;
    let (destination_parent, destination_index) = split_path(destination)?;
    let entity = get_entity_from_path(board, source)?
        .to_entity()
        .ok_or(TreeError::EmptyPath)?;

    let removed = remove_entity(board, source)?;
    let adjusted_index = if source_parent == destination_parent && source_index < destination_index
    {
        destination_index - 1
    } else {
        destination_index
    };
    let mut adjusted = destination_parent.to_vec();
    adjusted.push(adjusted_index);

    insert_entity(&removed, &adjusted, vec![entity]).map_err(|err| err.at(destination))
}

/// Replaces the node at `path` with the value computed by `update`.
///
/// `update` receives the current node and must return a node of the same kind.
pub fn update_entity<F>(board: &Board, path: &[usize], update: F) -> TreeResult<Board>
where
    F: FnOnce(Entity) -> Entity,
{
    let (parent, index) = split_path(path)?;
    modify_children(board, parent, |children| {
        let current = children.get(index)?;
        children.set(index, update(current))
    })
    .map_err(|err| err.at(path))
}

/// Replaces the lane at `path` with the value computed by `update`.
pub fn update_lane<F>(board: &Board, path: &[usize], update: F) -> TreeResult<Board>
where
    F: FnOnce(&Lane) -> Lane,
{
    let lane = require_lane(board, path)?;
    let replacement = Entity::from(update(lane));
    update_entity(board, path, move |_| replacement)
}

/// Replaces the item at `path` with the value computed by `update`.
pub fn update_item<F>(board: &Board, path: &[usize], update: F) -> TreeResult<Board>
where
    F: FnOnce(&Item) -> Item,
{
    let item = require_item(board, path)?;
    let replacement = Entity::from(update(item));
    update_entity(board, path, move |_| replacement)
}

/// Applies `update` to the children collection of the target's parent.
///
/// `update` receives the collection and the target's index within it. Used
/// when the caller holds a fully formed replacement (`Children::set`).
pub fn update_parent_entity<F>(board: &Board, path: &[usize], update: F) -> TreeResult<Board>
where
    F: FnOnce(Children, usize) -> TreeResult<Children>,
{
    let (parent, index) = split_path(path)?;
    get_entity_from_path(board, path)?;
    modify_children(board, parent, |children| update(children, index)).map_err(|err| err.at(path))
}

/// Replaces the node at `path` with `entity`.
pub fn replace_entity(board: &Board, path: &[usize], entity: Entity) -> TreeResult<Board> {
    update_parent_entity(board, path, move |children, index| {
        children.set(index, entity)
    })
}

/// Returns the lane at `path` or a kind error.
pub fn require_lane<'a>(board: &'a Board, path: &[usize]) -> TreeResult<&'a Arc<Lane>> {
    let entity = get_entity_from_path(board, path)?;
    entity.as_lane().ok_or_else(|| TreeError::KindMismatch {
        path: path.to_vec(),
        expected: EntityKind::Lane,
        actual: entity.kind(),
    })
}

/// Returns the item at `path` or a kind error.
pub fn require_item<'a>(board: &'a Board, path: &[usize]) -> TreeResult<&'a Arc<Item>> {
    let entity = get_entity_from_path(board, path)?;
    entity.as_item().ok_or_else(|| TreeError::KindMismatch {
        path: path.to_vec(),
        expected: EntityKind::Item,
        actual: entity.kind(),
    })
}

/// Finds the lane linked to `block_id`.
pub fn find_lane_by_block_id<'a>(board: &'a Board, block_id: &str) -> Option<(Path, &'a Arc<Lane>)> {
    board
        .children
        .iter()
        .enumerate()
        .find(|(_, lane)| lane.block_id() == Some(block_id))
        .map(|(index, lane)| (vec![index], lane))
}

/// Finds the active path of the item with `item_id`.
pub fn find_item_path(board: &Board, item_id: EntityId) -> Option<Path> {
    board
        .children
        .iter()
        .enumerate()
        .find_map(|(lane_index, lane)| {
            lane.children
                .iter()
                .position(|item| item.id == item_id)
                .map(|item_index| vec![lane_index, item_index])
        })
}

fn split_path(path: &[usize]) -> TreeResult<(&[usize], usize)> {
    match path.split_last() {
        Some((&index, parent)) => Ok((parent, index)),
        None => Err(TreeError::EmptyPath),
    }
}

/// Rebuilds the spine from the root to `parent_path` around new children.
fn modify_children<F>(board: &Board, parent_path: &[usize], update: F) -> TreeResult<Board>
where
    F: FnOnce(Children) -> TreeResult<Children>,
{
    match parent_path {
        [] => match update(Children::Lanes(board.children.clone()))? {
            Children::Lanes(lanes) => Ok(board.with_children(lanes)),
            Children::Items(_) => Err(TreeError::KindMismatch {
                path: Vec::new(),
                expected: EntityKind::Lane,
                actual: EntityKind::Item,
            }),
        },
        [lane_index] => {
            let lane = board
                .children
                .get(*lane_index)
                .ok_or_else(|| TreeError::InvalidPath(parent_path.to_vec()))?;
            match update(Children::Items(lane.children.clone()))? {
                Children::Items(items) => {
                    let mut lanes = board.children.clone();
                    lanes[*lane_index] = Arc::new(lane.with_children(items));
                    Ok(board.with_children(lanes))
                }
                Children::Lanes(_) => Err(TreeError::KindMismatch {
                    path: parent_path.to_vec(),
                    expected: EntityKind::Item,
                    actual: EntityKind::Lane,
                }),
            }
        }
        _ => {
            let entity = get_entity_from_path(board, parent_path)?;
            Err(TreeError::KindMismatch {
                path: parent_path.to_vec(),
                expected: EntityKind::Lane,
                actual: entity.kind(),
            })
        }
    }
}
