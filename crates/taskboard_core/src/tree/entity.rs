//! Entity views used by path-addressed tree operations.

use crate::model::board::{Board, EntityId, Item, Lane};
use crate::tree::TreeError;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Node kind at one tree level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Board,
    Lane,
    Item,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Board => write!(f, "board"),
            Self::Lane => write!(f, "lane"),
            Self::Item => write!(f, "item"),
        }
    }
}

/// Owned, insertable tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Lane(Arc<Lane>),
    Item(Arc<Item>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Lane(_) => EntityKind::Lane,
            Self::Item(_) => EntityKind::Item,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Self::Lane(lane) => lane.id,
            Self::Item(item) => item.id,
        }
    }

    pub fn as_lane(&self) -> Option<&Arc<Lane>> {
        match self {
            Self::Lane(lane) => Some(lane),
            Self::Item(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&Arc<Item>> {
        match self {
            Self::Item(item) => Some(item),
            Self::Lane(_) => None,
        }
    }
}

impl From<Lane> for Entity {
    fn from(value: Lane) -> Self {
        Self::Lane(Arc::new(value))
    }
}

impl From<Item> for Entity {
    fn from(value: Item) -> Self {
        Self::Item(Arc::new(value))
    }
}

impl From<Arc<Lane>> for Entity {
    fn from(value: Arc<Lane>) -> Self {
        Self::Lane(value)
    }
}

impl From<Arc<Item>> for Entity {
    fn from(value: Arc<Item>) -> Self {
        Self::Item(value)
    }
}

/// Borrowed view of a resolved node, root included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef<'a> {
    Board(&'a Board),
    Lane(&'a Arc<Lane>),
    Item(&'a Arc<Item>),
}

impl<'a> EntityRef<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Board(_) => EntityKind::Board,
            Self::Lane(_) => EntityKind::Lane,
            Self::Item(_) => EntityKind::Item,
        }
    }

    pub fn as_lane(&self) -> Option<&'a Arc<Lane>> {
        match *self {
            Self::Lane(lane) => Some(lane),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&'a Arc<Item>> {
        match *self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Clones the node handle. Returns `None` for the board root.
    pub fn to_entity(&self) -> Option<Entity> {
        match *self {
            Self::Board(_) => None,
            Self::Lane(lane) => Some(Entity::Lane(lane.clone())),
            Self::Item(item) => Some(Entity::Item(item.clone())),
        }
    }
}

/// Children collection of one container node.
///
/// Index errors are reported relative to the collection (`[index]`); callers
/// rebase them onto the full path with `TreeError::at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Children {
    Lanes(Vec<Arc<Lane>>),
    Items(Vec<Arc<Item>>),
}

impl Children {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Lanes(_) => EntityKind::Lane,
            Self::Items(_) => EntityKind::Item,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Lanes(lanes) => lanes.len(),
            Self::Items(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the child at `index`.
    pub fn get(&self, index: usize) -> Result<Entity, TreeError> {
        let found = match self {
            Self::Lanes(lanes) => lanes.get(index).cloned().map(Entity::Lane),
            Self::Items(items) => items.get(index).cloned().map(Entity::Item),
        };
        found.ok_or_else(|| TreeError::InvalidPath(vec![index]))
    }

    /// Inserts `entities` before `index`; `index == len` appends.
    pub fn insert(self, index: usize, entities: Vec<Entity>) -> Result<Self, TreeError> {
        if index > self.len() {
            return Err(TreeError::InvalidPath(vec![index]));
        }
        match self {
            Self::Lanes(mut lanes) => {
                let new_lanes = entities
                    .into_iter()
                    .map(|entity| match entity {
                        Entity::Lane(lane) => Ok(lane),
                        other => Err(kind_mismatch(index, EntityKind::Lane, other.kind())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                lanes.splice(index..index, new_lanes);
                Ok(Self::Lanes(lanes))
            }
            Self::Items(mut items) => {
                let new_items = entities
                    .into_iter()
                    .map(|entity| match entity {
                        Entity::Item(item) => Ok(item),
                        other => Err(kind_mismatch(index, EntityKind::Item, other.kind())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                items.splice(index..index, new_items);
                Ok(Self::Items(items))
            }
        }
    }

    /// Removes the child at `index`, returning the new collection and the removed node.
    pub fn remove(self, index: usize) -> Result<(Self, Entity), TreeError> {
        if index >= self.len() {
            return Err(TreeError::InvalidPath(vec![index]));
        }
        match self {
            Self::Lanes(mut lanes) => {
                let removed = lanes.remove(index);
                Ok((Self::Lanes(lanes), Entity::Lane(removed)))
            }
            Self::Items(mut items) => {
                let removed = items.remove(index);
                Ok((Self::Items(items), Entity::Item(removed)))
            }
        }
    }

    /// Replaces the child at `index` with `entity`.
    pub fn set(self, index: usize, entity: Entity) -> Result<Self, TreeError> {
        if index >= self.len() {
            return Err(TreeError::InvalidPath(vec![index]));
        }
        match (self, entity) {
            (Self::Lanes(mut lanes), Entity::Lane(lane)) => {
                lanes[index] = lane;
                Ok(Self::Lanes(lanes))
            }
            (Self::Items(mut items), Entity::Item(item)) => {
                items[index] = item;
                Ok(Self::Items(items))
            }
            (children, entity) => Err(kind_mismatch(index, children.kind(), entity.kind())),
        }
    }
}

fn kind_mismatch(index: usize, expected: EntityKind, actual: EntityKind) -> TreeError {
    TreeError::KindMismatch {
        path: vec![index],
        expected,
        actual,
    }
}
