//! Board domain model.
//!
//! # Responsibility
//! - Define the canonical board, lane and item records.
//! - Provide copy-constructors used by the tree store to build new values.
//!
//! # Invariants
//! - `id` values are unique across active and archived entities of one board.
//! - A linked lane's block id is unique across lanes of one board.
//! - A linked item's block id is unique among the items of its lane.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Stable internal identifier for lanes and items.
pub type EntityId = Uuid;

/// External correlation id of a remote task list or task.
pub type BlockId = String;

/// Correlation state between a local entity and the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "block_id", rename_all = "snake_case")]
pub enum Linkage {
    /// Local-only entity.
    #[default]
    Unlinked,
    /// Entity mirrors the remote entity with this id.
    Linked(BlockId),
}

impl Linkage {
    pub fn linked(block_id: impl Into<BlockId>) -> Self {
        Self::Linked(block_id.into())
    }

    pub fn block_id(&self) -> Option<&str> {
        match self {
            Self::Linked(block_id) => Some(block_id.as_str()),
            Self::Unlinked => None,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked(_))
    }
}

/// Sort mode remembered by a lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneSort {
    #[default]
    Unsorted,
    TitleAsc,
    TitleDesc,
    DateAsc,
    DateDesc,
}

/// Structured card metadata extracted from the card text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Calendar day the card is due.
    pub date: Option<NaiveDate>,
    /// Time of day the card is due. Only meaningful together with `date`.
    pub time: Option<NaiveTime>,
    /// `date` as written in the card text.
    pub date_str: Option<String>,
    /// `time` as written in the card text.
    pub time_str: Option<String>,
    pub tags: Vec<String>,
}

impl ItemMetadata {
    /// Returns the due instant used for date ordering.
    ///
    /// A card with a date but no time sorts at the start of that day.
    pub fn due_sort_key(&self) -> Option<(NaiveDate, NaiveTime)> {
        let date = self.date?;
        Some((date, self.time.unwrap_or(NaiveTime::MIN)))
    }

    pub fn has_due(&self) -> bool {
        self.date.is_some()
    }
}

/// Card payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    /// Display text without metadata annotations.
    pub title: String,
    /// Full source text including metadata annotations.
    pub title_raw: String,
    /// Normalized text used for matching and sorting.
    pub title_search: String,
    pub is_complete: bool,
    pub linkage: Linkage,
    pub metadata: ItemMetadata,
}

/// Card: the leaf content unit of a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: EntityId,
    pub data: ItemData,
}

impl Item {
    /// Creates an unlinked card from plain text with a generated id.
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self::with_id(
            Uuid::new_v4(),
            ItemData {
                title_search: normalize_search_text(&title),
                title_raw: title.clone(),
                title,
                ..ItemData::default()
            },
        )
    }

    /// Creates a card with a caller-provided id.
    pub fn with_id(id: EntityId, data: ItemData) -> Self {
        Self { id, data }
    }

    /// Returns a copy of this card carrying `data`.
    pub fn with_data(&self, data: ItemData) -> Self {
        Self { id: self.id, data }
    }

    /// Returns a copy of this card carrying `linkage`.
    pub fn with_linkage(&self, linkage: Linkage) -> Self {
        let mut data = self.data.clone();
        data.linkage = linkage;
        self.with_data(data)
    }

    /// Returns a copy of this card under a different id.
    pub fn with_new_id(&self, id: EntityId) -> Self {
        Self {
            id,
            data: self.data.clone(),
        }
    }

    pub fn block_id(&self) -> Option<&str> {
        self.data.linkage.block_id()
    }
}

/// Lane payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneData {
    pub title: String,
    pub linkage: Linkage,
    pub sorted: LaneSort,
    pub should_mark_items_complete: bool,
    /// `None` means unlimited.
    pub max_items: Option<u32>,
}

impl LaneData {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            linkage: Linkage::Unlinked,
            sorted: LaneSort::Unsorted,
            should_mark_items_complete: false,
            max_items: None,
        }
    }
}

/// Ordered list of cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    pub id: EntityId,
    pub children: Vec<Arc<Item>>,
    pub data: LaneData,
}

impl Lane {
    /// Creates an empty unlinked lane with a generated id.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), LaneData::new(title), Vec::new())
    }

    pub fn with_id(id: EntityId, data: LaneData, children: Vec<Arc<Item>>) -> Self {
        Self { id, children, data }
    }

    /// Returns a copy of this lane with `children`; data is cloned, items are shared.
    pub fn with_children(&self, children: Vec<Arc<Item>>) -> Self {
        Self {
            id: self.id,
            children,
            data: self.data.clone(),
        }
    }

    /// Returns a copy of this lane carrying `data`; items are shared.
    pub fn with_data(&self, data: LaneData) -> Self {
        Self {
            id: self.id,
            children: self.children.clone(),
            data,
        }
    }

    pub fn block_id(&self) -> Option<&str> {
        self.data.linkage.block_id()
    }

    /// Finds the child card linked to `block_id`.
    pub fn find_item_by_block_id(&self, block_id: &str) -> Option<&Arc<Item>> {
        self.children
            .iter()
            .find(|item| item.block_id() == Some(block_id))
    }
}

/// Root of the document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub children: Vec<Arc<Lane>>,
    /// Archived cards; lane archives are prepended, single cards appended.
    pub archive: Vec<Arc<Item>>,
}

impl Board {
    pub fn new(children: Vec<Arc<Lane>>) -> Self {
        Self {
            children,
            archive: Vec::new(),
        }
    }

    /// Returns a copy with `children`; the archive is shared.
    pub fn with_children(&self, children: Vec<Arc<Lane>>) -> Self {
        Self {
            children,
            archive: self.archive.clone(),
        }
    }

    /// Returns a copy with `items` placed in front of the archive.
    pub fn with_archive_prepended(&self, items: Vec<Arc<Item>>) -> Self {
        let mut archive = items;
        archive.extend(self.archive.iter().cloned());
        Self {
            children: self.children.clone(),
            archive,
        }
    }

    /// Returns a copy with `item` pushed onto the end of the archive.
    pub fn with_archive_appended(&self, item: Arc<Item>) -> Self {
        let mut archive = self.archive.clone();
        archive.push(item);
        Self {
            children: self.children.clone(),
            archive,
        }
    }

    /// Collects every lane and item id, including archived items.
    pub fn collect_ids(&self) -> HashSet<EntityId> {
        let mut ids = HashSet::new();
        for lane in &self.children {
            ids.insert(lane.id);
            ids.extend(lane.children.iter().map(|item| item.id));
        }
        ids.extend(self.archive.iter().map(|item| item.id));
        ids
    }
}

/// Normalizes card text for matching and sorting.
///
/// Lowercases and collapses whitespace runs into one space.
pub fn normalize_search_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
