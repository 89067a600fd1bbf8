//! Typed board events and observer fan-out.

use crate::board::DocumentId;
use crate::model::board::{Item, Lane};
use crate::tree::Path;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// One logical change made by a board operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    ItemAdded {
        document: DocumentId,
        item: Arc<Item>,
        lane: Arc<Lane>,
    },
    ItemUpdated {
        document: DocumentId,
        old_item: Arc<Item>,
        item: Arc<Item>,
        lane: Arc<Lane>,
    },
    ItemDeleted {
        document: DocumentId,
        item: Arc<Item>,
        lane: Arc<Lane>,
    },
    ItemArchived {
        document: DocumentId,
        path: Path,
        item: Arc<Item>,
        lane: Arc<Lane>,
    },
    /// `item` is the inserted copy; `lane` is its containing lane.
    ItemDuplicated {
        document: DocumentId,
        path: Path,
        item: Arc<Item>,
        lane: Arc<Lane>,
    },
    LaneAdded {
        document: DocumentId,
        lane: Arc<Lane>,
    },
    LaneUpdated {
        document: DocumentId,
        lane: Arc<Lane>,
    },
    LaneDeleted {
        document: DocumentId,
        lane: Arc<Lane>,
    },
    LaneArchived {
        document: DocumentId,
        lane: Arc<Lane>,
        items: Vec<Arc<Item>>,
    },
    LaneItemsArchived {
        document: DocumentId,
        lane: Arc<Lane>,
        items: Vec<Arc<Item>>,
    },
    /// `lane` is the inserted copy.
    LaneDuplicated {
        document: DocumentId,
        path: Path,
        lane: Arc<Lane>,
    },
}

impl BoardEvent {
    pub fn document(&self) -> &DocumentId {
        match self {
            Self::ItemAdded { document, .. }
            | Self::ItemUpdated { document, .. }
            | Self::ItemDeleted { document, .. }
            | Self::ItemArchived { document, .. }
            | Self::ItemDuplicated { document, .. }
            | Self::LaneAdded { document, .. }
            | Self::LaneUpdated { document, .. }
            | Self::LaneDeleted { document, .. }
            | Self::LaneArchived { document, .. }
            | Self::LaneItemsArchived { document, .. }
            | Self::LaneDuplicated { document, .. } => document,
        }
    }

    /// Stable event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemAdded { .. } => "item_added",
            Self::ItemUpdated { .. } => "item_updated",
            Self::ItemDeleted { .. } => "item_deleted",
            Self::ItemArchived { .. } => "item_archived",
            Self::ItemDuplicated { .. } => "item_duplicated",
            Self::LaneAdded { .. } => "lane_added",
            Self::LaneUpdated { .. } => "lane_updated",
            Self::LaneDeleted { .. } => "lane_deleted",
            Self::LaneArchived { .. } => "lane_archived",
            Self::LaneItemsArchived { .. } => "lane_items_archived",
            Self::LaneDuplicated { .. } => "lane_duplicated",
        }
    }

    /// Returns the lane the event is about, or the lane containing its card.
    pub fn lane(&self) -> &Arc<Lane> {
        match self {
            Self::ItemAdded { lane, .. }
            | Self::ItemUpdated { lane, .. }
            | Self::ItemDeleted { lane, .. }
            | Self::ItemArchived { lane, .. }
            | Self::ItemDuplicated { lane, .. }
            | Self::LaneAdded { lane, .. }
            | Self::LaneUpdated { lane, .. }
            | Self::LaneDeleted { lane, .. }
            | Self::LaneArchived { lane, .. }
            | Self::LaneItemsArchived { lane, .. }
            | Self::LaneDuplicated { lane, .. } => lane,
        }
    }
}

/// Receives board events synchronously, in emission order.
///
/// Implementations must not block; hand work off to a task instead.
pub trait BoardObserver: Send + Sync {
    fn on_event(&self, event: &BoardEvent);
}

/// Handle returned by `EventBus::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ObserverList = Vec<(SubscriptionId, Arc<dyn BoardObserver>)>;

/// Fan-out of board events to registered observers.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<RwLock<ObserverList>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn BoardObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, observer));
        id
    }

    /// Removes a subscription. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn emit(&self, event: BoardEvent) {
        let observers: ObserverList = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        debug!(
            "event=board_event module=board name={} document={} observers={}",
            event.name(),
            event.document(),
            observers.len()
        );
        for (_, observer) in observers {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .observers
            .read()
            .map(|observers| observers.len())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("observers", &count).finish()
    }
}

/// Observer forwarding events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<BoardEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BoardEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl BoardObserver for ChannelObserver {
    fn on_event(&self, event: &BoardEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(
                "event=board_event_dropped module=board name={} reason=receiver_closed",
                event.name()
            );
        }
    }
}
