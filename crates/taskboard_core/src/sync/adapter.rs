//! Mapping between board entities and remote task entities.
//!
//! # Responsibility
//! - Translate lanes/cards to task lists/tasks and back.
//! - Encode due instants as card annotations and card metadata as RFC 3339 instants.
//!
//! # Invariants
//! - Remote fields without a local analogue survive an update untouched.
//! - `updated` is only stamped when the mapped task differs from the previous one.
//! - Due instants are converted in an explicit zone, resolved per date.

use crate::model::board::{
    normalize_search_text, Item, ItemData, ItemMetadata, Lane, LaneData, Linkage,
};
use crate::model::task::{NewRemoteTask, RemoteTask, RemoteTaskList, RemoteTaskStatus};
use crate::settings::{BoardSettings, DueZone, SyncSettings};
use crate::sync::client::UpdateMode;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use log::debug;
use std::fmt::Write;
use std::sync::Arc;
use uuid::Uuid;

/// Result of mapping a card onto its previously fetched task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub task: RemoteTask,
    /// The mapped task differs from the previous one.
    pub changed: bool,
    /// Status flipped between `needsAction` and `completed`.
    pub completion_changed: bool,
    /// The previous task had a due instant and the card no longer does.
    pub due_cleared: bool,
}

impl TaskUpdate {
    /// Cleared fields only disappear remotely under a full replace.
    pub fn update_mode(&self) -> UpdateMode {
        if self.completion_changed || self.due_cleared {
            UpdateMode::Replace
        } else {
            UpdateMode::Patch
        }
    }
}

/// Stateless field mapper configured from board settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAdapter {
    date_trigger: String,
    time_trigger: String,
    date_format: String,
    time_format: String,
    zone: DueZone,
}

impl TaskAdapter {
    pub fn new(settings: &BoardSettings, zone: impl Into<DueZone>) -> Self {
        Self {
            date_trigger: settings.date_trigger.clone(),
            time_trigger: settings.time_trigger.clone(),
            date_format: settings.date_format.clone(),
            time_format: settings.time_format.clone(),
            zone: zone.into(),
        }
    }

    pub fn from_settings(board: &BoardSettings, sync: &SyncSettings) -> Self {
        Self::new(board, sync.due_zone())
    }

    pub fn zone(&self) -> DueZone {
        self.zone
    }

    /// Builds the lane mirroring `list`.
    ///
    /// An existing lane keeps its id and lane-only settings; a new lane gets
    /// a fresh id and defaults.
    pub fn task_list_to_lane(
        &self,
        list: &RemoteTaskList,
        existing: Option<&Lane>,
        items: Vec<Arc<Item>>,
    ) -> Lane {
        let (id, mut data) = match existing {
            Some(lane) => (lane.id, lane.data.clone()),
            None => (Uuid::new_v4(), LaneData::new(list.title.clone())),
        };
        data.title = list.title.clone();
        data.linkage = Linkage::linked(list.id.clone());
        Lane::with_id(id, data, items)
    }

    pub fn lane_to_task_list(&self, lane: &Lane, previous: &RemoteTaskList) -> RemoteTaskList {
        let mut list = previous.clone();
        list.title = lane.data.title.clone();
        list
    }

    /// Builds the card mirroring `task`.
    ///
    /// When `existing` already shows the same title, completion, due and
    /// linkage it is returned unchanged, so local text edits such as extra
    /// annotations are kept.
    pub fn task_to_item(&self, task: &RemoteTask, existing: Option<&Item>) -> Item {
        let due = task.due.as_deref().and_then(|due| self.due_to_local(due));
        let (date, time) = match due {
            Some((date, time)) => (Some(date), time),
            None => (None, None),
        };
        let is_complete = task.status.is_completed();
        let linkage = Linkage::linked(task.id.clone());

        if let Some(item) = existing {
            let data = &item.data;
            if data.title == task.title
                && data.is_complete == is_complete
                && data.linkage == linkage
                && data.metadata.date == date
                && data.metadata.time == time
            {
                return item.clone();
            }
        }

        let date_str = date.map(|date| format_date(&date, &self.date_format));
        let time_str = time.map(|time| format_time(&time, &self.time_format));
        let mut title_raw = task.title.clone();
        if let Some(value) = &date_str {
            let _ = write!(title_raw, " {}{{{}}}", self.date_trigger, value);
        }
        if let Some(value) = &time_str {
            let _ = write!(title_raw, " {}{{{}}}", self.time_trigger, value);
        }

        let tags = existing
            .map(|item| item.data.metadata.tags.clone())
            .unwrap_or_default();
        let data = ItemData {
            title: task.title.clone(),
            title_raw,
            title_search: normalize_search_text(&task.title),
            is_complete,
            linkage,
            metadata: ItemMetadata {
                date,
                time,
                date_str,
                time_str,
                tags,
            },
        };
        match existing {
            Some(item) => item.with_data(data),
            None => Item::with_id(Uuid::new_v4(), data),
        }
    }

    /// Maps `item` onto the previously fetched `previous` task.
    ///
    /// Only title, status, completion instant and due are owned by the card;
    /// everything else is carried over from `previous`.
    pub fn item_to_task(&self, item: &Item, previous: &RemoteTask, now: DateTime<Utc>) -> TaskUpdate {
        let mut task = previous.clone();
        task.title = item.data.title.clone();

        let status = RemoteTaskStatus::from_completion(item.data.is_complete);
        let completion_changed = previous.status != status;
        task.status = status;
        if completion_changed {
            task.completed = status.is_completed().then(|| format_instant(now));
        }

        let due = self.item_due(item);
        task.due = match (due, previous.due.as_deref()) {
            (Some(due), Some(old)) if same_instant(due, old) => Some(old.to_string()),
            (Some(due), _) => Some(format_instant(due)),
            (None, _) => None,
        };
        let due_cleared = previous.due.is_some() && task.due.is_none();

        let changed = task != *previous;
        if changed {
            task.updated = Some(format_instant(now));
        }
        TaskUpdate {
            task,
            changed,
            completion_changed,
            due_cleared,
        }
    }

    pub fn item_to_new_task(&self, item: &Item) -> NewRemoteTask {
        NewRemoteTask {
            title: item.data.title.clone(),
            notes: None,
            due: self.item_due(item).map(format_instant),
            status: RemoteTaskStatus::from_completion(item.data.is_complete),
        }
    }

    /// Absolute due instant of a card; a date without time means local midnight.
    pub fn item_due(&self, item: &Item) -> Option<DateTime<Utc>> {
        let date = item.data.metadata.date?;
        let time = item.data.metadata.time.unwrap_or(NaiveTime::MIN);
        self.zone.to_utc(date.and_time(time))
    }

    /// Local date and time of a remote due instant; local midnight yields no time.
    pub fn due_to_local(&self, due: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
        let parsed = match DateTime::parse_from_rfc3339(due) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(
                    "event=due_parse module=sync status=skipped due={} error={}",
                    due, err
                );
                return None;
            }
        };
        let local = self.zone.to_local(&parsed);
        let time = local.time();
        Some((local.date(), (time != NaiveTime::MIN).then_some(time)))
    }
}

/// RFC 3339 UTC instant with millisecond precision, `Z` suffix.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn same_instant(instant: DateTime<Utc>, other: &str) -> bool {
    DateTime::parse_from_rfc3339(other)
        .map(|parsed| parsed.with_timezone(&Utc) == instant)
        .unwrap_or(false)
}

fn format_date(date: &NaiveDate, format: &str) -> String {
    let mut out = String::new();
    match write!(out, "{}", date.format(format)) {
        Ok(()) => out,
        Err(_) => date.to_string(),
    }
}

fn format_time(time: &NaiveTime, format: &str) -> String {
    let mut out = String::new();
    match write!(out, "{}", time.format(format)) {
        Ok(()) => out,
        Err(_) => time.format("%H:%M").to_string(),
    }
}
