//! Lane sorting with toggling direction.

use crate::model::board::{Item, Lane, LaneSort};
use std::cmp::Ordering;
use std::sync::Arc;

/// Sorts cards by search text. Ascending unless the lane is already `TitleAsc`.
pub fn sort_lane_by_title(lane: &Lane) -> Lane {
    let descending = lane.data.sorted == LaneSort::TitleAsc;
    let mut children: Vec<Arc<Item>> = lane.children.clone();
    children.sort_by(|a, b| {
        let order = a.data.title_search.cmp(&b.data.title_search);
        if descending {
            order.reverse()
        } else {
            order
        }
    });

    let mut data = lane.data.clone();
    data.sorted = if descending {
        LaneSort::TitleDesc
    } else {
        LaneSort::TitleAsc
    };
    Lane::with_id(lane.id, data, children)
}

/// Sorts cards by due date and time. Ascending unless the lane is already `DateAsc`.
///
/// Undated cards go last when ascending and first when descending.
pub fn sort_lane_by_date(lane: &Lane) -> Lane {
    let descending = lane.data.sorted == LaneSort::DateAsc;
    let mut children: Vec<Arc<Item>> = lane.children.clone();
    children.sort_by(|a, b| {
        let order = match (a.data.metadata.due_sort_key(), b.data.metadata.due_sort_key()) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if descending {
            order.reverse()
        } else {
            order
        }
    });

    let mut data = lane.data.clone();
    data.sorted = if descending {
        LaneSort::DateDesc
    } else {
        LaneSort::DateAsc
    };
    Lane::with_id(lane.id, data, children)
}
