//! Remote task-service entities.
//!
//! # Responsibility
//! - Mirror the wire shape of remote task lists and tasks.
//! - Keep fields without a local analogue so updates can round-trip them.
//!
//! # Invariants
//! - Unknown remote fields are captured in `extra` and re-sent verbatim.
//! - `children` is computed locally and never serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Remote task completion state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteTaskStatus {
    #[default]
    NeedsAction,
    Completed,
}

impl RemoteTaskStatus {
    pub fn from_completion(is_complete: bool) -> Self {
        if is_complete {
            Self::Completed
        } else {
            Self::NeedsAction
        }
    }

    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

/// Remote task list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTaskList {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default)]
    pub self_link: String,
}

/// Remote task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub title: String,
    /// RFC 3339 timestamp of the last content change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    /// Opaque handle used for update and delete calls.
    #[serde(default)]
    pub self_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: RemoteTaskStatus,
    /// RFC 3339 due instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    /// RFC 3339 completion instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    /// Sub-tasks, attached by `nest_subtasks`.
    #[serde(skip)]
    pub children: Vec<RemoteTask>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteTask {
    /// Returns this task's descendants in post-order (deepest first).
    pub fn descendants_post_order(&self) -> Vec<&RemoteTask> {
        let mut out = Vec::new();
        for child in &self.children {
            collect_post_order(child, &mut out);
        }
        out
    }
}

fn collect_post_order<'a>(task: &'a RemoteTask, out: &mut Vec<&'a RemoteTask>) {
    for child in &task.children {
        collect_post_order(child, out);
    }
    out.push(task);
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Payload for creating a remote task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRemoteTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    pub status: RemoteTaskStatus,
}

/// Groups a flat task listing into top-level tasks with nested `children`.
///
/// Input order is preserved at every level. Tasks whose parent is missing
/// from the listing are treated as top-level.
pub fn nest_subtasks(tasks: Vec<RemoteTask>) -> Vec<RemoteTask> {
    let known: std::collections::HashSet<String> =
        tasks.iter().map(|task| task.id.clone()).collect();
    let mut by_parent: HashMap<String, Vec<RemoteTask>> = HashMap::new();
    let mut roots = Vec::new();
    for task in tasks {
        match task.parent.clone() {
            Some(parent) if known.contains(&parent) => {
                by_parent.entry(parent).or_default().push(task)
            }
            _ => roots.push(task),
        }
    }
    roots
        .into_iter()
        .map(|task| attach_children(task, &mut by_parent))
        .collect()
}

fn attach_children(
    mut task: RemoteTask,
    by_parent: &mut HashMap<String, Vec<RemoteTask>>,
) -> RemoteTask {
    if let Some(children) = by_parent.remove(&task.id) {
        task.children = children
            .into_iter()
            .map(|child| attach_children(child, by_parent))
            .collect();
    }
    task
}
