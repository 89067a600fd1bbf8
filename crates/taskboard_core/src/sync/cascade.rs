//! Completion cascades over remote sub-task trees.
//!
//! # Responsibility
//! - Apply one completion status to a task and all of its sub-tasks.
//!
//! # Invariants
//! - Updates run one at a time: descendants in post-order, then the root.
//! - Every update is a full replace.
//! - A failed update does not stop the cascade; failures are collected.

use crate::model::task::{RemoteTask, RemoteTaskStatus};
use crate::sync::adapter::format_instant;
use crate::sync::client::{RemoteError, TaskService, UpdateMode};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Cascade that left some tasks un-updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeError {
    pub root: String,
    /// Ids updated successfully, in update order.
    pub applied: Vec<String>,
    pub failed: Vec<(String, RemoteError)>,
}

impl Display for CascadeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.failed.iter().map(|(id, _)| id.as_str()).collect();
        write!(
            f,
            "completion cascade for `{}` failed for {} task(s): {}",
            self.root,
            self.failed.len(),
            ids.join(", ")
        )
    }
}

impl Error for CascadeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.failed.first().map(|(_, err)| err as &(dyn Error + 'static))
    }
}

/// Finds the task with `id` anywhere in a nested listing.
pub fn find_task<'a>(tasks: &'a [RemoteTask], id: &str) -> Option<&'a RemoteTask> {
    tasks.iter().find_map(|task| {
        if task.id == id {
            Some(task)
        } else {
            find_task(&task.children, id)
        }
    })
}

/// Applies `root.status` to every descendant of `root`, then sends `root`.
///
/// `root` must already carry its final fields; descendants already in the
/// target status are left alone. Returns the updated tasks in update order.
pub async fn set_completion_tree(
    service: &dyn TaskService,
    root: &RemoteTask,
    now: DateTime<Utc>,
) -> Result<Vec<RemoteTask>, CascadeError> {
    let status = root.status;
    let mut updated = Vec::new();
    let mut failed = Vec::new();

    for descendant in root.descendants_post_order() {
        if descendant.status == status {
            continue;
        }
        let next = with_status(descendant, status, now);
        match service.update_task(&next, UpdateMode::Replace).await {
            Ok(task) => updated.push(task),
            Err(err) => failed.push((descendant.id.clone(), err)),
        }
    }
    match service.update_task(root, UpdateMode::Replace).await {
        Ok(task) => updated.push(task),
        Err(err) => failed.push((root.id.clone(), err)),
    }

    if failed.is_empty() {
        info!(
            "event=completion_cascade module=sync status=ok root={} updated={}",
            root.id,
            updated.len()
        );
        return Ok(updated);
    }
    warn!(
        "event=completion_cascade module=sync status=partial root={} updated={} failed={}",
        root.id,
        updated.len(),
        failed.len()
    );
    Err(CascadeError {
        root: root.id.clone(),
        applied: updated.into_iter().map(|task| task.id).collect(),
        failed,
    })
}

fn with_status(task: &RemoteTask, status: RemoteTaskStatus, now: DateTime<Utc>) -> RemoteTask {
    let mut next = task.clone();
    next.children = Vec::new();
    next.status = status;
    next.completed = status.is_completed().then(|| format_instant(now));
    next.updated = Some(format_instant(now));
    next
}

#[cfg(test)]
mod tests {
    use super::find_task;
    use crate::model::task::{nest_subtasks, RemoteTask};

    fn task(id: &str, parent: Option<&str>) -> RemoteTask {
        RemoteTask {
            id: id.to_string(),
            parent: parent.map(str::to_string),
            ..RemoteTask::default()
        }
    }

    #[test]
    fn find_task_searches_nested_children() {
        let tasks = nest_subtasks(vec![
            task("a", None),
            task("a1", Some("a")),
            task("a1x", Some("a1")),
        ]);
        assert_eq!(find_task(&tasks, "a1x").map(|t| t.id.as_str()), Some("a1x"));
        assert!(find_task(&tasks, "zzz").is_none());
    }
}
