use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use taskboard_core::{
    BoardSettings, Item, Linkage, NewRemoteTask, RemoteTask, RemoteTaskStatus, TaskAdapter,
    UpdateMode,
};

fn adapter() -> TaskAdapter {
    TaskAdapter::new(
        &BoardSettings::default(),
        FixedOffset::east_opt(2 * 3600).unwrap(),
    )
}

fn due_item(title: &str, date: (i32, u32, u32), time: Option<(u32, u32)>) -> Item {
    let item = Item::new(title);
    let mut data = item.data.clone();
    data.metadata.date = NaiveDate::from_ymd_opt(date.0, date.1, date.2);
    data.metadata.time = time.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0));
    item.with_data(data)
}

/// What the service answers after a create.
fn created(id: &str, input: &NewRemoteTask) -> RemoteTask {
    RemoteTask {
        id: id.to_string(),
        title: input.title.clone(),
        due: input.due.clone(),
        status: input.status,
        self_link: format!("https://tasks.example/lists/l1/tasks/{id}"),
        ..RemoteTask::default()
    }
}

#[test]
fn item_task_item_round_trip_preserves_title_completion_and_due() {
    let adapter = adapter();
    let mut item = due_item("Dentist", (2024, 5, 1), Some((14, 30)));
    item.data.is_complete = true;

    let new_task = adapter.item_to_new_task(&item);
    assert_eq!(new_task.due.as_deref(), Some("2024-05-01T12:30:00.000Z"));
    assert_eq!(new_task.status, RemoteTaskStatus::Completed);

    let task = created("t1", &new_task);
    let back = adapter.task_to_item(&task, None);
    assert_eq!(back.data.title, "Dentist");
    assert!(back.data.is_complete);
    assert_eq!(back.data.metadata.date, item.data.metadata.date);
    assert_eq!(back.data.metadata.time, item.data.metadata.time);
    assert_eq!(back.data.linkage, Linkage::linked("t1"));
    assert_eq!(adapter.item_due(&back), adapter.item_due(&item));

    let update = adapter.item_to_task(&back, &task, Utc::now());
    assert!(!update.changed);
    assert_eq!(update.task, task);
}

#[test]
fn card_without_due_round_trips_without_due() {
    let adapter = adapter();
    let item = Item::new("Read");

    let new_task = adapter.item_to_new_task(&item);
    assert!(new_task.due.is_none());

    let back = adapter.task_to_item(&created("t2", &new_task), None);
    assert!(back.data.metadata.date.is_none());
    assert!(back.data.metadata.time.is_none());
    assert_eq!(back.data.title_raw, "Read");
}

#[test]
fn update_keeps_remote_only_fields_and_stamps_updated_on_change() {
    let adapter = adapter();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let previous: RemoteTask = serde_json::from_value(json!({
        "id": "t1",
        "title": "Old",
        "status": "needsAction",
        "notes": "remote notes",
        "parent": "p1",
        "position": "00001",
        "selfLink": "https://tasks.example/t1",
        "updated": "2024-01-01T00:00:00.000Z",
        "webViewLink": "https://tasks.example/view/t1"
    }))
    .unwrap();

    let item = Item::new("New").with_linkage(Linkage::linked("t1"));
    let update = adapter.item_to_task(&item, &previous, now);

    assert!(update.changed);
    assert!(!update.completion_changed);
    assert_eq!(update.update_mode(), UpdateMode::Patch);
    assert_eq!(update.task.title, "New");
    assert_eq!(update.task.notes.as_deref(), Some("remote notes"));
    assert_eq!(update.task.parent.as_deref(), Some("p1"));
    assert_eq!(update.task.position.as_deref(), Some("00001"));
    assert_eq!(
        update.task.extra["webViewLink"],
        "https://tasks.example/view/t1"
    );
    assert_eq!(
        update.task.updated.as_deref(),
        Some("2024-06-01T08:00:00.000Z")
    );
}

#[test]
fn completion_timestamp_follows_status_transitions() {
    let adapter = adapter();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let open = RemoteTask {
        id: "t1".to_string(),
        title: "Ship".to_string(),
        ..RemoteTask::default()
    };

    let mut item = Item::new("Ship").with_linkage(Linkage::linked("t1"));
    item.data.is_complete = true;
    let completing = adapter.item_to_task(&item, &open, now);
    assert!(completing.completion_changed);
    assert_eq!(completing.task.status, RemoteTaskStatus::Completed);
    assert_eq!(
        completing.task.completed.as_deref(),
        Some("2024-06-01T08:00:00.000Z")
    );
    assert_eq!(completing.update_mode(), UpdateMode::Replace);

    // Already completed: the completion instant is left alone.
    let again = adapter.item_to_task(&item, &completing.task, now);
    assert!(!again.changed);
    assert_eq!(again.task.completed, completing.task.completed);

    item.data.is_complete = false;
    let reopening = adapter.item_to_task(&item, &completing.task, now);
    assert!(reopening.completion_changed);
    assert_eq!(reopening.task.status, RemoteTaskStatus::NeedsAction);
    assert!(reopening.task.completed.is_none());
}

#[test]
fn removing_the_date_clears_due_with_a_full_replace() {
    let adapter = adapter();
    let previous = RemoteTask {
        id: "t1".to_string(),
        title: "Pay rent".to_string(),
        due: Some("2024-04-30T22:00:00.000Z".to_string()),
        ..RemoteTask::default()
    };

    let item = Item::new("Pay rent").with_linkage(Linkage::linked("t1"));
    let update = adapter.item_to_task(&item, &previous, Utc::now());
    assert!(update.changed);
    assert!(update.due_cleared);
    assert!(update.task.due.is_none());
    assert_eq!(update.update_mode(), UpdateMode::Replace);
}

#[test]
fn same_due_instant_in_another_encoding_is_not_a_change() {
    let adapter = adapter();
    let previous = RemoteTask {
        id: "t1".to_string(),
        title: "Call".to_string(),
        due: Some("2024-05-01T14:30:00+02:00".to_string()),
        ..RemoteTask::default()
    };
    let item = due_item("Call", (2024, 5, 1), Some((14, 30))).with_linkage(Linkage::linked("t1"));

    let update = adapter.item_to_task(&item, &previous, Utc::now());
    assert!(!update.changed);
    assert_eq!(update.task.due, previous.due);
}

#[test]
fn unchanged_task_returns_existing_card_with_its_text_and_tags() {
    let adapter = adapter();
    let task = RemoteTask {
        id: "t1".to_string(),
        title: "Call".to_string(),
        ..RemoteTask::default()
    };
    let mut existing = Item::new("Call").with_linkage(Linkage::linked("t1"));
    existing.data.title_raw = "Call #work".to_string();
    existing.data.metadata.tags = vec!["#work".to_string()];

    let same = adapter.task_to_item(&task, Some(&existing));
    assert_eq!(same, existing);

    let renamed = RemoteTask {
        title: "Call back".to_string(),
        ..task
    };
    let mapped = adapter.task_to_item(&renamed, Some(&existing));
    assert_eq!(mapped.id, existing.id);
    assert_eq!(mapped.data.title_raw, "Call back");
    assert_eq!(mapped.data.metadata.tags, vec!["#work".to_string()]);
}
