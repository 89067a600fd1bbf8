use async_trait::async_trait;
use chrono::FixedOffset;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use taskboard_core::sync::links::{link_lane, on_document_deleted, on_document_renamed, unlink_lane};
use taskboard_core::sync::outbound::{OutboundPropagator, Propagation};
use taskboard_core::sync::reconcile::{LaneOutcome, Reconciler};
use taskboard_core::{
    Board, BoardContext, BoardEvent, BoardModifiers, BoardSettings, ChannelObserver, Document,
    DocumentId, DocumentSet, Item, Lane, LinkRegistry, Linkage, NewRemoteTask, RemoteError,
    RemoteResult, RemoteTask, RemoteTaskList, RemoteTaskStatus, SyncContext, SyncError,
    TaskAdapter, TaskService, UpdateMode,
};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct FakeState {
    lists: Vec<RemoteTaskList>,
    tasks: HashMap<String, Vec<RemoteTask>>,
    failing_lists: HashSet<String>,
    failing_updates: HashSet<String>,
    failing_creates: bool,
    calls: Vec<String>,
    next_id: u32,
}

#[derive(Default)]
struct FakeTasks {
    state: Mutex<FakeState>,
}

impl FakeTasks {
    fn with_list(self, id: &str, title: &str, tasks: Vec<RemoteTask>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.lists.push(RemoteTaskList {
                id: id.to_string(),
                title: title.to_string(),
                ..RemoteTaskList::default()
            });
            state.tasks.insert(id.to_string(), tasks);
        }
        self
    }

    fn fail_list(&self, id: &str) {
        self.state.lock().unwrap().failing_lists.insert(id.to_string());
    }

    fn fail_creates(&self, failing: bool) {
        self.state.lock().unwrap().failing_creates = failing;
    }

    fn fail_update(&self, id: &str) {
        self.state.lock().unwrap().failing_updates.insert(id.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn updates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with("update:"))
            .collect()
    }

    fn creates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with("create:"))
            .collect()
    }

    fn task_ids(&self, list_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(list_id)
            .map(|tasks| tasks.iter().map(|task| task.id.clone()).collect())
            .unwrap_or_default()
    }

    fn task(&self, list_id: &str, task_id: &str) -> Option<RemoteTask> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(list_id)
            .and_then(|tasks| tasks.iter().find(|task| task.id == task_id).cloned())
    }
}

fn not_found(context: &str) -> RemoteError {
    RemoteError::Http {
        status: 404,
        context: context.to_string(),
    }
}

#[async_trait]
impl TaskService for FakeTasks {
    async fn list_task_lists(&self) -> RemoteResult<Vec<RemoteTaskList>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_task_lists".to_string());
        Ok(state.lists.clone())
    }

    async fn list_tasks(&self, list_id: &str) -> RemoteResult<Vec<RemoteTask>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_tasks:{list_id}"));
        if state.failing_lists.contains(list_id) {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        state.tasks.get(list_id).cloned().ok_or_else(|| not_found(list_id))
    }

    async fn get_task(&self, list_id: &str, task_id: &str) -> RemoteResult<RemoteTask> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get:{task_id}"));
        state
            .tasks
            .get(list_id)
            .and_then(|tasks| tasks.iter().find(|task| task.id == task_id).cloned())
            .ok_or_else(|| not_found(task_id))
    }

    async fn create_task(&self, list_id: &str, task: &NewRemoteTask) -> RemoteResult<RemoteTask> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create:{}", task.title));
        if state.failing_creates {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        state.next_id += 1;
        let id = format!("new-{}", state.next_id);
        let created = RemoteTask {
            id: id.clone(),
            title: task.title.clone(),
            due: task.due.clone(),
            status: task.status,
            self_link: format!("fake://{list_id}/{id}"),
            ..RemoteTask::default()
        };
        state
            .tasks
            .entry(list_id.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_task(&self, task: &RemoteTask, mode: UpdateMode) -> RemoteResult<RemoteTask> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update:{}:{:?}", task.id, mode));
        if state.failing_updates.contains(&task.id) {
            return Err(RemoteError::Http {
                status: 500,
                context: "backend error".to_string(),
            });
        }
        let mut stored = task.clone();
        stored.children = Vec::new();
        for tasks in state.tasks.values_mut() {
            if let Some(slot) = tasks.iter_mut().find(|existing| existing.id == task.id) {
                *slot = stored.clone();
                return Ok(stored);
            }
        }
        Err(not_found(&task.id))
    }

    async fn delete_task(&self, self_link: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete:{self_link}"));
        for tasks in state.tasks.values_mut() {
            let before = tasks.len();
            tasks.retain(|task| task.self_link != self_link);
            if tasks.len() != before {
                return Ok(());
            }
        }
        Err(not_found(self_link))
    }
}

/// Runs one full reconciliation pass while the first create is in flight.
struct SyncDuringCreate {
    inner: Arc<FakeTasks>,
    reconciler: OnceLock<Arc<Reconciler>>,
    armed: AtomicBool,
}

#[async_trait]
impl TaskService for SyncDuringCreate {
    async fn list_task_lists(&self) -> RemoteResult<Vec<RemoteTaskList>> {
        self.inner.list_task_lists().await
    }

    async fn list_tasks(&self, list_id: &str) -> RemoteResult<Vec<RemoteTask>> {
        self.inner.list_tasks(list_id).await
    }

    async fn get_task(&self, list_id: &str, task_id: &str) -> RemoteResult<RemoteTask> {
        self.inner.get_task(list_id, task_id).await
    }

    async fn create_task(&self, list_id: &str, task: &NewRemoteTask) -> RemoteResult<RemoteTask> {
        let created = self.inner.create_task(list_id, task).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            if let Some(reconciler) = self.reconciler.get() {
                reconciler.sync_all().await;
            }
        }
        Ok(created)
    }

    async fn update_task(&self, task: &RemoteTask, mode: UpdateMode) -> RemoteResult<RemoteTask> {
        self.inner.update_task(task, mode).await
    }

    async fn delete_task(&self, self_link: &str) -> RemoteResult<()> {
        self.inner.delete_task(self_link).await
    }
}

fn task(id: &str, title: &str) -> RemoteTask {
    RemoteTask {
        id: id.to_string(),
        title: title.to_string(),
        self_link: format!("fake://{id}"),
        ..RemoteTask::default()
    }
}

fn subtask(id: &str, parent: &str) -> RemoteTask {
    RemoteTask {
        parent: Some(parent.to_string()),
        ..task(id, id)
    }
}

fn completed(mut task: RemoteTask) -> RemoteTask {
    task.status = RemoteTaskStatus::Completed;
    task
}

fn groceries() -> FakeTasks {
    FakeTasks::default().with_list(
        "l1",
        "Groceries",
        vec![task("t1", "Milk"), completed(task("t2", "Eggs"))],
    )
}

fn linked_lane(title: &str, list_id: &str, items: Vec<Item>) -> Arc<Lane> {
    let lane = Lane::new(title);
    let mut data = lane.data.clone();
    data.linkage = Linkage::linked(list_id);
    Arc::new(Lane::with_id(
        lane.id,
        data,
        items.into_iter().map(Arc::new).collect(),
    ))
}

fn linked_item(title: &str, task_id: &str) -> Item {
    Item::new(title).with_linkage(Linkage::linked(task_id))
}

fn sync_context(service: Arc<dyn TaskService>) -> Arc<SyncContext> {
    let settings = BoardSettings::default();
    let board = BoardContext::new(settings.clone()).unwrap();
    let adapter = TaskAdapter::new(&settings, FixedOffset::east_opt(0).unwrap());
    Arc::new(SyncContext::new(
        board,
        LinkRegistry::in_memory(),
        service,
        adapter,
    ))
}

fn open_documents(documents: Vec<Document>) -> Arc<DocumentSet> {
    let set = DocumentSet::new();
    for document in documents {
        set.insert(Arc::new(document));
    }
    Arc::new(set)
}

fn record_events(ctx: &SyncContext) -> UnboundedReceiver<BoardEvent> {
    let (observer, receiver) = ChannelObserver::channel();
    ctx.board.events.subscribe(Arc::new(observer));
    receiver
}

fn drain(receiver: &mut UnboundedReceiver<BoardEvent>) -> Vec<BoardEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn titles(lane: &Lane) -> Vec<String> {
    lane.children
        .iter()
        .map(|item| item.data.title.clone())
        .collect()
}

fn doc(id: &str) -> DocumentId {
    DocumentId::from(id)
}

#[tokio::test]
async fn reconciling_twice_against_unchanged_list_is_idempotent() {
    let ctx = sync_context(Arc::new(groceries()));
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]),
    )]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    let mut events = record_events(&ctx);
    let reconciler = Reconciler::new(ctx.clone(), documents.clone());

    let first = reconciler.sync_all().await;
    assert!(matches!(
        first.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Updated))
    ));
    assert_eq!(drain(&mut events).len(), 1);
    let document = documents.get(&doc("board.md")).unwrap();
    let after_first = document.snapshot().await;
    let lane = &after_first.children[0];
    assert_eq!(titles(lane), vec!["Milk", "Eggs"]);
    assert!(!lane.children[0].data.is_complete);
    assert!(lane.children[1].data.is_complete);
    assert_eq!(lane.children[1].data.linkage, Linkage::linked("t2"));

    let second = reconciler.sync_all().await;
    assert!(matches!(
        second.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Unchanged))
    ));
    assert!(drain(&mut events).is_empty());
    assert!(Arc::ptr_eq(&after_first, &document.snapshot().await));
}

#[tokio::test]
async fn registry_link_without_lane_materializes_a_new_lane() {
    let ctx = sync_context(Arc::new(groceries()));
    let documents = open_documents(vec![Document::new("board.md", Board::default())]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();

    let report = Reconciler::new(ctx.clone(), documents.clone())
        .sync_all()
        .await;

    assert!(matches!(
        report.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Added))
    ));
    let board = documents.get(&doc("board.md")).unwrap().snapshot().await;
    assert_eq!(board.children.len(), 1);
    assert_eq!(board.children[0].data.title, "Groceries");
    assert_eq!(board.children[0].data.linkage, Linkage::linked("l1"));
    assert_eq!(titles(&board.children[0]), vec!["Milk", "Eggs"]);
}

#[tokio::test]
async fn merge_pushes_unlinked_cards_and_drops_cards_of_deleted_tasks() {
    let service = Arc::new(groceries());
    let ctx = sync_context(service.clone());
    let local = Item::new("Bread");
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane(
            "Groceries",
            "l1",
            vec![
                linked_item("Removed remotely", "t-gone"),
                local.clone(),
                linked_item("Milk", "t1"),
            ],
        )]),
    )]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    let before = documents.get(&doc("board.md")).unwrap().snapshot().await;

    Reconciler::new(ctx.clone(), documents.clone())
        .sync_all()
        .await;

    let board = documents.get(&doc("board.md")).unwrap().snapshot().await;
    let lane = &board.children[0];
    assert_eq!(lane.id, before.children[0].id);
    assert_eq!(titles(lane), vec!["Milk", "Eggs", "Bread"]);
    assert!(Arc::ptr_eq(&lane.children[0], &before.children[0].children[2]));
    assert_eq!(lane.children[2].id, local.id);
    assert_eq!(lane.children[2].data.linkage, Linkage::linked("new-1"));
    assert_eq!(service.task("l1", "new-1").unwrap().title, "Bread");
}

#[tokio::test]
async fn card_whose_create_failed_is_pushed_by_the_next_sync() {
    let service = Arc::new(groceries());
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]),
    )]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();
    let butter = Item::new("Butter");

    service.fail_creates(true);
    BoardModifiers::new(&document, &ctx.board)
        .append_items(&[0], vec![butter.clone()])
        .await
        .unwrap();
    assert!(!propagator.handle(&events.try_recv().unwrap()).await);
    assert!(!document.snapshot().await.children[0].children[0].data.linkage.is_linked());

    // Still failing: the lane reports the failure and keeps the card.
    let reconciler = Reconciler::new(ctx.clone(), documents.clone());
    let report = reconciler.sync_all().await;
    assert!(matches!(
        report.lane(&doc("board.md"), "l1"),
        Some(Err(SyncError::RemoteCallFailure(_)))
    ));
    assert!(service.task_ids("l1").iter().all(|id| !id.starts_with("new-")));

    service.fail_creates(false);
    let report = reconciler.sync_all().await;
    assert!(report.is_clean());
    let board = document.snapshot().await;
    let lane = &board.children[0];
    assert_eq!(titles(lane), vec!["Milk", "Eggs", "Butter"]);
    assert_eq!(lane.children[2].id, butter.id);
    assert_eq!(lane.children[2].data.linkage, Linkage::linked("new-1"));
    assert_eq!(service.task("l1", "new-1").unwrap().title, "Butter");

    let again = reconciler.sync_all().await;
    assert!(matches!(
        again.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Unchanged))
    ));
    assert_eq!(service.creates().len(), 3);
}

#[tokio::test]
async fn remote_list_gone_removes_lane_and_registry_link() {
    let ctx = sync_context(Arc::new(groceries()));
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![
            linked_lane("Archive", "gone", vec![linked_item("x", "tx")]),
            linked_lane("Groceries", "l1", Vec::new()),
        ]),
    )]);
    ctx.registry.link(&doc("board.md"), "gone").unwrap();
    ctx.registry.link(&doc("board.md"), "l1").unwrap();

    let report = Reconciler::new(ctx.clone(), documents.clone())
        .sync_all()
        .await;

    assert!(report.is_clean());
    assert!(matches!(
        report.lane(&doc("board.md"), "gone"),
        Some(Ok(LaneOutcome::Removed))
    ));
    let board = documents.get(&doc("board.md")).unwrap().snapshot().await;
    assert_eq!(board.children.len(), 1);
    assert_eq!(board.children[0].data.linkage, Linkage::linked("l1"));
    assert_eq!(ctx.registry.lanes_for(&doc("board.md")), vec!["l1"]);
}

#[tokio::test]
async fn missing_document_drops_its_entry_and_others_still_sync() {
    let ctx = sync_context(Arc::new(groceries()));
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]),
    )]);
    ctx.registry.link(&doc("deleted.md"), "l1").unwrap();
    ctx.registry.link(&doc("board.md"), "l1").unwrap();

    let report = Reconciler::new(ctx.clone(), documents.clone())
        .sync_all()
        .await;

    assert_eq!(report.failures(), 1);
    let missing = report
        .documents
        .iter()
        .find(|report| report.document == doc("deleted.md"))
        .unwrap();
    assert!(matches!(missing.result, Err(SyncError::DocumentMissing(_))));
    assert!(matches!(
        report.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Updated))
    ));
    assert!(ctx.registry.lanes_for(&doc("deleted.md")).is_empty());
    assert_eq!(ctx.registry.entries().len(), 1);
}

#[tokio::test]
async fn failing_lane_does_not_block_sibling_lanes() {
    let service = Arc::new(groceries().with_list("l2", "Errands", vec![task("e1", "Post office")]));
    service.fail_list("l2");
    let ctx = sync_context(service);
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![
            linked_lane("Groceries", "l1", Vec::new()),
            linked_lane("Errands", "l2", Vec::new()),
        ]),
    )]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    ctx.registry.link(&doc("board.md"), "l2").unwrap();

    let report = Reconciler::new(ctx.clone(), documents.clone())
        .sync_all()
        .await;

    assert_eq!(report.failures(), 1);
    assert!(matches!(
        report.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Updated))
    ));
    assert!(matches!(
        report.lane(&doc("board.md"), "l2"),
        Some(Err(SyncError::RemoteCallFailure(_)))
    ));
    let board = documents.get(&doc("board.md")).unwrap().snapshot().await;
    assert_eq!(titles(&board.children[0]), vec!["Milk", "Eggs"]);
    assert!(board.children[1].children.is_empty());
}

#[tokio::test]
async fn merge_waits_for_document_load() {
    let ctx = sync_context(Arc::new(groceries()));
    let documents = open_documents(vec![Document::loading("board.md")]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    let reconciler = Arc::new(Reconciler::new(ctx.clone(), documents.clone()));

    let handle = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.sync_all().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    let document = documents.get(&doc("board.md")).unwrap();
    document
        .finish_loading(Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]))
        .await;
    let report = handle.await.unwrap();

    assert!(matches!(
        report.lane(&doc("board.md"), "l1"),
        Some(Ok(LaneOutcome::Updated))
    ));
    assert_eq!(document.snapshot().await.children.len(), 1);
}

#[tokio::test]
async fn added_card_creates_remote_task_and_receives_its_id() {
    let service = Arc::new(groceries());
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]),
    )]);
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();

    BoardModifiers::new(&document, &ctx.board)
        .append_items(&[0], vec![Item::new("Butter")])
        .await
        .unwrap();
    let added = events.try_recv().unwrap();
    let outcome = propagator.propagate(&added).await.unwrap();

    assert_eq!(
        outcome,
        Propagation::Created {
            task_id: "new-1".to_string()
        }
    );
    let board = document.snapshot().await;
    assert_eq!(board.children[0].children[0].data.linkage, Linkage::linked("new-1"));
    assert_eq!(service.task("l1", "new-1").unwrap().title, "Butter");

    // The attach shows up as an update and must not echo back remotely.
    let attached = events.try_recv().unwrap();
    assert!(matches!(attached, BoardEvent::ItemUpdated { .. }));
    assert_eq!(propagator.propagate(&attached).await.unwrap(), Propagation::Skipped);
    assert!(service.updates().is_empty());
}

#[tokio::test]
async fn edited_card_patches_its_remote_task() {
    let service = Arc::new(groceries());
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", vec![linked_item("Milk", "t1")])]),
    )]);
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();
    let card = document.snapshot().await.children[0].children[0].clone();

    let mut data = card.data.clone();
    data.title = "Oat milk".to_string();
    BoardModifiers::new(&document, &ctx.board)
        .update_item(&[0, 0], card.with_data(data))
        .await
        .unwrap();

    assert!(propagator.handle(&events.try_recv().unwrap()).await);
    assert_eq!(service.updates(), vec!["update:t1:Patch"]);
    assert_eq!(service.task("l1", "t1").unwrap().title, "Oat milk");
}

#[tokio::test]
async fn completing_a_parent_updates_descendants_first() {
    let service = Arc::new(FakeTasks::default().with_list(
        "l1",
        "Project",
        vec![
            task("p", "Launch"),
            subtask("c1", "p"),
            subtask("c1a", "c1"),
            subtask("c2", "p"),
        ],
    ));
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Project", "l1", vec![linked_item("Launch", "p")])]),
    )]);
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();
    let card = document.snapshot().await.children[0].children[0].clone();

    let mut data = card.data.clone();
    data.is_complete = true;
    BoardModifiers::new(&document, &ctx.board)
        .update_item(&[0, 0], card.with_data(data))
        .await
        .unwrap();
    let outcome = propagator
        .propagate(&events.try_recv().unwrap())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Propagation::Cascaded {
            task_id: "p".to_string(),
            updated: 4
        }
    );
    assert_eq!(
        service.updates(),
        vec![
            "update:c1a:Replace",
            "update:c1:Replace",
            "update:c2:Replace",
            "update:p:Replace",
        ]
    );
    for id in ["p", "c1", "c1a", "c2"] {
        let task = service.task("l1", id).unwrap();
        assert_eq!(task.status, RemoteTaskStatus::Completed, "task {id}");
        assert!(task.completed.is_some());
    }
}

#[tokio::test]
async fn partial_cascade_reports_which_tasks_failed() {
    let service = Arc::new(FakeTasks::default().with_list(
        "l1",
        "Project",
        vec![task("p", "Launch"), subtask("c1", "p"), subtask("c2", "p")],
    ));
    service.fail_update("c1");
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Project", "l1", vec![linked_item("Launch", "p")])]),
    )]);
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();
    let card = document.snapshot().await.children[0].children[0].clone();

    let mut data = card.data.clone();
    data.is_complete = true;
    BoardModifiers::new(&document, &ctx.board)
        .update_item(&[0, 0], card.with_data(data))
        .await
        .unwrap();
    let err = propagator
        .propagate(&events.try_recv().unwrap())
        .await
        .unwrap_err();

    match err {
        SyncError::Cascade(cascade) => {
            assert_eq!(cascade.root, "p");
            assert_eq!(cascade.applied, vec!["c2", "p"]);
            assert_eq!(cascade.failed.len(), 1);
            assert_eq!(cascade.failed[0].0, "c1");
        }
        other => panic!("unexpected error: {other}"),
    }
    // The local edit stays committed.
    assert!(document.snapshot().await.children[0].children[0].data.is_complete);
}

#[tokio::test]
async fn deleting_unlinked_card_in_linked_lane_fails_only_the_propagation() {
    let service = Arc::new(groceries());
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", vec![Item::new("stray")])]),
    )]);
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();

    BoardModifiers::new(&document, &ctx.board)
        .delete_entity(&[0, 0])
        .await
        .unwrap();
    assert!(document.snapshot().await.children[0].children.is_empty());

    let deleted = events.try_recv().unwrap();
    let err = propagator.propagate(&deleted).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingLinkage { ref list_id, .. } if list_id == "l1"));
    assert!(!propagator.handle(&deleted).await);
    assert!(!service.calls().iter().any(|call| call.starts_with("delete:")));
}

#[tokio::test]
async fn deleting_linked_card_deletes_remote_task_by_handle() {
    let service = Arc::new(groceries());
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", vec![linked_item("Milk", "t1")])]),
    )]);
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();

    BoardModifiers::new(&document, &ctx.board)
        .delete_entity(&[0, 0])
        .await
        .unwrap();
    let outcome = propagator
        .propagate(&events.try_recv().unwrap())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Propagation::Deleted {
            task_id: "t1".to_string()
        }
    );
    assert!(service.calls().contains(&"delete:fake://t1".to_string()));
    assert!(service.task("l1", "t1").is_none());
}

#[tokio::test]
async fn deleting_linked_lane_drops_registry_link() {
    let ctx = sync_context(Arc::new(groceries()));
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]),
    )]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();

    BoardModifiers::new(&document, &ctx.board)
        .delete_entity(&[0])
        .await
        .unwrap();
    let outcome = propagator
        .propagate(&events.try_recv().unwrap())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Propagation::Unlinked {
            list_id: "l1".to_string()
        }
    );
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn link_and_unlink_keep_board_and_registry_in_step() {
    let ctx = sync_context(Arc::new(groceries()));
    let document = Document::new(
        "board.md",
        Board::new(vec![Arc::new(Lane::new("Shopping").with_children(vec![
            Arc::new(linked_item("Milk", "t1")),
        ]))]),
    );

    let err = link_lane(&ctx, &document, &[0], "nope").await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteListGone(ref id) if id == "nope"));
    assert!(!document.snapshot().await.children[0].data.linkage.is_linked());
    assert!(ctx.registry.is_empty());

    link_lane(&ctx, &document, &[0], "l1").await.unwrap();
    assert_eq!(
        document.snapshot().await.children[0].data.linkage,
        Linkage::linked("l1")
    );
    assert_eq!(ctx.registry.lanes_for(&doc("board.md")), vec!["l1"]);

    assert!(unlink_lane(&ctx, &document, &[0]).await.unwrap());
    let board = document.snapshot().await;
    assert!(!board.children[0].data.linkage.is_linked());
    assert!(!board.children[0].children[0].data.linkage.is_linked());
    assert!(ctx.registry.is_empty());
    assert!(!unlink_lane(&ctx, &document, &[0]).await.unwrap());
}

#[tokio::test]
async fn document_rename_and_delete_follow_into_registry() {
    let ctx = sync_context(Arc::new(groceries()));
    ctx.registry.link(&doc("old.md"), "l1").unwrap();

    assert!(on_document_renamed(&ctx, &doc("old.md"), &doc("new.md")).unwrap());
    assert!(ctx.registry.lanes_for(&doc("old.md")).is_empty());
    assert_eq!(ctx.registry.lanes_for(&doc("new.md")), vec!["l1"]);

    assert!(on_document_deleted(&ctx, &doc("new.md")).unwrap());
    assert!(!on_document_deleted(&ctx, &doc("new.md")).unwrap());
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn sync_racing_an_outbound_create_leaves_one_card_per_task() {
    let fake = Arc::new(groceries());
    let service = Arc::new(SyncDuringCreate {
        inner: fake.clone(),
        reconciler: OnceLock::new(),
        armed: AtomicBool::new(true),
    });
    let ctx = sync_context(service.clone());
    let documents = open_documents(vec![Document::new(
        "board.md",
        Board::new(vec![linked_lane("Groceries", "l1", Vec::new())]),
    )]);
    ctx.registry.link(&doc("board.md"), "l1").unwrap();
    let reconciler = Arc::new(Reconciler::new(ctx.clone(), documents.clone()));
    assert!(service.reconciler.set(reconciler.clone()).is_ok());
    let propagator = OutboundPropagator::new(ctx.clone(), documents.clone());
    let (_, mut events) = propagator.subscribe();
    let document = documents.get(&doc("board.md")).unwrap();
    let butter = Item::new("Butter");

    BoardModifiers::new(&document, &ctx.board)
        .append_items(&[0], vec![butter.clone()])
        .await
        .unwrap();
    let added = events.try_recv().unwrap();
    assert!(propagator.handle(&added).await);
    reconciler.sync_all().await;

    let board = document.snapshot().await;
    let lane = &board.children[0];
    assert_eq!(titles(lane), vec!["Milk", "Eggs", "Butter"]);
    assert_eq!(lane.children[2].id, butter.id);
    let block_id = lane.children[2].block_id().unwrap().to_string();
    assert_eq!(
        lane.children
            .iter()
            .filter(|card| card.block_id() == Some(block_id.as_str()))
            .count(),
        1
    );
    assert_eq!(fake.task_ids("l1"), vec!["t1".to_string(), "t2".to_string(), block_id]);
}
