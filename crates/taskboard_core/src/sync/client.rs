//! Remote task service contract and its HTTP implementation.
//!
//! # Responsibility
//! - Define the operations the sync engine needs from a task service.
//! - Talk to the Google Tasks REST API with bearer authentication.
//!
//! # Invariants
//! - Non-2xx responses surface as `RemoteError::Http` with a truncated body.
//! - Listings follow `nextPageToken` until the service reports no more pages.

use crate::model::task::{NewRemoteTask, RemoteTask, RemoteTaskList};
use crate::settings::SyncSettings;
use crate::sync::auth::{truncate, KeyValueStore, OAuthTokenProvider};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote call failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Service answered with a non-success status.
    Http { status: u16, context: String },
    /// Request never produced a response.
    Transport(String),
    /// Response body did not match the expected shape.
    Decode(String),
    /// No usable credentials.
    Auth(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404 | 410, .. })
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http { status, context } => write!(f, "HTTP {status}: {context}"),
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Decode(message) => write!(f, "decode error: {message}"),
            Self::Auth(message) => write!(f, "auth error: {message}"),
        }
    }
}

impl Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// How an update is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Only the fields present in the body change.
    Patch,
    /// The body replaces the remote task.
    Replace,
}

/// Operations on the remote task service.
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn list_task_lists(&self) -> RemoteResult<Vec<RemoteTaskList>>;
    /// Returns every task of a list, completed and hidden ones included.
    async fn list_tasks(&self, list_id: &str) -> RemoteResult<Vec<RemoteTask>>;
    async fn get_task(&self, list_id: &str, task_id: &str) -> RemoteResult<RemoteTask>;
    async fn create_task(&self, list_id: &str, task: &NewRemoteTask) -> RemoteResult<RemoteTask>;
    /// Sends `task` to its `self_link`.
    async fn update_task(&self, task: &RemoteTask, mode: UpdateMode) -> RemoteResult<RemoteTask>;
    async fn delete_task(&self, self_link: &str) -> RemoteResult<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Tasks REST client.
pub struct GoogleTasksClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<OAuthTokenProvider>,
}

impl GoogleTasksClient {
    pub fn new(settings: &SyncSettings, store: Arc<dyn KeyValueStore>) -> RemoteResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let tokens = Arc::new(OAuthTokenProvider::new(settings, http.clone(), store));
        Ok(Self {
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &Arc<OAuthTokenProvider> {
        &self.tokens
    }

    async fn send(&self, op: &'static str, request: RequestBuilder) -> RemoteResult<Response> {
        let started = Instant::now();
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "event=remote_call module=sync op={} status=error http_status={} duration_ms={}",
                op,
                status.as_u16(),
                started.elapsed().as_millis()
            );
            return Err(RemoteError::Http {
                status: status.as_u16(),
                context: format!("{op}: {}", truncate(&body)),
            });
        }
        debug!(
            "event=remote_call module=sync op={} status=ok duration_ms={}",
            op,
            started.elapsed().as_millis()
        );
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        request: RequestBuilder,
    ) -> RemoteResult<T> {
        let response = self.send(op, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::Decode(format!("{op}: {err}")))
    }

    async fn get_all<T: DeserializeOwned>(
        &self,
        op: &'static str,
        url: &str,
        query: &[(&str, &str)],
    ) -> RemoteResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(url).query(query);
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }
            let page: Page<T> = self.send_json(op, request).await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl TaskService for GoogleTasksClient {
    async fn list_task_lists(&self) -> RemoteResult<Vec<RemoteTaskList>> {
        let url = format!("{}/users/@me/lists", self.base_url);
        self.get_all("list_task_lists", &url, &[("maxResults", "100")])
            .await
    }

    async fn list_tasks(&self, list_id: &str) -> RemoteResult<Vec<RemoteTask>> {
        let url = format!("{}/lists/{}/tasks", self.base_url, list_id);
        self.get_all(
            "list_tasks",
            &url,
            &[
                ("showCompleted", "true"),
                ("showHidden", "true"),
                ("maxResults", "100"),
            ],
        )
        .await
    }

    async fn get_task(&self, list_id: &str, task_id: &str) -> RemoteResult<RemoteTask> {
        let url = format!("{}/lists/{}/tasks/{}", self.base_url, list_id, task_id);
        self.send_json("get_task", self.http.get(url)).await
    }

    async fn create_task(&self, list_id: &str, task: &NewRemoteTask) -> RemoteResult<RemoteTask> {
        let url = format!("{}/lists/{}/tasks", self.base_url, list_id);
        self.send_json("create_task", self.http.post(url).json(task))
            .await
    }

    async fn update_task(&self, task: &RemoteTask, mode: UpdateMode) -> RemoteResult<RemoteTask> {
        if task.self_link.is_empty() {
            return Err(RemoteError::Decode(format!(
                "task `{}` has no self link",
                task.id
            )));
        }
        let request = match mode {
            UpdateMode::Patch => self.http.patch(&task.self_link),
            UpdateMode::Replace => self.http.put(&task.self_link),
        };
        self.send_json("update_task", request.json(task)).await
    }

    async fn delete_task(&self, self_link: &str) -> RemoteResult<()> {
        self.send("delete_task", self.http.delete(self_link)).await?;
        Ok(())
    }
}
