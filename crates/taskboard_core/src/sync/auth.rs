//! OAuth bearer tokens for the remote task service.
//!
//! # Responsibility
//! - Exchange the stored refresh token for access tokens.
//! - Cache the access token and its expiry in memory and in a key-value store.
//!
//! # Invariants
//! - A refresh happens only when no usable token is known.
//! - Concurrent callers share one in-flight refresh.

use crate::repo::{RepoError, RepoResult};
use crate::settings::SyncSettings;
use crate::sync::client::{RemoteError, RemoteResult};
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const ACCESS_TOKEN_EXPIRES_AT_KEY: &str = "access_token_expires_at";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// String key-value persistence owned outside the sync engine.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> RepoResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RepoResult<()>;
    fn remove(&self, key: &str) -> RepoResult<()>;
}

/// Process-local key-value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> RepoResult<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> RepoResult<()> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> RepoResult<()> {
        self.values().remove(key);
        Ok(())
    }
}

/// Access token with its expiry in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: i64,
}

impl AccessToken {
    pub fn is_fresh(&self, now: i64) -> bool {
        !self.token.is_empty() && self.expires_at > now + EXPIRY_SKEW_SECS
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh-token based access token source.
pub struct OAuthTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    store: Arc<dyn KeyValueStore>,
    cached: tokio::sync::Mutex<Option<AccessToken>>,
}

impl OAuthTokenProvider {
    pub fn new(settings: &SyncSettings, http: reqwest::Client, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            http,
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            store,
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// Stores the refresh token obtained by the host's consent flow.
    ///
    /// Any cached access token is discarded.
    pub async fn store_refresh_token(&self, refresh_token: &str) -> RemoteResult<()> {
        let mut cached = self.cached.lock().await;
        self.store
            .set(REFRESH_TOKEN_KEY, refresh_token)
            .map_err(store_error)?;
        self.store.remove(ACCESS_TOKEN_KEY).map_err(store_error)?;
        self.store
            .remove(ACCESS_TOKEN_EXPIRES_AT_KEY)
            .map_err(store_error)?;
        *cached = None;
        Ok(())
    }

    /// Drops the cached access token, e.g. after the service rejected it.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
        if let Err(err) = self.store.remove(ACCESS_TOKEN_EXPIRES_AT_KEY) {
            warn!(
                "event=token_invalidate module=sync status=error error_code=store_failed error={}",
                err
            );
        }
    }

    /// Returns a usable access token, refreshing it when expired or unknown.
    pub async fn access_token(&self) -> RemoteResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(now)) {
            return Ok(token.token.clone());
        }
        if let Some(token) = self.stored_token()?.filter(|token| token.is_fresh(now)) {
            let value = token.token.clone();
            *cached = Some(token);
            return Ok(value);
        }

        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)
            .map_err(store_error)?
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RemoteError::Auth("no refresh token stored".to_string()))?;
        let token = self.refresh(&refresh_token).await?;
        self.store
            .set(ACCESS_TOKEN_KEY, &token.token)
            .map_err(store_error)?;
        self.store
            .set(ACCESS_TOKEN_EXPIRES_AT_KEY, &token.expires_at.to_string())
            .map_err(store_error)?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn stored_token(&self) -> RemoteResult<Option<AccessToken>> {
        let token = self.store.get(ACCESS_TOKEN_KEY).map_err(store_error)?;
        let expires_at = self
            .store
            .get(ACCESS_TOKEN_EXPIRES_AT_KEY)
            .map_err(store_error)?
            .and_then(|value| value.trim().parse::<i64>().ok());
        Ok(match (token, expires_at) {
            (Some(token), Some(expires_at)) => Some(AccessToken { token, expires_at }),
            _ => None,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> RemoteResult<AccessToken> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "event=token_refresh module=sync status=error http_status={}",
                status.as_u16()
            );
            return Err(RemoteError::Auth(format!(
                "token refresh failed: HTTP {}: {}",
                status.as_u16(),
                truncate(&body)
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| RemoteError::Decode(format!("token response: {err}")))?;
        if let Some(rotated) = body.refresh_token.as_deref().filter(|value| !value.is_empty()) {
            self.store
                .set(REFRESH_TOKEN_KEY, rotated)
                .map_err(store_error)?;
        }
        info!(
            "event=token_refresh module=sync status=ok expires_in={}",
            body.expires_in
        );
        Ok(AccessToken {
            token: body.access_token,
            expires_at: Utc::now().timestamp() + body.expires_in,
        })
    }
}

fn store_error(err: RepoError) -> RemoteError {
    RemoteError::Auth(format!("token store: {err}"))
}

pub(crate) fn truncate(message: &str) -> String {
    let mut out = message.trim().replace(['\n', '\r'], " ");
    if out.len() > 240 {
        let mut end = 240;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
        out.push_str("...");
    }
    out
}
