//! Board and synchronization settings.
//!
//! # Responsibility
//! - Define the settings record handed to mutation and sync contexts.
//! - Parse settings from their persisted JSON form and validate values.
//!
//! # Invariants
//! - Missing keys fall back to defaults; unknown keys are ignored.
//! - Validated settings never contain an unusable date/time format.

use chrono::format::{Item as FormatItem, StrftimeItems};
use chrono::{DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_API_BASE_URL: &str = "https://tasks.googleapis.com/tasks/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_UTC_OFFSET_MINUTES: i32 = 24 * 60;

/// Settings validation/parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Input is not valid settings JSON.
    Parse(String),
    /// One key holds an unusable value.
    Invalid { key: &'static str, reason: String },
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid settings json: {message}"),
            Self::Invalid { key, reason } => write!(f, "invalid setting `{key}`: {reason}"),
        }
    }
}

impl Error for SettingsError {}

/// Settings consumed by the mutation engine and the task adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BoardSettings {
    /// Stamp archived cards with the archive date.
    pub archive_with_date: bool,
    /// strftime pattern for the archive stamp.
    pub archive_date_format: String,
    /// Optional word placed between stamp and card text.
    pub archive_date_separator: String,
    /// Place the stamp after the card text instead of before it.
    pub append_archive_date: bool,
    /// Token introducing a `{date}` annotation in card text.
    pub date_trigger: String,
    /// Token introducing a `{time}` annotation in card text.
    pub time_trigger: String,
    pub date_format: String,
    pub time_format: String,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            archive_with_date: false,
            archive_date_format: "%Y-%m-%d %H:%M".to_string(),
            archive_date_separator: String::new(),
            append_archive_date: false,
            date_trigger: "@".to_string(),
            time_trigger: "@@".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M".to_string(),
        }
    }
}

impl BoardSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_format("archive-date-format", &self.archive_date_format)?;
        validate_format("date-format", &self.date_format)?;
        validate_format("time-format", &self.time_format)?;
        validate_trigger("date-trigger", &self.date_trigger)?;
        validate_trigger("time-trigger", &self.time_trigger)?;
        if self.date_trigger == self.time_trigger {
            return Err(SettingsError::Invalid {
                key: "time-trigger",
                reason: "must differ from date-trigger".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for the remote task service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncSettings {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Fixed offset used to turn card dates into instants. `None` uses the
    /// host time zone, resolved per date.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            utc_offset_minutes: None,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.token_url.trim().is_empty() {
            return Err(invalid("token-url", "must not be blank"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api-base-url", "must not be blank"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request-timeout-secs", "must be positive"));
        }
        if let Some(minutes) = self.utc_offset_minutes {
            if minutes.abs() >= MAX_UTC_OFFSET_MINUTES {
                return Err(invalid("utc-offset-minutes", "must be within +/-24h"));
            }
        }
        Ok(())
    }

    /// Returns the configured fixed offset, or the host time zone.
    pub fn due_zone(&self) -> DueZone {
        self.utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
            .map_or(DueZone::Host, DueZone::Fixed)
    }
}

/// Time zone in which card dates and times are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueZone {
    /// Host zone; the offset follows each date's daylight-saving rules.
    Host,
    Fixed(FixedOffset),
}

impl DueZone {
    /// Absolute instant of a local wall-clock time.
    pub fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Host => local_to_utc(&Local, local),
            Self::Fixed(offset) => local_to_utc(offset, local),
        }
    }

    /// Local wall-clock time of an absolute instant.
    pub fn to_local(&self, instant: &DateTime<FixedOffset>) -> NaiveDateTime {
        match self {
            Self::Host => instant.with_timezone(&Local).naive_local(),
            Self::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }
}

impl From<FixedOffset> for DueZone {
    fn from(value: FixedOffset) -> Self {
        Self::Fixed(value)
    }
}

/// Resolves `local` in `zone`: ambiguous times take the earlier instant,
/// times skipped by a clock change move forward by an hour.
pub(crate) fn local_to_utc<Tz: TimeZone>(zone: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let resolved = match zone.from_local_datetime(&local) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => zone
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest(),
    };
    resolved.map(|at| at.with_timezone(&Utc))
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub board: BoardSettings,
    pub sync: SyncSettings,
}

impl Settings {
    /// Parses and validates settings JSON.
    pub fn from_json_str(input: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_json::from_str(input).map_err(|err| SettingsError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.board.validate()?;
        self.sync.validate()
    }
}

fn validate_format(key: &'static str, format: &str) -> Result<(), SettingsError> {
    if format.is_empty() {
        return Err(invalid(key, "must not be empty"));
    }
    if StrftimeItems::new(format).any(|item| matches!(item, FormatItem::Error)) {
        return Err(invalid(key, "not a valid strftime pattern"));
    }
    Ok(())
}

fn validate_trigger(key: &'static str, trigger: &str) -> Result<(), SettingsError> {
    if trigger.trim().is_empty() {
        return Err(invalid(key, "must not be blank"));
    }
    if trigger.contains(['{', '}']) || trigger.chars().any(char::is_whitespace) {
        return Err(invalid(key, "must not contain braces or whitespace"));
    }
    Ok(())
}

fn invalid(key: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
