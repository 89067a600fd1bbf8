//! Card text rewriting.
//!
//! # Responsibility
//! - Turn a new raw card text into an updated card (title, search text).
//!
//! # Invariants
//! - Rewriting keeps the card id, linkage, completion and metadata.

use crate::board::{BoardError, BoardResult};
use crate::model::board::{normalize_search_text, Item};
use crate::settings::BoardSettings;
use async_trait::async_trait;
use regex::Regex;

/// Rewrites a card for new raw text.
///
/// Hosts with a richer markup parser provide their own implementation.
#[async_trait]
pub trait ItemContentRewriter: Send + Sync {
    async fn update_item_content(&self, item: &Item, title_raw: &str) -> BoardResult<Item>;
}

/// Rewriter that strips `{trigger}{...}` annotations to derive the title.
#[derive(Debug, Clone)]
pub struct PlainContentRewriter {
    annotation: Regex,
}

impl PlainContentRewriter {
    pub fn new(settings: &BoardSettings) -> BoardResult<Self> {
        // Longer triggers first so `@@{..}` is not read as `@` + `@{..}`.
        let mut triggers = [
            regex::escape(&settings.date_trigger),
            regex::escape(&settings.time_trigger),
        ];
        triggers.sort_by_key(|trigger| std::cmp::Reverse(trigger.len()));
        let pattern = format!(r"\s*(?:{}|{})\{{[^}}]*\}}", triggers[0], triggers[1]);
        let annotation =
            Regex::new(&pattern).map_err(|err| BoardError::ContentRewrite(err.to_string()))?;
        Ok(Self { annotation })
    }

    /// Returns `title_raw` without date/time annotations.
    pub fn strip_annotations(&self, title_raw: &str) -> String {
        self.annotation.replace_all(title_raw, "").trim().to_string()
    }
}

#[async_trait]
impl ItemContentRewriter for PlainContentRewriter {
    async fn update_item_content(&self, item: &Item, title_raw: &str) -> BoardResult<Item> {
        let mut data = item.data.clone();
        data.title = self.strip_annotations(title_raw);
        data.title_search = normalize_search_text(&data.title);
        data.title_raw = title_raw.to_string();
        Ok(item.with_data(data))
    }
}
