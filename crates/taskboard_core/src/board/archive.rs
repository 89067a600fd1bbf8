//! Archive date stamping.

use crate::board::{BoardError, BoardResult, ItemContentRewriter};
use crate::model::board::Item;
use crate::settings::BoardSettings;
use chrono::NaiveDateTime;
use futures::future::try_join_all;
use std::fmt::Write;
use std::sync::Arc;

/// Builds the stamped raw text for a card archived at `now`.
///
/// Parts are `[stamp, separator?, text]`, reversed when the stamp is appended,
/// and joined with single spaces.
pub fn archive_stamp_text(
    title_raw: &str,
    settings: &BoardSettings,
    now: NaiveDateTime,
) -> BoardResult<String> {
    let mut stamp = String::new();
    write!(stamp, "{}", now.format(&settings.archive_date_format)).map_err(|_| {
        BoardError::ContentRewrite(format!(
            "invalid archive date format `{}`",
            settings.archive_date_format
        ))
    })?;

    let mut parts = vec![stamp.as_str()];
    if !settings.archive_date_separator.is_empty() {
        parts.push(settings.archive_date_separator.as_str());
    }
    parts.push(title_raw);
    if settings.append_archive_date {
        parts.reverse();
    }
    Ok(parts.join(" "))
}

/// Rewrites `items` with archive stamps when stamping is enabled.
///
/// Fails as a whole if any card cannot be rewritten.
pub(crate) async fn stamp_items(
    rewriter: &dyn ItemContentRewriter,
    settings: &BoardSettings,
    items: &[Arc<Item>],
    now: NaiveDateTime,
) -> BoardResult<Vec<Arc<Item>>> {
    if !settings.archive_with_date {
        return Ok(items.to_vec());
    }
    let rewrites = items.iter().map(|item| async move {
        let stamped = archive_stamp_text(&item.data.title_raw, settings, now)?;
        rewriter
            .update_item_content(item, &stamped)
            .await
            .map(Arc::new)
    });
    try_join_all(rewrites).await
}
