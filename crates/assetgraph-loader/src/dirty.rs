//! Incremental import gate
//!
//! Rows carry optional `updated` / `created` RFC 3339 columns. A row is
//! imported when its file loader is in the `Created` state or when its
//! timestamp is strictly newer than the file's watermark.

use chrono::{DateTime, Utc};

use crate::state::LoaderState;

pub const UPDATED_COLUMN: &str = "updated";
pub const CREATED_COLUMN: &str = "created";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirtyRowError {
    #[error("timestamp values missing: row has {len} cells")]
    MissingTimestamps { len: usize },
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// Row timestamp used for the watermark comparison.
///
/// `Ok(None)` means the file has no timestamp columns at all.
pub fn is_dirty(
    row: &[String],
    updated_idx: Option<usize>,
    created_idx: Option<usize>,
) -> Result<Option<DateTime<Utc>>, DirtyRowError> {
    if updated_idx.is_none() && created_idx.is_none() {
        return Ok(None);
    }

    let updated = updated_idx.and_then(|i| row.get(i));
    let created = created_idx.and_then(|i| row.get(i));

    let raw = match (updated, created) {
        (None, None) => return Err(DirtyRowError::MissingTimestamps { len: row.len() }),
        (Some(u), Some(c)) => {
            if u.is_empty() {
                c
            } else {
                u
            }
        }
        (Some(u), None) => u,
        (None, Some(c)) => c,
    };

    parse_timestamp(raw).map(Some)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DirtyRowError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DirtyRowError::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Whether a row stamped `stamp` passes the gate for a loader in `state`
/// with `watermark`.
pub fn should_import(
    state: LoaderState,
    watermark: Option<DateTime<Utc>>,
    stamp: Option<DateTime<Utc>>,
) -> bool {
    if state == LoaderState::Created {
        return true;
    }
    match (stamp, watermark) {
        (Some(t), Some(w)) => t > w,
        _ => true,
    }
}
