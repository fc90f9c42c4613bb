//! Sync wire protocol
//!
//! JSON shapes shared by the client transport and the server
//! reconciler. Record ids double as idempotency keys: pushing the same
//! record twice upserts rather than duplicating.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::db::queue::{ChangeAction, EntityKind, SyncQueueItem};
use crate::error::{Error, Result};
use crate::models::{Annotation, AnnotationKind, ReadingLogEntry};

/// Convert a storage timestamp (Unix ms) to a wire timestamp
#[must_use]
pub fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Convert a wire timestamp to a storage timestamp (Unix ms)
#[must_use]
pub fn utc_to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// One annotation on the wire
///
/// The variant is implied by which array the record travels in; the
/// variant-specific field (`color`, `content`, or `label`) is the only
/// one populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub id: String,
    pub verse_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl AnnotationRecord {
    /// Build a wire record from a local annotation
    #[must_use]
    pub fn from_annotation(annotation: &Annotation) -> (EntityKind, Self) {
        let (entity, color, content, label) = match &annotation.kind {
            AnnotationKind::Highlight { color } => {
                (EntityKind::Highlight, Some(color.clone()), None, None)
            }
            AnnotationKind::Note { content } => {
                (EntityKind::Note, None, Some(content.clone()), None)
            }
            AnnotationKind::Bookmark { label } => {
                (EntityKind::Bookmark, None, None, label.clone())
            }
        };
        let record = Self {
            id: annotation.id.as_str(),
            verse_ref: annotation.verse_ref.clone(),
            color,
            content,
            label,
            created_at: ms_to_utc(annotation.created_at),
            updated_at: ms_to_utc(annotation.updated_at),
            deleted: annotation.is_deleted(),
        };
        (entity, record)
    }

    /// Reconstruct a local annotation; `entity` names the array the
    /// record arrived in
    pub fn to_annotation(&self, entity: EntityKind) -> Result<Annotation> {
        let kind = match entity {
            EntityKind::Highlight => AnnotationKind::Highlight {
                color: self.color.clone().unwrap_or_default(),
            },
            EntityKind::Note => AnnotationKind::Note {
                content: self.content.clone().unwrap_or_default(),
            },
            EntityKind::Bookmark => AnnotationKind::Bookmark {
                label: self.label.clone(),
            },
            EntityKind::ReadingLog => {
                return Err(Error::InvalidInput(
                    "reading log record in annotation array".to_string(),
                ))
            }
        };
        let id = self
            .id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid annotation id: {}", self.id)))?;
        let updated_at = utc_to_ms(self.updated_at);
        Ok(Annotation {
            id,
            kind,
            verse_ref: self.verse_ref.clone(),
            created_at: utc_to_ms(self.created_at),
            updated_at,
            deleted_at: self.deleted.then_some(updated_at),
        })
    }
}

/// One daily reading log on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingLogRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub passages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl ReadingLogRecord {
    /// Build a wire record from a local log entry
    #[must_use]
    pub fn from_entry(entry: &ReadingLogEntry) -> Self {
        Self {
            date: entry.date,
            passages: entry.passages.iter().cloned().collect(),
            duration_minutes: entry.duration_minutes,
            plan_id: entry.plan_id.clone(),
            note: entry.note.clone(),
            created_at: ms_to_utc(entry.created_at),
            updated_at: ms_to_utc(entry.updated_at),
            deleted: false,
        }
    }

    /// Reconstruct a local log entry
    #[must_use]
    pub fn to_entry(&self) -> ReadingLogEntry {
        ReadingLogEntry {
            date: self.date,
            passages: self.passages.iter().cloned().collect(),
            duration_minutes: self.duration_minutes,
            plan_id: self.plan_id.clone(),
            note: self.note.clone(),
            created_at: utc_to_ms(self.created_at),
            updated_at: utc_to_ms(self.updated_at),
        }
    }
}

/// Batch of client changes sent to `POST /v1/sync/push`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<AnnotationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<AnnotationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bookmarks: Vec<AnnotationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reading_logs: Vec<ReadingLogRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl PushRequest {
    /// Wrap a single queued change as a batch of one
    ///
    /// A queued delete forces `deleted: true` on the record regardless
    /// of the payload snapshot, so the server tombstones it.
    pub fn for_item(item: &SyncQueueItem) -> Result<Self> {
        let mut request = Self::default();
        match item.entity {
            EntityKind::ReadingLog => {
                let mut record: ReadingLogRecord = serde_json::from_value(item.payload.clone())?;
                if item.action == ChangeAction::Delete {
                    record.deleted = true;
                }
                request.reading_logs.push(record);
            }
            entity => {
                let mut record: AnnotationRecord = serde_json::from_value(item.payload.clone())?;
                if item.action == ChangeAction::Delete {
                    record.deleted = true;
                }
                match entity {
                    EntityKind::Highlight => request.highlights.push(record),
                    EntityKind::Note => request.notes.push(record),
                    _ => request.bookmarks.push(record),
                }
            }
        }
        Ok(request)
    }
}

/// Per-entity-type counts of applied changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedCounts {
    pub highlights: u32,
    pub notes: u32,
    pub bookmarks: u32,
    pub reading_logs: u32,
}

/// Response to a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub synced: SyncedCounts,
    pub synced_at: DateTime<Utc>,
}

/// Authoritative delta returned by `GET /v1/sync/pull`
///
/// Soft-deleted rows are included with `deleted: true`; absence of a
/// record never means "unchanged since your checkpoint, but deleted".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub highlights: Vec<AnnotationRecord>,
    #[serde(default)]
    pub notes: Vec<AnnotationRecord>,
    #[serde(default)]
    pub bookmarks: Vec<AnnotationRecord>,
    #[serde(default)]
    pub reading_logs: Vec<ReadingLogRecord>,
    #[serde(default)]
    pub synced_at: DateTime<Utc>,
}

impl PullResponse {
    /// Total number of records in the delta
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.highlights.len() + self.notes.len() + self.bookmarks.len() + self.reading_logs.len()
    }
}
