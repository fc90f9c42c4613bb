//! Outbound sync queue
//!
//! One pending item per (entity, id): a later local intent coalesces
//! into the existing row instead of appending, and a delete always wins
//! over a prior create or update. Items that keep failing are retained
//! past the retry ceiling for diagnostics but skipped by `drain`.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Items failing this many times are no longer drained
pub const RETRY_CEILING: u32 = 5;

/// Which remote collection a queued change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Highlight,
    Note,
    Bookmark,
    ReadingLog,
}

impl EntityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Highlight => "highlight",
            Self::Note => "note",
            Self::Bookmark => "bookmark",
            Self::ReadingLog => "reading_log",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "highlight" => Ok(Self::Highlight),
            "note" => Ok(Self::Note),
            "bookmark" => Ok(Self::Bookmark),
            "reading_log" => Ok(Self::ReadingLog),
            other => Err(Error::InvalidInput(format!("unknown entity kind: {other}"))),
        }
    }
}

/// The intended remote effect of a queued change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for ChangeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown action: {other}"))),
        }
    }
}

/// A pending outbound change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncQueueItem {
    pub entity: EntityKind,
    pub entity_id: String,
    pub action: ChangeAction,
    /// Serialized wire record snapshot taken when the change was made
    pub payload: serde_json::Value,
    /// Unix ms of the most recent (coalesced) enqueue
    pub enqueued_at: i64,
    pub retry_count: u32,
}

/// Append or coalesce a change intent inside the caller's transaction
///
/// Coalescing rules: delete dominates any prior action; anything layered
/// on a pending create stays a create (the server has never seen the
/// row); otherwise the later intent replaces the earlier payload.
pub(crate) fn enqueue(
    tx: &Transaction<'_>,
    entity: EntityKind,
    entity_id: &str,
    action: ChangeAction,
    payload: &serde_json::Value,
) -> Result<()> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT action FROM sync_queue WHERE entity = ? AND entity_id = ?",
            params![entity.as_str(), entity_id],
            |row| row.get(0),
        )
        .optional()?;

    let now = chrono::Utc::now().timestamp_millis();
    match existing {
        None => {
            tx.execute(
                "INSERT INTO sync_queue (entity, entity_id, action, payload, enqueued_at, retry_count)
                 VALUES (?, ?, ?, ?, ?, 0)",
                params![entity.as_str(), entity_id, action.as_str(), payload, now],
            )?;
        }
        Some(prior) => {
            let prior: ChangeAction = prior.parse()?;
            let merged = coalesce(prior, action);
            tx.execute(
                "UPDATE sync_queue
                 SET action = ?, payload = ?, enqueued_at = ?, retry_count = 0
                 WHERE entity = ? AND entity_id = ?",
                params![
                    merged.as_str(),
                    payload,
                    now,
                    entity.as_str(),
                    entity_id
                ],
            )?;
        }
    }
    Ok(())
}

/// Resolve a new intent against a pending one for the same entity
const fn coalesce(prior: ChangeAction, incoming: ChangeAction) -> ChangeAction {
    match (prior, incoming) {
        (_, ChangeAction::Delete) => ChangeAction::Delete,
        (ChangeAction::Create, _) => ChangeAction::Create,
        (ChangeAction::Update, _) => ChangeAction::Update,
        // Re-creating after a queued delete is a genuine resurrection.
        (ChangeAction::Delete, incoming) => incoming,
    }
}

/// Pending items below the retry ceiling, oldest enqueue first
pub(crate) fn drain(conn: &Connection) -> Result<Vec<SyncQueueItem>> {
    select_items(conn, "retry_count < ?")
}

/// Items at or past the retry ceiling, kept for diagnostics
pub(crate) fn stalled(conn: &Connection) -> Result<Vec<SyncQueueItem>> {
    select_items(conn, "retry_count >= ?")
}

fn select_items(conn: &Connection, predicate: &str) -> Result<Vec<SyncQueueItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT entity, entity_id, action, payload, enqueued_at, retry_count
         FROM sync_queue
         WHERE {predicate}
         ORDER BY enqueued_at ASC"
    ))?;

    let raw = stmt
        .query_map(params![RETRY_CEILING], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, serde_json::Value>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(
            |(entity, entity_id, action, payload, enqueued_at, retry_count)| {
                Ok(SyncQueueItem {
                    entity: entity.parse()?,
                    entity_id,
                    action: action.parse()?,
                    payload,
                    enqueued_at,
                    retry_count,
                })
            },
        )
        .collect()
}

/// Remove a confirmed item
pub(crate) fn remove(conn: &Connection, entity: EntityKind, entity_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM sync_queue WHERE entity = ? AND entity_id = ?",
        params![entity.as_str(), entity_id],
    )?;
    Ok(())
}

/// Bump the retry counter after a retryable failure
pub(crate) fn increment_retry(
    conn: &Connection,
    entity: EntityKind,
    entity_id: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE sync_queue SET retry_count = retry_count + 1 WHERE entity = ? AND entity_id = ?",
        params![entity.as_str(), entity_id],
    )?;
    Ok(())
}

/// Pin an item past the retry ceiling after a fatal (non-retryable) rejection
pub(crate) fn mark_failed(conn: &Connection, entity: EntityKind, entity_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE sync_queue SET retry_count = ? WHERE entity = ? AND entity_id = ?",
        params![RETRY_CEILING, entity.as_str(), entity_id],
    )?;
    Ok(())
}

/// Count of items still eligible for draining
pub(crate) fn pending_count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE retry_count < ?",
        params![RETRY_CEILING],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}
