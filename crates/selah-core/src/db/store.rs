//! Local event store
//!
//! Durable CRUD over annotations and reading logs. Every mutating
//! operation commits the entity write and the corresponding sync-queue
//! entry in one transaction; a committed change therefore always has a
//! queued outbound intent. Remote deltas are applied through
//! `apply_remote`, which bypasses the queue and resolves conflicts with
//! last-write-wins.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::db::queue::{self, ChangeAction, EntityKind, SyncQueueItem};
use crate::db::{meta, Database};
use crate::error::{Error, Result};
use crate::models::{Annotation, AnnotationId, AnnotationKind, ReadingLogEntry};
use crate::streak::{compute_streak, StreakState};
use crate::sync::lww::{resolve, Resolution};
use crate::sync::protocol::{utc_to_ms, AnnotationRecord, PullResponse, ReadingLogRecord};

const ANNOTATION_COLUMNS: &str =
    "id, kind, verse_ref, color, content, label, created_at, updated_at, deleted_at";

/// The client-resident store of user-generated facts
///
/// Constructed once at application start and shared by reference
/// (typically inside an `Arc`); there is no global instance.
pub struct EventStore {
    db: Database,
}

impl EventStore {
    /// Open the store at the given path, creating and migrating as needed
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            db: Database::open(path)?,
        }))
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            db: Database::open_in_memory()?,
        }))
    }

    // ---- Annotations ------------------------------------------------

    /// Save a highlight for a verse, replacing any live highlight there
    ///
    /// The replaced highlight keeps its id, so other devices see an
    /// update rather than a delete/create pair.
    pub fn save_highlight(&self, verse_ref: &str, color: impl Into<String>) -> Result<Annotation> {
        self.save_exclusive(
            AnnotationKind::Highlight {
                color: color.into(),
            },
            verse_ref,
        )
    }

    /// Save a bookmark for a verse, replacing any live bookmark there
    pub fn save_bookmark(&self, verse_ref: &str, label: Option<String>) -> Result<Annotation> {
        self.save_exclusive(AnnotationKind::Bookmark { label }, verse_ref)
    }

    /// Add a note to a verse; a verse may carry any number of notes
    pub fn add_note(&self, verse_ref: &str, content: impl Into<String>) -> Result<Annotation> {
        let annotation = Annotation::note(verse_ref, content.into());

        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        write_annotation_row(&tx, &annotation)?;
        enqueue_annotation(&tx, &annotation, ChangeAction::Create)?;
        tx.commit()?;
        Ok(annotation)
    }

    fn save_exclusive(&self, kind: AnnotationKind, verse_ref: &str) -> Result<Annotation> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {ANNOTATION_COLUMNS} FROM annotations
                     WHERE kind = ? AND verse_ref = ? AND deleted_at IS NULL"
                ),
                params![kind.as_str(), verse_ref],
                parse_annotation,
            )
            .optional()?;

        let (annotation, action) = match existing {
            Some(mut annotation) => {
                annotation.kind = kind;
                annotation.updated_at = Utc::now().timestamp_millis();
                (annotation, ChangeAction::Update)
            }
            None => (Annotation::new(kind, verse_ref), ChangeAction::Create),
        };

        write_annotation_row(&tx, &annotation)?;
        enqueue_annotation(&tx, &annotation, action)?;
        tx.commit()?;
        Ok(annotation)
    }

    /// Edit an annotation's variant content; the kind itself is fixed
    pub fn update_annotation(&self, id: &AnnotationId, kind: AnnotationKind) -> Result<Annotation> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;

        let mut annotation = load_annotation(&tx, &id.as_str())?
            .filter(|a| !a.is_deleted())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if annotation.kind.as_str() != kind.as_str() {
            return Err(Error::InvalidInput(
                "annotation kind cannot change".to_string(),
            ));
        }

        annotation.kind = kind;
        annotation.updated_at = Utc::now().timestamp_millis();
        write_annotation_row(&tx, &annotation)?;
        enqueue_annotation(&tx, &annotation, ChangeAction::Update)?;
        tx.commit()?;
        Ok(annotation)
    }

    /// Tombstone an annotation
    pub fn delete_annotation(&self, id: &AnnotationId) -> Result<()> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;

        let mut annotation = load_annotation(&tx, &id.as_str())?
            .filter(|a| !a.is_deleted())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let now = Utc::now().timestamp_millis();
        annotation.deleted_at = Some(now);
        annotation.updated_at = now;
        write_annotation_row(&tx, &annotation)?;
        enqueue_annotation(&tx, &annotation, ChangeAction::Delete)?;
        tx.commit()?;
        Ok(())
    }

    /// Get an annotation by id, tombstoned or not
    pub fn annotation(&self, id: &AnnotationId) -> Result<Option<Annotation>> {
        load_annotation(&self.db.lock(), &id.as_str())
    }

    /// Live annotations for a verse, oldest first
    pub fn annotations_for_verse(&self, verse_ref: &str) -> Result<Vec<Annotation>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations
             WHERE verse_ref = ? AND deleted_at IS NULL
             ORDER BY created_at ASC"
        ))?;
        let annotations = stmt
            .query_map(params![verse_ref], parse_annotation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(annotations)
    }

    /// All live annotations, most recently updated first
    pub fn live_annotations(&self) -> Result<Vec<Annotation>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations
             WHERE deleted_at IS NULL
             ORDER BY updated_at DESC"
        ))?;
        let annotations = stmt
            .query_map([], parse_annotation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(annotations)
    }

    // ---- Reading log ------------------------------------------------

    /// Record reading activity for a date
    ///
    /// Upserts the day's entry: passages accumulate as a set, and
    /// `Some` fields overwrite while `None` fields leave the existing
    /// value alone. Logging the same passage twice is a no-op.
    pub fn log_reading(
        &self,
        date: NaiveDate,
        passages: &[String],
        duration_minutes: Option<u32>,
        plan_id: Option<String>,
        note: Option<String>,
    ) -> Result<ReadingLogEntry> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        let date_key = date.to_string();
        let now = Utc::now().timestamp_millis();

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM reading_logs WHERE date = ?)",
            params![date_key],
            |row| row.get(0),
        )?;

        let action = if exists {
            tx.execute(
                "UPDATE reading_logs
                 SET duration_minutes = COALESCE(?, duration_minutes),
                     plan_id = COALESCE(?, plan_id),
                     note = COALESCE(?, note),
                     updated_at = ?
                 WHERE date = ?",
                params![duration_minutes, plan_id, note, now, date_key],
            )?;
            ChangeAction::Update
        } else {
            tx.execute(
                "INSERT INTO reading_logs (date, duration_minutes, plan_id, note, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![date_key, duration_minutes, plan_id, note, now, now],
            )?;
            ChangeAction::Create
        };

        for passage in passages {
            tx.execute(
                "INSERT OR IGNORE INTO reading_log_passages (log_date, passage) VALUES (?, ?)",
                params![date_key, passage],
            )?;
        }

        let entry = load_log(&tx, date)?.ok_or_else(|| Error::NotFound(date_key.clone()))?;
        let payload = serde_json::to_value(ReadingLogRecord::from_entry(&entry))?;
        queue::enqueue(&tx, EntityKind::ReadingLog, &date_key, action, &payload)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Get the entry for a date
    pub fn reading_log(&self, date: NaiveDate) -> Result<Option<ReadingLogEntry>> {
        load_log(&self.db.lock(), date)
    }

    /// All logged dates, newest first
    pub fn reading_log_dates(&self) -> Result<Vec<NaiveDate>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare("SELECT date FROM reading_logs ORDER BY date DESC")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|s| {
                s.parse()
                    .map_err(|_| Error::InvalidInput(format!("stored log date: {s}")))
            })
            .collect()
    }

    /// Derive the current streak state as of `today`
    ///
    /// Persists the longest streak so it survives recomputation and can
    /// only grow.
    pub fn streak(&self, today: NaiveDate) -> Result<StreakState> {
        let dates = self.reading_log_dates()?;
        let conn = self.db.lock();
        let prior_longest = meta::longest_streak(&conn)?;
        let state = compute_streak(&dates, today, prior_longest);
        if state.longest_streak > prior_longest {
            meta::set_longest_streak(&conn, state.longest_streak)?;
        }
        Ok(state)
    }

    // ---- Sync plumbing ----------------------------------------------

    /// Pending outbound changes, oldest first
    pub fn drain_queue(&self) -> Result<Vec<SyncQueueItem>> {
        queue::drain(&self.db.lock())
    }

    /// Drop a queue item after the remote write was confirmed
    pub fn confirm(&self, item: &SyncQueueItem) -> Result<()> {
        queue::remove(&self.db.lock(), item.entity, &item.entity_id)
    }

    /// Bump an item's retry count after a retryable failure
    pub fn record_failure(&self, item: &SyncQueueItem) -> Result<()> {
        queue::increment_retry(&self.db.lock(), item.entity, &item.entity_id)
    }

    /// Park an item the server will never accept; it is kept for
    /// diagnostics but no longer drained
    pub fn mark_failed(&self, item: &SyncQueueItem) -> Result<()> {
        queue::mark_failed(&self.db.lock(), item.entity, &item.entity_id)
    }

    /// Number of changes still waiting to be pushed
    pub fn pending_count(&self) -> Result<u64> {
        queue::pending_count(&self.db.lock())
    }

    /// Items parked past the retry ceiling
    pub fn stalled_items(&self) -> Result<Vec<SyncQueueItem>> {
        queue::stalled(&self.db.lock())
    }

    /// Timestamp of the last successful pull
    pub fn checkpoint(&self) -> Result<Option<chrono::DateTime<Utc>>> {
        meta::checkpoint(&self.db.lock())
    }

    /// Advance the pull checkpoint (only after a successful pull)
    pub fn set_checkpoint(&self, at: chrono::DateTime<Utc>) -> Result<()> {
        meta::set_checkpoint(&self.db.lock(), at)
    }

    /// Apply an authoritative delta pulled from the server
    ///
    /// Applies all records in one transaction, without re-enqueueing
    /// them. Returns the number of records that changed local state.
    pub fn apply_remote(&self, delta: &PullResponse) -> Result<usize> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        let mut applied = 0usize;

        let groups = [
            (EntityKind::Highlight, &delta.highlights),
            (EntityKind::Note, &delta.notes),
            (EntityKind::Bookmark, &delta.bookmarks),
        ];
        for (entity, records) in groups {
            for record in records.iter() {
                if apply_annotation_record(&tx, entity, record)? {
                    applied += 1;
                }
            }
        }
        for record in &delta.reading_logs {
            if apply_reading_log_record(&tx, record)? {
                applied += 1;
            }
        }

        tx.commit()?;
        Ok(applied)
    }
}

// ---- Row helpers ----------------------------------------------------

fn parse_annotation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Annotation> {
    let id: String = row.get(0)?;
    let kind_name: String = row.get(1)?;
    let kind = match kind_name.as_str() {
        "highlight" => AnnotationKind::Highlight {
            color: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        },
        "note" => AnnotationKind::Note {
            content: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        },
        _ => AnnotationKind::Bookmark {
            label: row.get(5)?,
        },
    };
    // A row with an unparseable id is corrupt; never invent a fresh id
    // for it.
    let id = id.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(error))
    })?;
    Ok(Annotation {
        id,
        kind,
        verse_ref: row.get(2)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        deleted_at: row.get(8)?,
    })
}

fn load_annotation(conn: &Connection, id: &str) -> Result<Option<Annotation>> {
    let annotation = conn
        .query_row(
            &format!("SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE id = ?"),
            params![id],
            parse_annotation,
        )
        .optional()?;
    Ok(annotation)
}

/// Insert or fully replace an annotation row by primary id
fn write_annotation_row(conn: &Connection, annotation: &Annotation) -> Result<()> {
    let (color, content, label) = match &annotation.kind {
        AnnotationKind::Highlight { color } => (Some(color.as_str()), None, None),
        AnnotationKind::Note { content } => (None, Some(content.as_str()), None),
        AnnotationKind::Bookmark { label } => (None, None, label.as_deref()),
    };
    conn.execute(
        "INSERT OR REPLACE INTO annotations
         (id, kind, verse_ref, color, content, label, created_at, updated_at, deleted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            annotation.id.as_str(),
            annotation.kind.as_str(),
            annotation.verse_ref,
            color,
            content,
            label,
            annotation.created_at,
            annotation.updated_at,
            annotation.deleted_at,
        ],
    )?;
    Ok(())
}

fn enqueue_annotation(
    tx: &rusqlite::Transaction<'_>,
    annotation: &Annotation,
    action: ChangeAction,
) -> Result<()> {
    let (entity, record) = AnnotationRecord::from_annotation(annotation);
    let payload = serde_json::to_value(record)?;
    queue::enqueue(tx, entity, &annotation.id.as_str(), action, &payload)
}

fn load_log(conn: &Connection, date: NaiveDate) -> Result<Option<ReadingLogEntry>> {
    let date_key = date.to_string();
    let row = conn
        .query_row(
            "SELECT duration_minutes, plan_id, note, created_at, updated_at
             FROM reading_logs WHERE date = ?",
            params![date_key],
            |row| {
                Ok((
                    row.get::<_, Option<u32>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((duration_minutes, plan_id, note, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT passage FROM reading_log_passages WHERE log_date = ?")?;
    let passages = stmt
        .query_map(params![date_key], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<_>>()?;

    Ok(Some(ReadingLogEntry {
        date,
        passages,
        duration_minutes,
        plan_id,
        note,
        created_at,
        updated_at,
    }))
}

// ---- Remote apply ---------------------------------------------------

fn apply_annotation_record(
    tx: &rusqlite::Transaction<'_>,
    entity: EntityKind,
    record: &AnnotationRecord,
) -> Result<bool> {
    let incoming_ms = utc_to_ms(record.updated_at);

    let local_updated: Option<i64> = tx
        .query_row(
            "SELECT updated_at FROM annotations WHERE id = ?",
            params![record.id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(local_ms) = local_updated {
        if resolve(local_ms, incoming_ms) == Resolution::KeepLocal {
            return Ok(false);
        }
    }

    let annotation = record.to_annotation(entity)?;
    if !annotation.is_deleted() && !claim_exclusive_slot(tx, &annotation)? {
        return Ok(false);
    }

    write_annotation_row(tx, &annotation)?;
    Ok(true)
}

/// Make room for an incoming live highlight/bookmark on its verse.
///
/// If another live row of the same kind holds the verse, the older side
/// loses: an older local row is tombstoned (and the delete queued so the
/// server converges too); a newer local row wins and the incoming record
/// is dropped. Returns whether the incoming record may be written.
fn claim_exclusive_slot(tx: &rusqlite::Transaction<'_>, incoming: &Annotation) -> Result<bool> {
    if !incoming.kind.is_exclusive_per_verse() {
        return Ok(true);
    }

    let other = tx
        .query_row(
            &format!(
                "SELECT {ANNOTATION_COLUMNS} FROM annotations
                 WHERE kind = ? AND verse_ref = ? AND deleted_at IS NULL AND id <> ?"
            ),
            params![
                incoming.kind.as_str(),
                incoming.verse_ref,
                incoming.id.as_str()
            ],
            parse_annotation,
        )
        .optional()?;

    let Some(mut other) = other else {
        return Ok(true);
    };

    if resolve(other.updated_at, incoming.updated_at) == Resolution::KeepLocal {
        tracing::debug!(
            verse_ref = %incoming.verse_ref,
            "kept newer local {} over pulled record",
            incoming.kind.as_str()
        );
        return Ok(false);
    }

    let now = Utc::now().timestamp_millis();
    other.deleted_at = Some(now);
    other.updated_at = now;
    write_annotation_row(tx, &other)?;
    enqueue_annotation(tx, &other, ChangeAction::Delete)?;
    Ok(true)
}

fn apply_reading_log_record(
    tx: &rusqlite::Transaction<'_>,
    record: &ReadingLogRecord,
) -> Result<bool> {
    let date_key = record.date.to_string();
    let incoming_ms = utc_to_ms(record.updated_at);

    let local_updated: Option<i64> = tx
        .query_row(
            "SELECT updated_at FROM reading_logs WHERE date = ?",
            params![date_key],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(local_ms) = local_updated {
        if resolve(local_ms, incoming_ms) == Resolution::KeepLocal {
            return Ok(false);
        }
    }

    if record.deleted {
        let removed = tx.execute("DELETE FROM reading_logs WHERE date = ?", params![date_key])?;
        return Ok(removed > 0);
    }

    let entry = record.to_entry();
    tx.execute(
        "INSERT OR REPLACE INTO reading_logs
         (date, duration_minutes, plan_id, note, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            date_key,
            entry.duration_minutes,
            entry.plan_id,
            entry.note,
            entry.created_at,
            entry.updated_at,
        ],
    )?;
    // REPLACE cascades the old passage rows away; rewrite the set.
    tx.execute(
        "DELETE FROM reading_log_passages WHERE log_date = ?",
        params![date_key],
    )?;
    for passage in &entry.passages {
        tx.execute(
            "INSERT OR IGNORE INTO reading_log_passages (log_date, passage) VALUES (?, ?)",
            params![date_key, passage],
        )?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::ms_to_utc;
    use pretty_assertions::assert_eq;

    fn setup() -> Arc<EventStore> {
        EventStore::open_in_memory().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_save_highlight_creates_and_enqueues() {
        let store = setup();
        let highlight = store.save_highlight("John 3:16", "amber").unwrap();

        let annotations = store.annotations_for_verse("John 3:16").unwrap();
        assert_eq!(annotations, vec![highlight.clone()]);

        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].entity, EntityKind::Highlight);
        assert_eq!(queued[0].entity_id, highlight.id.as_str());
        assert_eq!(queued[0].action, ChangeAction::Create);
    }

    #[test]
    fn test_save_highlight_replaces_live_highlight() {
        let store = setup();
        let first = store.save_highlight("John 3:16", "amber").unwrap();
        let second = store.save_highlight("John 3:16", "teal").unwrap();

        // Same slot, same id, new color.
        assert_eq!(first.id, second.id);
        let annotations = store.annotations_for_verse("John 3:16").unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(
            annotations[0].kind,
            AnnotationKind::Highlight {
                color: "teal".to_string()
            }
        );

        // Coalesced: one queue item, still a create (server never saw it),
        // carrying the latest payload.
        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, ChangeAction::Create);
        assert_eq!(queued[0].payload["color"], "teal");
    }

    #[test]
    fn test_notes_may_stack_on_one_verse() {
        let store = setup();
        store.add_note("Ps 23:1", "first").unwrap();
        store.add_note("Ps 23:1", "second").unwrap();

        let annotations = store.annotations_for_verse("Ps 23:1").unwrap();
        assert_eq!(annotations.len(), 2);
    }

    #[test]
    fn test_update_annotation_kind_cannot_change() {
        let store = setup();
        let note = store.add_note("Ps 23:1", "still waters").unwrap();

        let result = store.update_annotation(
            &note.id,
            AnnotationKind::Highlight {
                color: "amber".to_string(),
            },
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_queue_coalesces_updates() {
        let store = setup();
        let note = store.add_note("Ps 23:1", "v1").unwrap();
        // Simulate a completed sync so the next edit enqueues an update.
        for item in store.drain_queue().unwrap() {
            store.confirm(&item).unwrap();
        }

        store
            .update_annotation(
                &note.id,
                AnnotationKind::Note {
                    content: "v2".to_string(),
                },
            )
            .unwrap();
        store
            .update_annotation(
                &note.id,
                AnnotationKind::Note {
                    content: "v3".to_string(),
                },
            )
            .unwrap();

        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, ChangeAction::Update);
        assert_eq!(queued[0].payload["content"], "v3");
    }

    #[test]
    fn test_delete_dominates_queued_update() {
        let store = setup();
        let note = store.add_note("Ps 23:1", "v1").unwrap();
        for item in store.drain_queue().unwrap() {
            store.confirm(&item).unwrap();
        }

        store
            .update_annotation(
                &note.id,
                AnnotationKind::Note {
                    content: "v2".to_string(),
                },
            )
            .unwrap();
        store.delete_annotation(&note.id).unwrap();

        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, ChangeAction::Delete);
    }

    #[test]
    fn test_retry_ceiling_parks_item() {
        let store = setup();
        store.save_highlight("John 3:16", "amber").unwrap();

        let item = store.drain_queue().unwrap().remove(0);
        for _ in 0..queue::RETRY_CEILING {
            store.record_failure(&item).unwrap();
        }

        assert!(store.drain_queue().unwrap().is_empty());
        assert_eq!(store.pending_count().unwrap(), 0);
        // Retained for diagnostics, not silently dropped.
        let stalled = store.stalled_items().unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].retry_count, queue::RETRY_CEILING);
    }

    #[test]
    fn test_log_reading_same_day_is_idempotent() {
        let store = setup();
        let day = date(2024, 1, 1);
        let passages = vec!["John 3".to_string()];

        store
            .log_reading(day, &passages, Some(10), None, None)
            .unwrap();
        store.log_reading(day, &passages, None, None, None).unwrap();

        let entry = store.reading_log(day).unwrap().unwrap();
        assert_eq!(entry.passages.len(), 1);
        // None leaves the earlier duration in place.
        assert_eq!(entry.duration_minutes, Some(10));

        let state = store.streak(day).unwrap();
        assert_eq!(state.total_days_read, 1);
        assert_eq!(state.current_streak, 1);
    }

    #[test]
    fn test_log_reading_accumulates_passages() {
        let store = setup();
        let day = date(2024, 1, 1);

        store
            .log_reading(day, &["John 3".to_string()], None, None, None)
            .unwrap();
        store
            .log_reading(
                day,
                &["John 3".to_string(), "John 4".to_string()],
                None,
                None,
                None,
            )
            .unwrap();

        let entry = store.reading_log(day).unwrap().unwrap();
        assert_eq!(entry.passages.len(), 2);

        // Still one queue item for the day.
        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].entity, EntityKind::ReadingLog);
    }

    #[test]
    fn test_streak_scenario_skip_and_restart() {
        let store = setup();
        for day in [date(2024, 1, 1), date(2024, 1, 2), date(2024, 1, 3)] {
            store.log_reading(day, &[], None, None, None).unwrap();
        }

        let state = store.streak(date(2024, 1, 3)).unwrap();
        assert_eq!(state.current_streak, 3);
        assert_eq!(state.longest_streak, 3);
        assert_eq!(state.total_days_read, 3);

        // Skip Jan 4, read again Jan 5.
        store
            .log_reading(date(2024, 1, 5), &[], None, None, None)
            .unwrap();
        let state = store.streak(date(2024, 1, 5)).unwrap();
        assert_eq!(state.current_streak, 1);
        assert_eq!(state.longest_streak, 3);
        assert_eq!(state.total_days_read, 4);
    }

    #[test]
    fn test_longest_streak_monotone_across_calls() {
        let store = setup();
        let mut previous = 0;
        for day in [
            date(2024, 1, 1),
            date(2024, 1, 2),
            date(2024, 1, 3),
            date(2024, 1, 7),
            date(2024, 1, 8),
        ] {
            store.log_reading(day, &[], None, None, None).unwrap();
            let state = store.streak(day).unwrap();
            assert!(state.longest_streak >= previous);
            previous = state.longest_streak;
        }
    }

    #[test]
    fn test_apply_remote_takes_newer_and_keeps_newer_local() {
        let store = setup();
        let note = store.add_note("Ps 23:1", "local").unwrap();

        // Older incoming version loses.
        let (_, mut older) = AnnotationRecord::from_annotation(&note);
        older.content = Some("stale".to_string());
        older.updated_at = ms_to_utc(note.updated_at - 1000);
        let delta = PullResponse {
            notes: vec![older],
            ..Default::default()
        };
        assert_eq!(store.apply_remote(&delta).unwrap(), 0);
        let kept = store.annotation(&note.id).unwrap().unwrap();
        assert_eq!(
            kept.kind,
            AnnotationKind::Note {
                content: "local".to_string()
            }
        );

        // Newer incoming version wins.
        let (_, mut newer) = AnnotationRecord::from_annotation(&note);
        newer.content = Some("fresh".to_string());
        newer.updated_at = ms_to_utc(note.updated_at + 1000);
        let delta = PullResponse {
            notes: vec![newer],
            ..Default::default()
        };
        assert_eq!(store.apply_remote(&delta).unwrap(), 1);
        let replaced = store.annotation(&note.id).unwrap().unwrap();
        assert_eq!(
            replaced.kind,
            AnnotationKind::Note {
                content: "fresh".to_string()
            }
        );
    }

    #[test]
    fn test_apply_remote_tombstones_local_copy() {
        let store = setup();
        let highlight = store.save_highlight("John 3:16", "amber").unwrap();

        let (_, mut record) = AnnotationRecord::from_annotation(&highlight);
        record.deleted = true;
        record.updated_at = ms_to_utc(highlight.updated_at + 1000);
        let delta = PullResponse {
            highlights: vec![record],
            ..Default::default()
        };
        store.apply_remote(&delta).unwrap();

        let local = store.annotation(&highlight.id).unwrap().unwrap();
        assert!(local.is_deleted());
        assert!(store.annotations_for_verse("John 3:16").unwrap().is_empty());
    }

    #[test]
    fn test_apply_remote_does_not_touch_queue() {
        let store = setup();
        let remote = Annotation::note("Rom 8:1", "from another device");
        let (_, record) = AnnotationRecord::from_annotation(&remote);
        let delta = PullResponse {
            notes: vec![record],
            ..Default::default()
        };

        store.apply_remote(&delta).unwrap();
        assert_eq!(store.pending_count().unwrap(), 0);
        assert_eq!(store.annotations_for_verse("Rom 8:1").unwrap().len(), 1);
    }

    #[test]
    fn test_apply_remote_displaces_older_live_highlight() {
        let store = setup();
        let local = store.save_highlight("John 3:16", "amber").unwrap();
        for item in store.drain_queue().unwrap() {
            store.confirm(&item).unwrap();
        }

        // Another device highlighted the same verse later, under its own id.
        let mut remote = Annotation::highlight("John 3:16", "teal");
        remote.updated_at = local.updated_at + 1000;
        remote.created_at = local.created_at + 1000;
        let (_, record) = AnnotationRecord::from_annotation(&remote);
        let delta = PullResponse {
            highlights: vec![record],
            ..Default::default()
        };
        store.apply_remote(&delta).unwrap();

        let live = store.annotations_for_verse("John 3:16").unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, remote.id);

        // The displaced highlight was tombstoned and its delete queued so
        // the server converges as well.
        let displaced = store.annotation(&local.id).unwrap().unwrap();
        assert!(displaced.is_deleted());
        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, ChangeAction::Delete);
        assert_eq!(queued[0].entity_id, local.id.as_str());
    }

    #[test]
    fn test_apply_remote_note_does_not_displace_existing_note() {
        let store = setup();
        store.add_note("Ps 23:1", "mine").unwrap();

        // Notes are not exclusive per verse, so a pulled note under a
        // different id stacks instead of displacing.
        let remote = Annotation::note("Ps 23:1", "from another device");
        let (_, record) = AnnotationRecord::from_annotation(&remote);
        let delta = PullResponse {
            notes: vec![record],
            ..Default::default()
        };
        store.apply_remote(&delta).unwrap();

        assert_eq!(store.annotations_for_verse("Ps 23:1").unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_stored_id_surfaces_as_storage_error() {
        let store = setup();
        store
            .db
            .lock()
            .execute(
                "INSERT INTO annotations (id, kind, verse_ref, created_at, updated_at)
                 VALUES ('not-a-uuid', 'note', 'Ps 23:1', 1, 1)",
                [],
            )
            .unwrap();

        // The corrupt row must not come back under a freshly invented id.
        let result = store.annotations_for_verse("Ps 23:1");
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[test]
    fn test_apply_remote_reading_log_replaces_passages() {
        let store = setup();
        let day = date(2024, 1, 1);
        store
            .log_reading(day, &["John 3".to_string()], None, None, None)
            .unwrap();
        let entry = store.reading_log(day).unwrap().unwrap();

        let mut record = ReadingLogRecord::from_entry(&entry);
        record.passages = vec!["Luke 15".to_string(), "Luke 16".to_string()];
        record.updated_at = ms_to_utc(entry.updated_at + 1000);
        let delta = PullResponse {
            reading_logs: vec![record],
            ..Default::default()
        };
        store.apply_remote(&delta).unwrap();

        let merged = store.reading_log(day).unwrap().unwrap();
        assert_eq!(merged.passages.len(), 2);
        assert!(merged.passages.contains("Luke 15"));
    }
}
