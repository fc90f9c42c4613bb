//! Push/pull reconciliation
//!
//! Push applies client batches with last-write-wins conflict handling,
//! deletes expressed as soft-delete tombstones, and record ids doubling
//! as idempotency keys. Pull returns every row of the caller's data
//! whose `updated_at` is newer than the supplied checkpoint, tombstones
//! included.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use selah_core::sync::lww::{resolve, Resolution};
use selah_core::sync::protocol::{
    ms_to_utc, utc_to_ms, AnnotationRecord, PullResponse, PushRequest, PushResponse,
    ReadingLogRecord, SyncedCounts,
};

use crate::auth::user_fingerprint;
use crate::db::ServerDb;
use crate::error::AppError;

/// Apply a pushed batch for one user
///
/// Each entity type is applied in its own transaction, so a failure in
/// one array never rolls back changes already accepted from another.
pub fn apply_push(
    db: &ServerDb,
    user_id: &str,
    request: &PushRequest,
) -> Result<PushResponse, AppError> {
    let mut conn = db.lock();
    let synced = SyncedCounts {
        highlights: apply_annotations(&mut conn, user_id, "highlight", &request.highlights)?,
        notes: apply_annotations(&mut conn, user_id, "note", &request.notes)?,
        bookmarks: apply_annotations(&mut conn, user_id, "bookmark", &request.bookmarks)?,
        reading_logs: apply_reading_logs(&mut conn, user_id, &request.reading_logs)?,
    };

    Ok(PushResponse {
        synced,
        synced_at: Utc::now(),
    })
}

fn apply_annotations(
    conn: &mut Connection,
    user_id: &str,
    kind: &str,
    records: &[AnnotationRecord],
) -> Result<u32, AppError> {
    if records.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut applied = 0;
    for record in records {
        if apply_annotation(&tx, user_id, kind, record)? {
            applied += 1;
        }
    }
    tx.commit()?;
    Ok(applied)
}

fn apply_annotation(
    tx: &Transaction<'_>,
    user_id: &str,
    kind: &str,
    record: &AnnotationRecord,
) -> Result<bool, AppError> {
    let incoming_ms = utc_to_ms(record.updated_at);

    let existing: Option<(String, i64)> = tx
        .query_row(
            "SELECT user_id, updated_at FROM annotations WHERE id = ?1",
            [&record.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((owner, local_ms)) = existing {
        if owner != user_id {
            tracing::warn!(
                user = user_fingerprint(user_id),
                "Rejected annotation push targeting another user's record"
            );
            return Ok(false);
        }
        if resolve(local_ms, incoming_ms) == Resolution::KeepLocal {
            return Ok(false);
        }
    }

    // Upserting a non-deleted record over a tombstone resurrects it.
    tx.execute(
        "INSERT OR REPLACE INTO annotations \
         (id, user_id, kind, verse_ref, color, content, label, created_at, updated_at, deleted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            user_id,
            kind,
            record.verse_ref,
            record.color,
            record.content,
            record.label,
            utc_to_ms(record.created_at),
            incoming_ms,
            record.deleted.then_some(incoming_ms),
        ],
    )?;
    Ok(true)
}

fn apply_reading_logs(
    conn: &mut Connection,
    user_id: &str,
    records: &[ReadingLogRecord],
) -> Result<u32, AppError> {
    if records.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut applied = 0;
    for record in records {
        if apply_reading_log(&tx, user_id, record)? {
            applied += 1;
        }
    }
    tx.commit()?;
    Ok(applied)
}

fn apply_reading_log(
    tx: &Transaction<'_>,
    user_id: &str,
    record: &ReadingLogRecord,
) -> Result<bool, AppError> {
    let incoming_ms = utc_to_ms(record.updated_at);
    let date = record.date.to_string();

    let local_ms: Option<i64> = tx
        .query_row(
            "SELECT updated_at FROM reading_logs WHERE user_id = ?1 AND date = ?2",
            params![user_id, date],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(local_ms) = local_ms {
        if resolve(local_ms, incoming_ms) == Resolution::KeepLocal {
            return Ok(false);
        }
    }

    tx.execute(
        "INSERT OR REPLACE INTO reading_logs \
         (user_id, date, duration_minutes, plan_id, note, created_at, updated_at, deleted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user_id,
            date,
            record.duration_minutes,
            record.plan_id,
            record.note,
            utc_to_ms(record.created_at),
            incoming_ms,
            record.deleted.then_some(incoming_ms),
        ],
    )?;

    // The incoming passage set replaces the stored one wholesale.
    tx.execute(
        "DELETE FROM reading_log_passages WHERE user_id = ?1 AND log_date = ?2",
        params![user_id, date],
    )?;
    for passage in &record.passages {
        tx.execute(
            "INSERT OR IGNORE INTO reading_log_passages (user_id, log_date, passage) \
             VALUES (?1, ?2, ?3)",
            params![user_id, date, passage],
        )?;
    }
    Ok(true)
}

/// Collect every record of the user's changed since the checkpoint
pub fn pull(
    db: &ServerDb,
    user_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<PullResponse, AppError> {
    let conn = db.lock();
    let since_ms = since.map_or(i64::MIN, utc_to_ms);

    let mut response = PullResponse {
        synced_at: Utc::now(),
        ..PullResponse::default()
    };

    let mut statement = conn.prepare(
        "SELECT id, kind, verse_ref, color, content, label, created_at, updated_at, deleted_at \
         FROM annotations WHERE user_id = ?1 AND updated_at > ?2 ORDER BY updated_at",
    )?;
    let rows = statement.query_map(params![user_id, since_ms], |row| {
        let kind: String = row.get(1)?;
        let deleted_at: Option<i64> = row.get(8)?;
        let record = AnnotationRecord {
            id: row.get(0)?,
            verse_ref: row.get(2)?,
            color: row.get(3)?,
            content: row.get(4)?,
            label: row.get(5)?,
            created_at: ms_to_utc(row.get(6)?),
            updated_at: ms_to_utc(row.get(7)?),
            deleted: deleted_at.is_some(),
        };
        Ok((kind, record))
    })?;
    for row in rows {
        let (kind, record) = row?;
        match kind.as_str() {
            "highlight" => response.highlights.push(record),
            "note" => response.notes.push(record),
            _ => response.bookmarks.push(record),
        }
    }

    let mut statement = conn.prepare(
        "SELECT date, duration_minutes, plan_id, note, created_at, updated_at, deleted_at \
         FROM reading_logs WHERE user_id = ?1 AND updated_at > ?2 ORDER BY date",
    )?;
    let logs: Vec<(ReadingLogRecord, String)> = statement
        .query_map(params![user_id, since_ms], |row| {
            let date: String = row.get(0)?;
            let deleted_at: Option<i64> = row.get(6)?;
            let record = ReadingLogRecord {
                date: date.parse().unwrap_or_default(),
                passages: Vec::new(),
                duration_minutes: row.get(1)?,
                plan_id: row.get(2)?,
                note: row.get(3)?,
                created_at: ms_to_utc(row.get(4)?),
                updated_at: ms_to_utc(row.get(5)?),
                deleted: deleted_at.is_some(),
            };
            Ok((record, date))
        })?
        .collect::<Result<_, _>>()?;

    let mut passage_statement = conn.prepare(
        "SELECT passage FROM reading_log_passages \
         WHERE user_id = ?1 AND log_date = ?2 ORDER BY passage",
    )?;
    for (mut record, date) in logs {
        record.passages = passage_statement
            .query_map(params![user_id, date], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        response.reading_logs.push(record);
    }

    Ok(response)
}
