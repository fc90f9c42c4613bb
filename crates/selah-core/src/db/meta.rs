//! Sync bookkeeping key/value store
//!
//! Holds the pull checkpoint and the cached longest streak. Values here
//! are derived or protocol state, never primary user data.

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Timestamp of the last successful pull, RFC 3339
const KEY_LAST_PULLED_AT: &str = "last_pulled_at";
/// Longest streak ever observed, decimal
const KEY_LONGEST_STREAK: &str = "longest_streak";

pub(crate) fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn checkpoint(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = get(conn, KEY_LAST_PULLED_AT)? else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(&raw)
        .map_err(|error| crate::Error::InvalidInput(format!("stored checkpoint: {error}")))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

pub(crate) fn set_checkpoint(conn: &Connection, at: DateTime<Utc>) -> Result<()> {
    set(conn, KEY_LAST_PULLED_AT, &at.to_rfc3339())
}

pub(crate) fn longest_streak(conn: &Connection) -> Result<u32> {
    let Some(raw) = get(conn, KEY_LONGEST_STREAK)? else {
        return Ok(0);
    };
    Ok(raw.parse().unwrap_or(0))
}

pub(crate) fn set_longest_streak(conn: &Connection, longest: u32) -> Result<()> {
    set(conn, KEY_LONGEST_STREAK, &longest.to_string())
}
