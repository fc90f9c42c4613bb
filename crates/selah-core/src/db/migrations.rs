//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

fn apply(conn: &mut Connection, version: i32, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    tx.commit()?;
    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Version 1: annotations and reading logs
///
/// The partial unique index enforces "at most one live highlight or
/// bookmark per verse"; tombstoned rows are excluded so a deleted
/// highlight never blocks a new one. Passages live in a child table so
/// idempotent accumulation is a primary-key constraint, not
/// application-level dedup.
const MIGRATION_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS annotations (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('highlight', 'note', 'bookmark')),
        verse_ref TEXT NOT NULL,
        color TEXT,
        content TEXT,
        label TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_annotations_verse ON annotations(verse_ref);
    CREATE INDEX IF NOT EXISTS idx_annotations_updated ON annotations(updated_at DESC);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_annotations_live_exclusive
        ON annotations(kind, verse_ref)
        WHERE deleted_at IS NULL AND kind IN ('highlight', 'bookmark');

    CREATE TABLE IF NOT EXISTS reading_logs (
        date TEXT PRIMARY KEY,
        duration_minutes INTEGER,
        plan_id TEXT,
        note TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS reading_log_passages (
        log_date TEXT NOT NULL REFERENCES reading_logs(date) ON DELETE CASCADE,
        passage TEXT NOT NULL,
        PRIMARY KEY (log_date, passage)
    );
";

/// Version 2: outbound sync queue and sync bookkeeping
const MIGRATION_V2: &str = "
    CREATE TABLE IF NOT EXISTS sync_queue (
        entity TEXT NOT NULL CHECK (entity IN ('highlight', 'note', 'bookmark', 'reading_log')),
        entity_id TEXT NOT NULL,
        action TEXT NOT NULL CHECK (action IN ('create', 'update', 'delete')),
        payload TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (entity, entity_id)
    );
    CREATE INDEX IF NOT EXISTS idx_sync_queue_enqueued ON sync_queue(enqueued_at ASC);

    CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";
