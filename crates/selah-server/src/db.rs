//! Server-side storage
//!
//! One sqlite database holds every user's annotations and reading logs,
//! partitioned by `user_id`. Soft deletes keep tombstoned rows in place
//! so pulls can tell "deleted" apart from "never existed".

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

use crate::error::AppError;

const MIGRATION_V1: &str = "
CREATE TABLE api_tokens (
    token      TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    expires_at INTEGER
);

CREATE TABLE annotations (
    id         TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL CHECK (kind IN ('highlight', 'note', 'bookmark')),
    verse_ref  TEXT NOT NULL,
    color      TEXT,
    content    TEXT,
    label      TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    PRIMARY KEY (user_id, id)
);

CREATE INDEX idx_annotations_user_updated
    ON annotations(user_id, updated_at);

CREATE TABLE reading_logs (
    user_id          TEXT NOT NULL,
    date             TEXT NOT NULL,
    duration_minutes INTEGER,
    plan_id          TEXT,
    note             TEXT,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    deleted_at       INTEGER,
    PRIMARY KEY (user_id, date)
);

CREATE INDEX idx_reading_logs_user_updated
    ON reading_logs(user_id, updated_at);

CREATE TABLE reading_log_passages (
    user_id  TEXT NOT NULL,
    log_date TEXT NOT NULL,
    passage  TEXT NOT NULL,
    PRIMARY KEY (user_id, log_date, passage),
    FOREIGN KEY (user_id, log_date)
        REFERENCES reading_logs(user_id, date) ON DELETE CASCADE
);
";

pub struct ServerDb {
    conn: Mutex<Connection>,
}

impl ServerDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self, AppError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut conn = conn;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Mutex poisoning only happens if a thread panicked mid-statement;
    /// the connection itself stays usable
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a bearer token for a user, replacing any previous
    /// binding of the same token
    pub fn insert_api_token(
        &self,
        token: &str,
        user_id: &str,
        expires_at: Option<i64>,
    ) -> Result<(), AppError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO api_tokens (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![token, user_id, expires_at],
        )?;
        Ok(())
    }
}

fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    Ok(())
}

fn apply(conn: &mut Connection, version: i64, sql: &str) -> Result<(), AppError> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;
    Ok(())
}
