//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::migrations;

/// SQLite database wrapper
///
/// Guards the connection with a mutex so the store can be shared behind
/// an `Arc`; callers never hold the guard across an await point because
/// every store operation is synchronous and commits before returning.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the underlying connection
    ///
    /// A poisoned lock is recovered rather than propagated: SQLite state
    /// is consistent after a panicking transaction rolls back on drop.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Configure SQLite for local-first usage
fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .lock()
            .query_row("SELECT COUNT(*) FROM annotations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("selah.db");

        {
            let db = Database::open(&path).unwrap();
            db.lock()
                .execute(
                    "INSERT INTO sync_meta (key, value) VALUES ('probe', '1')",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let value: String = db
            .lock()
            .query_row(
                "SELECT value FROM sync_meta WHERE key = 'probe'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, "1");
    }
}
