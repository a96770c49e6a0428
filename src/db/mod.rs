pub mod models;

use models::CachedResponse;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQLite-backed response store. Lives as long as the process unless opened on a file.
pub struct Database {
    conn: Mutex<Connection>,
}

pub fn cache_key(key: u64) -> String {
    format!("{:016x}", key)
}

impl Database {
    pub fn new(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS responses (
                key TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_response(&self, key: u64) -> Result<Option<CachedResponse>, CacheError> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT key, model, content, created_at FROM responses WHERE key = ?1",
            params![cache_key(key)],
            |row| {
                Ok(CachedResponse {
                    key: row.get(0)?,
                    model: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        );
        match result {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// First write wins; cached entries are never rewritten.
    pub fn put_response(&self, key: u64, model: &str, content: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO responses (key, model, content) VALUES (?1, ?2, ?3)",
            params![cache_key(key), model, content],
        )?;
        Ok(())
    }

    pub fn count_responses(&self) -> Result<usize, CacheError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM responses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_response_is_none() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_response(42).unwrap().is_none());
    }

    #[test]
    fn test_put_then_get() {
        let db = Database::in_memory().unwrap();
        db.put_response(7, "llama3.2:3b", "summary").unwrap();
        let row = db.get_response(7).unwrap().unwrap();
        assert_eq!(row.key, "0000000000000007");
        assert_eq!(row.model, "llama3.2:3b");
        assert_eq!(row.content, "summary");
    }

    #[test]
    fn test_entries_are_not_overwritten() {
        let db = Database::in_memory().unwrap();
        db.put_response(u64::MAX, "m", "first").unwrap();
        db.put_response(u64::MAX, "m", "second").unwrap();
        assert_eq!(db.get_response(u64::MAX).unwrap().unwrap().content, "first");
        assert_eq!(db.count_responses().unwrap(), 1);
    }
}
