pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: play history imported from streaming-service JSON exports.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS plays (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,

                -- Naive wall-clock time, 'YYYY-MM-DD HH:MM:SS'
                timestamp       TEXT NOT NULL,

                track_name      TEXT,
                artist          TEXT,
                album           TEXT,
                platform        TEXT,

                -- Play length as 'MM:SS' plus the raw millisecond count
                duration        TEXT,
                ms_played       INTEGER NOT NULL,

                country         TEXT,

                -- Yes/No flags as exported
                shuffle         TEXT,
                skipped         TEXT,

                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Re-ingesting the same export files must not duplicate rows
            CREATE UNIQUE INDEX IF NOT EXISTS idx_plays_dedupe
                ON plays(timestamp, track_name, ms_played);
            CREATE INDEX IF NOT EXISTS idx_plays_artist ON plays(artist);
            CREATE INDEX IF NOT EXISTS idx_plays_timestamp ON plays(timestamp);
            ",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_migrates() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM plays", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
