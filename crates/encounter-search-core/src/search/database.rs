//! SQLite database shared by the content store and the query recorder

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use super::error::SearchResult;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS indexed_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_type TEXT NOT NULL,
        content_id TEXT NOT NULL,
        encounter_id INTEGER NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        embedding BLOB,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (content_type, content_id)
    );

    CREATE INDEX IF NOT EXISTS idx_items_encounter ON indexed_items(encounter_id);
    CREATE INDEX IF NOT EXISTS idx_items_created_at ON indexed_items(created_at);

    CREATE VIRTUAL TABLE IF NOT EXISTS indexed_items_fts USING fts5(
        title,
        body,
        content = 'indexed_items',
        content_rowid = 'id',
        tokenize = 'porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS indexed_items_ai AFTER INSERT ON indexed_items BEGIN
        INSERT INTO indexed_items_fts (rowid, title, body) VALUES (new.id, new.title, new.body);
    END;

    CREATE TRIGGER IF NOT EXISTS indexed_items_ad AFTER DELETE ON indexed_items BEGIN
        INSERT INTO indexed_items_fts (indexed_items_fts, rowid, title, body)
            VALUES ('delete', old.id, old.title, old.body);
    END;

    CREATE TRIGGER IF NOT EXISTS indexed_items_au AFTER UPDATE ON indexed_items BEGIN
        INSERT INTO indexed_items_fts (indexed_items_fts, rowid, title, body)
            VALUES ('delete', old.id, old.title, old.body);
        INSERT INTO indexed_items_fts (rowid, title, body) VALUES (new.id, new.title, new.body);
    END;

    CREATE TABLE IF NOT EXISTS search_invocations (
        id TEXT PRIMARY KEY,
        query_text TEXT NOT NULL,
        encounter_id INTEGER,
        content_types TEXT,
        date_from TEXT,
        date_to TEXT,
        requested_by TEXT,
        result_count INTEGER NOT NULL,
        execution_time_ms INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_invocations_created_at ON search_invocations(created_at);

    CREATE TABLE IF NOT EXISTS cached_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        invocation_id TEXT NOT NULL REFERENCES search_invocations(id) ON DELETE CASCADE,
        content_type TEXT NOT NULL,
        content_id TEXT NOT NULL,
        combined_score REAL NOT NULL,
        rank INTEGER NOT NULL,
        snippet TEXT NOT NULL DEFAULT '',
        search_type TEXT NOT NULL,
        UNIQUE (invocation_id, content_type, content_id),
        UNIQUE (invocation_id, rank)
    );
";

/// Handle to the search database.
///
/// The connection is serialized behind a mutex; every access goes through
/// [`Database::call`], which runs on the blocking pool so callers can bound
/// it with a timeout.
#[derive(Clone)]
pub struct Database {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file
    pub fn open(db_path: impl AsRef<Path>) -> SearchResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::initialize(conn, Some(db_path))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> SearchResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> SearchResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        ensure_fts_populated(&conn)?;

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path of the database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `action` against the connection on the blocking thread pool
    pub async fn call<F, T>(&self, action: F) -> SearchResult<T>
    where
        F: FnOnce(&mut Connection) -> SearchResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            action(&mut guard)
        })
        .await?
    }
}

/// Rebuild the full-text index when rows exist that it has never seen,
/// e.g. a database written before the FTS table was introduced.
fn ensure_fts_populated(conn: &Connection) -> SearchResult<()> {
    let items: i64 = conn.query_row("SELECT COUNT(*) FROM indexed_items", [], |row| row.get(0))?;
    if items == 0 {
        return Ok(());
    }
    let indexed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM indexed_items_fts_docsize",
        [],
        |row| row.get(0),
    )?;
    if indexed < items {
        log::info!("[Database] Rebuilding full-text index ({} of {} rows indexed)", indexed, items);
        conn.execute(
            "INSERT INTO indexed_items_fts (indexed_items_fts) VALUES ('rebuild')",
            [],
        )?;
    }
    Ok(())
}

pub(crate) fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_schema_is_created() {
        let db = Database::open_in_memory().expect("open in-memory db");
        let tables: Vec<String> = db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        for expected in [
            "cached_results",
            "indexed_items",
            "indexed_items_fts",
            "search_invocations",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn test_open_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested").join("search.db");

        let first = Database::open(&path).expect("first open");
        assert_eq!(first.path(), Some(path.as_path()));
        drop(first);
        Database::open(&path).expect("second open");
        assert!(path.exists());
    }

    #[test]
    fn test_iso_round_trip() {
        let now = Utc::now();
        let text = to_iso(now);
        assert!(text.ends_with('Z'));
        let parsed = parse_iso(&text).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }
}
