use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SlideDbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// SQLite index of committed slides.
///
/// One file per output directory: `{dir}/slides.db`, with a single `slides`
/// table indexed by (title, slide_index). WAL mode lets a viewer read the
/// index while a session is writing it.
pub struct SlideDb {
    conn: Mutex<Connection>,
}

impl SlideDb {
    /// Open (or create) the index inside `dir`. Creates `dir` if missing.
    pub fn open(dir: &Path) -> Result<Self, SlideDbError> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("slides.db");
        let conn = Connection::open(&db_path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS slides (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                title          TEXT    NOT NULL,
                slide_index    INTEGER NOT NULL,
                captured_at_ms INTEGER NOT NULL,
                path           TEXT    NOT NULL,
                width          INTEGER NOT NULL,
                height         INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_title
                ON slides(title, slide_index);",
        )?;

        info!(path = db_path.display().to_string(), "slide index opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SlideDbError> {
        self.conn.lock().map_err(|_| SlideDbError::Poisoned)
    }

    /// Record one saved slide. Returns the new row id.
    pub fn insert_slide(&self, slide: &NewSlide<'_>) -> Result<i64, SlideDbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO slides (title, slide_index, captured_at_ms, path, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                slide.title,
                slide.index,
                slide.captured_at_ms,
                slide.path,
                slide.width,
                slide.height
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, title = slide.title, index = slide.index, "indexed slide");
        Ok(id)
    }

    /// All slides recorded under `title`, oldest first.
    pub fn list_slides(&self, title: &str) -> Result<Vec<SlideRecord>, SlideDbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, slide_index, captured_at_ms, path, width, height
             FROM slides WHERE title = ?1 ORDER BY captured_at_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![title], |row| {
            Ok(SlideRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                index: row.get(2)?,
                captured_at_ms: row.get(3)?,
                path: row.get(4)?,
                width: row.get(5)?,
                height: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Drop the rows pointing at `path`. Returns how many were removed.
    pub fn delete_by_path(&self, path: &str) -> Result<usize, SlideDbError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM slides WHERE path = ?1", params![path])?;
        debug!(path, removed, "slide rows deleted");
        Ok(removed)
    }

    pub fn count(&self) -> Result<u64, SlideDbError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM slides", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Insert payload for [`SlideDb::insert_slide`].
#[derive(Debug, Clone, Copy)]
pub struct NewSlide<'a> {
    pub title: &'a str,
    pub index: u32,
    pub captured_at_ms: i64,
    pub path: &'a str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideRecord {
    pub id: i64,
    pub title: String,
    pub index: u32,
    pub captured_at_ms: i64,
    pub path: String,
    pub width: u32,
    pub height: u32,
}
