use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::Result;
use crate::store::CatalogStore;
use crate::types::{CatalogEntry, EntryFields, EntryPatch, FileFacts, MediaFacts};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS videos (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    path           TEXT    NOT NULL UNIQUE,
    name           TEXT    NOT NULL,
    title          TEXT    NOT NULL,
    folder         TEXT    NOT NULL DEFAULT '',
    size           INTEGER NOT NULL,
    created_ms     INTEGER NOT NULL DEFAULT 0,
    modified_ms    INTEGER NOT NULL,
    duration       REAL    NOT NULL DEFAULT 0,
    width          INTEGER NOT NULL DEFAULT 0,
    height         INTEGER NOT NULL DEFAULT 0,
    fps            REAL    NOT NULL DEFAULT 0,
    codec          TEXT,
    bitrate        INTEGER NOT NULL DEFAULT 0,
    fingerprint    TEXT,
    thumbnail_path TEXT,
    added_at       TEXT    NOT NULL,
    updated_at     TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_videos_fingerprint ON videos(size, fingerprint);
CREATE INDEX IF NOT EXISTS idx_videos_folder ON videos(folder);
";

const SELECT_COLUMNS: &str = "id, path, name, title, folder, size, created_ms, modified_ms, \
     duration, width, height, fps, codec, bitrate, fingerprint, thumbnail_path, \
     added_at, updated_at";

/// SQLite-backed catalog. Access is serialized through one connection.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        debug!("Catalog schema initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Map a `videos` row onto a fully populated entry.
pub fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    Ok(CatalogEntry {
        id: row.get("id")?,
        path: row.get("path")?,
        name: row.get("name")?,
        title: row.get("title")?,
        folder: row.get("folder")?,
        file: FileFacts {
            size: row.get::<_, i64>("size")?.max(0) as u64,
            created_ms: row.get("created_ms")?,
            modified_ms: row.get("modified_ms")?,
        },
        media: MediaFacts {
            duration: row.get("duration")?,
            width: row.get::<_, i64>("width")?.clamp(0, u32::MAX as i64) as u32,
            height: row.get::<_, i64>("height")?.clamp(0, u32::MAX as i64) as u32,
            fps: row.get("fps")?,
            codec: row.get("codec")?,
            bitrate: row.get("bitrate")?,
        },
        fingerprint: row.get("fingerprint")?,
        thumbnail_path: row.get("thumbnail_path")?,
        added_at: row.get("added_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl CatalogStore for SqliteCatalog {
    fn list_all(&self) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos ORDER BY path",
            SELECT_COLUMNS
        ))?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn find_by_path(&self, path: &str) -> Result<Option<CatalogEntry>> {
        let entry = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM videos WHERE path = ?1", SELECT_COLUMNS),
                params![path],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let entry = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM videos WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn upsert(&self, path: &str, fields: &EntryFields) -> Result<i64> {
        let now = Utc::now();
        let id = self.conn().query_row(
            "INSERT INTO videos (path, name, title, folder, size, created_ms, modified_ms, \
                 duration, width, height, fps, codec, bitrate, added_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14) \
             ON CONFLICT(path) DO UPDATE SET \
                 name = excluded.name, \
                 title = excluded.title, \
                 folder = excluded.folder, \
                 size = excluded.size, \
                 created_ms = excluded.created_ms, \
                 modified_ms = excluded.modified_ms, \
                 duration = excluded.duration, \
                 width = excluded.width, \
                 height = excluded.height, \
                 fps = excluded.fps, \
                 codec = excluded.codec, \
                 bitrate = excluded.bitrate, \
                 fingerprint = CASE \
                     WHEN videos.size = excluded.size AND videos.modified_ms = excluded.modified_ms \
                     THEN videos.fingerprint ELSE NULL END, \
                 updated_at = excluded.updated_at \
             RETURNING id",
            params![
                path,
                fields.name,
                fields.title,
                fields.folder,
                fields.file.size as i64,
                fields.file.created_ms,
                fields.file.modified_ms,
                fields.media.duration,
                fields.media.width,
                fields.media.height,
                fields.media.fps,
                fields.media.codec,
                fields.media.bitrate,
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn delete_by_path(&self, path: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM videos WHERE path = ?1", params![path])?;
        Ok(affected > 0)
    }

    fn delete_by_id(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM videos WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn update_fields(&self, id: i64, patch: &EntryPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.find_by_id(id)?.is_some());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut affected = 0;
        let now = Utc::now();

        if let Some(fingerprint) = &patch.fingerprint {
            affected = tx.execute(
                "UPDATE videos SET fingerprint = ?1, updated_at = ?2 WHERE id = ?3",
                params![fingerprint, now, id],
            )?;
        }
        if let Some(thumbnail_path) = &patch.thumbnail_path {
            affected = tx.execute(
                "UPDATE videos SET thumbnail_path = ?1, updated_at = ?2 WHERE id = ?3",
                params![thumbnail_path, now, id],
            )?;
        }

        tx.commit()?;
        Ok(affected > 0)
    }

    fn delete_under(&self, dir: &str) -> Result<usize> {
        let dir = Path::new(dir);
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id, path FROM videos")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut ids = Vec::new();
            for row in rows {
                let (id, path) = row?;
                if Path::new(&path).starts_with(dir) {
                    ids.push(id);
                }
            }
            ids
        };

        for id in &ids {
            tx.execute("DELETE FROM videos WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        debug!(dir = %dir.display(), removed = ids.len(), "Removed catalog entries under directory");
        Ok(ids.len())
    }
}
