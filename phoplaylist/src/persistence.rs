//! Persistance SQLite du catalogue
//!
//! Le catalogue complet (tous les `MediaItem` connus) est réécrit à la fin de
//! chaque synchronisation, dans une transaction.

use crate::item::{Freshness, MediaItem};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use phosource::MediaKind;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Base du catalogue
#[derive(Debug)]
pub struct CatalogDb {
    conn: Mutex<Connection>,
}

fn parse_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_enum<T>(value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

impl CatalogDb {
    /// Ouvre (ou crée) la base du catalogue
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::PersistenceError(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::PersistenceError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS media_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                version TEXT NOT NULL,
                cached_version TEXT,
                local_path TEXT,
                size INTEGER,
                last_seen TEXT NOT NULL,
                missed_refreshes INTEGER NOT NULL DEFAULT 0,
                freshness TEXT NOT NULL,
                filename TEXT
            )",
            [],
        )
        .map_err(|e| {
            Error::PersistenceError(format!("Failed to create media_items table: {}", e))
        })?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_media_items_created ON media_items(created_at)",
            [],
        )
        .map_err(|e| Error::PersistenceError(format!("Failed to create index: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remplace le contenu de la base par le catalogue donné
    pub fn save_all<'a, I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a MediaItem>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM media_items", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO media_items (id, kind, mime_type, created_at, version, cached_version,
                                          local_path, size, last_seen, missed_refreshes, freshness, filename)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.kind.as_str(),
                    item.mime_type,
                    item.created_at.to_rfc3339(),
                    item.version,
                    item.cached_version,
                    item.local_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                    item.size.map(|s| s as i64),
                    item.last_seen.to_rfc3339(),
                    item.missed_refreshes as i64,
                    item.freshness.as_str(),
                    item.filename,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Charge tout le catalogue
    pub fn load_all(&self) -> Result<Vec<MediaItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, kind, mime_type, created_at, version, cached_version, local_path, size,
                    last_seen, missed_refreshes, freshness, filename
             FROM media_items ORDER BY created_at DESC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(1)?;
            let created_at: String = row.get(3)?;
            let local_path: Option<String> = row.get(6)?;
            let last_seen: String = row.get(8)?;
            let freshness: String = row.get(10)?;
            Ok(MediaItem {
                id: row.get(0)?,
                kind: parse_enum::<MediaKind>(&kind)?,
                mime_type: row.get(2)?,
                created_at: parse_time(&created_at)?,
                version: row.get(4)?,
                cached_version: row.get(5)?,
                local_path: local_path.map(PathBuf::from),
                size: row.get::<_, Option<i64>>(7)?.map(|s| s.max(0) as u64),
                last_seen: parse_time(&last_seen)?,
                missed_refreshes: row.get::<_, i64>(9)?.clamp(0, u32::MAX as i64) as u32,
                freshness: parse_enum::<Freshness>(&freshness)?,
                filename: row.get(11)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM media_items", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
