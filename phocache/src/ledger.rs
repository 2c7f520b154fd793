//! Registre SQLite du cache
//!
//! Le registre conserve, pour chaque fichier du cache, l'identifiant de
//! l'élément, sa taille, sa version et son rang d'accès (horloge logique
//! utilisée par la politique LRU). Il suffit à reconstruire l'état du cache
//! au redémarrage sans interroger la source distante.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Entrée du cache telle que persistée
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Clé du fichier (nom sans extension)
    pub key: String,
    /// Identifiant distant de l'élément
    pub item_id: String,
    pub extension: String,
    /// Taille en octets
    pub size: u64,
    /// Version du contenu, inconnue après une reconstruction
    pub version: Option<String>,
    /// Rang du dernier accès (horloge logique, croissante)
    pub access_seq: u64,
    /// Date/heure du dernier accès (RFC3339)
    pub last_used: Option<String>,
}

impl CacheEntry {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.key, self.extension)
    }
}

/// Base SQLite du registre
#[derive(Debug)]
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Ouvre (ou crée) le registre
    ///
    /// Échoue si le fichier existe mais n'est pas une base valide : l'appelant
    /// reconstruit alors le registre.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
                Some(check),
            ));
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                item_id TEXT NOT NULL UNIQUE,
                extension TEXT NOT NULL,
                size INTEGER NOT NULL,
                version TEXT,
                access_seq INTEGER NOT NULL,
                last_used TEXT
            )",
            [],
        )?;

        // Index pour la politique LRU
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_lru ON entries (access_seq ASC)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Charge toutes les entrées, de la plus ancienne à la plus récente
    pub fn load_all(&self) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, item_id, extension, size, version, access_seq, last_used
             FROM entries ORDER BY access_seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CacheEntry {
                key: row.get(0)?,
                item_id: row.get(1)?,
                extension: row.get(2)?,
                size: row.get::<_, i64>(3)?.max(0) as u64,
                version: row.get(4)?,
                access_seq: row.get::<_, i64>(5)?.max(0) as u64,
                last_used: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    /// Ajoute ou remplace une entrée
    pub fn upsert(&self, entry: &CacheEntry) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO entries (key, item_id, extension, size, version, access_seq, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                 item_id = excluded.item_id,
                 extension = excluded.extension,
                 size = excluded.size,
                 version = excluded.version,
                 access_seq = excluded.access_seq,
                 last_used = excluded.last_used",
            params![
                entry.key,
                entry.item_id,
                entry.extension,
                entry.size as i64,
                entry.version,
                entry.access_seq as i64,
                entry.last_used,
            ],
        )?;
        Ok(())
    }

    /// Met à jour le rang d'accès d'une entrée
    pub fn touch(&self, key: &str, access_seq: u64, last_used: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE entries SET access_seq = ?1, last_used = ?2 WHERE key = ?3",
            params![access_seq as i64, last_used, key],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> rusqlite::Result<()> {
        self.conn()
            .execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn count(&self) -> rusqlite::Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
