//! SQLite Key/Value Store
//!
//! Persistenter Scope: Permanent-ID und Tab-Zähler überleben Neustarts.
//! Alle Tabs einer Installation öffnen dieselbe Datei.

use super::{KeyValueStore, StoreError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Dateiname der Profil-Datenbank
const DATABASE_FILE: &str = "profile.db";

// ============================================================================
// DATABASE
// ============================================================================

/// SQLite-Datenbank für Profilwerte (Thread-safe durch Mutex)
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Öffnet oder erstellt die Datenbank im Standard-Datenverzeichnis
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = Self::default_data_dir()?;
        Self::open_in_dir(&dir)
    }

    /// Öffnet oder erstellt die Datenbank in `dir`
    pub fn open_in_dir(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DATABASE_FILE);

        tracing::info!("Opening profile database at {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(db_path),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// In-Memory Datenbank (Tests, Demo ohne Profil)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Ermittelt das Standard-Datenverzeichnis
    pub fn default_data_dir() -> Result<PathBuf, StoreError> {
        let proj_dirs =
            directories::ProjectDirs::from("com", "hamradio", "ham-radio").ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// Pfad der Datenbank-Datei (None für In-Memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS profile_values (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;

        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM profile_values WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO profile_values (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM profile_values WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Ein einziges Statement: andere Prozesse sehen nie einen Zwischenstand
    fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let value: i64 = conn.query_row(
            r#"
            INSERT INTO profile_values (key, value)
            VALUES (?1, '1')
            ON CONFLICT(key) DO UPDATE SET
                value = CAST(CAST(value AS INTEGER) + 1 AS TEXT),
                updated_at = datetime('now')
            RETURNING CAST(value AS INTEGER)
            "#,
            params![key],
            |row| row.get(0),
        )?;
        Ok(value.max(0) as u64)
    }

    fn decrement_if(&self, key: &str, expected: u64) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            r#"
            UPDATE profile_values
            SET value = CAST(CAST(value AS INTEGER) - 1 AS TEXT),
                updated_at = datetime('now')
            WHERE key = ?1 AND CAST(value AS INTEGER) = ?2 AND ?2 > 0
            "#,
            params![key, expected as i64],
        )?;
        Ok(changed > 0)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.get("myRadioId").unwrap(), None);
        store.set("myRadioId", "alice").unwrap();
        assert_eq!(store.get("myRadioId").unwrap().as_deref(), Some("alice"));

        store.set("myRadioId", "bob").unwrap();
        assert_eq!(store.get("myRadioId").unwrap().as_deref(), Some("bob"));

        store.remove("myRadioId").unwrap();
        assert_eq!(store.get("myRadioId").unwrap(), None);
    }

    #[test]
    fn test_increment_is_sequential() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.increment("tabCount").unwrap(), 1);
        assert_eq!(store.increment("tabCount").unwrap(), 2);
        assert_eq!(store.increment("tabCount").unwrap(), 3);
        assert_eq!(store.get("tabCount").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_decrement_only_matching_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.increment("tabCount").unwrap();
        store.increment("tabCount").unwrap();

        assert!(!store.decrement_if("tabCount", 1).unwrap());
        assert!(store.decrement_if("tabCount", 2).unwrap());
        assert_eq!(store.get("tabCount").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("ham-radio-test-{}", uuid::Uuid::new_v4()));

        {
            let store = SqliteStore::open_in_dir(&dir).unwrap();
            store.set("myRadioId", "alice").unwrap();
            assert!(store.path().is_some());
        }

        let reopened = SqliteStore::open_in_dir(&dir).unwrap();
        assert_eq!(reopened.get("myRadioId").unwrap().as_deref(), Some("alice"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
