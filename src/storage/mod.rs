//! Storage Module - Key/Value Persistenz
//!
//! Dieses Modul kapselt den Speicher für Identitäts-Strings:
//! - Persistenter Scope (überlebt Neustarts, SQLite)
//! - Session Scope (pro Tab/Prozess, im Speicher)
//! - Atomarer Zähler für die Tab-Slot-Vergabe
//!

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create storage directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Value for '{key}' is not a counter: {value}")]
    NotACounter { key: String, value: String },
}

// ============================================================================
// KEY VALUE STORE
// ============================================================================

/// Minimaler Key/Value-Speicher
///
/// Implementierungen verwenden Interior Mutability, damit mehrere Tabs
/// desselben Profils denselben Speicher teilen können.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Erhöht einen Zähler und gibt den neuen Wert zurück
    ///
    /// Die Default-Implementierung ist nicht atomar; Speicher, die von
    /// mehreren Prozessen geteilt werden, überschreiben sie.
    fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let next = parse_counter(key, self.get(key)?)? + 1;
        self.set(key, &next.to_string())?;
        Ok(next)
    }

    /// Verringert einen Zähler, aber nur wenn er aktuell `expected` ist
    ///
    /// Gibt `true` zurück wenn der Wert geändert wurde.
    fn decrement_if(&self, key: &str, expected: u64) -> Result<bool, StoreError> {
        let current = parse_counter(key, self.get(key)?)?;
        if current != expected || current == 0 {
            return Ok(false);
        }
        self.set(key, &(current - 1).to_string())?;
        Ok(true)
    }
}

/// Liest einen Zählerwert; fehlende Werte zählen als 0
pub(crate) fn parse_counter(key: &str, raw: Option<String>) -> Result<u64, StoreError> {
    match raw {
        None => Ok(0),
        Some(value) => value.trim().parse().map_err(|_| StoreError::NotACounter {
            key: key.to_string(),
            value,
        }),
    }
}

// ============================================================================
// PROFILE STORES
// ============================================================================

/// Beide Speicher-Scopes eines Browser-Profils bzw. einer Installation
#[derive(Clone)]
pub struct ProfileStores {
    /// Überlebt Neustarts, wird von allen Tabs geteilt
    pub persistent: Arc<dyn KeyValueStore>,
    /// Nur für diesen Tab/Prozess
    pub session: Arc<dyn KeyValueStore>,
}

impl ProfileStores {
    pub fn new(persistent: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self {
            persistent,
            session,
        }
    }

    /// Zwei frische In-Memory Speicher (Tests, Demo)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Neuer Tab im selben Profil: gleicher persistenter Speicher, eigene Session
    pub fn new_tab(&self) -> Self {
        Self::new(Arc::clone(&self.persistent), Arc::new(MemoryStore::new()))
    }
}

impl std::fmt::Debug for ProfileStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStores").finish_non_exhaustive()
    }
}
