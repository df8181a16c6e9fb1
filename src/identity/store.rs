//! Durable key/value persistence for device identity material.
//!
//! The store is an injected dependency: [`RedbStore`] for on-disk state that
//! survives restarts and [`MemoryStore`] for ephemeral sessions and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const IDENTITY_TABLE: TableDefinition<&str, &str> = TableDefinition::new("identity");

/// Errors surfaced by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] redb::Error),
    #[error("corrupt record under '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

fn backend<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Backend(err.into())
}

/// Simple get/set/delete persistence. Writes are durable once the call returns.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// redb-backed store, one table of string pairs.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens (or creates) the database file and makes sure the table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;
        Self::from_database(db)
    }

    /// Wraps an already opened database, e.g. one built on an in-memory backend.
    pub fn from_database(db: Database) -> Result<Self, StoreError> {
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(IDENTITY_TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(Self { db })
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(IDENTITY_TABLE).map_err(backend)?;
        let value = table.get(key).map_err(backend)?;
        Ok(value.map(|guard| guard.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(IDENTITY_TABLE).map_err(backend)?;
            table.insert(key, value).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(IDENTITY_TABLE).map_err(backend)?;
            table.remove(key).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        guard.remove(key);
        Ok(())
    }
}
