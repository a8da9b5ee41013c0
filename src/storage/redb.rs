//! ReDB storage for the staging collections.
//!
//! Provides persistent storage for:
//! - Guardian invitations (by invite code)
//! - Staged guardian registrations (by invite code)
//! - Credential-to-wallet bindings (by credential id)
//!
//! Each table uses string keys and JSON-serialized values for simplicity.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{WalletError, WalletResult};

// Table definitions
// Using string keys and byte values (JSON serialized)
const INVITES: TableDefinition<&str, &[u8]> = TableDefinition::new("invites");
const REGISTRATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("registrations");
const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");

/// The three staging collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Invites,
    Registrations,
    Credentials,
}

impl Collection {
    fn table(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Self::Invites => INVITES,
            Self::Registrations => REGISTRATIONS,
            Self::Credentials => CREDENTIALS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Invites => "invites",
            Self::Registrations => "registrations",
            Self::Credentials => "credentials",
        }
    }
}

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> WalletResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| WalletError::Storage(e.to_string()))?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;

        tracing::info!(path = %path.display(), "Opened staging database");
        Ok(storage)
    }

    /// Open an in-memory database (tests and ephemeral deployments).
    pub fn open_in_memory() -> WalletResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> WalletResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            // Just opening the tables creates them if they don't exist
            let _ = write_txn.open_table(INVITES)?;
            let _ = write_txn.open_table(REGISTRATIONS)?;
            let _ = write_txn.open_table(CREDENTIALS)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert or replace a record.
    pub fn put<T: Serialize>(&self, collection: Collection, key: &str, record: &T) -> WalletResult<()> {
        let value = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(collection.table())?;
            table.insert(key, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(collection = collection.name(), key, "Stored record");
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> WalletResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;

        match table.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Delete a record; returns whether it existed.
    pub fn delete(&self, collection: Collection, key: &str) -> WalletResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(collection.table())?;
            table.remove(key)?.is_some()
        };
        write_txn.commit()?;

        if deleted {
            tracing::debug!(collection = collection.name(), key, "Deleted record");
        }
        Ok(deleted)
    }

    /// Every record in a collection, in key order.
    pub fn list<T: DeserializeOwned>(&self, collection: Collection) -> WalletResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            records.push((key.value().to_string(), serde_json::from_slice(value.value())?));
        }
        Ok(records)
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: Collection) -> WalletResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        Ok(table.len()?)
    }
}
