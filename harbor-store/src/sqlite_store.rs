//! SQLite-based record storage
//!
//! Schema:
//!   - records: Current version only (collection, id)
//!   - record_history: Every stored version (collection, id, version)
//!
//! Values are the JSON form of a [`Record`]. Typed helpers serialise
//! records and keep the stored `version` column in step with the
//! record's own `version` field.

use crate::error::{Result, StoreError};
use harbor_core::Record;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-based record store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl SqliteStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for read-write concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Current version table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                version INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;

        // History table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS record_history (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                version INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, id, version)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)",
            [],
        )?;

        tracing::debug!(path = %path.as_ref().display(), "Opened record store");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("record store lock poisoned".to_string()))
    }

    /// Get the raw JSON of a record
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        get_value(&conn, collection, id)
    }

    /// Get a specific version
    pub fn get_version(&self, collection: &str, id: &str, version: u32) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;

        let value = conn
            .query_row(
                "SELECT value FROM record_history WHERE collection = ? AND id = ? AND version = ?",
                params![collection, id, version],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value.map(String::into_bytes))
    }

    /// Delete a record (current version only, history is preserved)
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        delete_current(&conn, collection, id)
    }

    /// List stored versions, oldest first
    pub fn list_versions(&self, collection: &str, id: &str) -> Result<Vec<u32>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT version FROM record_history WHERE collection = ? AND id = ? ORDER BY version",
        )?;
        let rows = stmt.query_map(params![collection, id], |row| row.get::<_, u32>(0))?;

        let mut versions = Vec::new();
        for version in rows {
            versions.push(version?);
        }

        Ok(versions)
    }

    /// Get record counts by collection
    pub fn count_by_collection(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*) FROM records GROUP BY collection ORDER BY collection",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// Insert a new record at its current version
    pub fn insert<T: Record>(&self, record: &T) -> Result<()> {
        self.in_transaction(|ops| ops.insert(record))
    }

    /// Load a typed record
    pub fn fetch<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let conn = self.conn()?;
        fetch_typed(&conn, id)
    }

    /// Load a typed record, failing with `NotFound` when missing
    pub fn require<T: Record>(&self, id: &str) -> Result<T> {
        self.fetch(id)?.ok_or_else(|| StoreError::NotFound {
            collection: T::COLLECTION.to_string(),
            id: id.to_string(),
        })
    }

    /// Load every record of a collection
    pub fn fetch_all<T: Record>(&self) -> Result<Vec<T>> {
        let conn = self.conn()?;
        fetch_all_typed(&conn)
    }

    /// Write a modified record as a new version.
    ///
    /// The write is refused when the stored version differs from
    /// `expected` (or, without one, from the record's own version).
    pub fn replace<T: Record>(&self, record: &mut T, expected: Option<u32>) -> Result<()> {
        self.in_transaction(|ops| ops.replace(record, expected))
    }

    /// Execute multiple operations atomically within an SQLite transaction
    pub fn in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TransactionOps<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ops = TransactionOps { tx: &tx };
        let result = f(&ops)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Operations available within a transaction
pub struct TransactionOps<'a> {
    tx: &'a Transaction<'a>,
}

#[allow(clippy::result_large_err)]
impl TransactionOps<'_> {
    /// Load a typed record
    pub fn fetch<T: Record>(&self, id: &str) -> Result<Option<T>> {
        fetch_typed(self.tx.deref(), id)
    }

    /// Load every record of a collection
    pub fn fetch_all<T: Record>(&self) -> Result<Vec<T>> {
        fetch_all_typed(self.tx.deref())
    }

    /// Insert a new record at its current version
    pub fn insert<T: Record>(&self, record: &T) -> Result<()> {
        let conn = self.tx.deref();
        if current_version(conn, T::COLLECTION, record.id())?.is_some() {
            return Err(StoreError::AlreadyExists {
                collection: T::COLLECTION.to_string(),
                id: record.id().to_string(),
            });
        }
        let data = serde_json::to_vec(record)?;
        write_version(conn, T::COLLECTION, record.id(), record.version(), &data)
    }

    /// Write a modified record as a new version
    pub fn replace<T: Record>(&self, record: &mut T, expected: Option<u32>) -> Result<()> {
        let conn = self.tx.deref();
        let id = record.id().to_string();
        let current = current_version(conn, T::COLLECTION, &id)?.ok_or_else(|| {
            StoreError::NotFound {
                collection: T::COLLECTION.to_string(),
                id: id.clone(),
            }
        })?;

        let expected = expected.unwrap_or(record.version());
        if expected != current {
            return Err(StoreError::VersionConflict {
                collection: T::COLLECTION.to_string(),
                id,
                expected,
                current,
            });
        }

        record.meta_mut().version = current + 1;
        let data = serde_json::to_vec(record)?;
        write_version(conn, T::COLLECTION, &id, current + 1, &data)
    }

    /// Delete a record (current version only, history is preserved)
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        delete_current(self.tx.deref(), collection, id)
    }
}

fn get_value(conn: &Connection, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
    let value = conn
        .query_row(
            "SELECT value FROM records WHERE collection = ? AND id = ?",
            params![collection, id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value.map(String::into_bytes))
}

fn current_version(conn: &Connection, collection: &str, id: &str) -> Result<Option<u32>> {
    let version = conn
        .query_row(
            "SELECT version FROM records WHERE collection = ? AND id = ?",
            params![collection, id],
            |row| row.get::<_, u32>(0),
        )
        .optional()?;
    Ok(version)
}

fn write_version(
    conn: &Connection,
    collection: &str,
    id: &str,
    version: u32,
    data: &[u8],
) -> Result<()> {
    let value = std::str::from_utf8(data)
        .map_err(|e| StoreError::Other(format!("Invalid UTF-8: {}", e)))?;

    conn.execute(
        "INSERT OR REPLACE INTO records (collection, id, version, value) VALUES (?, ?, ?, ?)",
        params![collection, id, version, value],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO record_history (collection, id, version, value) VALUES (?, ?, ?, ?)",
        params![collection, id, version, value],
    )?;
    Ok(())
}

fn delete_current(conn: &Connection, collection: &str, id: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM records WHERE collection = ? AND id = ?",
        params![collection, id],
    )?;
    Ok(rows > 0)
}

fn list_values(conn: &Connection, collection: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let mut stmt =
        conn.prepare("SELECT id, value FROM records WHERE collection = ? ORDER BY id")?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (id, value) = row?;
        results.push((id, value.into_bytes()));
    }
    Ok(results)
}

fn fetch_typed<T: Record>(conn: &Connection, id: &str) -> Result<Option<T>> {
    match get_value(conn, T::COLLECTION, id)? {
        Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
        None => Ok(None),
    }
}

fn fetch_all_typed<T: Record>(conn: &Connection) -> Result<Vec<T>> {
    list_values(conn, T::COLLECTION)?
        .into_iter()
        .map(|(_, data)| serde_json::from_slice(&data).map_err(StoreError::from))
        .collect()
}
