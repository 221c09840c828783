//! SQLite-based audit log
//!
//! Separate file for easy management and rotation.

use crate::error::Result;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;

/// Operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    List,
    /// Reminder dispatch
    Dispatch,
    /// Assistant relay call
    Relay,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Dispatch => "dispatch",
            Operation::Relay => "relay",
        }
    }
}

/// A stored audit log row
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub operation: String,
    pub collection: Option<String>,
    pub record_id: Option<String>,
    pub version: Option<u32>,
    pub actor: Option<String>,
    pub client_ip: Option<String>,
    pub result: String,
    pub detail: Option<String>,
}

impl AuditEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: row.get(0)?,
            operation: row.get(1)?,
            collection: row.get(2)?,
            record_id: row.get(3)?,
            version: row.get(4)?,
            actor: row.get(5)?,
            client_ip: row.get(6)?,
            result: row.get(7)?,
            detail: row.get(8)?,
        })
    }
}

const ENTRY_COLUMNS: &str =
    "timestamp, operation, collection, record_id, version, actor, client_ip, result, detail";

/// Audit log
pub struct AuditLog {
    conn: Connection,
}

#[allow(clippy::result_large_err)]
impl AuditLog {
    /// Open the audit log (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let audit = Self { conn };
        audit.initialize()?;
        Ok(audit)
    }

    /// Initialize tables
    fn initialize(&self) -> Result<()> {
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                operation TEXT NOT NULL,
                collection TEXT,
                record_id TEXT,
                version INTEGER,
                actor TEXT,
                client_ip TEXT,
                result TEXT NOT NULL,
                detail TEXT
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_record ON audit_log(collection, record_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor)",
            [],
        )?;

        Ok(())
    }

    /// Record an audit log entry
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &self,
        operation: Operation,
        collection: Option<&str>,
        record_id: Option<&str>,
        version: Option<u32>,
        actor: Option<&str>,
        client_ip: Option<&str>,
        success: bool,
        detail: Option<&str>,
    ) -> Result<()> {
        let result = if success { "success" } else { "error" };

        self.conn.execute(
            r#"
            INSERT INTO audit_log
            (operation, collection, record_id, version, actor, client_ip, result, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                operation.as_str(),
                collection,
                record_id,
                version,
                actor,
                client_ip,
                result,
                detail,
            ],
        )?;

        Ok(())
    }

    /// Record a success log entry (helper)
    pub fn log_success(
        &self,
        operation: Operation,
        collection: &str,
        record_id: Option<&str>,
        version: Option<u32>,
        actor: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<()> {
        self.log(
            operation,
            Some(collection),
            record_id,
            version,
            actor,
            client_ip,
            true,
            None,
        )
    }

    /// Record an error log entry (helper)
    pub fn log_error(
        &self,
        operation: Operation,
        collection: Option<&str>,
        record_id: Option<&str>,
        actor: Option<&str>,
        client_ip: Option<&str>,
        error: &str,
    ) -> Result<()> {
        self.log(
            operation,
            collection,
            record_id,
            None,
            actor,
            client_ip,
            false,
            Some(error),
        )
    }

    /// Get recent audit log entries, newest first
    pub fn recent_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM audit_log ORDER BY id DESC LIMIT ?1",
            ENTRY_COLUMNS
        ))?;

        let rows = stmt.query_map(params![limit as i64], AuditEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    /// Get every entry touching one record, oldest first
    pub fn entries_for(&self, collection: &str, record_id: &str) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM audit_log WHERE collection = ?1 AND record_id = ?2 ORDER BY id",
            ENTRY_COLUMNS
        ))?;

        let rows = stmt.query_map(params![collection, record_id], AuditEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }
}
