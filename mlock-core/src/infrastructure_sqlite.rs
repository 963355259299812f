//! SQLite-backed LockStore implementation.
//! Lets processes sharing a database file coordinate through it.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! mlock-core = { path = "../mlock-core", features = ["sqlite"] }
//! ```

use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::time::Duration;

use crate::error::StoreError;
use crate::infrastructure::{LockStore, validate_identifier};
use crate::types::{ConditionalDelete, ConditionalInsert, LockRow};

/// Default time a write waits on a busy database before it is reported
/// as a write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::WriteTimeout(err.to_string())
            }
            _ => StoreError::Backend(Box::new(err)),
        }
    }
}

/// A persistent lock store backed by SQLite.
///
/// Every conditional write runs in its own `BEGIN IMMEDIATE` transaction,
/// which serialises writers across connections and processes.
pub struct SqliteLockStore {
    conn: Connection,
}

impl SqliteLockStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_WRITE_TIMEOUT)
    }

    /// Open with an explicit write acknowledgement deadline.
    pub fn open_with_timeout(path: &str, write_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::configure(conn, write_timeout, true)
    }

    /// A private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, DEFAULT_WRITE_TIMEOUT, false)
    }

    fn configure(conn: Connection, write_timeout: Duration, wal: bool) -> Result<Self, StoreError> {
        conn.busy_timeout(write_timeout)?;
        if wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS lock_namespaces (
                name        TEXT PRIMARY KEY,
                replication TEXT NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }

    fn table(namespace: &str) -> Result<String, StoreError> {
        validate_identifier(namespace)?;
        Ok(format!("\"{}_locks\"", namespace))
    }

    fn table_exists(&self, namespace: &str) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![format!("{}_locks", namespace)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn require_table(&self, namespace: &str) -> Result<String, StoreError> {
        let table = Self::table(namespace)?;
        if self.table_exists(namespace)? {
            Ok(table)
        } else {
            Err(StoreError::MissingTable(namespace.to_string()))
        }
    }

    fn insert_sql(table: &str) -> String {
        format!("INSERT OR IGNORE INTO {} (name, owner) VALUES (?1, ?2)", table)
    }

    fn delete_sql(table: &str) -> String {
        format!("DELETE FROM {} WHERE name = ?1 AND owner = ?2", table)
    }

    fn select_owner_sql(table: &str) -> String {
        format!("SELECT owner FROM {} WHERE name = ?1", table)
    }
}

impl LockStore for SqliteLockStore {
    fn namespace_exists(&self, namespace: &str) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM lock_namespaces WHERE name = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn create_namespace(&mut self, namespace: &str, replication: &str) -> Result<(), StoreError> {
        validate_identifier(namespace)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO lock_namespaces (name, replication) VALUES (?1, ?2)",
            params![namespace, replication],
        )?;
        Ok(())
    }

    fn create_table(&mut self, namespace: &str) -> Result<(), StoreError> {
        let table = Self::table(namespace)?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name  TEXT PRIMARY KEY,
                owner TEXT NOT NULL
            );",
            table
        ))?;
        Ok(())
    }

    fn prepare(&mut self, namespace: &str) -> Result<(), StoreError> {
        let table = self.require_table(namespace)?;
        self.conn.prepare_cached(&Self::insert_sql(&table))?;
        self.conn.prepare_cached(&Self::delete_sql(&table))?;
        self.conn.prepare_cached(&Self::select_owner_sql(&table))?;
        Ok(())
    }

    fn insert_if_absent(
        &mut self,
        namespace: &str,
        row: &LockRow,
    ) -> Result<ConditionalInsert, StoreError> {
        let table = Self::table(namespace)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx
            .prepare_cached(&Self::insert_sql(&table))?
            .execute(params![row.name, row.owner])?;

        let outcome = if inserted > 0 {
            ConditionalInsert::Applied
        } else {
            let owner: String = tx
                .prepare_cached(&Self::select_owner_sql(&table))?
                .query_row(params![row.name], |r| r.get(0))?;
            ConditionalInsert::Rejected { owner }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn delete_if_owner(
        &mut self,
        namespace: &str,
        name: &str,
        owner: &str,
    ) -> Result<ConditionalDelete, StoreError> {
        let table = Self::table(namespace)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx
            .prepare_cached(&Self::delete_sql(&table))?
            .execute(params![name, owner])?;

        let outcome = if deleted > 0 {
            ConditionalDelete::Applied
        } else {
            let current: Option<String> = tx
                .prepare_cached(&Self::select_owner_sql(&table))?
                .query_row(params![name], |r| r.get(0))
                .optional()?;
            ConditionalDelete::Rejected { owner: current }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn current_owner(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        let table = self.require_table(namespace)?;
        let owner = self
            .conn
            .prepare_cached(&Self::select_owner_sql(&table))?
            .query_row(params![name], |r| r.get(0))
            .optional()?;
        Ok(owner)
    }
}
