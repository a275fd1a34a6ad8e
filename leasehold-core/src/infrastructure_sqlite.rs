//! SQLite-backed LeaseStore implementation.
//! Several server replicas may open the same database file; writers are
//! serialized by `BEGIN IMMEDIATE` transactions.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! leasehold-core = { path = "../leasehold-core", features = ["sqlite"] }
//! ```

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::infrastructure::{LeaseRow, LeaseStore, RowFilter, StoreTx};

/// Attempts made by `transact` before a busy database is reported to the caller.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 3;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "path, owner, value, type, modified_index, modified_id, ttl";

/// A persistent lease store backed by SQLite.
///
/// Uses WAL mode so readers on other connections are not blocked by writers.
pub struct SqliteLeaseStore {
    conn: Mutex<Connection>,
}

impl SqliteLeaseStore {
    /// Open (or create) a SQLite database at the given path and ensure the
    /// `locks` table exists.
    pub fn open(path: &str) -> StoreResult<Self> {
        Self::open_with_busy_timeout(path, BUSY_TIMEOUT)
    }

    /// Like [`open`](Self::open), waiting at most `busy_timeout` for another
    /// connection's write lock on each transaction attempt.
    pub fn open_with_busy_timeout(path: &str, busy_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(busy_timeout)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_lock_table()?;
        Ok(store)
    }

    pub fn create_lock_table(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                path           TEXT PRIMARY KEY,
                owner          TEXT NOT NULL DEFAULT '',
                value          TEXT NOT NULL DEFAULT '',
                type           TEXT NOT NULL DEFAULT '',
                modified_index INTEGER NOT NULL DEFAULT 0,
                modified_id    TEXT NOT NULL DEFAULT '',
                ttl            INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_locks_type ON locks(type);",
        )?;
        Ok(())
    }

    fn row_to_lease_row(row: &rusqlite::Row) -> rusqlite::Result<LeaseRow> {
        Ok(LeaseRow {
            path: row.get(0)?,
            owner: row.get(1)?,
            value: row.get(2)?,
            lease_type: row.get(3)?,
            modified_index: row.get(4)?,
            modified_id: row.get(5)?,
            ttl: row.get(6)?,
        })
    }

    fn where_clause(filter: &RowFilter) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut bindings = Vec::new();
        if filter.held_only {
            clauses.push("owner <> ''");
        }
        if let Some(lease_type) = &filter.lease_type {
            clauses.push("type = ?");
            bindings.push(lease_type.clone());
        }
        if clauses.is_empty() {
            (String::new(), bindings)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), bindings)
        }
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl StoreTx for SqliteTx<'_> {
    fn one(&mut self, path: &str) -> StoreResult<Option<LeaseRow>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM locks WHERE path = ?1");
        let row = self
            .conn
            .query_row(&sql, params![path], SqliteLeaseStore::row_to_lease_row)
            .optional()?;
        Ok(row)
    }

    fn all(&mut self, filter: &RowFilter) -> StoreResult<Vec<LeaseRow>> {
        let (where_sql, bindings) = SqliteLeaseStore::where_clause(filter);
        let sql = format!("SELECT {SELECT_COLUMNS} FROM locks{where_sql}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bindings.iter()), SqliteLeaseStore::row_to_lease_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&mut self, filter: &RowFilter) -> StoreResult<usize> {
        let (where_sql, bindings) = SqliteLeaseStore::where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM locks{where_sql}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(bindings.iter()), |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn upsert(&mut self, row: &LeaseRow) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO locks (path, owner, value, type, modified_index, modified_id, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                owner = excluded.owner,
                value = excluded.value,
                type = excluded.type,
                modified_index = excluded.modified_index,
                modified_id = excluded.modified_id,
                ttl = excluded.ttl",
            params![
                row.path,
                row.owner,
                row.value,
                row.lease_type,
                row.modified_index,
                row.modified_id,
                row.ttl,
            ],
        )?;
        Ok(())
    }

    fn delete(&mut self, path: &str) -> StoreResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM locks WHERE path = ?1", params![path])?)
    }
}

fn run_transaction(
    conn: &mut Connection,
    f: &mut dyn FnMut(&mut dyn StoreTx) -> StoreResult<()>,
) -> StoreResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    f(&mut SqliteTx { conn: &*tx })?;
    tx.commit()?;
    Ok(())
}

impl LeaseStore for SqliteLeaseStore {
    fn transact(&self, f: &mut dyn FnMut(&mut dyn StoreTx) -> StoreResult<()>) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut attempt = 1;
        loop {
            match run_transaction(&mut conn, f) {
                Err(StoreError::Busy(reason)) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::warn!(attempt, %reason, "retrying-busy-transaction");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
