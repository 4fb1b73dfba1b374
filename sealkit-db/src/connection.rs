//! Safe wrapper around a `SQLite` database connection.
//!
//! This file contains **no `unsafe` code**. All FFI interaction is delegated to
//! [`ffi::RawDb`] which encapsulates the raw pointers and C type conversions.

use std::os::raw::c_int;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::error::{DbError, DbErrorCode, DbResult};
use super::ffi::{self, RawDb, RawStmt};
use super::statement::{Statement, StepResult};
use super::transaction::{Transaction, TransactionBehavior};
use super::value::Value;

/// Path understood by the engine as a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Receives the text of every statement a connection prepares.
pub type SqlTracer = Arc<dyn Fn(&str) + Send + Sync>;

/// A `SQLite` database connection.
///
/// Closed by [`close`](Self::close) or when dropped. Statements borrow the
/// connection, so none can outlive it; any the engine still tracks at close
/// time are finalized there.
pub struct Connection {
    db: RawDb,
    path: String,
    sql_tracer: Option<SqlTracer>,
}

impl Connection {
    /// Opens (or creates) a database at `path`.
    ///
    /// # Errors
    ///
    /// [`DbError::OpenFailed`] with the engine's message.
    pub fn open(path: &Path, read_only: bool) -> DbResult<Self> {
        let path_str = path.to_string_lossy();
        let flags = if read_only {
            ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_FULLMUTEX
        } else {
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_FULLMUTEX
        };
        let db = RawDb::open(&path_str, flags).map_err(DbError::open)?;
        log::debug!("opened database at {path_str} (read_only={read_only})");
        Ok(Self {
            db,
            path: path_str.into_owned(),
            sql_tracer: None,
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(Path::new(MEMORY_PATH), false)
    }

    /// The path this connection was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `false` once [`close`](Self::close) has run.
    pub fn is_open(&self) -> bool {
        self.db.is_open()
    }

    pub(crate) const fn raw(&self) -> &RawDb {
        &self.db
    }

    /// Installs (`Some`) or removes (`None`) the SQL tracer.
    pub fn set_sql_tracer(&mut self, tracer: Option<SqlTracer>) {
        self.sql_tracer = tracer;
    }

    fn statement<'conn>(&'conn self, raw: RawStmt<'conn>) -> Statement<'conn> {
        if let Some(tracer) = &self.sql_tracer {
            tracer(&raw.sql());
        }
        Statement::new(raw)
    }

    /// Executes one or more SQL statements separated by semicolons.
    ///
    /// No result rows are returned. Suitable for DDL, PRAGMAs, and
    /// multi-statement scripts. Statements before a failing one stay applied.
    ///
    /// # Errors
    ///
    /// [`DbError::PrepareFailed`] when a statement does not compile,
    /// [`DbError::StepFailed`] when one fails while running.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let mut rest = sql;
        while !rest.trim().is_empty() {
            log::trace!("prepare: {rest}");
            let (raw, consumed) = self.db.prepare(rest).map_err(DbError::prepare)?;
            if let Some(raw) = raw {
                self.statement(raw).run()?;
            }
            if consumed == 0 {
                break;
            }
            rest = rest.get(consumed..).unwrap_or_default();
        }
        Ok(())
    }

    /// Prepares a single SQL statement. Text after the first statement is
    /// ignored.
    ///
    /// # Errors
    ///
    /// [`DbError::PrepareFailed`] when the SQL does not compile or contains
    /// no statement.
    pub fn prepare(&self, sql: &str) -> DbResult<Statement<'_>> {
        log::trace!("prepare: {sql}");
        match self.db.prepare(sql).map_err(DbError::prepare)? {
            (Some(raw), _) => Ok(self.statement(raw)),
            (None, _) => Err(DbError::PrepareFailed {
                code: DbErrorCode::ERROR,
                message: "SQL text contains no statement".to_string(),
            }),
        }
    }

    fn prepare_bound(&self, sql: &str, params: &[Value]) -> DbResult<Statement<'_>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_values(params)?;
        Ok(stmt)
    }

    /// Prepares and executes a single SQL statement with the given parameters.
    ///
    /// Returns the number of rows changed.
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let mut stmt = self.prepare_bound(sql, params)?;
        stmt.run()?;
        Ok(usize::try_from(stmt.changes()).unwrap_or(0))
    }

    /// Prepares and executes a statement, mapping exactly one result row.
    ///
    /// # Errors
    ///
    /// [`DbError::NoRows`] if no row is returned.
    pub fn query_row<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        self.query_row_optional(sql, params, mapper)?
            .ok_or(DbError::NoRows)
    }

    /// Like [`query_row`](Self::query_row) but returns `Ok(None)` when no row
    /// is returned.
    pub fn query_row_optional<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<Option<T>> {
        let mut stmt = self.prepare_bound(sql, params)?;
        match stmt.step()? {
            StepResult::Row => mapper(&stmt).map(Some),
            StepResult::Done => Ok(None),
        }
    }

    /// Prepares and executes a statement, mapping every result row.
    pub fn query_map<T>(
        &self,
        sql: &str,
        params: &[Value],
        mut mapper: impl FnMut(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<Vec<T>> {
        let mut stmt = self.prepare_bound(sql, params)?;
        let mut out = Vec::new();
        while stmt.step()? == StepResult::Row {
            out.push(mapper(&stmt)?);
        }
        Ok(out)
    }

    /// Returns `true` if a table named `name` exists in the main schema.
    pub fn table_exists(&self, name: &str) -> DbResult<bool> {
        self.query_row_optional(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(name)],
            |_| Ok(()),
        )
        .map(|row| row.is_some())
    }

    /// Sets how long the engine retries when the database is locked.
    pub fn set_busy_timeout(&self, timeout: Duration) -> DbResult<()> {
        let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        self.db.busy_timeout(millis).map_err(DbError::step)
    }

    /// Begins a deferred transaction.
    pub fn transaction(&self) -> DbResult<Transaction<'_>> {
        Transaction::begin(self, TransactionBehavior::Deferred)
    }

    /// Begins an immediate transaction (acquires a RESERVED lock right away).
    pub fn transaction_immediate(&self) -> DbResult<Transaction<'_>> {
        Transaction::begin(self, TransactionBehavior::Immediate)
    }

    /// Returns `true` between `BEGIN` and the matching `COMMIT`/`ROLLBACK`.
    pub fn in_transaction(&self) -> bool {
        !self.db.autocommit()
    }

    /// Returns the rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        self.db.last_insert_rowid()
    }

    /// Returns the number of rows changed by the most recent statement.
    pub fn changes(&self) -> usize {
        usize::try_from(self.db.changes()).unwrap_or(0)
    }

    /// Closes the connection, finalizing any statement the engine still
    /// tracks. Never fails; later calls are no-ops.
    pub fn close(&mut self) {
        if !self.db.is_open() {
            return;
        }
        let finalized = self.db.close();
        if finalized > 0 {
            log::debug!("finalized {finalized} outstanding statement(s) on close");
        }
        log::debug!("closed database at {}", self.path);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("traced", &self.sql_tracer.is_some())
            .finish()
    }
}
