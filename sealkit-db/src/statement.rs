//! Safe wrapper around a `SQLite` prepared statement.
//!
//! This file contains **no `unsafe` code**. All FFI interaction is delegated to
//! [`ffi::RawStmt`] which encapsulates the raw pointers and C type conversions.
//!
//! A statement moves through `Prepared → Row* → Done`. Once it reports
//! [`StepResult::Done`] (or a step fails) it must be [`reset`](Statement::reset)
//! before it can run again; stepping a completed statement is an error rather
//! than a silent re-execution. Binding a parameter after a step rewinds the
//! cursor and keeps the other bindings, so a completed write can be re-run
//! with new values without an explicit reset.

use std::os::raw::c_int;

use super::error::{DbError, DbErrorCode, DbResult};
use super::ffi::{self, RawStmt};
use super::value::{ColumnType, FromValue, Value};

/// Result of a single `sqlite3_step` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A result row is available.
    Row,
    /// The statement has finished executing.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Prepared,
    Row,
    Done,
}

/// A prepared `SQLite` statement.
///
/// Created via [`Connection::prepare`](super::Connection::prepare).
/// Tied to the lifetime of the connection that created it.
/// Finalized by [`finalize`](Self::finalize) or when dropped, whichever comes
/// first.
pub struct Statement<'conn> {
    raw: Option<RawStmt<'conn>>,
    state: State,
    last_insert_rowid: i64,
    changes: i64,
    total_changes_before: i64,
}

impl<'conn> Statement<'conn> {
    /// Wraps a raw statement handle.
    pub(super) const fn new(raw: RawStmt<'conn>) -> Self {
        Self {
            raw: Some(raw),
            state: State::Prepared,
            last_insert_rowid: 0,
            changes: 0,
            total_changes_before: 0,
        }
    }

    fn live(&self) -> DbResult<&RawStmt<'conn>> {
        self.raw.as_ref().ok_or_else(finalized)
    }

    /// Number of parameters declared by the SQL text.
    pub fn parameter_count(&self) -> usize {
        self.raw
            .as_ref()
            .map_or(0, |raw| usize::try_from(raw.parameter_count()).unwrap_or(0))
    }

    /// Binds `value` to the 1-based parameter `index`.
    ///
    /// On a statement that has already stepped, the cursor is rewound to the
    /// prepared state first. Earlier bindings are kept, the row and the
    /// captured rowid/changes are discarded.
    ///
    /// # Errors
    ///
    /// [`DbError::BindIndexOutOfRange`] when `index` is 0 or exceeds
    /// [`parameter_count`](Self::parameter_count), [`DbError::Misuse`] on a
    /// finalized statement.
    pub fn bind(&mut self, index: usize, value: &Value) -> DbResult<()> {
        let raw = self.raw.as_ref().ok_or_else(finalized)?;
        let count = usize::try_from(raw.parameter_count()).unwrap_or(0);
        if index == 0 || index > count {
            return Err(DbError::BindIndexOutOfRange { index, count });
        }
        let idx =
            c_int::try_from(index).map_err(|_| DbError::BindIndexOutOfRange { index, count })?;
        if self.state != State::Prepared {
            raw.rewind();
            self.state = State::Prepared;
            self.last_insert_rowid = 0;
            self.changes = 0;
        }
        bind_raw(raw, idx, value)
    }

    /// Binds a slice of [`Value`]s to the statement parameters (1-indexed).
    pub fn bind_values(&mut self, values: &[Value]) -> DbResult<()> {
        for (i, value) in values.iter().enumerate() {
            self.bind(i + 1, value)?;
        }
        Ok(())
    }

    /// Binds `value` to a named parameter. The name includes its prefix
    /// (`:id`, `@id`, `$id`).
    ///
    /// # Errors
    ///
    /// [`DbError::UnknownParameter`] when the SQL has no such parameter.
    pub fn bind_named(&mut self, name: &str, value: &Value) -> DbResult<()> {
        let index = self.live()?.parameter_index(name);
        if index <= 0 {
            return Err(DbError::UnknownParameter(name.to_string()));
        }
        self.bind(usize::try_from(index).unwrap_or(0), value)
    }

    /// Executes a single step.
    ///
    /// # Errors
    ///
    /// [`DbError::StepFailed`] with the engine's message when execution fails,
    /// and with [`DbErrorCode::MISUSE`] when the statement already completed
    /// and has not been reset.
    pub fn step(&mut self) -> DbResult<StepResult> {
        let raw = self.raw.as_ref().ok_or_else(|| DbError::StepFailed {
            code: DbErrorCode::MISUSE,
            message: "statement is finalized".to_string(),
        })?;
        if self.state == State::Done {
            return Err(DbError::StepFailed {
                code: DbErrorCode::MISUSE,
                message: "statement already ran to completion; reset it before stepping again"
                    .to_string(),
            });
        }
        if self.state == State::Prepared {
            self.total_changes_before = raw.db_total_changes();
        }
        match raw.step() {
            Ok(ffi::SQLITE_ROW) => {
                self.state = State::Row;
                Ok(StepResult::Row)
            }
            Ok(_) => {
                self.state = State::Done;
                // DDL and no-op writes leave the connection counters at the
                // previous write's values.
                if !raw.readonly() && raw.db_total_changes() != self.total_changes_before {
                    self.last_insert_rowid = raw.db_last_insert_rowid();
                    self.changes = raw.db_changes();
                }
                Ok(StepResult::Done)
            }
            Err(err) => {
                self.state = State::Done;
                Err(DbError::step(err))
            }
        }
    }

    /// Steps until the statement completes, discarding any rows.
    pub fn run(&mut self) -> DbResult<()> {
        while self.step()? == StepResult::Row {}
        Ok(())
    }

    /// Returns to the prepared state and clears every binding to NULL.
    pub fn reset(&mut self) {
        if let Some(raw) = &self.raw {
            raw.rewind();
            raw.clear_bindings();
        }
        self.state = State::Prepared;
        self.last_insert_rowid = 0;
        self.changes = 0;
    }

    /// Releases the native statement. Later calls are no-ops.
    pub fn finalize(&mut self) {
        self.raw = None;
        self.state = State::Done;
    }

    /// Returns `true` once [`finalize`](Self::finalize) has run.
    pub const fn is_finalized(&self) -> bool {
        self.raw.is_none()
    }

    /// Returns `true` if the statement does not write to the database.
    pub fn is_readonly(&self) -> bool {
        self.raw.as_ref().is_none_or(RawStmt::readonly)
    }

    /// The SQL text the statement was prepared from.
    pub fn sql(&self) -> String {
        self.raw.as_ref().map(RawStmt::sql).unwrap_or_default()
    }

    /// Rowid of the last completed step that changed rows, 0 otherwise.
    pub const fn last_insert_rowid(&self) -> i64 {
        self.last_insert_rowid
    }

    /// Rows changed by the last completed step, 0 for reads, DDL and writes
    /// that matched nothing.
    pub const fn changes(&self) -> i64 {
        self.changes
    }

    /// Number of result columns.
    pub fn column_count(&self) -> usize {
        self.raw
            .as_ref()
            .map_or(0, |raw| usize::try_from(raw.column_count()).unwrap_or(0))
    }

    fn column(&self, index: usize) -> Option<(&RawStmt<'conn>, c_int)> {
        let raw = self.raw.as_ref()?;
        let idx = c_int::try_from(index).ok()?;
        (idx < raw.column_count()).then_some((raw, idx))
    }

    fn row_column(&self, index: usize) -> Option<(&RawStmt<'conn>, c_int)> {
        if self.state == State::Row {
            self.column(index)
        } else {
            None
        }
    }

    /// Declared name of the column, `None` when out of range.
    pub fn column_name(&self, index: usize) -> Option<String> {
        self.column(index).and_then(|(raw, idx)| raw.column_name(idx))
    }

    /// Source table of the column, `None` for expressions or out of range.
    pub fn column_table_name(&self, index: usize) -> Option<String> {
        self.column(index).and_then(|(raw, idx)| raw.column_table_name(idx))
    }

    /// Position of the column named `name` (ASCII case-insensitive).
    /// Unknown names yield `None`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        (0..self.column_count()).find(|&i| {
            self.column_name(i)
                .is_some_and(|column| column.eq_ignore_ascii_case(name))
        })
    }

    /// Storage type of the column in the current row. `Null` when no row is
    /// available or the index is out of range.
    pub fn column_type(&self, index: usize) -> ColumnType {
        self.row_column(index)
            .map_or(ColumnType::Null, |(raw, idx)| match raw.column_type(idx) {
                ffi::SQLITE_INTEGER => ColumnType::Integer64,
                ffi::SQLITE_FLOAT => ColumnType::Float,
                ffi::SQLITE_TEXT => ColumnType::Text,
                ffi::SQLITE_BLOB => ColumnType::Blob,
                _ => ColumnType::Null,
            })
    }

    /// Like [`column_type`](Self::column_type), by column name.
    pub fn column_type_by_name(&self, name: &str) -> ColumnType {
        self.column_index(name).map_or(ColumnType::Null, |i| self.column_type(i))
    }

    /// Reads the column of the current row. `Value::Null` when no row is
    /// available or the index is out of range.
    pub fn column_value(&self, index: usize) -> Value {
        let Some((raw, idx)) = self.row_column(index) else {
            return Value::Null;
        };
        match raw.column_type(idx) {
            ffi::SQLITE_INTEGER => Value::Integer64(raw.column_i64(idx)),
            ffi::SQLITE_FLOAT => Value::Float(raw.column_f64(idx)),
            ffi::SQLITE_TEXT => Value::Text(raw.column_text(idx)),
            ffi::SQLITE_BLOB => Value::Blob(raw.column_blob(idx)),
            _ => Value::Null,
        }
    }

    /// Reads and converts the column of the current row.
    pub fn value<T: FromValue>(&self, index: usize) -> T {
        T::from_value(&self.column_value(index))
    }

    /// Reads and converts a column by name. `None` when the name is unknown.
    pub fn value_by_name<T: FromValue>(&self, name: &str) -> Option<T> {
        self.column_index(name).map(|i| self.value(i))
    }

    /// All columns of the current row.
    pub fn row(&self) -> Vec<Value> {
        (0..self.column_count())
            .map(|i| self.column_value(i))
            .collect()
    }

    /// Steps to completion and collects every row.
    pub fn rows(&mut self) -> DbResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while self.step()? == StepResult::Row {
            rows.push(self.row());
        }
        Ok(rows)
    }
}

fn finalized() -> DbError {
    DbError::Misuse("statement is finalized".to_string())
}

fn bind_raw(raw: &RawStmt<'_>, idx: c_int, value: &Value) -> DbResult<()> {
    match value {
        Value::Null => raw.bind_null(idx),
        Value::Integer32(v) => raw.bind_i64(idx, i64::from(*v)),
        Value::Integer64(v) => raw.bind_i64(idx, *v),
        Value::Float(v) => raw.bind_f64(idx, *v),
        Value::Text(v) => raw.bind_text(idx, v),
        Value::Blob(v) => raw.bind_blob(idx, v),
    }
    .map_err(DbError::step)
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
