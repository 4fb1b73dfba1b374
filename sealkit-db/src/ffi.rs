//! Raw FFI bindings to the sqlite3mc static library compiled by `build.rs`.
//!
//! This is the **only** module that contains `unsafe` code or C types.
//! [`RawDb`] and [`RawStmt`] own the native handles and expose a small safe
//! surface; everything above this module works with Rust types only.

#![allow(non_camel_case_types)]

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

// ── SQLite constants ────────────────────────────────────────────────────

pub const SQLITE_OK: c_int = 0;
pub const SQLITE_ERROR: c_int = 1;
pub const SQLITE_MISUSE: c_int = 21;
pub const SQLITE_ROW: c_int = 100;
pub const SQLITE_DONE: c_int = 101;

// Column type constants
pub const SQLITE_INTEGER: c_int = 1;
pub const SQLITE_FLOAT: c_int = 2;
pub const SQLITE_TEXT: c_int = 3;
pub const SQLITE_BLOB: c_int = 4;

// Open flags
pub const SQLITE_OPEN_READONLY: c_int = 0x0000_0001;
pub const SQLITE_OPEN_READWRITE: c_int = 0x0000_0002;
pub const SQLITE_OPEN_CREATE: c_int = 0x0000_0004;
pub const SQLITE_OPEN_FULLMUTEX: c_int = 0x0001_0000;

// Destructor sentinel (transient = -1 means SQLite copies the data)
const SQLITE_TRANSIENT: isize = -1;

type sqlite3 = c_void;
type sqlite3_stmt = c_void;

extern "C" {
    fn sqlite3_open_v2(
        filename: *const c_char,
        pp_db: *mut *mut sqlite3,
        flags: c_int,
        z_vfs: *const c_char,
    ) -> c_int;
    fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
    fn sqlite3_busy_timeout(db: *mut sqlite3, ms: c_int) -> c_int;

    // sqlite3mc codec entry points
    fn sqlite3_key_v2(
        db: *mut sqlite3,
        z_db_name: *const c_char,
        p_key: *const c_void,
        n_key: c_int,
    ) -> c_int;
    fn sqlite3_rekey_v2(
        db: *mut sqlite3,
        z_db_name: *const c_char,
        p_key: *const c_void,
        n_key: c_int,
    ) -> c_int;

    fn sqlite3_prepare_v2(
        db: *mut sqlite3,
        z_sql: *const c_char,
        n_byte: c_int,
        pp_stmt: *mut *mut sqlite3_stmt,
        pz_tail: *mut *const c_char,
    ) -> c_int;
    fn sqlite3_step(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_reset(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_clear_bindings(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_finalize(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_next_stmt(db: *mut sqlite3, stmt: *mut sqlite3_stmt) -> *mut sqlite3_stmt;
    fn sqlite3_stmt_readonly(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_sql(stmt: *mut sqlite3_stmt) -> *const c_char;

    fn sqlite3_bind_int64(stmt: *mut sqlite3_stmt, index: c_int, value: i64) -> c_int;
    fn sqlite3_bind_double(stmt: *mut sqlite3_stmt, index: c_int, value: f64) -> c_int;
    fn sqlite3_bind_blob(
        stmt: *mut sqlite3_stmt,
        index: c_int,
        value: *const c_void,
        n: c_int,
        destructor: isize,
    ) -> c_int;
    fn sqlite3_bind_text(
        stmt: *mut sqlite3_stmt,
        index: c_int,
        value: *const c_char,
        n: c_int,
        destructor: isize,
    ) -> c_int;
    fn sqlite3_bind_null(stmt: *mut sqlite3_stmt, index: c_int) -> c_int;
    fn sqlite3_bind_parameter_count(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_bind_parameter_index(stmt: *mut sqlite3_stmt, name: *const c_char) -> c_int;

    fn sqlite3_column_count(stmt: *mut sqlite3_stmt) -> c_int;
    fn sqlite3_column_type(stmt: *mut sqlite3_stmt, i_col: c_int) -> c_int;
    fn sqlite3_column_int64(stmt: *mut sqlite3_stmt, i_col: c_int) -> i64;
    fn sqlite3_column_double(stmt: *mut sqlite3_stmt, i_col: c_int) -> f64;
    fn sqlite3_column_blob(stmt: *mut sqlite3_stmt, i_col: c_int) -> *const c_void;
    fn sqlite3_column_text(stmt: *mut sqlite3_stmt, i_col: c_int) -> *const u8;
    fn sqlite3_column_bytes(stmt: *mut sqlite3_stmt, i_col: c_int) -> c_int;
    fn sqlite3_column_name(stmt: *mut sqlite3_stmt, i_col: c_int) -> *const c_char;
    fn sqlite3_column_table_name(stmt: *mut sqlite3_stmt, i_col: c_int) -> *const c_char;

    fn sqlite3_errmsg(db: *mut sqlite3) -> *const c_char;
    fn sqlite3_changes(db: *mut sqlite3) -> c_int;
    fn sqlite3_total_changes(db: *mut sqlite3) -> c_int;
    fn sqlite3_get_autocommit(db: *mut sqlite3) -> c_int;
    fn sqlite3_last_insert_rowid(db: *mut sqlite3) -> i64;
}

/// A native failure: result code plus the engine's diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: c_int,
    pub message: String,
}

impl NativeError {
    fn new(code: c_int, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

fn to_c_int(len: usize, what: &str) -> NativeResult<c_int> {
    c_int::try_from(len)
        .map_err(|_| NativeError::new(SQLITE_ERROR, format!("{what} too large ({len} bytes)")))
}

/// Copies a NUL-terminated C string owned by SQLite. `None` for null.
fn owned_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: SQLite returns valid NUL-terminated strings that live at least
    // until the next call on the same handle; we copy immediately.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

// ── Connection ──────────────────────────────────────────────────────────

/// Owner of a raw `sqlite3*` handle. Closed exactly once.
pub struct RawDb {
    db: *mut sqlite3,
}

// SAFETY: connections are opened with SQLITE_OPEN_FULLMUTEX and the owning
// `Connection` is only reachable through `&`/`&mut` borrows, so moving the
// handle between threads is sound.
unsafe impl Send for RawDb {}

impl RawDb {
    /// Opens (or creates) the database at `path` with `flags`.
    pub fn open(path: &str, flags: c_int) -> NativeResult<Self> {
        let c_path = CString::new(path)
            .map_err(|e| NativeError::new(SQLITE_ERROR, format!("invalid path: {e}")))?;
        let mut db: *mut sqlite3 = ptr::null_mut();
        // SAFETY: valid C string, out-pointer to a local.
        let rc = unsafe { sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != SQLITE_OK {
            // If open failed but we got a handle, extract the error and close.
            let message = if db.is_null() {
                format!("sqlite3_open_v2 returned {rc}")
            } else {
                let message = errmsg(db);
                // SAFETY: the handle came from sqlite3_open_v2 and is not used again.
                unsafe { sqlite3_close_v2(db) };
                message
            };
            return Err(NativeError::new(rc, message));
        }
        Ok(Self { db })
    }

    pub const fn is_open(&self) -> bool {
        !self.db.is_null()
    }

    fn checked(&self) -> NativeResult<*mut sqlite3> {
        if self.db.is_null() {
            Err(NativeError::new(SQLITE_MISUSE, "connection is closed"))
        } else {
            Ok(self.db)
        }
    }

    fn error(&self, code: c_int) -> NativeError {
        NativeError::new(code, errmsg(self.db))
    }

    /// Prepares the first statement in `sql`.
    ///
    /// Returns the statement (or `None` when the remaining text holds only
    /// whitespace or comments) and the number of bytes consumed.
    pub fn prepare(&self, sql: &str) -> NativeResult<(Option<RawStmt<'_>>, usize)> {
        let db = self.checked()?;
        let len = to_c_int(sql.len(), "SQL text")?;
        let start = sql.as_ptr().cast::<c_char>();
        let mut stmt: *mut sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // SAFETY: `start..start+len` is the borrowed UTF-8 text; SQLite does not
        // require NUL termination when an explicit length is given.
        let rc = unsafe { sqlite3_prepare_v2(db, start, len, &mut stmt, &mut tail) };
        if rc != SQLITE_OK {
            return Err(self.error(rc));
        }
        let consumed = if tail.is_null() {
            sql.len()
        } else {
            // SAFETY: SQLite sets `tail` to a position inside the input buffer.
            usize::try_from(unsafe { tail.offset_from(start) }).unwrap_or(sql.len())
        };
        let raw = (!stmt.is_null()).then(|| RawStmt {
            stmt,
            db,
            _conn: PhantomData,
        });
        Ok((raw, consumed))
    }

    pub fn key(&self, key: &[u8]) -> NativeResult<()> {
        let db = self.checked()?;
        let len = to_c_int(key.len(), "cipher key")?;
        // SAFETY: key bytes are valid for `len`; null schema name means "main".
        let rc = unsafe { sqlite3_key_v2(db, ptr::null(), key.as_ptr().cast(), len) };
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    pub fn rekey(&self, key: &[u8]) -> NativeResult<()> {
        let db = self.checked()?;
        let len = to_c_int(key.len(), "cipher key")?;
        // SAFETY: as in `key`.
        let rc = unsafe { sqlite3_rekey_v2(db, ptr::null(), key.as_ptr().cast(), len) };
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    pub fn busy_timeout(&self, millis: c_int) -> NativeResult<()> {
        let db = self.checked()?;
        // SAFETY: open handle.
        let rc = unsafe { sqlite3_busy_timeout(db, millis) };
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    pub fn changes(&self) -> i64 {
        if self.db.is_null() {
            return 0;
        }
        // SAFETY: open handle.
        i64::from(unsafe { sqlite3_changes(self.db) })
    }

    /// `false` while an explicit transaction is open. A closed handle is in
    /// autocommit mode.
    pub fn autocommit(&self) -> bool {
        if self.db.is_null() {
            return true;
        }
        // SAFETY: open handle.
        unsafe { sqlite3_get_autocommit(self.db) != 0 }
    }

    pub fn last_insert_rowid(&self) -> i64 {
        if self.db.is_null() {
            return 0;
        }
        // SAFETY: open handle.
        unsafe { sqlite3_last_insert_rowid(self.db) }
    }

    /// Finalizes every statement still registered with the engine and closes
    /// the handle. Returns the number of statements that had to be finalized.
    /// Safe to call more than once.
    pub fn close(&mut self) -> usize {
        if self.db.is_null() {
            return 0;
        }
        let mut finalized = 0;
        loop {
            // SAFETY: walking the handle's own statement list; each returned
            // statement is finalized before asking for the next head.
            let stmt = unsafe { sqlite3_next_stmt(self.db, ptr::null_mut()) };
            if stmt.is_null() {
                break;
            }
            unsafe { sqlite3_finalize(stmt) };
            finalized += 1;
        }
        // SAFETY: handle is open and no statements remain.
        unsafe { sqlite3_close_v2(self.db) };
        self.db = ptr::null_mut();
        finalized
    }
}

impl Drop for RawDb {
    fn drop(&mut self) {
        self.close();
    }
}

fn errmsg(db: *mut sqlite3) -> String {
    if db.is_null() {
        return "connection is closed".to_string();
    }
    // SAFETY: open handle; the message is copied immediately.
    owned_c_str(unsafe { sqlite3_errmsg(db) }).unwrap_or_else(|| "unknown error".to_string())
}

// ── Statement ───────────────────────────────────────────────────────────

/// Owner of a raw `sqlite3_stmt*`, tied to the lifetime of its [`RawDb`].
pub struct RawStmt<'conn> {
    stmt: *mut sqlite3_stmt,
    db: *mut sqlite3,
    _conn: PhantomData<&'conn RawDb>,
}

impl RawStmt<'_> {
    fn error(&self, code: c_int) -> NativeError {
        NativeError::new(code, errmsg(self.db))
    }

    fn rc(&self, rc: c_int) -> NativeResult<()> {
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    /// Returns `SQLITE_ROW` or `SQLITE_DONE`, anything else is an error.
    pub fn step(&self) -> NativeResult<c_int> {
        // SAFETY: statement is live for the lifetime of `self`.
        let rc = unsafe { sqlite3_step(self.stmt) };
        match rc {
            SQLITE_ROW | SQLITE_DONE => Ok(rc),
            _ => Err(self.error(rc)),
        }
    }

    /// Rewinds the cursor, keeping the bindings. Never fails: the code
    /// returned by `sqlite3_reset` only repeats the last step error.
    pub fn rewind(&self) {
        // SAFETY: statement is live.
        unsafe { sqlite3_reset(self.stmt) };
    }

    pub fn clear_bindings(&self) {
        // SAFETY: statement is live.
        unsafe { sqlite3_clear_bindings(self.stmt) };
    }

    pub fn readonly(&self) -> bool {
        // SAFETY: statement is live.
        unsafe { sqlite3_stmt_readonly(self.stmt) != 0 }
    }

    pub fn sql(&self) -> String {
        // SAFETY: statement is live.
        owned_c_str(unsafe { sqlite3_sql(self.stmt) }).unwrap_or_default()
    }

    /// Rows changed by the most recent write on the owning connection.
    pub fn db_changes(&self) -> i64 {
        // SAFETY: the owning connection outlives `'conn`.
        i64::from(unsafe { sqlite3_changes(self.db) })
    }

    /// Rows changed by every write since the owning connection opened.
    pub fn db_total_changes(&self) -> i64 {
        // SAFETY: the owning connection outlives `'conn`.
        i64::from(unsafe { sqlite3_total_changes(self.db) })
    }

    /// Rowid of the most recent insert on the owning connection.
    pub fn db_last_insert_rowid(&self) -> i64 {
        // SAFETY: the owning connection outlives `'conn`.
        unsafe { sqlite3_last_insert_rowid(self.db) }
    }

    pub fn bind_i64(&self, idx: c_int, value: i64) -> NativeResult<()> {
        // SAFETY: statement is live.
        self.rc(unsafe { sqlite3_bind_int64(self.stmt, idx, value) })
    }

    pub fn bind_f64(&self, idx: c_int, value: f64) -> NativeResult<()> {
        // SAFETY: statement is live.
        self.rc(unsafe { sqlite3_bind_double(self.stmt, idx, value) })
    }

    pub fn bind_blob(&self, idx: c_int, value: &[u8]) -> NativeResult<()> {
        let len = to_c_int(value.len(), "blob")?;
        // SAFETY: SQLITE_TRANSIENT makes SQLite copy the bytes before returning.
        self.rc(unsafe {
            sqlite3_bind_blob(self.stmt, idx, value.as_ptr().cast(), len, SQLITE_TRANSIENT)
        })
    }

    pub fn bind_text(&self, idx: c_int, value: &str) -> NativeResult<()> {
        let len = to_c_int(value.len(), "text")?;
        // SAFETY: SQLITE_TRANSIENT makes SQLite copy the bytes before returning.
        self.rc(unsafe {
            sqlite3_bind_text(self.stmt, idx, value.as_ptr().cast(), len, SQLITE_TRANSIENT)
        })
    }

    pub fn bind_null(&self, idx: c_int) -> NativeResult<()> {
        // SAFETY: statement is live.
        self.rc(unsafe { sqlite3_bind_null(self.stmt, idx) })
    }

    pub fn parameter_count(&self) -> c_int {
        // SAFETY: statement is live.
        unsafe { sqlite3_bind_parameter_count(self.stmt) }
    }

    /// 1-based index of a named parameter, 0 when unknown.
    pub fn parameter_index(&self, name: &str) -> c_int {
        let Ok(c_name) = CString::new(name) else {
            return 0;
        };
        // SAFETY: statement is live, name is NUL-terminated.
        unsafe { sqlite3_bind_parameter_index(self.stmt, c_name.as_ptr()) }
    }

    pub fn column_count(&self) -> c_int {
        // SAFETY: statement is live.
        unsafe { sqlite3_column_count(self.stmt) }
    }

    pub fn column_type(&self, idx: c_int) -> c_int {
        // SAFETY: statement is live; callers check the index.
        unsafe { sqlite3_column_type(self.stmt, idx) }
    }

    pub fn column_i64(&self, idx: c_int) -> i64 {
        // SAFETY: as above.
        unsafe { sqlite3_column_int64(self.stmt, idx) }
    }

    pub fn column_f64(&self, idx: c_int) -> f64 {
        // SAFETY: as above.
        unsafe { sqlite3_column_double(self.stmt, idx) }
    }

    /// Reads a column as bytes. Empty for NULL or zero-length values.
    pub fn column_blob(&self, idx: c_int) -> Vec<u8> {
        // SAFETY: the pointer must be fetched before the length; both stay
        // valid until the next step/reset/finalize and are copied here.
        unsafe {
            let ptr = sqlite3_column_blob(self.stmt, idx);
            let len = sqlite3_column_bytes(self.stmt, idx);
            match usize::try_from(len) {
                Ok(len) if !ptr.is_null() && len > 0 => {
                    std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec()
                }
                _ => Vec::new(),
            }
        }
    }

    /// Reads a column as UTF-8 text (lossy). Empty for NULL.
    pub fn column_text(&self, idx: c_int) -> String {
        // SAFETY: as in `column_blob`.
        unsafe {
            let ptr = sqlite3_column_text(self.stmt, idx);
            let len = sqlite3_column_bytes(self.stmt, idx);
            match usize::try_from(len) {
                Ok(len) if !ptr.is_null() && len > 0 => {
                    String::from_utf8_lossy(std::slice::from_raw_parts(ptr, len)).into_owned()
                }
                _ => String::new(),
            }
        }
    }

    pub fn column_name(&self, idx: c_int) -> Option<String> {
        // SAFETY: statement is live; the name is copied.
        owned_c_str(unsafe { sqlite3_column_name(self.stmt, idx) })
    }

    pub fn column_table_name(&self, idx: c_int) -> Option<String> {
        // SAFETY: statement is live; null for expressions.
        owned_c_str(unsafe { sqlite3_column_table_name(self.stmt, idx) })
    }
}

impl Drop for RawStmt<'_> {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            // SAFETY: finalized exactly once; the pointer is cleared below.
            unsafe { sqlite3_finalize(self.stmt) };
            self.stmt = ptr::null_mut();
        }
    }
}
