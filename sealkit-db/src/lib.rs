//! Encrypted `SQLite` client layer backed by `sqlite3mc`.
//!
//! This crate provides a small, safe Rust API over the `SQLite` C FFI:
//!
//! * [`Value`]: a closed set of storage types with total, lossy coercions.
//! * [`Statement`]: prepare, bind, step, read, finalize.
//! * [`Configs`]: named, priority-ordered setup steps run on every new
//!   connection.
//! * [`Database`]: the gate owning one lazily opened connection that is
//!   either fully keyed and configured, or not open at all.
//!
//! The raw symbols are linked against the `sqlite3mc` static library
//! compiled from the downloaded amalgamation by `build.rs`. The `ffi` module
//! is the **only** file that contains `unsafe` code or C types.
//!
//! ```no_run
//! use sealkit_db::{params, Database, DbResult};
//!
//! fn demo() -> DbResult<()> {
//!     let db = Database::new("app.db");
//!     db.set_cipher(Some(b"correct horse battery staple".to_vec()));
//!     db.set_config("schema", |conn| {
//!         conn.execute_batch("CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT)")
//!     });
//!     db.execute("INSERT INTO notes (body) VALUES (?1)", params!["hello"])?;
//!     let body: String = db.query_row("SELECT body FROM notes", &[], |stmt| Ok(stmt.value(0)))?;
//!     assert_eq!(body, "hello");
//!     Ok(())
//! }
//! ```

mod ffi;

pub mod cipher;
pub mod config;
mod connection;
mod database;
pub mod error;
pub mod logger;
mod options;
mod statement;
mod transaction;
pub mod value;

pub use cipher::CipherOptions;
pub use config::{Config, Configs, Invocation, Priority};
pub use connection::{Connection, SqlTracer, MEMORY_PATH};
pub use database::{Database, DatabaseHandle, ErrorTracer};
pub use error::{DbError, DbErrorCode, DbResult};
pub use options::OpenOptions;
pub use statement::{Statement, StepResult};
pub use transaction::{Transaction, TransactionBehavior};
pub use value::{ColumnType, FromValue, Value};
