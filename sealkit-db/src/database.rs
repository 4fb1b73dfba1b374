//! The connection gate: one lazily opened, fully configured connection.
//!
//! A [`Database`] owns at most one native connection. The connection is
//! either absent or *usable*: opened, keyed with the configured cipher and
//! set up by every entry of the configuration pipeline. A failure anywhere in
//! that sequence drops the connection again, so callers never observe a
//! partially configured handle.
//!
//! Changing the cipher or the pipeline closes the connection; the next access
//! reopens it and runs the whole pipeline from scratch.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use secrecy::{ExposeSecret, SecretBox};

use super::cipher::{self, CipherOptions};
use super::config::{self, Config, Configs, Priority};
use super::connection::{Connection, SqlTracer, MEMORY_PATH};
use super::error::{DbError, DbResult};
use super::options::OpenOptions;
use super::statement::Statement;
use super::transaction::Transaction;
use super::value::Value;

/// Receives every error a [`Database`] operation returns, open failures
/// included.
pub type ErrorTracer = Arc<dyn Fn(&DbError) + Send + Sync>;

struct Cipher {
    key: SecretBox<Vec<u8>>,
    options: CipherOptions,
}

struct Gate {
    path: PathBuf,
    options: OpenOptions,
    cipher: Option<Cipher>,
    configs: Configs,
    /// Snapshot of the pipeline the open connection was set up with.
    applied: Configs,
    connection: Option<Connection>,
    last_error: Option<DbError>,
    sql_tracer: Option<SqlTracer>,
    error_tracer: Option<ErrorTracer>,
}

impl Gate {
    fn ensure_open(&mut self) -> DbResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        match self.open_connection() {
            Ok(conn) => {
                log::debug!(
                    "database {} is usable ({} config(s) applied)",
                    self.path.display(),
                    self.configs.len()
                );
                self.applied = self.configs.clone();
                self.connection = Some(conn);
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to open database {}: {err}", self.path.display());
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Open, busy timeout, cipher format and key, pipeline. The connection
    /// is dropped (and closed) on any failure.
    fn open_connection(&self) -> DbResult<Connection> {
        if let Some(cipher) = &self.cipher {
            if cipher.key.expose_secret().is_empty() {
                return Err(DbError::InvalidCipherKey);
            }
            cipher.options.validate()?;
        }
        let mut conn = Connection::open(&self.path, self.options.read_only)?;
        conn.set_sql_tracer(self.sql_tracer.clone());
        if let Some(timeout) = self.options.busy_timeout() {
            conn.set_busy_timeout(timeout)?;
        }
        if let Some(cipher) = &self.cipher {
            cipher::configure(&conn, &cipher.options)?;
            cipher::apply_key(&conn, cipher.key.expose_secret())?;
        }
        self.configs.apply_all(&conn)?;
        Ok(conn)
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            self.applied.teardown_all(&conn);
            conn.close();
        }
        self.applied = Configs::new();
    }

    fn rekey(&mut self, new_key: SecretBox<Vec<u8>>) -> DbResult<()> {
        self.ensure_open()?;
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| DbError::Misuse("database is not open".to_string()))?;
        cipher::rekey(conn, new_key.expose_secret())?;
        let options = self
            .cipher
            .as_ref()
            .map_or(self.options.cipher, |cipher| cipher.options);
        self.cipher = Some(Cipher {
            key: new_key,
            options,
        });
        Ok(())
    }
}

/// An encrypted database reached through a single, lazily opened connection.
///
/// `Database` is `Send + Sync`; every access serializes on an internal lock,
/// and concurrent first accesses share a single open attempt.
pub struct Database {
    gate: Mutex<Gate>,
}

impl Database {
    /// Creates a closed gate for the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_options(path, OpenOptions::default())
    }

    /// Creates a closed gate with explicit open options. When the options
    /// request any built-in PRAGMA, the [`config::basic`] configuration is
    /// registered.
    pub fn with_options(path: impl AsRef<Path>, options: OpenOptions) -> Self {
        let mut configs = Configs::new();
        if options.needs_basic_config() {
            configs.register(config::basic(&options));
        }
        Self {
            gate: Mutex::new(Gate {
                path: path.as_ref().to_path_buf(),
                options,
                cipher: None,
                configs,
                applied: Configs::new(),
                connection: None,
                last_error: None,
                sql_tracer: None,
                error_tracer: None,
            }),
        }
    }

    /// Creates a gate over a private in-memory database. Its contents are
    /// lost whenever the gate closes.
    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock()
    }

    /// Reports an error to the error tracer. Must be called without the
    /// gate lock held, so the tracer may use the database again.
    fn traced<T>(&self, result: DbResult<T>) -> DbResult<T> {
        if let Err(err) = &result {
            let tracer = self.gate().error_tracer.clone();
            if let Some(tracer) = tracer {
                tracer(err);
            }
        }
        result
    }

    /// The database file path.
    pub fn path(&self) -> PathBuf {
        self.gate().path.clone()
    }

    /// Sets (`Some`) or removes (`None`) the cipher key and closes the gate.
    /// The key uses the cipher format of [`OpenOptions::cipher`].
    ///
    /// An empty key is accepted here and rejected by the next open attempt
    /// with [`DbError::InvalidCipherKey`].
    pub fn set_cipher(&self, key: Option<Vec<u8>>) {
        let mut gate = self.gate();
        gate.close();
        let options = gate.options.cipher;
        gate.cipher = key.map(|key| Cipher {
            key: SecretBox::new(Box::new(key)),
            options,
        });
    }

    /// Sets the cipher key with an explicit cipher format and closes the
    /// gate. Invalid options fail the next open attempt before the file is
    /// touched.
    pub fn set_cipher_with(&self, key: Vec<u8>, options: CipherOptions) {
        let mut gate = self.gate();
        gate.close();
        gate.cipher = Some(Cipher {
            key: SecretBox::new(Box::new(key)),
            options,
        });
    }

    /// Installs (`Some`) or removes (`None`) a tracer receiving the text of
    /// every statement prepared on the connection, configuration steps
    /// included. Applies to an already open connection as well.
    pub fn trace_sql(&self, tracer: Option<SqlTracer>) {
        let mut gate = self.gate();
        if let Some(conn) = gate.connection.as_mut() {
            conn.set_sql_tracer(tracer.clone());
        }
        gate.sql_tracer = tracer;
    }

    /// Installs (`Some`) or removes (`None`) a tracer receiving every error
    /// returned by this database's operations. The tracer runs without the
    /// gate lock held.
    pub fn trace_error(&self, tracer: Option<ErrorTracer>) {
        self.gate().error_tracer = tracer;
    }

    /// Registers a configuration with [`Priority::Default`], replacing any
    /// entry of the same name, and closes the gate.
    pub fn set_config<F>(&self, name: &str, invocation: F)
    where
        F: Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    {
        self.add_config(Config::new(name, invocation));
    }

    /// Like [`set_config`](Self::set_config) with an explicit priority.
    pub fn set_config_with_priority<F>(&self, name: &str, invocation: F, priority: Priority)
    where
        F: Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    {
        self.add_config(Config::new(name, invocation).with_priority(priority));
    }

    /// Registers a fully built configuration and closes the gate.
    pub fn add_config(&self, config: Config) {
        let mut gate = self.gate();
        gate.close();
        gate.configs.register(config);
    }

    /// Removes a configuration. Closes the gate when an entry was removed.
    pub fn remove_config(&self, name: &str) -> bool {
        let mut gate = self.gate();
        if !gate.configs.contains(name) {
            return false;
        }
        gate.close();
        gate.configs.remove(name)
    }

    /// Registered configuration names in execution order.
    pub fn config_names(&self) -> Vec<String> {
        self.gate().configs.names()
    }

    /// Opens, keys and configures the connection unless it is already usable.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidCipherKey`] for an empty key (before any native
    /// call), the engine error of a failed open, or
    /// [`DbError::ConfigurationFailed`] from the pipeline.
    pub fn ensure_open(&self) -> DbResult<()> {
        let result = self.gate().ensure_open();
        self.traced(result)
    }

    /// Attempts to open the gate and reports whether it worked. A successful
    /// attempt leaves the connection open.
    pub fn can_open(&self) -> bool {
        self.ensure_open().is_ok()
    }

    /// Returns `true` while a usable connection is held.
    pub fn is_opened(&self) -> bool {
        self.gate().connection.is_some()
    }

    /// The error of the most recent failed open attempt, cleared by the next
    /// successful one.
    pub fn last_open_error(&self) -> Option<DbError> {
        self.gate().last_error.clone()
    }

    /// Runs the teardown steps of the applied configurations in reverse order
    /// and closes the connection. Never fails; closing a closed gate is a
    /// no-op.
    pub fn close(&self) {
        self.gate().close();
    }

    /// Closes the gate and runs `f` while keeping it closed: no other thread
    /// can reopen the database until `f` returns, so `f` may move or delete
    /// the database files. `f` must not call back into this database.
    pub fn close_with<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut gate = self.gate();
        gate.close();
        let out = f();
        drop(gate);
        out
    }

    /// Opens the gate if needed and returns exclusive access to the
    /// connection for as long as the handle lives.
    pub fn handle(&self) -> DbResult<DatabaseHandle<'_>> {
        let mut gate = self.gate();
        if let Err(err) = gate.ensure_open() {
            drop(gate);
            return self.traced(Err(err));
        }
        MutexGuard::try_map(gate, |gate| gate.connection.as_mut())
            .map(|connection| DatabaseHandle { connection })
            .map_err(|_| DbError::Misuse("database is not open".to_string()))
    }

    /// Runs `f` with exclusive access to the open connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let result = {
            let handle = self.handle()?;
            f(&handle)
        };
        self.traced(result)
    }

    /// See [`Connection::execute`].
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        self.with_connection(|conn| conn.execute(sql, params))
    }

    /// See [`Connection::execute_batch`].
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    /// See [`Connection::query_row`].
    pub fn query_row<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        self.with_connection(|conn| conn.query_row(sql, params, mapper))
    }

    /// See [`Connection::query_map`].
    pub fn query_map<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnMut(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<Vec<T>> {
        self.with_connection(|conn| conn.query_map(sql, params, mapper))
    }

    /// See [`Connection::table_exists`].
    pub fn table_exists(&self, name: &str) -> DbResult<bool> {
        self.with_connection(|conn| conn.table_exists(name))
    }

    /// Runs `f` inside a transaction: committed when `f` returns `Ok`,
    /// rolled back otherwise.
    pub fn run_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Re-encrypts the database under `new_key` and keeps the gate open with
    /// the new key as its cipher.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidCipherKey`] for an empty key, or the engine error.
    pub fn rekey(&self, new_key: Vec<u8>) -> DbResult<()> {
        let result = self.gate().rekey(SecretBox::new(Box::new(new_key)));
        self.traced(result)
    }

    /// See [`cipher::integrity_check`].
    pub fn integrity_check(&self) -> DbResult<bool> {
        self.with_connection(cipher::integrity_check)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gate = self.gate();
        f.debug_struct("Database")
            .field("path", &gate.path)
            .field("encrypted", &gate.cipher.is_some())
            .field("configs", &gate.configs.names())
            .field("opened", &gate.connection.is_some())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the open connection of a [`Database`].
///
/// Holds the gate lock; other threads wait until the handle is dropped.
pub struct DatabaseHandle<'db> {
    connection: MappedMutexGuard<'db, Connection>,
}

impl Deref for DatabaseHandle<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl std::fmt::Debug for DatabaseHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DatabaseHandle").field(&**self).finish()
    }
}
