//! Rollback-on-drop transaction guard.

use std::ops::Deref;

use super::connection::Connection;
use super::error::DbResult;

/// How `BEGIN` acquires its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionBehavior {
    /// Locks are taken by the first read or write.
    #[default]
    Deferred,
    /// The write lock is taken by `BEGIN` itself.
    Immediate,
}

impl TransactionBehavior {
    const fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

/// An open transaction on a borrowed [`Connection`].
///
/// Dereferences to the connection, so every query helper runs inside the
/// transaction. When the guard is dropped while the engine still reports the
/// transaction open (no commit, a failed commit), it is rolled back.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
}

impl<'conn> Transaction<'conn> {
    pub(super) fn begin(conn: &'conn Connection, behavior: TransactionBehavior) -> DbResult<Self> {
        conn.execute_batch(behavior.begin_sql())?;
        Ok(Self { conn })
    }

    /// Commits. On failure the guard still rolls back when it drops.
    pub fn commit(self) -> DbResult<()> {
        self.conn.execute_batch("COMMIT")
    }

    /// Rolls back now instead of on drop.
    pub fn rollback(self) -> DbResult<()> {
        self.conn.execute_batch("ROLLBACK")
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.conn.in_transaction() {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            log::warn!("transaction rollback failed: {err}");
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("path", &self.conn.path())
            .field("open", &self.conn.in_transaction())
            .finish()
    }
}
