//! Common test utilities shared across integration tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sealkit_db::{Connection, DbResult};
use tempfile::TempDir;

/// Ordered record of which configurations ran.
#[allow(dead_code, reason = "used in tests")]
pub type Journal = Arc<Mutex<Vec<String>>>;

/// A fresh directory plus the database path inside it. Keep the `TempDir`
/// alive for as long as the database is used.
#[allow(dead_code, reason = "used in tests")]
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("test.sqlite");
    (dir, path)
}

/// A configuration invocation that appends `name` to `journal`.
#[allow(dead_code, reason = "used in tests")]
pub fn recorder(
    journal: &Journal,
    name: &str,
) -> impl Fn(&Connection) -> DbResult<()> + Send + Sync + 'static {
    let journal = Arc::clone(journal);
    let name = name.to_string();
    move |_| {
        journal.lock().expect("journal lock").push(name.clone());
        Ok(())
    }
}

/// Drains and returns the journal contents.
#[allow(dead_code, reason = "used in tests")]
pub fn take(journal: &Journal) -> Vec<String> {
    std::mem::take(&mut *journal.lock().expect("journal lock"))
}

/// Creates table `t` with a single row through a keyed connection.
#[allow(dead_code, reason = "used in tests")]
pub fn seed_encrypted(path: &std::path::Path, key: &[u8]) {
    let db = sealkit_db::Database::new(path);
    db.set_cipher(Some(key.to_vec()));
    db.execute_batch(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);
         INSERT INTO t (val) VALUES ('sealed');",
    )
    .expect("seed database");
    db.close();
}
