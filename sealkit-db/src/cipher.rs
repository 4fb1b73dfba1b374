//! `sqlite3mc` encryption helpers.
//!
//! # Encryption flow
//!
//! Databases are encrypted at rest by `sqlite3mc` (`SQLite3` Multiple
//! Ciphers). Encryption is transparent to SQL: once a connection is keyed,
//! every page read from disk is decrypted and every page written is
//! encrypted by the pager.
//!
//! 1. **Open**: `sqlite3_open_v2` creates or opens the file. Nothing has been
//!    read yet.
//! 2. **Key**: [`apply_key`] hands the raw key bytes to `sqlite3_key_v2`
//!    before any other statement runs. `sqlite3mc` derives the page key with
//!    the configured KDF.
//! 3. **First use**: the key is not verified here. A wrong key surfaces on
//!    the first statement that reads a page, usually as a prepare failure
//!    with `SQLITE_NOTADB` ("file is not a database").
//!
//! The default cipher is **ChaCha20-Poly1305** (set in `build.rs`). All
//! crypto is built into the amalgamation. [`CipherOptions`] switches a
//! connection to the SQLCipher format instead; `sqlite3mc` reads those
//! parameters when the key is applied, so [`configure`] runs right before
//! [`apply_key`].

use serde::{Deserialize, Serialize};

use super::connection::Connection;
use super::error::{DbError, DbErrorCode, DbResult};

/// Highest SQLCipher major format `sqlite3mc` can read and write.
pub const MAX_SQLCIPHER_VERSION: u8 = 4;

/// Cipher format parameters applied together with the key.
///
/// The default keeps the `sqlite3mc` ChaCha20-Poly1305 format. Setting
/// `version` selects the SQLCipher format of that major version (1 to 4),
/// e.g. to open databases written by other SQLCipher clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherOptions {
    /// Encrypted page size in bytes: a power of two from 512 to 65536.
    /// Only valid together with `version`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// SQLCipher major format version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
}

impl CipherOptions {
    /// SQLCipher format `version` with its default page size.
    #[must_use]
    pub const fn sqlcipher(version: u8) -> Self {
        Self {
            page_size: None,
            version: Some(version),
        }
    }

    /// Sets the encrypted page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Checks the parameters without touching the engine.
    ///
    /// # Errors
    ///
    /// [`DbError::CipherFailed`] with [`DbErrorCode::MISUSE`] naming the
    /// offending parameter.
    pub fn validate(&self) -> DbResult<()> {
        if let Some(version) = self.version {
            if !(1..=MAX_SQLCIPHER_VERSION).contains(&version) {
                return Err(invalid(format!(
                    "SQLCipher version {version} is not in 1..={MAX_SQLCIPHER_VERSION}"
                )));
            }
        }
        if let Some(page_size) = self.page_size {
            if self.version.is_none() {
                return Err(invalid("a cipher page size needs a SQLCipher version".to_string()));
            }
            if !page_size.is_power_of_two() || !(512..=65_536).contains(&page_size) {
                return Err(invalid(format!(
                    "cipher page size {page_size} is not a power of two in 512..=65536"
                )));
            }
        }
        Ok(())
    }

    /// The `sqlite3mc` PRAGMAs for these options, empty for the default.
    pub fn pragma_script(&self) -> String {
        let Some(version) = self.version else {
            return String::new();
        };
        let mut script = format!("PRAGMA cipher = 'sqlcipher';\nPRAGMA legacy = {version};\n");
        if let Some(page_size) = self.page_size {
            script.push_str(&format!("PRAGMA legacy_page_size = {page_size};\n"));
        }
        script
    }
}

fn invalid(message: String) -> DbError {
    DbError::CipherFailed {
        code: DbErrorCode::MISUSE,
        message,
    }
}

/// Selects the cipher format on a freshly opened, not yet keyed connection.
///
/// # Errors
///
/// [`DbError::CipherFailed`] for invalid options or when the engine rejects
/// them.
pub fn configure(conn: &Connection, options: &CipherOptions) -> DbResult<()> {
    options.validate()?;
    let script = options.pragma_script();
    if script.is_empty() {
        return Ok(());
    }
    conn.execute_batch(&script).map_err(|err| match err {
        DbError::PrepareFailed { code, message } | DbError::StepFailed { code, message } => {
            DbError::CipherFailed { code, message }
        }
        other => other,
    })
}

/// Applies the encryption key to a freshly opened connection.
///
/// # Errors
///
/// [`DbError::InvalidCipherKey`] for an empty key, [`DbError::CipherFailed`]
/// when the engine rejects the request.
pub fn apply_key(conn: &Connection, key: &[u8]) -> DbResult<()> {
    if key.is_empty() {
        return Err(DbError::InvalidCipherKey);
    }
    conn.raw().key(key).map_err(DbError::cipher)
}

/// Re-encrypts the database under `new_key`.
///
/// The connection must already be keyed with the current key. An empty new
/// key is rejected: decrypting a database in place is not supported.
pub fn rekey(conn: &Connection, new_key: &[u8]) -> DbResult<()> {
    if new_key.is_empty() {
        return Err(DbError::InvalidCipherKey);
    }
    conn.raw().rekey(new_key).map_err(DbError::cipher)?;
    log::debug!("re-encrypted database at {}", conn.path());
    Ok(())
}

/// Runs `PRAGMA integrity_check` and returns whether the database is healthy.
pub fn integrity_check(conn: &Connection) -> DbResult<bool> {
    let result = conn.query_row("PRAGMA integrity_check;", &[], |stmt| {
        Ok(stmt.value::<String>(0))
    })?;
    Ok(result.trim() == "ok")
}
