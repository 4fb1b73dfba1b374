//! Encrypted open protocol: empty keys, wrong keys, rekeying.

mod common;

use sealkit_db::{params, CipherOptions, Database, DbError, DbErrorCode, OpenOptions};

const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
const WRONG_KEY: &[u8] = b"not-the-right-key";

#[test]
fn test_empty_key_rejected_before_native_open() {
    let (_dir, path) = common::temp_db();
    let db = Database::new(&path);
    db.set_cipher(Some(Vec::new()));

    assert_eq!(db.ensure_open(), Err(DbError::InvalidCipherKey));
    assert!(!db.can_open());
    assert!(!db.is_opened());
    assert_eq!(db.last_open_error(), Some(DbError::InvalidCipherKey));
    assert!(!path.exists(), "no file may be created for an empty key");
}

#[test]
fn test_wrong_key_fails_lazily_then_correct_key_opens() {
    let (_dir, path) = common::temp_db();
    common::seed_encrypted(&path, KEY);

    let db = Database::new(&path);
    db.set_cipher(Some(WRONG_KEY.to_vec()));
    // Keying does not read a page, so the gate opens...
    assert!(db.can_open());
    // ...and the first real statement fails.
    let err = db
        .query_row("SELECT val FROM t", &[], |stmt| Ok(stmt.value::<String>(0)))
        .expect_err("wrong key");
    assert!(matches!(
        err,
        DbError::PrepareFailed { .. } | DbError::StepFailed { .. }
    ));
    db.close();

    db.set_cipher(Some(KEY.to_vec()));
    let val = db
        .query_row("SELECT val FROM t", &[], |stmt| Ok(stmt.value::<String>(0)))
        .expect("correct key");
    assert_eq!(val, "sealed");
}

#[test]
fn test_wrong_key_fails_pipeline_that_reads() {
    let (_dir, path) = common::temp_db();
    common::seed_encrypted(&path, KEY);

    let db = Database::new(&path);
    db.set_config("schema_check", |conn| conn.table_exists("t").map(|_| ()));
    db.set_cipher(Some(WRONG_KEY.to_vec()));
    assert!(!db.can_open());
    assert!(matches!(
        db.last_open_error(),
        Some(DbError::ConfigurationFailed { name, .. }) if name == "schema_check"
    ));

    db.set_cipher(Some(KEY.to_vec()));
    assert!(db.can_open());
    assert!(db.table_exists("t").expect("table exists"));
}

#[test]
fn test_unencrypted_reader_cannot_see_encrypted_data() {
    let (_dir, path) = common::temp_db();
    common::seed_encrypted(&path, KEY);

    let db = Database::new(&path);
    assert!(db.table_exists("t").is_err());
}

#[test]
fn test_rekey_switches_key() {
    let (_dir, path) = common::temp_db();
    common::seed_encrypted(&path, KEY);
    let new_key = b"a-brand-new-key".to_vec();

    let db = Database::new(&path);
    db.set_cipher(Some(KEY.to_vec()));
    assert_eq!(db.rekey(Vec::new()), Err(DbError::InvalidCipherKey));
    db.rekey(new_key.clone()).expect("rekey");
    db.execute("INSERT INTO t (val) VALUES (?1)", params!["after"])
        .expect("write after rekey");
    assert!(db.integrity_check().expect("integrity"));
    db.close();

    let old = Database::new(&path);
    old.set_cipher(Some(KEY.to_vec()));
    assert!(old.table_exists("t").is_err());

    let reopened = Database::new(&path);
    reopened.set_cipher(Some(new_key));
    let count = reopened
        .query_row("SELECT COUNT(*) FROM t", &[], |stmt| Ok(stmt.value::<i64>(0)))
        .expect("count");
    assert_eq!(count, 2);
}

#[test]
fn test_sqlcipher_format_needs_matching_options() {
    let (_dir, path) = common::temp_db();
    let format = CipherOptions::sqlcipher(4).with_page_size(1024);

    let db = Database::new(&path);
    db.set_cipher_with(KEY.to_vec(), format);
    db.execute_batch("CREATE TABLE t (val TEXT); INSERT INTO t VALUES ('legacy');")
        .expect("seed sqlcipher database");
    db.close();

    let default_format = Database::new(&path);
    default_format.set_cipher(Some(KEY.to_vec()));
    assert!(default_format.table_exists("t").is_err());

    let from_options = Database::with_options(
        &path,
        OpenOptions {
            cipher: format,
            ..OpenOptions::default()
        },
    );
    from_options.set_cipher(Some(KEY.to_vec()));
    let val = from_options
        .query_row("SELECT val FROM t", &[], |stmt| Ok(stmt.value::<String>(0)))
        .expect("same key and format");
    assert_eq!(val, "legacy");
}

#[test]
fn test_invalid_cipher_options_rejected_before_native_open() {
    let (_dir, path) = common::temp_db();
    let db = Database::new(&path);
    db.set_cipher_with(KEY.to_vec(), CipherOptions::sqlcipher(9));

    let err = db.ensure_open().expect_err("version out of range");
    assert!(matches!(err, DbError::CipherFailed { .. }));
    assert_eq!(err.code(), Some(DbErrorCode::MISUSE));
    assert!(!path.exists(), "no file may be created for invalid options");

    db.set_cipher_with(KEY.to_vec(), CipherOptions::default().with_page_size(4096));
    assert!(!db.can_open(), "a page size needs a legacy version");
}
