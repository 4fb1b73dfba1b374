//! Configuration pipeline behavior observed through the `Database` gate.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use sealkit_db::{params, Config, Database, DbError, OpenOptions, Priority};

use common::Journal;

#[test]
fn test_pipeline_runs_by_priority_then_registration() {
    let journal = Journal::default();
    let db = Database::in_memory();
    db.set_config_with_priority("A", common::recorder(&journal, "A"), Priority::Low);
    db.set_config_with_priority("B", common::recorder(&journal, "B"), Priority::High);
    db.set_config("C", common::recorder(&journal, "C"));

    assert!(db.can_open());
    assert_eq!(common::take(&journal), ["B", "C", "A"]);
    assert_eq!(db.config_names(), ["B", "C", "A"]);
}

#[test]
fn test_reregistering_relocates_entry() {
    let journal = Journal::default();
    let db = Database::in_memory();
    db.set_config_with_priority("A", common::recorder(&journal, "A"), Priority::Low);
    db.set_config_with_priority("B", common::recorder(&journal, "B"), Priority::High);
    db.set_config("C", common::recorder(&journal, "C"));
    db.set_config_with_priority("A", common::recorder(&journal, "A"), Priority::High);

    assert!(db.can_open());
    assert_eq!(common::take(&journal), ["A", "B", "C"]);
    assert_eq!(db.config_names().len(), 3);
}

#[test]
fn test_failing_config_blocks_open() {
    let journal = Journal::default();
    let db = Database::in_memory();
    db.set_config("first", common::recorder(&journal, "first"));
    db.set_config("broken", |_| Err(DbError::aborted("refused")));
    db.set_config("sentinel", common::recorder(&journal, "sentinel"));

    assert!(!db.can_open());
    assert!(!db.is_opened());
    assert_eq!(common::take(&journal), ["first"]);
    assert!(matches!(
        db.last_open_error(),
        Some(DbError::ConfigurationFailed { name, .. }) if name == "broken"
    ));
    assert!(matches!(
        db.execute_batch("SELECT 1"),
        Err(DbError::ConfigurationFailed { .. })
    ));

    // The next attempt reruns everything from the start.
    assert!(db.remove_config("broken"));
    assert!(db.can_open());
    assert_eq!(common::take(&journal), ["first", "first", "sentinel"]);
    assert_eq!(db.last_open_error(), None);
}

#[test]
fn test_config_changes_reopen_and_rerun_pipeline() {
    let journal = Journal::default();
    let db = Database::in_memory();
    db.set_config("schema", |conn| {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)")
    });
    db.set_config("audit", common::recorder(&journal, "audit"));

    db.execute("INSERT INTO t (id) VALUES (?1)", params![1_i64])
        .expect("insert");
    assert!(db.is_opened());
    assert!(db.can_open());
    assert_eq!(common::take(&journal), ["audit"]);

    db.set_config("extra", common::recorder(&journal, "extra"));
    assert!(!db.is_opened());
    // In-memory contents do not survive the reopen; the schema config
    // recreates the table.
    assert!(db.table_exists("t").expect("table exists"));
    assert_eq!(common::take(&journal), ["audit", "extra"]);
}

#[test]
fn test_teardowns_run_in_reverse_on_close() {
    let journal = Journal::default();
    let db = Database::in_memory();
    for (name, priority) in [("one", Priority::High), ("two", Priority::Default)] {
        let teardown = common::recorder(&journal, &format!("down-{name}"));
        db.add_config(
            Config::new(name, common::recorder(&journal, name))
                .with_priority(priority)
                .with_teardown(teardown),
        );
    }

    db.ensure_open().expect("open");
    db.close();
    db.close();
    assert_eq!(
        common::take(&journal),
        ["one", "two", "down-two", "down-one"]
    );
}

#[test]
fn test_concurrent_open_runs_pipeline_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let db = Arc::new(Database::in_memory());
    {
        let runs = Arc::clone(&runs);
        db.set_config("slow", move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(())
        });
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.ensure_open())
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("ensure_open");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_basic_options_registered_first() {
    let (_dir, path) = common::temp_db();
    let journal = Journal::default();
    let db = Database::with_options(
        &path,
        OpenOptions {
            journal_wal: true,
            foreign_keys: true,
            busy_timeout_ms: Some(500),
            ..OpenOptions::default()
        },
    );
    db.set_config_with_priority("app", common::recorder(&journal, "app"), Priority::High);
    assert_eq!(db.config_names(), ["basic", "app"]);

    let mode = db
        .query_row("PRAGMA journal_mode", &[], |stmt| Ok(stmt.value::<String>(0)))
        .expect("journal mode");
    assert_eq!(mode, "wal");
    let fk = db
        .query_row("PRAGMA foreign_keys", &[], |stmt| Ok(stmt.value::<i64>(0)))
        .expect("foreign keys");
    assert_eq!(fk, 1);
}

#[test]
fn test_run_transaction_commits_or_rolls_back() {
    let db = Database::in_memory();
    db.set_config("schema", |conn| {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)")
    });

    db.run_transaction(|tx| tx.execute("INSERT INTO t (id) VALUES (1)", &[]))
        .expect("commit");
    let err = db
        .run_transaction(|tx| {
            tx.execute("INSERT INTO t (id) VALUES (2)", &[])?;
            Err::<(), _>(DbError::aborted("rollback please"))
        })
        .expect_err("aborted");
    assert_eq!(err, DbError::aborted("rollback please"));

    let ids = db
        .query_map("SELECT id FROM t ORDER BY id", &[], |stmt| {
            Ok(stmt.value::<i64>(0))
        })
        .expect("query");
    assert_eq!(ids, [1]);
}

#[test]
fn test_handle_gives_statement_access() {
    let db = Database::in_memory();
    let handle = db.handle().expect("handle");
    let mut stmt = handle.prepare("SELECT 40 + 2 AS answer").expect("prepare");
    stmt.step().expect("step");
    assert_eq!(stmt.value_by_name::<i32>("answer"), Some(42));
}

#[test]
fn test_close_with_keeps_gate_closed_until_callback_returns() {
    let (_dir, path) = common::temp_db();
    let runs = Arc::new(AtomicUsize::new(0));
    let db = Database::new(&path);
    {
        let runs = Arc::clone(&runs);
        db.set_config("count", move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    db.execute_batch("CREATE TABLE t (x)").expect("create");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let ready = Barrier::new(2);
    thread::scope(|scope| {
        let opener = scope.spawn(|| {
            ready.wait();
            db.ensure_open()
        });
        db.close_with(|| {
            ready.wait();
            thread::sleep(Duration::from_millis(50));
            assert_eq!(runs.load(Ordering::SeqCst), 1, "reopened too early");
            std::fs::remove_file(&path)
        })
        .expect("remove database file");
        opener.join().expect("join").expect("reopen");
    });

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!db.table_exists("t").expect("fresh file"));
}

#[test]
fn test_trace_sql_sees_pipeline_and_caller_statements() {
    let traced = Journal::default();
    let db = Database::in_memory();
    db.set_config("schema", |conn| conn.execute_batch("CREATE TABLE t (x)"));
    {
        let sink = Arc::clone(&traced);
        db.trace_sql(Some(Arc::new(move |sql: &str| {
            sink.lock().expect("trace lock").push(sql.to_string());
        })));
    }
    db.execute("INSERT INTO t VALUES (?1)", params![1_i64])
        .expect("insert");
    db.trace_sql(None);
    db.execute("DELETE FROM t", &[]).expect("delete");

    let traced = common::take(&traced);
    assert!(traced.iter().any(|sql| sql == "CREATE TABLE t (x)"));
    assert_eq!(
        traced.last().map(String::as_str),
        Some("INSERT INTO t VALUES (?1)")
    );
    assert!(!traced.iter().any(|sql| sql.starts_with("DELETE")));
}

#[test]
fn test_trace_error_receives_open_and_statement_failures() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let db = Database::in_memory();
    {
        let sink = Arc::clone(&errors);
        db.trace_error(Some(Arc::new(move |err: &DbError| {
            sink.lock().expect("trace lock").push(err.clone());
        })));
    }
    db.set_config("broken", |_| Err(DbError::aborted("refused")));
    assert!(!db.can_open());
    assert!(db.remove_config("broken"));
    assert!(db.execute("INSERT INTO missing VALUES (1)", &[]).is_err());
    db.execute_batch("SELECT 1").expect("healthy statement");

    let errors = std::mem::take(&mut *errors.lock().expect("trace lock"));
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(matches!(
        &errors[0],
        DbError::ConfigurationFailed { name, .. } if name == "broken"
    ));
    assert!(matches!(errors[1], DbError::PrepareFailed { .. }));
}
