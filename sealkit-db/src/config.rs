//! Named, priority-ordered setup steps applied to every new connection.
//!
//! A [`Configs`] pipeline runs each [`Config`] against a freshly opened (and
//! keyed) [`Connection`] before the connection is handed to callers. Higher
//! [`Priority`] runs first; equal priorities run in registration order.
//! Registering a name that is already present replaces that entry in place
//! of duplicating it, keeping its original registration slot and moving it
//! according to its new priority.
//!
//! ```ignore
//! let mut configs = Configs::new();
//! configs.register(Config::new("schema", |conn| {
//!     conn.execute_batch("CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v BLOB)")
//! }));
//! configs.apply_all(&conn)?;
//! ```

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use super::connection::Connection;
use super::error::{DbError, DbResult};
use super::options::OpenOptions;

/// A setup (or teardown) step run against a live connection.
pub type Invocation = Arc<dyn Fn(&Connection) -> DbResult<()> + Send + Sync>;

/// Name of the built-in configuration registered by [`basic`].
pub const BASIC_CONFIG_NAME: &str = "basic";

/// Relative order of a configuration within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Runs after everything else.
    Low,
    /// The default slot.
    #[default]
    Default,
    /// Runs before everything else.
    High,
}

/// One named entry of the pipeline.
#[derive(Clone)]
pub struct Config {
    name: String,
    priority: Priority,
    invocation: Invocation,
    teardown: Option<Invocation>,
}

impl Config {
    /// Creates a configuration with [`Priority::Default`].
    pub fn new<F>(name: impl Into<String>, invocation: F) -> Self
    where
        F: Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: Priority::Default,
            invocation: Arc::new(invocation),
            teardown: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a step that runs when a gate that applied this configuration
    /// closes its connection.
    #[must_use]
    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(teardown));
        self
    }

    /// The configuration's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration's priority.
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Runs the setup step against `conn`.
    pub fn invoke(&self, conn: &Connection) -> DbResult<()> {
        (self.invocation)(conn)
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    config: Config,
    sequence: u64,
}

/// The ordered configuration pipeline.
#[derive(Debug, Clone, Default)]
pub struct Configs {
    entries: Vec<Entry>,
    next_sequence: u64,
}

impl Configs {
    /// Creates an empty pipeline.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Inserts `config`, or replaces the entry with the same name
    /// (case-insensitive) and moves it to the slot its priority dictates.
    pub fn register(&mut self, config: Config) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.config.matches(&config.name)) {
            entry.config = config;
        } else {
            self.entries.push(Entry {
                config,
                sequence: self.next_sequence,
            });
            self.next_sequence += 1;
        }
        self.entries.sort_by_key(|e| (Reverse(e.config.priority), e.sequence));
    }

    /// Removes the entry named `name`. Returns `false` if there was none.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.config.matches(name));
        self.entries.len() != before
    }

    /// Returns `true` if an entry named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.config.matches(name))
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &str) -> Option<&Config> {
        self.iter().find(|c| c.matches(name))
    }

    /// Entry names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|c| c.name.clone()).collect()
    }

    /// Entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Config> {
        self.entries.iter().map(|e| &e.config)
    }

    /// Number of registered entries.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entry is registered.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every entry in order. Stops at the first failure; entries that
    /// already ran are not undone.
    ///
    /// # Errors
    ///
    /// [`DbError::ConfigurationFailed`] naming the failing entry.
    pub fn apply_all(&self, conn: &Connection) -> DbResult<()> {
        for config in self.iter() {
            log::debug!("applying config `{}`", config.name);
            config
                .invoke(conn)
                .map_err(|source| DbError::ConfigurationFailed {
                    name: config.name.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    /// Runs the teardown steps in reverse order. Failures are logged and
    /// skipped.
    pub(crate) fn teardown_all(&self, conn: &Connection) {
        for config in self.entries.iter().rev().map(|e| &e.config) {
            let Some(teardown) = &config.teardown else {
                continue;
            };
            if let Err(err) = teardown(conn) {
                log::warn!("teardown of config `{}` failed: {err}", config.name);
            }
        }
    }
}

/// The built-in configuration applying the PRAGMAs requested by `options`,
/// registered at [`Priority::High`] under [`BASIC_CONFIG_NAME`].
pub fn basic(options: &OpenOptions) -> Config {
    let script = options.pragma_script();
    Config::new(BASIC_CONFIG_NAME, move |conn| conn.execute_batch(&script))
        .with_priority(Priority::High)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn recording(name: &str, journal: &Journal) -> Config {
        let journal = Arc::clone(journal);
        let label = name.to_string();
        Config::new(name, move |_| {
            journal.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    fn run(configs: &Configs) -> DbResult<()> {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        configs.apply_all(&conn)
    }

    #[test]
    fn test_priority_then_registration_order() {
        let journal = Journal::default();
        let mut configs = Configs::new();
        configs.register(recording("a", &journal).with_priority(Priority::Low));
        configs.register(recording("b", &journal).with_priority(Priority::High));
        configs.register(recording("c", &journal));
        run(&configs).expect("apply");
        assert_eq!(*journal.lock().unwrap(), ["b", "c", "a"]);
    }

    #[test]
    fn test_reregister_relocates_without_duplicating() {
        let journal = Journal::default();
        let mut configs = Configs::new();
        configs.register(recording("a", &journal).with_priority(Priority::Low));
        configs.register(recording("b", &journal).with_priority(Priority::High));
        configs.register(recording("c", &journal));
        configs.register(recording("A", &journal).with_priority(Priority::High));
        assert_eq!(configs.len(), 3);
        run(&configs).expect("apply");
        assert_eq!(*journal.lock().unwrap(), ["A", "b", "c"]);
    }

    #[test]
    fn test_failure_stops_pipeline() {
        let journal = Journal::default();
        let mut configs = Configs::new();
        configs.register(recording("first", &journal));
        configs.register(Config::new("broken", |_| Err(DbError::aborted("boom"))));
        configs.register(recording("sentinel", &journal));
        let err = run(&configs).expect_err("pipeline must fail");
        assert!(matches!(
            &err,
            DbError::ConfigurationFailed { name, source }
                if name == "broken" && **source == DbError::aborted("boom")
        ));
        assert_eq!(*journal.lock().unwrap(), ["first"]);
    }

    #[test]
    fn test_remove_and_lookup_ignore_case() {
        let journal = Journal::default();
        let mut configs = Configs::new();
        configs.register(recording("Schema", &journal));
        assert!(configs.contains("schema"));
        assert_eq!(configs.get("SCHEMA").map(Config::name), Some("Schema"));
        assert!(configs.remove("SCHEMA"));
        assert!(!configs.remove("schema"));
        assert!(configs.is_empty());
    }

    #[test]
    fn test_engine_error_wrapped_with_name() {
        let mut configs = Configs::new();
        configs.register(Config::new("bad-sql", |conn| conn.execute_batch("NOT SQL")));
        let err = run(&configs).expect_err("pipeline must fail");
        assert!(matches!(
            &err,
            DbError::ConfigurationFailed { name, source }
                if name == "bad-sql" && matches!(**source, DbError::PrepareFailed { .. })
        ));
        assert!(err.code().is_some());
    }

    #[test]
    fn test_teardown_runs_in_reverse() {
        let journal = Journal::default();
        let mut configs = Configs::new();
        for name in ["x", "y", "z"] {
            let journal = Arc::clone(&journal);
            let label = format!("down-{name}");
            configs.register(Config::new(name, |_| Ok(())).with_teardown(move |_| {
                journal.lock().unwrap().push(label.clone());
                Ok(())
            }));
        }
        configs.register(
            Config::new("failing", |_| Ok(()))
                .with_priority(Priority::Low)
                .with_teardown(|_| Err(DbError::aborted("ignored"))),
        );
        let conn = Connection::open_in_memory().expect("open in-memory db");
        configs.teardown_all(&conn);
        assert_eq!(*journal.lock().unwrap(), ["down-z", "down-y", "down-x"]);
    }

    #[test]
    fn test_basic_config_applies_pragmas() {
        let options = OpenOptions {
            foreign_keys: true,
            ..OpenOptions::default()
        };
        let config = basic(&options);
        assert_eq!(config.name(), BASIC_CONFIG_NAME);
        assert_eq!(config.priority(), Priority::High);
        let conn = Connection::open_in_memory().expect("open in-memory db");
        config.invoke(&conn).expect("apply basic");
        let enabled = conn
            .query_row("PRAGMA foreign_keys", &[], |stmt| Ok(stmt.value::<i64>(0)))
            .expect("query pragma");
        assert_eq!(enabled, 1);
    }
}
