//! Bridge from the `log` facade to a host-provided logger.
//!
//! The library itself only emits `log` records. Applications that already
//! run a `log`/`tracing` subscriber need nothing from this module; hosts
//! that want the records delivered to their own sink implement [`Logger`]
//! and call [`set_logger`] once at start-up.

use std::sync::{Arc, OnceLock};

/// Receives log messages emitted by the library.
///
/// # Examples
///
/// ```rust
/// use sealkit_db::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Very low priority, often extremely detailed messages (SQL text).
    Trace,
    /// Lower priority debugging information (open, close, config steps).
    Debug,
    /// Informational messages.
    Info,
    /// Potentially harmful situations (open failures, failed teardowns).
    Warn,
    /// Errors that might still allow the application to continue running.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

/// Forwards `log` records to the installed [`Logger`].
struct ForeignLogger;

impl ForeignLogger {
    /// Debug and trace records are only forwarded from this crate.
    fn accepts(module_path: Option<&str>, level: log::Level) -> bool {
        level <= log::Level::Info
            || module_path.is_some_and(|path| path.starts_with("sealkit"))
    }
}

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !Self::accepts(record.module_path(), record.level()) {
            return;
        }
        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(record.level().into(), record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs `logger` as the destination of every library log record.
///
/// Only the first call has an effect. If another `log` implementation is
/// already installed process-wide, records keep flowing there and this call
/// only reports the conflict on stderr.
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("sealkit logger already set");
        return;
    }
    if let Err(e) = init_logger() {
        eprintln!("Failed to set logger: {e}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_debug_records_are_dropped() {
        assert!(ForeignLogger::accepts(Some("sealkit_db::config"), log::Level::Trace));
        assert!(!ForeignLogger::accepts(Some("hyper::client"), log::Level::Debug));
        assert!(ForeignLogger::accepts(Some("hyper::client"), log::Level::Warn));
        assert!(!ForeignLogger::accepts(None, log::Level::Trace));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::from(log::Level::Warn), LogLevel::Warn);
        assert!(LogLevel::Trace < LogLevel::Error);
    }
}
