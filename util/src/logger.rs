//! Logger utility functions
//!
//! Log lines go to two sinks: stdout, with coloured level tags, and the session's log file, with
//! plain tags so the file stays readable in any editor. Every line is stamped with the time since
//! the session epoch.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{info, Level, Record};
use colored::{ColoredString, Colorize};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of `INFO` or more verbose, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// Debug and trace lines also carry their target and the name of the emitting thread, since the
/// execs run their network and output loops on separate threads.
///
/// # Notes
///
/// - `min_level` must be `log::Level::Info` or more verbose.
/// - Only the first call in a process can succeed, later calls return
///   [`LoggerInitError::FernInitError`].
pub fn logger_init(
    min_level: LevelFilter, 
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(&session.log_file_path)
        .map_err(LoggerInitError::LogFileInitError)?;

    let stdout_sink = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                format_line(record, coloured_level(record.level()), message)
            ))
        })
        .chain(std::io::stdout());

    let file_sink = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                format_line(record, plain_level(record.level()), message)
            ))
        })
        .chain(log_file);

    fern::Dispatch::new()
        .level(min_level)
        .chain(stdout_sink)
        .chain(file_sink)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;
    
    info!("Logging initialised");
    if let Ok(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Build a single log line.
fn format_line<L>(record: &Record, level: L, message: &std::fmt::Arguments) -> String
where
    L: std::fmt::Display
{
    let elapsed = session::get_elapsed_seconds();

    if record.level() > Level::Info {
        let thread = std::thread::current();
        format!(
            "[{:10.6} {}] {} ({}): {}",
            elapsed,
            level,
            record.target(),
            thread.name().unwrap_or("?"),
            message
        )
    }
    else {
        format!("[{:10.6} {}] {}", elapsed, level, message)
    }
}

fn coloured_level(level: Level) -> ColoredString {
    match level {
        Level::Trace => "TRC".dimmed().italic(),
        Level::Debug => "DBG".dimmed(),
        Level::Info  => "INF".normal(),
        Level::Warn  => "WRN".yellow(),
        Level::Error => "ERR".red().bold()
    }
}

fn plain_level(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRC",
        Level::Debug => "DBG",
        Level::Info  => "INF",
        Level::Warn  => "WRN",
        Level::Error => "ERR"
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_line() {
        let info = format_line(
            &Record::builder().level(Level::Info).target("helm").build(),
            plain_level(Level::Info),
            &format_args!("hello {}", 1)
        );
        assert!(info.ends_with(" INF] hello 1"), "{}", info);
        assert!(!info.contains("helm"));

        let debug = format_line(
            &Record::builder().level(Level::Debug).target("helm").build(),
            plain_level(Level::Debug),
            &format_args!("detail")
        );
        assert!(debug.contains(" DBG] helm ("), "{}", debug);
        assert!(debug.ends_with("): detail"), "{}", debug);
    }

    #[test]
    fn test_rejects_quiet_levels() {
        let dir = std::env::temp_dir();
        let session = session::Session {
            exec_name: "logger_test".into(),
            log_file_path: dir.join("logger_test.log"),
            session_root: dir,
        };

        assert!(matches!(
            logger_init(LevelFilter::Warn, &session),
            Err(LoggerInitError::InvalidMinLogLevel(LevelFilter::Warn))
        ));
    }
}
