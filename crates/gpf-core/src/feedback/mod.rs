//! Progress and logging sink shared by cursor and edit sessions.
//!
//! A [`Reporter`] buffers [`FeedbackEvent`]s and free-form messages and
//! writes them to its [`LogDestination`]s. Reporting never fails: when a
//! destination errors, the error is counted in
//! [`Reporter::failure_count`] and the next destination still receives the
//! message.
//!
//! The process-wide reporter is created lazily by [`global`] with a single
//! [`LogFacade`] destination. Call [`install`] before first use to configure
//! it and [`shutdown`] at process end to write out buffered messages.

mod destinations;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use gpf_core_common::{CursorKind, EngineError};
use log::Level;
use parking_lot::Mutex;
use thiserror::Error;

pub use destinations::{
    ConsoleDestination, FileDestination, GeoprocessorDestination, LogFacade, resolve_log_path,
};

use crate::config::FeedbackConfig;
use crate::error::ConfigError;

/// Something worth reporting about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEvent {
    /// A cursor session was opened.
    SessionOpened {
        /// The table
        table: String,
        /// The cursor kind
        kind: CursorKind,
    },
    /// A cursor session was closed.
    SessionClosed {
        /// The table
        table: String,
        /// Rows read or written by the session
        rows: u64,
    },
    /// Progress of a long iteration.
    RowProcessed {
        /// The table
        table: String,
        /// Rows processed so far
        count: u64,
    },
    /// An edit was committed.
    EditCommitted {
        /// The workspace
        workspace: String,
    },
    /// An edit was rolled back.
    EditRolledBack {
        /// The workspace
        workspace: String,
    },
    /// A failure, reported before it is returned to the caller.
    Error {
        /// What failed
        detail: String,
    },
}

impl FeedbackEvent {
    /// Severity the event is reported with.
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::SessionOpened { .. } | Self::SessionClosed { .. } => Level::Debug,
            Self::RowProcessed { .. } | Self::EditCommitted { .. } => Level::Info,
            Self::EditRolledBack { .. } => Level::Warn,
            Self::Error { .. } => Level::Error,
        }
    }
}

impl fmt::Display for FeedbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionOpened { table, kind } => write!(f, "Opened {kind} cursor on {table}"),
            Self::SessionClosed { table, rows } => {
                write!(f, "Closed cursor on {table} after {rows} rows")
            },
            Self::RowProcessed { table, count } => write!(f, "Processed {count} rows of {table}"),
            Self::EditCommitted { workspace } => write!(f, "Committed edits on {workspace}"),
            Self::EditRolledBack { workspace } => write!(f, "Rolled back edits on {workspace}"),
            Self::Error { detail } => f.write_str(detail),
        }
    }
}

/// Failure of a single destination write.
#[derive(Debug, Error)]
pub enum DestinationError {
    /// Writing to a stream or file failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The engine's message channel rejected the message
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Somewhere messages end up.
pub trait LogDestination: Send {
    /// Writes one message.
    ///
    /// # Errors
    ///
    /// Returns a [`DestinationError`] when the message could not be written.
    fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError>;

    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// Returns a [`DestinationError`] when flushing fails.
    fn flush(&mut self) -> Result<(), DestinationError> {
        Ok(())
    }
}

/// Buffered, never-failing reporting channel.
pub struct Reporter {
    config: FeedbackConfig,
    destinations: Mutex<Vec<Box<dyn LogDestination>>>,
    buffer: Mutex<Vec<(Level, String)>>,
    failures: AtomicU64,
    shut_down: AtomicBool,
}

impl Reporter {
    /// Creates a reporter without destinations.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `config` is invalid.
    pub fn new(config: FeedbackConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            destinations: Mutex::new(Vec::new()),
            buffer: Mutex::new(Vec::new()),
            failures: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// A reporter with default options that forwards to the `log` crate.
    #[must_use]
    pub fn with_log_facade() -> Self {
        let reporter = Self {
            config: FeedbackConfig::default(),
            destinations: Mutex::new(Vec::new()),
            buffer: Mutex::new(Vec::new()),
            failures: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        };
        reporter.add_destination(LogFacade);
        reporter
    }

    /// Adds a destination and returns the reporter.
    #[must_use]
    pub fn with_destination(self, destination: impl LogDestination + 'static) -> Self {
        self.add_destination(destination);
        self
    }

    /// Adds a destination.
    pub fn add_destination(&self, destination: impl LogDestination + 'static) {
        self.destinations.lock().push(Box::new(destination));
    }

    /// The reporter's options.
    #[must_use]
    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Reports an event.
    pub fn report(&self, event: &FeedbackEvent) {
        self.log(event.level(), event.to_string());
    }

    /// Reports a free-form message.
    pub fn log(&self, level: Level, message: impl Into<String>) {
        if level > self.config.min_level {
            return;
        }
        let message = message.into();

        // `shut_down` only flips under the buffer lock, so nothing is pushed
        // after the final flush.
        let pending = {
            let mut buffer = self.buffer.lock();
            buffer.push((level, message));
            if self.shut_down.load(Ordering::SeqCst)
                || buffer.len() >= self.config.buffer_capacity
            {
                std::mem::take(&mut *buffer)
            } else {
                Vec::new()
            }
        };
        if !pending.is_empty() {
            self.write_out(pending);
        }
    }

    /// Reports an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    /// Reports a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    /// Reports an error.
    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    /// Writes out every buffered message and flushes the destinations.
    pub fn flush(&self) {
        let pending = std::mem::take(&mut *self.buffer.lock());
        self.write_out(pending);
        let mut destinations = self.destinations.lock();
        for destination in destinations.iter_mut() {
            if destination.flush().is_err() {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Flushes and switches to unbuffered writes for the rest of the process.
    pub fn shutdown(&self) {
        {
            let _buffer = self.buffer.lock();
            self.shut_down.store(true, Ordering::SeqCst);
        }
        self.flush();
    }

    /// Number of destination writes or flushes that failed.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Number of messages waiting in the buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    fn write_out(&self, messages: Vec<(Level, String)>) {
        if messages.is_empty() {
            return;
        }
        let mut destinations = self.destinations.lock();
        for (level, message) in &messages {
            for destination in destinations.iter_mut() {
                if destination.write(*level, message).is_err() {
                    self.failures.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.flush();
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("config", &self.config)
            .field("destinations", &self.destinations.lock().len())
            .field("pending", &self.pending())
            .field("failures", &self.failure_count())
            .finish()
    }
}

static GLOBAL: OnceLock<Arc<Reporter>> = OnceLock::new();

/// The process-wide reporter, created on first use.
pub fn global() -> Arc<Reporter> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(Reporter::with_log_facade())))
}

/// Installs `reporter` as the process-wide reporter.
///
/// # Errors
///
/// Returns [`ConfigError::AlreadyInstalled`] if [`global`] or `install` ran
/// before.
pub fn install(reporter: Reporter) -> Result<Arc<Reporter>, ConfigError> {
    let reporter = Arc::new(reporter);
    GLOBAL
        .set(Arc::clone(&reporter))
        .map_err(|_| ConfigError::AlreadyInstalled)?;
    Ok(reporter)
}

/// Flushes the process-wide reporter, if it was ever created.
pub fn shutdown() {
    if let Some(reporter) = GLOBAL.get() {
        reporter.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{DestinationError, Level, LogDestination};
    use std::sync::Arc;
    use parking_lot::Mutex;

    /// Destination that records messages for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder {
        pub(crate) messages: Arc<Mutex<Vec<(Level, String)>>>,
    }

    impl Recorder {
        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.messages.lock().iter().any(|(_, m)| m.contains(needle))
        }
    }

    impl LogDestination for Recorder {
        fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError> {
            self.messages.lock().push((level, message.to_string()));
            Ok(())
        }
    }

    /// Destination that always fails.
    pub(crate) struct Broken;

    impl LogDestination for Broken {
        fn write(&mut self, _level: Level, _message: &str) -> Result<(), DestinationError> {
            Err(std::io::Error::other("disk full").into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Broken, Recorder};
    use super::*;

    fn reporter(capacity: usize) -> (Reporter, Recorder) {
        let recorder = Recorder::default();
        let reporter = Reporter::new(FeedbackConfig {
            buffer_capacity: capacity,
            min_level: Level::Debug,
            ..FeedbackConfig::default()
        })
        .unwrap()
        .with_destination(recorder.clone());
        (reporter, recorder)
    }

    #[test]
    fn test_buffers_until_capacity() {
        let (reporter, recorder) = reporter(3);
        reporter.info("one");
        reporter.info("two");
        assert_eq!(reporter.pending(), 2);
        assert!(recorder.messages.lock().is_empty());
        reporter.info("three");
        assert_eq!(reporter.pending(), 0);
        assert_eq!(recorder.messages.lock().len(), 3);
    }

    #[test]
    fn test_flush_writes_pending_messages() {
        let (reporter, recorder) = reporter(100);
        reporter.report(&FeedbackEvent::EditCommitted {
            workspace: "C:/a.gdb".into(),
        });
        reporter.flush();
        assert!(recorder.contains("Committed edits on C:/a.gdb"));
    }

    #[test]
    fn test_min_level_filters() {
        let recorder = Recorder::default();
        let reporter = Reporter::new(FeedbackConfig {
            buffer_capacity: 1,
            ..FeedbackConfig::default()
        })
        .unwrap()
        .with_destination(recorder.clone());
        reporter.report(&FeedbackEvent::SessionOpened {
            table: "t".into(),
            kind: CursorKind::Search,
        });
        reporter.warn("careful");
        let messages = recorder.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], (Level::Warn, "careful".to_string()));
    }

    #[test]
    fn test_destination_failures_are_counted_not_raised() {
        let (reporter, recorder) = reporter(1);
        reporter.add_destination(Broken);
        reporter.error("first");
        reporter.error("second");
        assert_eq!(reporter.failure_count(), 2);
        assert_eq!(recorder.messages.lock().len(), 2);
    }

    #[test]
    fn test_shutdown_flushes_and_disables_buffering() {
        let (reporter, recorder) = reporter(100);
        reporter.info("buffered");
        reporter.shutdown();
        assert!(recorder.contains("buffered"));
        reporter.info("late");
        assert!(recorder.contains("late"));
        assert_eq!(reporter.pending(), 0);
    }

    /// Messages logged from other threads while shutting down are all
    /// written, none stay behind in the buffer.
    #[test]
    fn test_shutdown_while_logging_loses_nothing() {
        let (reporter, recorder) = reporter(1000);
        let reporter = Arc::new(reporter);
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let reporter = Arc::clone(&reporter);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        reporter.info(format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        reporter.shutdown();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(reporter.pending(), 0);
        assert_eq!(recorder.messages.lock().len(), 800);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = FeedbackConfig {
            progress_interval: 0,
            ..FeedbackConfig::default()
        };
        assert!(Reporter::new(config).is_err());
    }

    #[test]
    fn test_global_is_lazy_and_install_fails_afterwards() {
        let first = global();
        let second = global();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            install(Reporter::with_log_facade()),
            Err(ConfigError::AlreadyInstalled)
        ));
        shutdown();
    }
}
