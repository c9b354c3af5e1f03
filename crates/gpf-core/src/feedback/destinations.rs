use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use gpf_core_common::{GeoprocessingEngine, MessageSeverity};
use log::Level;

use super::{DestinationError, LogDestination};

/// Forwards messages to the `log` crate under the `gpf::feedback` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl LogDestination for LogFacade {
    fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError> {
        log::log!(target: "gpf::feedback", level, "{message}");
        Ok(())
    }
}

/// Writes `LEVEL: message` lines to a stream (stderr by default).
pub struct ConsoleDestination {
    writer: Box<dyn Write + Send>,
}

impl ConsoleDestination {
    /// Writes to standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    /// Writes to any stream.
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }
}

impl LogDestination for ConsoleDestination {
    fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError> {
        writeln!(self.writer, "{level}: {message}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DestinationError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for ConsoleDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleDestination").finish_non_exhaustive()
    }
}

const LOG_EXTENSION: &str = "log";
const ALT_EXTENSION: &str = "txt";

/// Computes where a log file named `name` is written.
///
/// - The extension becomes `.log` unless it already is `.log` or `.txt`.
/// - With `time_tag`, `_YYYYmmdd_HHMMSS` is appended to the file stem.
/// - A bare file name is placed in the system temp directory. Paths starting
///   with `./` or `../` are relative to the working directory and absolute
///   paths are used as they are.
#[must_use]
pub fn resolve_log_path(name: &Path, time_tag: Option<NaiveDateTime>) -> PathBuf {
    let extension = match name.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(LOG_EXTENSION) || ext.eq_ignore_ascii_case(ALT_EXTENSION) => {
            ext.to_string()
        },
        _ => LOG_EXTENSION.to_string(),
    };
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match time_tag {
        Some(tag) => format!("{stem}{}.{extension}", tag.format("_%Y%m%d_%H%M%S")),
        None => format!("{stem}.{extension}"),
    };
    let path = name.with_file_name(file_name);

    let explicit_relative = matches!(
        path.components().next(),
        Some(Component::CurDir | Component::ParentDir)
    );
    if path.is_absolute() || explicit_relative {
        path
    } else {
        std::env::temp_dir().join(path)
    }
}

/// Appends `timestamp LEVEL message` lines to a log file.
#[derive(Debug)]
pub struct FileDestination {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileDestination {
    /// Opens (or creates) the log file for `name`, see [`resolve_log_path`].
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns a [`DestinationError`] when the directory or file cannot be
    /// created.
    pub fn create(name: impl AsRef<Path>, time_tag: bool) -> Result<Self, DestinationError> {
        let tag = time_tag.then(|| Local::now().naive_local());
        let path = resolve_log_path(name.as_ref(), tag);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// The file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogDestination for FileDestination {
    fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(self.writer, "{now} {level:<5} {message}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DestinationError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards messages to the engine's message channel.
///
/// Info becomes a message, Warn a warning and Error an error. Debug and Trace
/// messages are not forwarded.
pub struct GeoprocessorDestination {
    engine: Arc<dyn GeoprocessingEngine>,
}

impl GeoprocessorDestination {
    /// Creates a destination for `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn GeoprocessingEngine>) -> Self {
        Self { engine }
    }
}

impl LogDestination for GeoprocessorDestination {
    fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError> {
        let severity = match level {
            Level::Error => MessageSeverity::Error,
            Level::Warn => MessageSeverity::Warning,
            Level::Info => MessageSeverity::Message,
            Level::Debug | Level::Trace => return Ok(()),
        };
        self.engine.add_message(severity, message)?;
        Ok(())
    }
}

impl std::fmt::Debug for GeoprocessorDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoprocessorDestination").finish_non_exhaustive()
    }
}
