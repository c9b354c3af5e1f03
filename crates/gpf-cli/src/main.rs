//! Command-line interface for `gpf`, the cursor and edit-session toolkit for GIS workspaces.
//!
//! This binary exposes the read-only parts of the [`gpf_core`] library against a
//! workspace described by a JSON fixture, which is loaded into the in-memory engine.
//!
//! # Architecture
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for structured logging.
//! Library messages emitted through the `log` crate are bridged into `tracing`, and the
//! process-wide feedback reporter can additionally write to a log file.
//!
//! # Available Commands
//!
//! - `fields` - Display the field schema of a table
//! - `count` - Count the rows of a table, optionally filtered
//! - `missing` - Report which of the given fields a table lacks
//! - `dump` - Print rows of a table

mod display;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use gpf_core::feedback::{self, FileDestination};
use gpf_core::{FeedbackConfig, Geodatabase, GpfError, Reporter, metadata};
use gpf_core_common::mem::MemoryEngine;
use gpf_core_common::{GeoprocessingEngine, TableHandle};

#[derive(Parser)]
#[command(
    name = "gpf",
    version,
    about = "Inspect GIS workspace tables through safe cursor sessions",
    long_about = "gpf reads a workspace fixture and runs schema and row queries through\n\
                  the same cursor sessions scripts use, releasing every lock on exit."
)]
/// Command-line arguments and options for the `gpf` CLI.
///
/// This struct defines the top-level CLI interface, including global flags for
/// logging verbosity and the subcommand to execute.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Also write session feedback to this log file. A bare file name is
    /// placed in the temp directory.
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `gpf` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Displays the fields of a table.
    Fields {
        /// Path to the workspace fixture (JSON).
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        /// Name of the table.
        #[arg(value_name = "TABLE")]
        table: String,
    },

    /// Counts the rows of a table.
    Count {
        /// Path to the workspace fixture (JSON).
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        /// Name of the table.
        #[arg(value_name = "TABLE")]
        table: String,

        /// Where clause restricting the rows counted.
        #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
        filter: Option<String>,
    },

    /// Lists the given fields that a table does not have.
    ///
    /// Exits with a non-zero status when any field is missing.
    Missing {
        /// Path to the workspace fixture (JSON).
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        /// Name of the table.
        #[arg(value_name = "TABLE")]
        table: String,

        /// Field names or tokens (`OID@`, `SHAPE@`, ...) to check.
        #[arg(value_name = "FIELD", required = true)]
        fields: Vec<String>,
    },

    /// Prints the rows of a table.
    Dump {
        /// Path to the workspace fixture (JSON).
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        /// Name of the table.
        #[arg(value_name = "TABLE")]
        table: String,

        /// Comma-separated fields to print.
        #[arg(short, long, value_delimiter = ',', default_value = "*")]
        fields: Vec<String>,

        /// Where clause restricting the rows printed.
        #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
        filter: Option<String>,

        /// Stop after this many rows.
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Entry point for the `gpf` command-line interface.
///
/// Parses arguments, configures logging and the feedback reporter, runs the
/// command and flushes the reporter. Failures from the library are printed
/// with their user message and recovery suggestion.
fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli) {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    let outcome = run(cli.command);
    feedback::shutdown();

    match outcome {
        Ok(code) => code,
        Err(err) => {
            print_error(&err);
            ExitCode::FAILURE
        },
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    // Setup logging based on verbosity flags
    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true) // Show module paths for better context
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = FeedbackConfig {
        min_level: if cli.debug {
            log::Level::Debug
        } else {
            log::Level::Info
        },
        ..FeedbackConfig::default()
    };
    let mut reporter = Reporter::new(config)?.with_destination(feedback::LogFacade);
    if let Some(path) = &cli.log_file {
        let file = FileDestination::create(path, false)
            .with_context(|| format!("Cannot open log file '{}'", path.display()))?;
        info!("Writing feedback to {}", file.path().display());
        reporter = reporter.with_destination(file);
    }
    feedback::install(reporter)?;
    Ok(())
}

fn print_error(err: &anyhow::Error) {
    match err.downcast_ref::<GpfError>() {
        Some(gpf) => {
            eprintln!("{}", gpf.user_message());
            if let Some(suggestion) = gpf.recovery_suggestion() {
                eprintln!("\nSuggestion: {suggestion}");
            }
        },
        None => eprintln!("Error: {err:#}"),
    }
}

/// Loads the fixture and connects to it.
fn open_workspace(path: &PathBuf) -> Result<(Arc<MemoryEngine>, Geodatabase)> {
    let engine = Arc::new(
        MemoryEngine::from_fixture_path(path)
            .with_context(|| format!("Cannot load workspace '{}'", path.display()))?,
    );
    debug!(
        "Loaded workspace {} with tables {:?}",
        engine.workspace(),
        engine.table_names()
    );
    let dyn_engine: Arc<dyn GeoprocessingEngine> = engine.clone();
    Ok((engine, Geodatabase::new(dyn_engine)))
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Fields { workspace, table } => {
            let (engine, gdb) = open_workspace(&workspace)?;
            handle_fields(&gdb, &engine.table(&table))?;
        },
        Commands::Count {
            workspace,
            table,
            filter,
        } => {
            let (engine, gdb) = open_workspace(&workspace)?;
            handle_count(&gdb, &engine.table(&table), filter.as_deref())?;
        },
        Commands::Missing {
            workspace,
            table,
            fields,
        } => {
            let (engine, gdb) = open_workspace(&workspace)?;
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            if !handle_missing(&gdb, &engine.table(&table), &fields) {
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Dump {
            workspace,
            table,
            fields,
            filter,
            limit,
        } => {
            let (engine, gdb) = open_workspace(&workspace)?;
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            handle_dump(&gdb, &engine.table(&table), &fields, filter.as_deref(), limit)?;
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_fields(gdb: &Geodatabase, table: &TableHandle) -> Result<()> {
    info!("Describing {table}");
    let schema = gdb.describe(table)?;
    display::display_schema(&schema);
    Ok(())
}

fn handle_count(gdb: &Geodatabase, table: &TableHandle, filter: Option<&str>) -> Result<()> {
    info!("Counting rows of {table}");
    let count = metadata::count_rows(gdb, table, filter)?;
    println!("{count}");
    Ok(())
}

/// Prints the missing fields and returns `true` when none are missing.
fn handle_missing(gdb: &Geodatabase, table: &TableHandle, fields: &[&str]) -> bool {
    let missing = metadata::missing_fields(gdb, table, fields);
    if missing.is_empty() {
        println!("All {} fields present in {table}", fields.len());
        return true;
    }
    println!("Missing from {table}:");
    for field in &missing {
        println!("  - {field}");
    }
    false
}

fn handle_dump(
    gdb: &Geodatabase,
    table: &TableHandle,
    fields: &[&str],
    filter: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    info!("Dumping {table}");
    let mut session = gdb.search(table, fields, filter)?;
    let headers: Vec<String> = session.field_names().iter().map(|f| (*f).to_string()).collect();

    let mut rows = Vec::new();
    for row in session.by_ref().take(limit.unwrap_or(usize::MAX)) {
        let row = row?;
        rows.push(
            headers
                .iter()
                .map(|h| row.get(h).cloned())
                .collect::<gpf_core::Result<Vec<_>>>()?,
        );
    }
    session.close()?;

    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    println!("{}", display::rows_table(&headers, &rows));
    println!("({} rows)", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpf_core_common::{RawField, Value};

    fn connect() -> (MemoryEngine, Geodatabase) {
        let engine = MemoryEngine::new("C:/data/cli.gdb");
        engine
            .create_table(
                "Poles",
                vec![
                    RawField::new("OBJECTID", "OID").required().read_only(),
                    RawField::new("HEIGHT", "Double"),
                ],
            )
            .expect("create table");
        for height in [8.0, 10.5, 12.0] {
            engine
                .insert("Poles", vec![Value::Null, Value::Double(height)])
                .expect("insert");
        }
        let gdb = Geodatabase::with_reporter(
            Arc::new(engine.clone()),
            Arc::new(Reporter::with_log_facade()),
        );
        (engine, gdb)
    }

    #[test]
    fn test_handle_missing() {
        let (engine, gdb) = connect();
        let table = engine.table("Poles");
        assert!(handle_missing(&gdb, &table, &["HEIGHT", "OID@"]));
        assert!(!handle_missing(&gdb, &table, &["HEIGHT", "MATERIAL"]));
    }

    #[test]
    fn test_handle_dump_closes_cursor() -> Result<()> {
        let (engine, gdb) = connect();
        handle_dump(&gdb, &engine.table("Poles"), &["*"], Some("HEIGHT > 9"), Some(1))?;
        assert_eq!(engine.open_cursor_count(), 0);
        Ok(())
    }

    #[test]
    fn test_handle_count_unknown_table() {
        let (engine, gdb) = connect();
        let err = handle_count(&gdb, &engine.table("Cables"), None).unwrap_err();
        let gpf = err.downcast_ref::<GpfError>().expect("library error");
        assert!(gpf.user_message().contains("Cables"));
        assert!(gpf.recovery_suggestion().is_some());
    }
}
