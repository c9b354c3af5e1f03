//! Common types and traits shared across `gpf` crates.
//!
//! This crate holds the abstractions the toolkit consumes from a geoprocessing
//! engine ([`GeoprocessingEngine`], [`RawCursor`]), the value model, table
//! identities and an in-memory engine used by tests and the CLI.

pub mod engine;
pub mod mem;
pub mod table;
pub mod value;

// Re-export commonly used types
pub use engine::{
    CodedValue, CursorKind, CursorRequest, EditToken, EngineError, EngineErrorKind,
    GeoprocessingEngine, MessageSeverity, RawCursor, RawDomain, RawField, RawSchema,
};
pub use table::{TableHandle, WorkspacePath};
pub use value::{FieldType, FromValue, Value};
