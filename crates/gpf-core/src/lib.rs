//! `gpf-core` is the cursor and row layer of the geoprocessing toolkit, sitting between
//! scripts and a geodatabase engine.
//!
//! This crate includes:
//! - **Field Registry**: Cached, single-flight table schemas with typed field descriptors.
//! - **Rows**: Typed get/set on cursor rows with null, domain and read-only checks.
//! - **Cursor Sessions**: Search, update and insert cursors that always release their locks.
//! - **Edit Sessions**: Reentrant edit transactions that roll back as a whole on any failure.
//! - **Feedback**: A never-failing progress and logging sink with pluggable destinations.
//! - **Lookups and Metadata**: Key-based lookups and small schema helpers built on the above.
//!
//! Start with a [`Geodatabase`] wrapped around a
//! [`GeoprocessingEngine`](gpf_core_common::GeoprocessingEngine).

pub mod config;
pub mod cursor;
pub mod edit;
pub mod error;
pub mod feedback;
pub mod fields;
pub mod lookups;
pub mod metadata;
pub mod row;
pub mod workspace;

pub use config::{FeedbackConfig, RetryPolicy};
pub use cursor::{CursorSession, SessionState};
pub use edit::{EditManager, EditSession, EditState};
pub use error::{ConfigError, CursorError, EditError, FieldError, GpfError, Result, SchemaError};
pub use feedback::{FeedbackEvent, LogDestination, Reporter};
pub use fields::{CodedDomain, FieldDescriptor, FieldRegistry, TableSchema};
pub use lookups::{LookupKey, LookupOptions, NodeSet, RowLookup, ValueLookup};
pub use row::RowView;
pub use workspace::Geodatabase;
