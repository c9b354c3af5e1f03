//! Capability traits for the external geoprocessing engine.
//!
//! The toolkit never talks to a vendor API directly. Everything it needs from
//! the engine is expressed by [`GeoprocessingEngine`] (schema, cursors, edit
//! operations, message channel) and [`RawCursor`] (row-level access on one open
//! cursor). Implementations own the actual locks and handles; the toolkit only
//! guarantees that every handle it obtains is closed again.

use std::fmt;

use thiserror::Error;

use crate::table::{TableHandle, WorkspacePath};
use crate::value::Value;

/// The three cursor flavours a geodatabase offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    /// Read-only, iterates rows.
    Search,
    /// Write-only, appends rows.
    Insert,
    /// Iterates rows and can rewrite or delete the current one.
    Update,
}

impl CursorKind {
    /// Returns `true` for cursors that modify data.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Search)
    }

    /// Returns `true` for cursors that yield rows.
    #[must_use]
    pub fn is_iterable(&self) -> bool {
        !matches!(self, Self::Insert)
    }

    /// Returns the lowercase name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legal entry of a coded-value domain.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedValue {
    /// The stored code.
    pub code: Value,
    /// Human readable description of the code.
    pub description: String,
}

/// A coded-value domain as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDomain {
    /// Domain name.
    pub name: String,
    /// Legal code/description pairs.
    pub values: Vec<CodedValue>,
}

/// A field as reported by the engine, before type codes are interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    /// Field name.
    pub name: String,
    /// Engine type code (e.g. `"String"`, `"Double"`, `"OID"`).
    pub type_code: String,
    /// Whether the field accepts nulls.
    pub nullable: bool,
    /// Whether the field can be written by clients.
    pub editable: bool,
    /// Maximum text length, if the engine enforces one.
    pub length: Option<usize>,
    /// Attached coded-value domain.
    pub domain: Option<RawDomain>,
}

impl RawField {
    /// Creates a nullable, editable field without length or domain.
    #[must_use]
    pub fn new(name: impl Into<String>, type_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: type_code.into(),
            nullable: true,
            editable: true,
            length: None,
            domain: None,
        }
    }

    /// Marks the field as not nullable.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the field as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    /// Sets the maximum text length.
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Attaches a coded-value domain.
    #[must_use]
    pub fn with_domain(mut self, domain: RawDomain) -> Self {
        self.domain = Some(domain);
        self
    }
}

/// Schema of one table as reported by the engine.
///
/// Besides the ordered field list the engine names its special fields, which
/// back the `OID@`/`SHAPE@` style tokens.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSchema {
    /// Fields in table order.
    pub fields: Vec<RawField>,
    /// Name of the object id field.
    pub oid_field: Option<String>,
    /// Name of the shape field (feature classes only).
    pub shape_field: Option<String>,
    /// Name of the shape area field.
    pub area_field: Option<String>,
    /// Name of the shape length field.
    pub length_field: Option<String>,
}

/// Everything the engine needs to open a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRequest {
    /// Target table.
    pub table: TableHandle,
    /// Cursor flavour.
    pub kind: CursorKind,
    /// Optional where clause.
    pub filter: Option<String>,
    /// Real field names in the order values are exchanged.
    pub fields: Vec<String>,
}

/// Opaque handle of an open edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditToken(pub u64);

impl fmt::Display for EditToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit#{}", self.0)
    }
}

/// Severity of a message sent to the engine's message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSeverity {
    /// Informational message.
    Message,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// Classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// The table or workspace does not exist.
    NotFound,
    /// A lock is held by someone else.
    Locked,
    /// The where clause could not be parsed.
    InvalidFilter,
    /// A requested field does not exist.
    InvalidField,
    /// The connection to the workspace was lost.
    ConnectionLost,
    /// A lock this handle held was taken away.
    LockPreempted,
    /// The handle was already closed.
    Closed,
    /// Anything else.
    Other,
}

/// Failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    /// What went wrong.
    pub kind: EngineErrorKind,
    /// The engine's own message.
    pub message: String,
}

impl EngineError {
    /// Creates an engine error.
    #[must_use]
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` when the failure is a lock conflict.
    #[must_use]
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self.kind, EngineErrorKind::Locked)
    }
}

/// Row-level access to one open cursor.
///
/// Values are exchanged in the order of [`CursorRequest::fields`].
pub trait RawCursor: Send {
    /// Advances to the next row and returns its values, or `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the row cannot be read.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, EngineError>;

    /// Replaces the values of the current row.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when there is no current row or the write fails.
    fn update_row(&mut self, values: &[Value]) -> Result<(), EngineError>;

    /// Deletes the current row.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when there is no current row or the delete fails.
    fn delete_row(&mut self) -> Result<(), EngineError>;

    /// Appends a row and returns its object id.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the insert fails.
    fn insert_row(&mut self, values: &[Value]) -> Result<i64, EngineError>;

    /// Releases the cursor and any lock it holds. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine fails to release the handle.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// The capabilities this toolkit consumes from a geoprocessing engine.
pub trait GeoprocessingEngine: Send + Sync {
    /// Describes the schema of a table.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the table cannot be described.
    fn describe_schema(&self, table: &TableHandle) -> Result<RawSchema, EngineError>;

    /// Opens a cursor. On failure nothing must remain acquired.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the cursor cannot be opened.
    fn open_cursor(&self, request: &CursorRequest) -> Result<Box<dyn RawCursor>, EngineError>;

    /// Starts an edit operation on a workspace.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the edit cannot be started.
    fn begin_edit(&self, workspace: &WorkspacePath) -> Result<EditToken, EngineError>;

    /// Commits an edit operation.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the commit fails.
    fn commit_edit(&self, token: EditToken) -> Result<(), EngineError>;

    /// Rolls back an edit operation.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the rollback fails.
    fn rollback_edit(&self, token: EditToken) -> Result<(), EngineError>;

    /// Sends a message to the engine's message channel (tool dialog, history).
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the message cannot be delivered.
    fn add_message(&self, severity: MessageSeverity, message: &str) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_kind_capabilities() {
        assert!(!CursorKind::Search.is_writable());
        assert!(CursorKind::Search.is_iterable());
        assert!(CursorKind::Insert.is_writable());
        assert!(!CursorKind::Insert.is_iterable());
        assert!(CursorKind::Update.is_writable());
        assert!(CursorKind::Update.is_iterable());
        assert_eq!(CursorKind::Update.to_string(), "update");
    }

    #[test]
    fn test_raw_field_builder() {
        let field = RawField::new("NAME", "String").required().with_length(20);
        assert!(!field.nullable);
        assert!(field.editable);
        assert_eq!(field.length, Some(20));

        let oid = RawField::new("OBJECTID", "OID").required().read_only();
        assert!(!oid.editable);
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::new(EngineErrorKind::Locked, "Cannot acquire a lock.");
        assert_eq!(err.to_string(), "Cannot acquire a lock.");
        assert!(err.is_lock_conflict());
    }
}
