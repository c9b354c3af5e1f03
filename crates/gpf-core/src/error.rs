//! Custom error types for `gpf` operations.
//!
//! Every failure names the table, field or workspace involved. Errors are
//! `Clone` so that an edit session can keep the failure that tainted it while
//! the same failure is returned to the caller.

use std::sync::Arc;

use gpf_core_common::{CursorKind, EngineError};
use thiserror::Error;

/// Main error type for `gpf` operations.
///
/// This is the root error type that encompasses all domain-specific errors.
/// It uses `#[error(transparent)]` to delegate display formatting to the
/// underlying error variants.
#[derive(Debug, Clone, Error)]
pub enum GpfError {
    /// Schema resolution errors (describe failed, unsupported types)
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Field access and validation errors
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Cursor lifecycle errors (open, I/O, stale rows)
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Edit session errors
    #[error(transparent)]
    Edit(#[from] EditError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Errors raised by caller code running inside a session
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for GpfError {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(Arc::new(error))
    }
}

/// Schema resolution errors.
///
/// These errors occur while the field registry builds the descriptors of a
/// table.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// The engine could not describe the table
    #[error("Failed to describe '{table}': {source}")]
    DescribeFailed {
        /// The table
        table: String,
        /// The engine failure
        #[source]
        source: EngineError,
    },

    /// A field uses a type code the toolkit cannot represent
    #[error("Field '{field}' of '{table}' has unsupported type '{type_code}'")]
    UnsupportedType {
        /// The table
        table: String,
        /// The field name
        field: String,
        /// The engine's type code
        type_code: String,
    },

    /// The operation needs a shape field and the table has none
    #[error("'{table}' is not a feature class")]
    NotFeatureClass {
        /// The table
        table: String,
    },

    /// The engine reported the same field name twice
    #[error("Field '{field}' appears more than once in '{table}'")]
    DuplicateField {
        /// The table
        table: String,
        /// The duplicated field name
        field: String,
    },
}

/// Field access and validation errors.
///
/// A failed assignment never changes the row buffer.
#[derive(Debug, Clone, Error)]
pub enum FieldError {
    /// The field is not part of the row or table
    #[error("Field '{field}' not found in '{table}'. Available fields: {available}")]
    NotFound {
        /// The table
        table: String,
        /// The requested field name
        field: String,
        /// Comma-separated list of valid field names
        available: String,
    },

    /// The value cannot be stored in the field without loss
    #[error("Field '{field}' of '{table}' expects {expected}, found {found}")]
    TypeMismatch {
        /// The table
        table: String,
        /// The field name
        field: String,
        /// Expected type (including limits)
        expected: String,
        /// Description of the rejected value
        found: String,
    },

    /// The value is neither a code nor a description of the field's domain
    #[error("Value {value} is not part of domain '{domain}' of field '{field}' in '{table}'")]
    DomainViolation {
        /// The table
        table: String,
        /// The field name
        field: String,
        /// The domain name
        domain: String,
        /// The rejected value
        value: String,
    },

    /// Null assigned to a non-nullable field
    #[error("Field '{field}' of '{table}' does not accept null values")]
    NotNullViolation {
        /// The table
        table: String,
        /// The field name
        field: String,
    },

    /// Write attempted on a read-only row or field
    #[error("Field '{field}' of '{table}' is read-only: {reason}")]
    ReadOnlyViolation {
        /// The table
        table: String,
        /// The field name
        field: String,
        /// Why the field cannot be written
        reason: String,
    },
}

/// Cursor lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum CursorError {
    /// The cursor could not be opened; nothing was acquired
    #[error("Cannot open {kind} cursor on '{table}': {reason}")]
    Open {
        /// The table
        table: String,
        /// The requested cursor kind
        kind: CursorKind,
        /// Why the open failed
        reason: String,
    },

    /// The engine failed while the cursor was open; the cursor was closed
    #[error("Cursor on '{table}' failed and was closed: {source}")]
    Io {
        /// The table
        table: String,
        /// The engine failure
        #[source]
        source: EngineError,
    },

    /// The row is no longer the cursor's current row
    #[error("Row of '{table}' is stale: the cursor has moved on or was closed")]
    StaleRow {
        /// The table
        table: String,
    },

    /// The operation does not exist for this cursor kind
    #[error("A {kind} cursor on '{table}' does not support {operation}")]
    Unsupported {
        /// The table
        table: String,
        /// The cursor kind
        kind: CursorKind,
        /// The rejected operation
        operation: &'static str,
    },

    /// The session was already closed
    #[error("Cursor on '{table}' is closed")]
    Closed {
        /// The table
        table: String,
    },
}

/// Edit session errors.
#[derive(Debug, Clone, Error)]
pub enum EditError {
    /// A nested edit named another workspace than the active one
    #[error("Cannot nest an edit on '{requested}' inside the active edit on '{active}'")]
    NestedMismatch {
        /// Workspace of the active edit
        active: String,
        /// Workspace of the nested request
        requested: String,
    },

    /// Commit or rollback on a handle that already finished
    #[error("Edit session on '{workspace}' is already {state}")]
    Closed {
        /// The workspace
        workspace: String,
        /// Terminal state of the handle
        state: &'static str,
    },

    /// Another caller holds the workspace
    #[error("Workspace '{workspace}' is locked: {detail}")]
    WorkspaceLockConflict {
        /// The workspace
        workspace: String,
        /// Who holds the lock
        detail: String,
    },

    /// The transaction failed earlier and was rolled back
    #[error("Edit on '{workspace}' was rolled back: {original}")]
    Tainted {
        /// The workspace
        workspace: String,
        /// The failure that tainted the transaction
        original: Arc<GpfError>,
    },

    /// The outermost handle tried to commit before its nested handles finished
    #[error("Cannot commit the edit on '{workspace}' while {open} nested edit(s) are still open")]
    NestedOpen {
        /// The workspace
        workspace: String,
        /// Number of nested handles that have not finished
        open: usize,
    },

    /// A nested edit was rolled back
    #[error("A nested edit on '{workspace}' was rolled back")]
    NestedRollback {
        /// The workspace
        workspace: String,
    },

    /// An edit handle went out of scope without commit or rollback
    #[error("Edit session on '{workspace}' was abandoned{}", if *panicked { " during a panic" } else { "" })]
    Abandoned {
        /// The workspace
        workspace: String,
        /// Whether the handle was dropped while unwinding
        panicked: bool,
    },

    /// The engine failed to start or finish the edit
    #[error("Failed to {operation} edit on '{workspace}': {source}")]
    Engine {
        /// The workspace
        workspace: String,
        /// `begin`, `commit` or `rollback`
        operation: &'static str,
        /// The engine failure
        #[source]
        source: EngineError,
    },
}

/// Configuration errors.
///
/// These errors occur when options or configuration are invalid.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },

    /// The process-wide feedback sink was already initialized
    #[error("The feedback sink is already installed")]
    AlreadyInstalled,
}

/// Type alias for Results using `GpfError`.
pub type Result<T> = std::result::Result<T, GpfError>;

impl GpfError {
    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Schema(e) => format!("Schema error: {e}"),
            Self::Field(e) => e.user_message(),
            Self::Cursor(e) => format!("Cursor error: {e}"),
            Self::Edit(e) => format!("Edit error: {e}"),
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::Other(e) => format!("Error: {e}"),
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Schema(SchemaError::DescribeFailed { .. }) => {
                Some("Check that the workspace and table exist.".to_string())
            },
            Self::Field(FieldError::NotFound { .. }) => {
                Some("Check the field name against the list of available fields.".to_string())
            },
            Self::Cursor(CursorError::StaleRow { .. }) => Some(
                "Read or write a row before advancing the cursor to the next one.".to_string(),
            ),
            Self::Cursor(CursorError::Open { .. }) => Some(
                "Check the where clause, the field list and that no other process locks the table."
                    .to_string(),
            ),
            Self::Edit(EditError::NestedOpen { .. }) => Some(
                "Commit or roll back the nested edits first, then commit the outer edit."
                    .to_string(),
            ),
            Self::Edit(EditError::WorkspaceLockConflict { .. }) => Some(
                "Wait for the other edit to finish or begin the edit with a retry policy."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Check if this error is potentially recoverable.
    ///
    /// Recoverable errors might go away when retried later or with
    /// different parameters.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Edit(EditError::WorkspaceLockConflict { .. })
        )
    }

    /// Returns `true` for [`EditError::WorkspaceLockConflict`].
    #[must_use]
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Edit(EditError::WorkspaceLockConflict { .. }))
    }
}

impl FieldError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound {
                table,
                field,
                available,
            } => {
                format!(
                    "Field '{field}' not found in '{table}'.\n\nAvailable fields:\n{}",
                    available
                        .split(", ")
                        .map(|f| format!("  - {f}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                )
            },
            _ => self.to_string(),
        }
    }
}
