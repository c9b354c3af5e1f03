//! Entry point tying the engine, the field registry, edit sessions and the
//! feedback sink together.

use std::sync::Arc;

use gpf_core_common::{CursorKind, GeoprocessingEngine, TableHandle, WorkspacePath};
use log::{debug, warn};

use crate::config::RetryPolicy;
use crate::cursor::CursorSession;
use crate::edit::{EditManager, EditSession};
use crate::error::{GpfError, Result};
use crate::feedback::{self, Reporter};
use crate::fields::{FieldRegistry, TableSchema};

/// A geodatabase connection.
///
/// Holds the engine plus the per-connection state: the schema cache and the
/// active edit transactions. Share one `Geodatabase` between all callers of
/// a workspace so that they see the same cache and edit locks.
pub struct Geodatabase {
    engine: Arc<dyn GeoprocessingEngine>,
    registry: FieldRegistry,
    edits: EditManager,
    reporter: Arc<Reporter>,
}

impl Geodatabase {
    /// Connects to `engine`, reporting to the process-wide reporter.
    #[must_use]
    pub fn new(engine: Arc<dyn GeoprocessingEngine>) -> Self {
        Self::with_reporter(engine, feedback::global())
    }

    /// Connects to `engine`, reporting to `reporter`.
    #[must_use]
    pub fn with_reporter(engine: Arc<dyn GeoprocessingEngine>, reporter: Arc<Reporter>) -> Self {
        Self {
            registry: FieldRegistry::new(Arc::clone(&engine)),
            edits: EditManager::new(Arc::clone(&engine), Arc::clone(&reporter)),
            engine,
            reporter,
        }
    }

    /// The engine behind this connection.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn GeoprocessingEngine> {
        &self.engine
    }

    /// The schema cache.
    #[must_use]
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// The edit transactions.
    #[must_use]
    pub fn edits(&self) -> &EditManager {
        &self.edits
    }

    /// The feedback sink.
    #[must_use]
    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Returns the (cached) schema of `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::SchemaError`] when the table cannot be described.
    pub fn describe(&self, table: &TableHandle) -> Result<Arc<TableSchema>> {
        Ok(self.registry.describe(table)?)
    }

    /// Drops the cached schema of `table`, e.g. after adding a field.
    pub fn invalidate(&self, table: &TableHandle) {
        self.registry.invalidate(table);
    }

    /// Opens a cursor session of any kind.
    ///
    /// `fields` are field names or tokens (`OID@`, `SHAPE@`, ...); `*`
    /// requests every field. `filter` is a where clause.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CursorError::Open`] when the table cannot be
    /// described, a field is unknown or the engine refuses the cursor, and
    /// [`crate::error::EditError::WorkspaceLockConflict`] for writable
    /// cursors while another caller edits the workspace.
    pub fn open<'a>(
        &'a self,
        table: &'a TableHandle,
        kind: CursorKind,
        fields: &[&str],
        filter: Option<&str>,
    ) -> Result<CursorSession<'a>> {
        CursorSession::open(self, table, kind, fields, filter)
    }

    /// Opens a read-only session.
    ///
    /// # Errors
    ///
    /// See [`Geodatabase::open`].
    pub fn search<'a>(
        &'a self,
        table: &'a TableHandle,
        fields: &[&str],
        filter: Option<&str>,
    ) -> Result<CursorSession<'a>> {
        self.open(table, CursorKind::Search, fields, filter)
    }

    /// Opens an update session.
    ///
    /// # Errors
    ///
    /// See [`Geodatabase::open`].
    pub fn update<'a>(
        &'a self,
        table: &'a TableHandle,
        fields: &[&str],
        filter: Option<&str>,
    ) -> Result<CursorSession<'a>> {
        self.open(table, CursorKind::Update, fields, filter)
    }

    /// Opens an insert session.
    ///
    /// # Errors
    ///
    /// See [`Geodatabase::open`].
    pub fn insert<'a>(&'a self, table: &'a TableHandle, fields: &[&str]) -> Result<CursorSession<'a>> {
        self.open(table, CursorKind::Insert, fields, None)
    }

    /// Begins (or nests into) an edit on `workspace`.
    ///
    /// # Errors
    ///
    /// See [`EditManager::begin`].
    pub fn begin_edit(&self, workspace: &WorkspacePath) -> Result<EditSession<'_>> {
        self.edits.begin(workspace)
    }

    /// Begins an edit, waiting and retrying while the workspace is locked.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ConfigError`] for an invalid policy, the
    /// last lock conflict once the attempts are used up and any other
    /// failure immediately.
    pub fn begin_edit_with_retry(
        &self,
        workspace: &WorkspacePath,
        policy: &RetryPolicy,
    ) -> Result<EditSession<'_>> {
        policy.validate()?;
        let mut attempt = 1;
        loop {
            match self.edits.begin(workspace) {
                Err(e) if e.is_lock_conflict() && attempt < policy.max_attempts => {
                    attempt += 1;
                    let wait = policy.backoff(attempt);
                    debug!(
                        "Workspace {workspace} is locked, attempt {attempt}/{} in {wait:?}",
                        policy.max_attempts
                    );
                    std::thread::sleep(wait);
                },
                result => return result,
            }
        }
    }

    /// Runs `body` inside an edit on `workspace`.
    ///
    /// The edit commits when `body` returns `Ok` and rolls back when it
    /// returns `Err`, in which case that error is returned unchanged. If
    /// `body` finished the session itself, it is left as it is.
    ///
    /// # Errors
    ///
    /// Returns the error of `body`, of beginning the edit or of the commit
    /// (including [`crate::error::EditError::Tainted`] when a failure inside
    /// `body` was swallowed).
    pub fn edit<T>(
        &self,
        workspace: &WorkspacePath,
        body: impl FnOnce(&mut EditSession<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.begin_edit(workspace)?;
        match body(&mut session) {
            Ok(value) => {
                if !session.is_finished() {
                    session.commit()?;
                }
                Ok(value)
            },
            Err(err) => {
                if !session.is_finished() {
                    session.taint(err.clone());
                    if let Err(rollback) = session.rollback() {
                        warn!("Rollback on {workspace} failed: {rollback}");
                    }
                }
                Err(err)
            },
        }
    }
}

impl std::fmt::Debug for Geodatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geodatabase")
            .field("registry", &self.registry)
            .field("edits", &self.edits)
            .finish_non_exhaustive()
    }
}

impl From<Arc<dyn GeoprocessingEngine>> for Geodatabase {
    fn from(engine: Arc<dyn GeoprocessingEngine>) -> Self {
        Self::new(engine)
    }
}
