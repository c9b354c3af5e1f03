//! In-memory reference implementation of the engine traits.
//!
//! [`MemoryEngine`] models one workspace holding tables in memory. It behaves
//! like a real geodatabase where it matters to the toolkit: cursors take table
//! locks and keep them until closed, edit operations can be rolled back, and
//! failures can be injected. The counters (`open_cursor_count`, `lock_count`,
//! `schema_query_count`, edit counters) make resource leaks observable in tests.
//!
//! # Examples
//!
//! ```
//! use gpf_core_common::mem::MemoryEngine;
//! use gpf_core_common::{GeoprocessingEngine, RawField, TableHandle, Value};
//!
//! let engine = MemoryEngine::new("C:/data/city.gdb");
//! engine
//!     .create_table(
//!         "Parcels",
//!         vec![RawField::new("OBJECTID", "OID").required().read_only(), RawField::new("AREA", "Double")],
//!     )
//!     .unwrap();
//! engine.insert("Parcels", vec![Value::Null, Value::Double(120.0)]).unwrap();
//!
//! let schema = engine.describe_schema(&TableHandle::new("C:/data/city.gdb", "Parcels")).unwrap();
//! assert_eq!(schema.oid_field.as_deref(), Some("OBJECTID"));
//! assert_eq!(engine.row_count("Parcels"), Some(1));
//! ```

mod filter;
pub mod fixture;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use crate::engine::{
    CursorKind, CursorRequest, EditToken, EngineError, EngineErrorKind, GeoprocessingEngine,
    MessageSeverity, RawCursor, RawField, RawSchema,
};
use crate::table::{TableHandle, WorkspacePath};
use crate::value::{FieldType, Value};

use filter::Filter;

#[derive(Debug, Clone)]
struct MemTable {
    schema: RawSchema,
    rows: BTreeMap<i64, Vec<Value>>,
    next_oid: i64,
}

impl MemTable {
    fn oid_column(&self) -> Option<usize> {
        let oid = self.schema.oid_field.as_deref()?;
        self.schema
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(oid))
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.schema
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    fn insert(&mut self, mut values: Vec<Value>) -> i64 {
        let oid = self.next_oid;
        self.next_oid += 1;
        values.resize(self.schema.fields.len(), Value::Null);
        if let Some(column) = self.oid_column() {
            values[column] = Value::Integer(oid);
        }
        self.rows.insert(oid, values);
        oid
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LockState {
    shared: usize,
    exclusive: bool,
    external: bool,
}

#[derive(Debug)]
struct ActiveEdit {
    token: EditToken,
    snapshot: HashMap<String, MemTable>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemTable>,
    locks: HashMap<String, LockState>,
    edit: Option<ActiveEdit>,
    row_failures: HashMap<String, (usize, EngineErrorKind)>,
    schema_queries: HashMap<String, usize>,
}

#[derive(Debug)]
struct Inner {
    workspace: WorkspacePath,
    state: Mutex<State>,
    describe_delay: Mutex<Option<Duration>>,
    open_cursors: AtomicUsize,
    next_token: AtomicU64,
    edits_begun: AtomicUsize,
    edits_committed: AtomicUsize,
    edits_rolled_back: AtomicUsize,
    messages: Mutex<Vec<(MessageSeverity, String)>>,
    fail_messages: AtomicBool,
}

/// An in-memory workspace implementing [`GeoprocessingEngine`].
///
/// Cloning is cheap and clones share the same workspace.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

fn key(name: &str) -> String {
    name.to_ascii_uppercase()
}

fn not_found(what: impl std::fmt::Display) -> EngineError {
    EngineError::new(
        EngineErrorKind::NotFound,
        format!("{what} does not exist or is not supported"),
    )
}

impl MemoryEngine {
    /// Creates an empty workspace at `workspace`.
    #[must_use]
    pub fn new(workspace: impl Into<WorkspacePath>) -> Self {
        Self {
            inner: Arc::new(Inner {
                workspace: workspace.into(),
                state: Mutex::new(State::default()),
                describe_delay: Mutex::new(None),
                open_cursors: AtomicUsize::new(0),
                next_token: AtomicU64::new(1),
                edits_begun: AtomicUsize::new(0),
                edits_committed: AtomicUsize::new(0),
                edits_rolled_back: AtomicUsize::new(0),
                messages: Mutex::new(Vec::new()),
                fail_messages: AtomicBool::new(false),
            }),
        }
    }

    /// The workspace this engine serves.
    #[must_use]
    pub fn workspace(&self) -> &WorkspacePath {
        &self.inner.workspace
    }

    /// Returns a handle for a table of this workspace.
    #[must_use]
    pub fn table(&self, name: &str) -> TableHandle {
        TableHandle::new(self.inner.workspace.clone(), name)
    }

    /// Creates a table with the given fields.
    ///
    /// The first `OID` field becomes the object id field, the first `Geometry`
    /// field the shape field. Fields named `SHAPE_Area`/`SHAPE_Length` (any
    /// case) are reported as the shape measure fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a table of that name already exists.
    pub fn create_table(&self, name: &str, fields: Vec<RawField>) -> Result<(), EngineError> {
        let find = |wanted: &dyn Fn(&RawField) -> bool| {
            fields.iter().find(|f| wanted(*f)).map(|f| f.name.clone())
        };
        let schema = RawSchema {
            oid_field: find(&|f| FieldType::from_code(&f.type_code) == Some(FieldType::ObjectId)),
            shape_field: find(&|f| FieldType::from_code(&f.type_code) == Some(FieldType::Geometry)),
            area_field: find(&|f| f.name.eq_ignore_ascii_case("SHAPE_Area")),
            length_field: find(&|f| f.name.eq_ignore_ascii_case("SHAPE_Length")),
            fields,
        };
        self.create_table_with_schema(name, schema)
    }

    /// Creates a table from a complete [`RawSchema`].
    ///
    /// # Errors
    ///
    /// Returns an error if a table of that name already exists.
    pub fn create_table_with_schema(&self, name: &str, schema: RawSchema) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock();
        if state.tables.contains_key(&key(name)) {
            return Err(EngineError::new(
                EngineErrorKind::Other,
                format!("Table '{name}' already exists"),
            ));
        }
        state.tables.insert(
            key(name),
            MemTable {
                schema,
                rows: BTreeMap::new(),
                next_oid: 1,
            },
        );
        Ok(())
    }

    /// Appends a row given in table field order and returns its object id.
    ///
    /// Missing trailing values are filled with nulls; the object id column is
    /// overwritten with the assigned id. This bypasses cursors and locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    pub fn insert(&self, table: &str, values: Vec<Value>) -> Result<i64, EngineError> {
        let mut state = self.inner.state.lock();
        let table = state
            .tables
            .get_mut(&key(table))
            .ok_or_else(|| not_found(table))?;
        Ok(table.insert(values))
    }

    /// Adds a field to an existing table; existing rows get nulls.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the field name is taken.
    pub fn add_field(&self, table: &str, field: RawField) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock();
        let entry = state
            .tables
            .get_mut(&key(table))
            .ok_or_else(|| not_found(table))?;
        if entry.column(&field.name).is_some() {
            return Err(EngineError::new(
                EngineErrorKind::Other,
                format!("Field '{}' already exists in '{table}'", field.name),
            ));
        }
        entry.schema.fields.push(field);
        for row in entry.rows.values_mut() {
            row.push(Value::Null);
        }
        Ok(())
    }

    /// Returns all rows of a table in object id order, or `None` if missing.
    #[must_use]
    pub fn rows(&self, table: &str) -> Option<Vec<Vec<Value>>> {
        let state = self.inner.state.lock();
        state
            .tables
            .get(&key(table))
            .map(|t| t.rows.values().cloned().collect())
    }

    /// Returns the number of rows in a table, or `None` if missing.
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        let state = self.inner.state.lock();
        state.tables.get(&key(table)).map(|t| t.rows.len())
    }

    /// Names of all tables, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of cursors currently open.
    #[must_use]
    pub fn open_cursor_count(&self) -> usize {
        self.inner.open_cursors.load(Ordering::SeqCst)
    }

    /// Number of table locks held by cursors of this engine.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        let state = self.inner.state.lock();
        state
            .locks
            .values()
            .map(|l| l.shared + usize::from(l.exclusive))
            .sum()
    }

    /// Number of schema queries issued for a table.
    #[must_use]
    pub fn schema_query_count(&self, table: &str) -> usize {
        let state = self.inner.state.lock();
        state.schema_queries.get(&key(table)).copied().unwrap_or(0)
    }

    /// Number of edit operations started.
    #[must_use]
    pub fn edits_begun(&self) -> usize {
        self.inner.edits_begun.load(Ordering::SeqCst)
    }

    /// Number of edit operations committed.
    #[must_use]
    pub fn edits_committed(&self) -> usize {
        self.inner.edits_committed.load(Ordering::SeqCst)
    }

    /// Number of edit operations rolled back.
    #[must_use]
    pub fn edits_rolled_back(&self) -> usize {
        self.inner.edits_rolled_back.load(Ordering::SeqCst)
    }

    /// Returns `true` while an edit operation is open.
    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.inner.state.lock().edit.is_some()
    }

    /// Messages sent through [`GeoprocessingEngine::add_message`].
    #[must_use]
    pub fn messages(&self) -> Vec<(MessageSeverity, String)> {
        self.inner.messages.lock().clone()
    }

    /// Makes the `n`-th row read (1-based) of every cursor on `table` fail
    /// with `kind`.
    pub fn fail_on_row(&self, table: &str, n: usize, kind: EngineErrorKind) {
        let mut state = self.inner.state.lock();
        state.row_failures.insert(key(table), (n, kind));
    }

    /// Removes all injected row failures.
    pub fn clear_failures(&self) {
        self.inner.state.lock().row_failures.clear();
    }

    /// Simulates another process holding an exclusive lock on `table`.
    pub fn lock_externally(&self, table: &str) {
        let mut state = self.inner.state.lock();
        state.locks.entry(key(table)).or_default().external = true;
    }

    /// Releases a lock taken with [`MemoryEngine::lock_externally`].
    pub fn release_external_lock(&self, table: &str) {
        let mut state = self.inner.state.lock();
        if let Some(lock) = state.locks.get_mut(&key(table)) {
            lock.external = false;
        }
    }

    /// Makes every schema query sleep for `delay` before answering.
    pub fn set_describe_delay(&self, delay: Option<Duration>) {
        *self.inner.describe_delay.lock() = delay;
    }

    /// Makes [`GeoprocessingEngine::add_message`] fail.
    pub fn set_message_failure(&self, fail: bool) {
        self.inner.fail_messages.store(fail, Ordering::SeqCst);
    }

    fn check_workspace(&self, workspace: &WorkspacePath) -> Result<(), EngineError> {
        if *workspace == self.inner.workspace {
            Ok(())
        } else {
            Err(not_found(format!("Workspace '{workspace}'")))
        }
    }
}

impl GeoprocessingEngine for MemoryEngine {
    fn describe_schema(&self, table: &TableHandle) -> Result<RawSchema, EngineError> {
        self.check_workspace(table.workspace())?;
        let schema = {
            let mut state = self.inner.state.lock();
            *state.schema_queries.entry(key(table.name())).or_default() += 1;
            state
                .tables
                .get(&key(table.name()))
                .map(|t| t.schema.clone())
                .ok_or_else(|| not_found(format!("Table '{table}'")))?
        };
        let delay = *self.inner.describe_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(schema)
    }

    fn open_cursor(&self, request: &CursorRequest) -> Result<Box<dyn RawCursor>, EngineError> {
        self.check_workspace(request.table.workspace())?;
        let table_key = key(request.table.name());
        let mut state = self.inner.state.lock();
        let table = state
            .tables
            .get(&table_key)
            .ok_or_else(|| not_found(format!("Table '{}'", request.table)))?;

        let columns = request
            .fields
            .iter()
            .map(|name| {
                table.column(name).ok_or_else(|| {
                    EngineError::new(
                        EngineErrorKind::InvalidField,
                        format!("Field '{name}' does not exist in '{}'", request.table),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let filter = match request.filter.as_deref() {
            Some(clause) => filter::parse(clause, &table.schema.fields)?,
            None => Filter::default(),
        };

        let oids: Vec<i64> = if request.kind.is_iterable() {
            table
                .rows
                .iter()
                .filter(|(_, row)| filter.matches(row))
                .map(|(oid, _)| *oid)
                .collect()
        } else {
            Vec::new()
        };
        let fail_at = state.row_failures.get(&table_key).copied();

        let lock = state.locks.entry(table_key.clone()).or_default();
        if lock.external {
            return Err(EngineError::new(
                EngineErrorKind::Locked,
                format!("Cannot acquire a lock on '{}': held by another process", request.table),
            ));
        }
        if request.kind.is_writable() {
            if lock.exclusive {
                return Err(EngineError::new(
                    EngineErrorKind::Locked,
                    format!("Cannot acquire a lock on '{}': another writer is open", request.table),
                ));
            }
            lock.exclusive = true;
        } else {
            lock.shared += 1;
        }
        drop(state);

        self.inner.open_cursors.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Opened {} cursor on {} ({} rows)",
            request.kind,
            request.table,
            oids.len()
        );

        Ok(Box::new(MemCursor {
            inner: Arc::clone(&self.inner),
            table: table_key,
            kind: request.kind,
            columns,
            oids: oids.into_iter(),
            current: None,
            reads: 0,
            fail_at,
            closed: false,
        }))
    }

    fn begin_edit(&self, workspace: &WorkspacePath) -> Result<EditToken, EngineError> {
        self.check_workspace(workspace)?;
        let mut state = self.inner.state.lock();
        if state.edit.is_some() {
            return Err(EngineError::new(
                EngineErrorKind::Locked,
                format!("Workspace '{workspace}' is already being edited"),
            ));
        }
        let token = EditToken(self.inner.next_token.fetch_add(1, Ordering::SeqCst));
        let snapshot = state.tables.clone();
        state.edit = Some(ActiveEdit { token, snapshot });
        self.inner.edits_begun.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    fn commit_edit(&self, token: EditToken) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock();
        match state.edit.take() {
            Some(edit) if edit.token == token => {
                self.inner.edits_committed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            other => {
                state.edit = other;
                Err(EngineError::new(
                    EngineErrorKind::Closed,
                    format!("{token} is not the active edit operation"),
                ))
            },
        }
    }

    fn rollback_edit(&self, token: EditToken) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock();
        match state.edit.take() {
            Some(edit) if edit.token == token => {
                state.tables = edit.snapshot;
                self.inner.edits_rolled_back.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            other => {
                state.edit = other;
                Err(EngineError::new(
                    EngineErrorKind::Closed,
                    format!("{token} is not the active edit operation"),
                ))
            },
        }
    }

    fn add_message(&self, severity: MessageSeverity, message: &str) -> Result<(), EngineError> {
        if self.inner.fail_messages.load(Ordering::SeqCst) {
            return Err(EngineError::new(
                EngineErrorKind::ConnectionLost,
                "Message channel unavailable",
            ));
        }
        self.inner
            .messages
            .lock()
            .push((severity, message.to_string()));
        Ok(())
    }
}

struct MemCursor {
    inner: Arc<Inner>,
    table: String,
    kind: CursorKind,
    columns: Vec<usize>,
    oids: std::vec::IntoIter<i64>,
    current: Option<i64>,
    reads: usize,
    fail_at: Option<(usize, EngineErrorKind)>,
    closed: bool,
}

impl MemCursor {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::new(EngineErrorKind::Closed, "Cursor is closed"))
        } else {
            Ok(())
        }
    }

    fn ensure_kind(&self, kind: CursorKind, operation: &str) -> Result<(), EngineError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(EngineError::new(
                EngineErrorKind::Other,
                format!("A {} cursor does not support {operation}", self.kind),
            ))
        }
    }

    fn check_width(&self, values: &[Value]) -> Result<(), EngineError> {
        if values.len() == self.columns.len() {
            Ok(())
        } else {
            Err(EngineError::new(
                EngineErrorKind::Other,
                format!(
                    "Expected {} values, received {}",
                    self.columns.len(),
                    values.len()
                ),
            ))
        }
    }
}

impl RawCursor for MemCursor {
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, EngineError> {
        self.ensure_open()?;
        self.reads += 1;
        if let Some((n, kind)) = self.fail_at {
            if self.reads == n {
                self.current = None;
                return Err(EngineError::new(
                    kind,
                    format!("Failed to read row {n} of '{}'", self.table),
                ));
            }
        }

        let state = self.inner.state.lock();
        let Some(table) = state.tables.get(&self.table) else {
            return Err(not_found(format!("Table '{}'", self.table)));
        };
        for oid in self.oids.by_ref() {
            if let Some(row) = table.rows.get(&oid) {
                self.current = Some(oid);
                return Ok(Some(self.columns.iter().map(|c| row[*c].clone()).collect()));
            }
        }
        self.current = None;
        Ok(None)
    }

    fn update_row(&mut self, values: &[Value]) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.ensure_kind(CursorKind::Update, "updateRow")?;
        self.check_width(values)?;
        let oid = self
            .current
            .ok_or_else(|| EngineError::new(EngineErrorKind::Other, "No current row"))?;
        let mut state = self.inner.state.lock();
        let row = state
            .tables
            .get_mut(&self.table)
            .and_then(|t| t.rows.get_mut(&oid))
            .ok_or_else(|| not_found(format!("Row {oid} of '{}'", self.table)))?;
        for (column, value) in self.columns.iter().zip(values) {
            row[*column] = value.clone();
        }
        Ok(())
    }

    fn delete_row(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.ensure_kind(CursorKind::Update, "deleteRow")?;
        let oid = self
            .current
            .take()
            .ok_or_else(|| EngineError::new(EngineErrorKind::Other, "No current row"))?;
        let mut state = self.inner.state.lock();
        state
            .tables
            .get_mut(&self.table)
            .and_then(|t| t.rows.remove(&oid))
            .map(|_| ())
            .ok_or_else(|| not_found(format!("Row {oid} of '{}'", self.table)))
    }

    fn insert_row(&mut self, values: &[Value]) -> Result<i64, EngineError> {
        self.ensure_open()?;
        self.ensure_kind(CursorKind::Insert, "insertRow")?;
        self.check_width(values)?;
        let mut state = self.inner.state.lock();
        let table = state
            .tables
            .get_mut(&self.table)
            .ok_or_else(|| not_found(format!("Table '{}'", self.table)))?;
        let mut row = vec![Value::Null; table.schema.fields.len()];
        for (column, value) in self.columns.iter().zip(values) {
            row[*column] = value.clone();
        }
        Ok(table.insert(row))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;
        let mut state = self.inner.state.lock();
        if let Some(lock) = state.locks.get_mut(&self.table) {
            if self.kind.is_writable() {
                lock.exclusive = false;
            } else {
                lock.shared = lock.shared.saturating_sub(1);
            }
        }
        drop(state);
        self.inner.open_cursors.fetch_sub(1, Ordering::SeqCst);
        debug!("Closed {} cursor on {}", self.kind, self.table);
        Ok(())
    }
}

impl Drop for MemCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
