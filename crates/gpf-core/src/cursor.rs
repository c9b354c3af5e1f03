//! Scoped cursor sessions.
//!
//! A [`CursorSession`] owns exactly one engine cursor and the table lock that
//! comes with it. The cursor is released when the session is closed, when
//! iteration reaches the end, when the engine fails mid-iteration and, at the
//! latest, when the session is dropped. Dropping covers early `break`, `?`
//! propagation and panics alike.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gpf_core_common::{CursorKind, CursorRequest, EngineError, RawCursor, TableHandle, Value};
use log::{debug, warn};

use crate::error::{CursorError, FieldError, GpfError, Result, SchemaError};
use crate::feedback::FeedbackEvent;
use crate::fields::TableSchema;
use crate::row::{CLOSED_GENERATION, Projection, RowToken, RowView};
use crate::workspace::Geodatabase;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`CursorSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The cursor is open and no row was read yet.
    Open,
    /// At least one row was read.
    Iterating,
    /// The cursor was released. A closed session never reopens.
    Closed,
}

/// One open cursor on a table.
///
/// Search and update sessions are iterators over [`RowView`]s. Iteration is
/// lazy and forward-only; every advance makes the previous row stale. Insert
/// sessions do not iterate; they hand out empty rows with
/// [`CursorSession::new_row`] and store them with [`CursorSession::append`].
pub struct CursorSession<'a> {
    gdb: &'a Geodatabase,
    table: &'a TableHandle,
    kind: CursorKind,
    projection: Arc<Projection>,
    cursor: Option<Box<dyn RawCursor>>,
    state: SessionState,
    id: u64,
    freshness: Arc<AtomicU64>,
    rows: u64,
    exhausted: bool,
}

impl<'a> CursorSession<'a> {
    pub(crate) fn open(
        gdb: &'a Geodatabase,
        table: &'a TableHandle,
        kind: CursorKind,
        fields: &[&str],
        filter: Option<&str>,
    ) -> Result<Self> {
        if kind.is_writable() {
            gdb.edits().ensure_writable(table.workspace())?;
        }

        let open_error = |reason: String| {
            let err = GpfError::from(CursorError::Open {
                table: table.to_string(),
                kind,
                reason,
            });
            gdb.reporter().report(&FeedbackEvent::Error {
                detail: err.to_string(),
            });
            err
        };

        let schema = gdb.registry().describe(table).map_err(|e| match e {
            SchemaError::DescribeFailed { source, .. } => open_error(source.to_string()),
            other => GpfError::from(other),
        })?;
        if fields.is_empty() {
            return Err(open_error("no fields requested".to_string()));
        }
        let projection =
            Arc::new(Projection::new(schema, fields).map_err(|e| open_error(e.to_string()))?);

        let request = CursorRequest {
            table: table.clone(),
            kind,
            filter: filter
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
            fields: projection.engine_fields(),
        };
        let cursor = gdb
            .engine()
            .open_cursor(&request)
            .map_err(|e| open_error(e.message))?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
        debug!("Session {id}: opened {kind} cursor on {table}");
        gdb.reporter().report(&FeedbackEvent::SessionOpened {
            table: table.to_string(),
            kind,
        });

        Ok(Self {
            gdb,
            table,
            kind,
            projection,
            cursor: Some(cursor),
            state: SessionState::Open,
            id,
            freshness: Arc::new(AtomicU64::new(0)),
            rows: 0,
            exhausted: false,
        })
    }

    /// The table this session reads or writes.
    #[must_use]
    pub fn table(&self) -> &TableHandle {
        self.table
    }

    /// The cursor kind.
    #[must_use]
    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Rows read (search, update) or appended (insert) so far.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// The schema of the table.
    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        self.projection.schema()
    }

    /// Names of the requested fields, in request order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.projection.names().iter().map(String::as_str).collect()
    }

    /// Rewrites the cursor's current row with the values of `row`.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::StaleRow`] if the cursor advanced past `row`
    /// or `row` comes from another session, [`CursorError::Unsupported`] on
    /// non-update sessions and [`CursorError::Io`] when the engine fails
    /// (the session is closed in that case).
    pub fn write_current(&mut self, row: &RowView) -> Result<()> {
        self.require_kind(CursorKind::Update, "write_current")?;
        self.check_current(row)?;
        let result = match self.cursor.as_mut() {
            Some(cursor) => cursor.update_row(row.values()),
            None => return Err(self.stale()),
        };
        result.map_err(|source| self.fail(source))
    }

    /// Deletes the cursor's current row. `row` becomes stale.
    ///
    /// # Errors
    ///
    /// Same as [`CursorSession::write_current`].
    pub fn delete_current(&mut self, row: &RowView) -> Result<()> {
        self.require_kind(CursorKind::Update, "delete_current")?;
        self.check_current(row)?;
        let result = match self.cursor.as_mut() {
            Some(cursor) => cursor.delete_row(),
            None => return Err(self.stale()),
        };
        result.map_err(|source| self.fail(source))?;
        self.freshness.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Returns an empty row for this insert session.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Unsupported`] on search and update sessions and
    /// [`CursorError::Closed`] once the session is closed.
    pub fn new_row(&self) -> Result<RowView> {
        self.require_kind(CursorKind::Insert, "new_row")?;
        if self.cursor.is_none() {
            return Err(CursorError::Closed {
                table: self.table.to_string(),
            }
            .into());
        }
        Ok(RowView::new(
            Arc::clone(&self.projection),
            vec![Value::Null; self.projection.len()],
            self.kind,
            RowToken {
                session: self.id,
                generation: self.freshness.load(Ordering::SeqCst),
            },
            Arc::clone(&self.freshness),
        ))
    }

    /// Appends `row` to the table and returns the new object id.
    ///
    /// The row can be changed and appended again.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NotNullViolation`] when a required field is null
    /// or not part of the session's fields, [`CursorError::StaleRow`] for rows
    /// of other or closed sessions and [`CursorError::Io`] when the engine
    /// fails.
    pub fn append(&mut self, row: &RowView) -> Result<i64> {
        self.require_kind(CursorKind::Insert, "append")?;
        self.check_current(row)?;
        self.check_required(row)?;

        let result = match self.cursor.as_mut() {
            Some(cursor) => cursor.insert_row(row.values()),
            None => return Err(self.stale()),
        };
        let oid = result.map_err(|source| self.fail(source))?;
        self.count_row();
        Ok(oid)
    }

    /// Appends a row built from `(field, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`RowView::set`] and [`CursorSession::append`].
    pub fn append_values(&mut self, values: &[(&str, Value)]) -> Result<i64> {
        let mut row = self.new_row()?;
        for (name, value) in values {
            row.set(name, value.clone())?;
        }
        self.append(&row)
    }

    /// Closes the session and releases the cursor and its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Io`] when the engine reports a failure while
    /// releasing; the cursor handle is dropped regardless.
    pub fn close(mut self) -> Result<()> {
        self.release().map_err(|source| {
            CursorError::Io {
                table: self.table.to_string(),
                source,
            }
            .into()
        })
    }

    fn require_kind(&self, kind: CursorKind, operation: &'static str) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(CursorError::Unsupported {
                table: self.table.to_string(),
                kind: self.kind,
                operation,
            }
            .into())
        }
    }

    fn check_current(&self, row: &RowView) -> Result<()> {
        let token = row.token();
        if token.session == self.id && row.is_fresh() && self.cursor.is_some() {
            Ok(())
        } else {
            Err(self.stale())
        }
    }

    fn check_required(&self, row: &RowView) -> Result<()> {
        let projection = row.projection();
        let missing = projection
            .descriptors()
            .zip(row.values())
            .find(|(d, v)| d.is_required() && v.is_null())
            .map(|(d, _)| d)
            .or_else(|| {
                projection
                    .schema()
                    .fields()
                    .iter()
                    .find(|d| d.is_required() && !projection.covers(d.ordinal()))
            });
        match missing {
            Some(descriptor) => Err(FieldError::NotNullViolation {
                table: self.table.to_string(),
                field: descriptor.name().to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn stale(&self) -> GpfError {
        CursorError::StaleRow {
            table: self.table.to_string(),
        }
        .into()
    }

    fn count_row(&mut self) {
        self.rows += 1;
        let interval = self.gdb.reporter().config().progress_interval;
        if self.rows % interval == 0 {
            self.gdb.reporter().report(&FeedbackEvent::RowProcessed {
                table: self.table.to_string(),
                count: self.rows,
            });
        }
    }

    /// Closes the cursor after an engine failure and reports it.
    fn fail(&mut self, source: EngineError) -> GpfError {
        let err = GpfError::from(CursorError::Io {
            table: self.table.to_string(),
            source,
        });
        if let Err(close_error) = self.release() {
            warn!("Failed to close cursor on {} after an error: {close_error}", self.table);
        }
        self.gdb.reporter().report(&FeedbackEvent::Error {
            detail: err.to_string(),
        });
        self.gdb.edits().taint(self.table.workspace(), &err);
        err
    }

    fn release(&mut self) -> std::result::Result<(), EngineError> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(());
        };
        self.freshness.store(CLOSED_GENERATION, Ordering::SeqCst);
        self.state = SessionState::Closed;
        self.exhausted = true;

        let result = cursor.close();
        drop(cursor);
        debug!("Session {}: closed cursor on {}", self.id, self.table);
        self.gdb.reporter().report(&FeedbackEvent::SessionClosed {
            table: self.table.to_string(),
            rows: self.rows,
        });
        result
    }
}

impl Iterator for CursorSession<'_> {
    type Item = Result<RowView>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        if !self.kind.is_iterable() {
            self.exhausted = true;
            return Some(Err(CursorError::Unsupported {
                table: self.table.to_string(),
                kind: self.kind,
                operation: "iteration",
            }
            .into()));
        }

        let generation = self.freshness.fetch_add(1, Ordering::SeqCst) + 1;
        let result = match self.cursor.as_mut() {
            Some(cursor) => cursor.next_row(),
            None => {
                self.exhausted = true;
                return None;
            },
        };

        match result {
            Ok(Some(values)) => {
                self.state = SessionState::Iterating;
                self.count_row();
                Some(Ok(RowView::new(
                    Arc::clone(&self.projection),
                    values,
                    self.kind,
                    RowToken {
                        session: self.id,
                        generation,
                    },
                    Arc::clone(&self.freshness),
                )))
            },
            Ok(None) => {
                if let Err(e) = self.release() {
                    warn!("Failed to close cursor on {}: {e}", self.table);
                }
                None
            },
            Err(source) => Some(Err(self.fail(source))),
        }
    }
}

impl Drop for CursorSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to close cursor on {}: {e}", self.table);
        }
    }
}

impl std::fmt::Debug for CursorSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorSession")
            .field("table", &self.table.to_string())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}
