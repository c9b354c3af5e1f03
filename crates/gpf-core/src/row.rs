//! Typed views over single cursor rows.
//!
//! A [`RowView`] owns a copy of the row's values and shares a freshness
//! counter with the cursor session that produced it. The session bumps the
//! counter on every advance and when it closes, so a view can tell whether it
//! still describes the cursor's current row. Every access on a stale view
//! fails with [`CursorError::StaleRow`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gpf_core_common::{CursorKind, FromValue, TableHandle, Value};

use crate::error::{CursorError, FieldError, GpfError, Result};
use crate::fields::{FieldDescriptor, TableSchema};

/// Generation value a session stores once it is closed.
pub(crate) const CLOSED_GENERATION: u64 = u64::MAX;

/// The fields a cursor exchanges, in request order.
#[derive(Debug)]
pub(crate) struct Projection {
    schema: Arc<TableSchema>,
    names: Vec<String>,
    ordinals: Vec<usize>,
    lookup: HashMap<String, usize>,
}

impl Projection {
    /// Resolves `fields` against `schema`. `*` expands to every field.
    pub(crate) fn new(schema: Arc<TableSchema>, fields: &[&str]) -> std::result::Result<Self, FieldError> {
        let mut names = Vec::new();
        let mut ordinals = Vec::new();

        for field in fields {
            if field.trim() == "*" {
                for descriptor in schema.fields() {
                    names.push(descriptor.name().to_string());
                    ordinals.push(descriptor.ordinal());
                }
            } else {
                let descriptor = schema.require(field)?;
                names.push(field.trim().to_string());
                ordinals.push(descriptor.ordinal());
            }
        }

        let mut lookup = HashMap::with_capacity(names.len() * 2);
        for (position, (name, ordinal)) in names.iter().zip(&ordinals).enumerate() {
            lookup.entry(name.to_ascii_uppercase()).or_insert(position);
            lookup
                .entry(schema.fields()[*ordinal].name().to_ascii_uppercase())
                .or_insert(position);
        }

        Ok(Self {
            schema,
            names,
            ordinals,
            lookup,
        })
    }

    pub(crate) fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    /// Real field names in request order, as the engine expects them.
    pub(crate) fn engine_fields(&self) -> Vec<String> {
        self.ordinals
            .iter()
            .map(|o| self.schema.fields()[*o].name().to_string())
            .collect()
    }

    pub(crate) fn descriptor(&self, position: usize) -> &FieldDescriptor {
        &self.schema.fields()[self.ordinals[position]]
    }

    /// Returns `true` if the table field at `ordinal` is requested.
    pub(crate) fn covers(&self, ordinal: usize) -> bool {
        self.ordinals.contains(&ordinal)
    }

    /// Every position that exchanges the same table field as `position`.
    fn aliases(&self, position: usize) -> impl Iterator<Item = usize> + '_ {
        let ordinal = self.ordinals[position];
        self.ordinals
            .iter()
            .enumerate()
            .filter(move |(_, o)| **o == ordinal)
            .map(|(p, _)| p)
    }

    pub(crate) fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.ordinals.iter().map(|o| &self.schema.fields()[*o])
    }

    fn position(&self, name: &str) -> std::result::Result<usize, FieldError> {
        self.lookup
            .get(&name.trim().to_ascii_uppercase())
            .copied()
            .ok_or_else(|| FieldError::NotFound {
                table: self.schema.table().to_string(),
                field: name.to_string(),
                available: self.names.join(", "),
            })
    }
}

/// Identity of the cursor position a view was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowToken {
    pub(crate) session: u64,
    pub(crate) generation: u64,
}

/// A typed, mutable view over one cursor row.
///
/// Fields are addressed by name (case-insensitive). Requested tokens such as
/// `OID@` work as names too, as do the real names behind them.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use gpf_core::Geodatabase;
/// use gpf_core_common::mem::MemoryEngine;
/// use gpf_core_common::{RawField, Value};
///
/// let engine = MemoryEngine::new("C:/data/city.gdb");
/// engine
///     .create_table("Parcels", vec![RawField::new("OBJECTID", "OID").read_only(), RawField::new("AREA", "Double")])
///     .unwrap();
/// engine.insert("Parcels", vec![Value::Null, Value::Double(150.0)]).unwrap();
///
/// let gdb = Geodatabase::new(Arc::new(engine.clone()));
/// let table = engine.table("Parcels");
/// for row in gdb.search(&table, &["OID@", "AREA"], None).unwrap() {
///     let row = row.unwrap();
///     assert_eq!(row.get_as::<i64>("oid@").unwrap(), Some(1));
///     assert_eq!(row.get_as::<f64>("AREA").unwrap(), Some(150.0));
/// }
/// ```
#[derive(Debug)]
pub struct RowView {
    projection: Arc<Projection>,
    values: Vec<Value>,
    kind: CursorKind,
    token: RowToken,
    freshness: Arc<AtomicU64>,
    dirty: bool,
}

impl RowView {
    pub(crate) fn new(
        projection: Arc<Projection>,
        values: Vec<Value>,
        kind: CursorKind,
        token: RowToken,
        freshness: Arc<AtomicU64>,
    ) -> Self {
        Self {
            projection,
            values,
            kind,
            token,
            freshness,
            dirty: false,
        }
    }

    /// The table the row belongs to.
    #[must_use]
    pub fn table(&self) -> &TableHandle {
        self.projection.schema().table()
    }

    /// Names of the row's fields in request order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.projection.names().iter().map(String::as_str).collect()
    }

    /// Returns `true` while the row is still the cursor's current row.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.freshness.load(Ordering::SeqCst) == self.token.generation
    }

    /// Returns `true` once a `set` succeeded on this view.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the value of a field.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::StaleRow`] when the cursor moved on and
    /// [`FieldError::NotFound`] for unknown names.
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.ensure_fresh()?;
        let position = self.projection.position(name)?;
        Ok(&self.values[position])
    }

    /// Returns the value of a field converted to `T`, or `None` for null.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::TypeMismatch`] when the value is not a `T`, in
    /// addition to the errors of [`RowView::get`].
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<Option<T>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some).ok_or_else(|| {
            FieldError::TypeMismatch {
                table: self.table().to_string(),
                field: name.to_string(),
                expected: T::TYPE_NAME.to_string(),
                found: format!("{} {value}", value.type_name()),
            }
            .into()
        })
    }

    /// Returns the description of a coded-domain field's current code.
    ///
    /// # Errors
    ///
    /// Same as [`RowView::get`].
    pub fn description(&self, name: &str) -> Result<Option<&str>> {
        self.ensure_fresh()?;
        let position = self.projection.position(name)?;
        Ok(self
            .projection
            .descriptor(position)
            .domain()
            .and_then(|d| d.description_of(&self.values[position])))
    }

    /// Assigns a value to a field after validating it against the field.
    ///
    /// On failure the row keeps its previous value.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ReadOnlyViolation`] on search rows and
    /// non-editable fields, [`FieldError::TypeMismatch`],
    /// [`FieldError::DomainViolation`] or [`FieldError::NotNullViolation`] for
    /// values the field cannot hold, and the errors of [`RowView::get`].
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_fresh()?;
        let position = self.projection.position(name)?;
        let descriptor = self.projection.descriptor(position);
        let table = self.table().to_string();

        if !self.kind.is_writable() {
            return Err(FieldError::ReadOnlyViolation {
                table,
                field: descriptor.name().to_string(),
                reason: format!("rows of a {} cursor cannot be modified", self.kind),
            }
            .into());
        }
        if !descriptor.is_editable() {
            return Err(FieldError::ReadOnlyViolation {
                table,
                field: descriptor.name().to_string(),
                reason: "the field is maintained by the geodatabase".to_string(),
            }
            .into());
        }

        let coerced = descriptor.coerce(&table, value.into())?;
        // A field requested twice (`OWNER` and `owner`, `SHAPE@` and `SHAPE@XY`)
        // is written back once per position.
        let projection = Arc::clone(&self.projection);
        for alias in projection.aliases(position) {
            self.values[alias] = coerced.clone();
        }
        self.dirty = true;
        Ok(())
    }

    /// Returns the row as a map of requested field name to value.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::StaleRow`] when the cursor moved on.
    pub fn as_mapping(&self) -> Result<BTreeMap<String, Value>> {
        self.ensure_fresh()?;
        Ok(self
            .projection
            .names()
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect())
    }

    pub(crate) fn token(&self) -> RowToken {
        self.token
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    fn ensure_fresh(&self) -> Result<()> {
        if self.is_fresh() {
            Ok(())
        } else {
            Err(GpfError::from(CursorError::StaleRow {
                table: self.table().to_string(),
            }))
        }
    }
}
