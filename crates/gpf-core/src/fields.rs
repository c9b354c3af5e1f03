//! Field descriptors and the process-wide schema cache.
//!
//! [`FieldRegistry::describe`] resolves the schema of a table exactly once and
//! hands out the same [`TableSchema`] to every caller until the table is
//! invalidated. Concurrent first access is single-flight: one caller queries
//! the engine while the others wait on the table's slot and reuse its result.
//! A failed query leaves the slot empty, so the next caller tries again.
//!
//! Field names are case-insensitive throughout, as they are in a geodatabase.
//! Besides real field names a schema resolves the special tokens `OID@`,
//! `SHAPE@`, `SHAPE@XY`, `SHAPE@AREA` and `SHAPE@LENGTH`.

use std::collections::HashMap;
use std::sync::Arc;

use gpf_core_common::{
    CodedValue, FieldType, GeoprocessingEngine, RawField, RawSchema, TableHandle, Value,
};
use log::debug;
use parking_lot::Mutex;

use crate::error::{FieldError, SchemaError};

/// Token for the object id field.
pub const OID_TOKEN: &str = "OID@";
/// Token for the shape field.
pub const SHAPE_TOKEN: &str = "SHAPE@";
/// Token for the shape field, read for its coordinates.
pub const SHAPE_XY_TOKEN: &str = "SHAPE@XY";
/// Token for the shape area field.
pub const SHAPE_AREA_TOKEN: &str = "SHAPE@AREA";
/// Token for the shape length field.
pub const SHAPE_LENGTH_TOKEN: &str = "SHAPE@LENGTH";

const MAX_EXACT_F64_INTEGER: i64 = 1 << 53;
const MAX_EXACT_F32_INTEGER: i64 = 1 << 24;

/// A coded-value domain attached to a field.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedDomain {
    name: String,
    values: Vec<CodedValue>,
}

impl CodedDomain {
    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Legal code/description pairs.
    #[must_use]
    pub fn values(&self) -> &[CodedValue] {
        &self.values
    }

    /// Returns `true` if `code` is one of the domain's codes.
    #[must_use]
    pub fn contains_code(&self, code: &Value) -> bool {
        self.values.iter().any(|v| v.code == *code)
    }

    /// Returns the code whose description equals `description`
    /// (case-insensitive).
    #[must_use]
    pub fn code_for(&self, description: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|v| v.description.eq_ignore_ascii_case(description))
            .map(|v| &v.code)
    }

    /// Returns the description of `code`.
    #[must_use]
    pub fn description_of(&self, code: &Value) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.code == *code)
            .map(|v| v.description.as_str())
    }
}

/// Immutable description of one table field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    ordinal: usize,
    field_type: FieldType,
    nullable: bool,
    editable: bool,
    length: Option<usize>,
    domain: Option<CodedDomain>,
}

impl FieldDescriptor {
    /// Field name as reported by the engine.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the field in the table.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Declared type.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Whether the field accepts nulls.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether clients may write the field. Object ids and global ids never are.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Maximum text length, if declared.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Attached coded-value domain.
    #[must_use]
    pub fn domain(&self) -> Option<&CodedDomain> {
        self.domain.as_ref()
    }

    /// Returns `true` if a new row must supply a value for this field.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.editable && !self.nullable
    }

    /// Converts `value` into the representation stored in this field.
    ///
    /// Only lossless conversions are made: integers become doubles when they
    /// are exactly representable and integral doubles become integers when
    /// they fit the field's range. Text is never parsed. Domain fields accept
    /// a code or the description of a code; descriptions are stored as their
    /// code.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NotNullViolation`], [`FieldError::TypeMismatch`]
    /// or [`FieldError::DomainViolation`]. `table` is used in the message.
    pub fn coerce(&self, table: &str, value: Value) -> Result<Value, FieldError> {
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(FieldError::NotNullViolation {
                    table: table.to_string(),
                    field: self.name.clone(),
                })
            };
        }

        if let (Some(domain), Value::Text(text)) = (&self.domain, &value) {
            if let Some(code) = domain.code_for(text) {
                return Ok(code.clone());
            }
        }

        let coerced = self.coerce_type(table, value)?;

        match &self.domain {
            Some(domain) if !domain.contains_code(&coerced) => Err(FieldError::DomainViolation {
                table: table.to_string(),
                field: self.name.clone(),
                domain: domain.name.clone(),
                value: describe_value(&coerced),
            }),
            _ => Ok(coerced),
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn coerce_type(&self, table: &str, value: Value) -> Result<Value, FieldError> {
        let mismatch = |expected: String, value: &Value| FieldError::TypeMismatch {
            table: table.to_string(),
            field: self.name.clone(),
            expected,
            found: describe_value(value),
        };

        match self.field_type {
            FieldType::Text => match value {
                Value::Text(text) => match self.length {
                    Some(max) if text.chars().count() > max => Err(mismatch(
                        format!("text of at most {max} characters"),
                        &Value::Text(text),
                    )),
                    _ => Ok(Value::Text(text)),
                },
                other => Err(mismatch("text".to_string(), &other)),
            },
            FieldType::Guid | FieldType::GlobalId => match value {
                Value::Text(text) if is_braced_guid(&text) => Ok(Value::Text(text)),
                other => Err(mismatch(
                    "GUID text like {XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}".to_string(),
                    &other,
                )),
            },
            FieldType::SmallInteger | FieldType::Integer | FieldType::ObjectId => {
                let (min, max) = match self.field_type {
                    FieldType::SmallInteger => (i64::from(i16::MIN), i64::from(i16::MAX)),
                    FieldType::Integer => (i64::from(i32::MIN), i64::from(i32::MAX)),
                    _ => (i64::MIN, i64::MAX),
                };
                let expected = format!("{} in [{min}, {max}]", self.field_type);
                match value {
                    Value::Integer(i) if (min..=max).contains(&i) => Ok(Value::Integer(i)),
                    Value::Double(d)
                        if d.fract() == 0.0 && d >= min as f64 && d <= max as f64 =>
                    {
                        Ok(Value::Integer(d as i64))
                    },
                    other => Err(mismatch(expected, &other)),
                }
            },
            FieldType::Single | FieldType::Double => {
                let exact = if self.field_type == FieldType::Single {
                    MAX_EXACT_F32_INTEGER
                } else {
                    MAX_EXACT_F64_INTEGER
                };
                match value {
                    Value::Double(d)
                        if self.field_type == FieldType::Double
                            || !d.is_finite()
                            || d.abs() <= f64::from(f32::MAX) =>
                    {
                        Ok(Value::Double(d))
                    },
                    Value::Integer(i) if i.unsigned_abs() <= exact.unsigned_abs() => {
                        Ok(Value::Double(i as f64))
                    },
                    other => Err(mismatch(
                        format!("{} (integers up to {exact})", self.field_type),
                        &other,
                    )),
                }
            },
            FieldType::Date => match value {
                Value::Date(d) => Ok(Value::Date(d)),
                other => Err(mismatch("date".to_string(), &other)),
            },
            FieldType::Geometry => match value {
                Value::Geometry(g) => Ok(Value::Geometry(g)),
                other => Err(mismatch("geometry".to_string(), &other)),
            },
            FieldType::Blob => match value {
                Value::Blob(b) => Ok(Value::Blob(b)),
                other => Err(mismatch("blob".to_string(), &other)),
            },
        }
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Text(text) => format!("text '{text}'"),
        Value::Null | Value::Geometry(_) | Value::Blob(_) => value.to_string(),
        other => format!("{} {other}", other.type_name()),
    }
}

fn is_braced_guid(text: &str) -> bool {
    let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) else {
        return false;
    };
    let groups: Vec<&str> = inner.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// The resolved schema of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    table: TableHandle,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    oid_field: Option<usize>,
    shape_field: Option<usize>,
    area_field: Option<usize>,
    length_field: Option<usize>,
}

impl TableSchema {
    /// Builds a schema from the engine's description of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnsupportedType`] for type codes the toolkit
    /// cannot represent and [`SchemaError::DuplicateField`] when a name
    /// occurs twice (ignoring case).
    pub fn from_raw(table: TableHandle, raw: RawSchema) -> Result<Self, SchemaError> {
        let mut fields = Vec::with_capacity(raw.fields.len());
        let mut by_name = HashMap::with_capacity(raw.fields.len());

        for (ordinal, field) in raw.fields.into_iter().enumerate() {
            let descriptor = descriptor(&table, ordinal, field)?;
            if by_name
                .insert(descriptor.name.to_ascii_uppercase(), ordinal)
                .is_some()
            {
                return Err(SchemaError::DuplicateField {
                    table: table.to_string(),
                    field: descriptor.name,
                });
            }
            fields.push(descriptor);
        }

        let position = |name: Option<String>| {
            name.and_then(|n| by_name.get(&n.to_ascii_uppercase()).copied())
        };
        let oid_field = position(raw.oid_field);
        let shape_field = position(raw.shape_field);
        let area_field = position(raw.area_field);
        let length_field = position(raw.length_field);
        // Shape measures are derived from the geometry.
        for measure in [area_field, length_field].into_iter().flatten() {
            fields[measure].editable = false;
        }

        Ok(Self {
            table,
            fields,
            by_name,
            oid_field,
            shape_field,
            area_field,
            length_field,
        })
    }

    /// The table this schema describes.
    #[must_use]
    pub fn table(&self) -> &TableHandle {
        &self.table
    }

    /// Fields in table order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Field names in table order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(FieldDescriptor::name).collect()
    }

    /// The object id field.
    #[must_use]
    pub fn oid_field(&self) -> Option<&FieldDescriptor> {
        self.oid_field.map(|i| &self.fields[i])
    }

    /// The shape field (feature classes only).
    #[must_use]
    pub fn shape_field(&self) -> Option<&FieldDescriptor> {
        self.shape_field.map(|i| &self.fields[i])
    }

    /// Looks up a field or token, ignoring case.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        let key = name.trim().to_ascii_uppercase();
        let index = match key.as_str() {
            OID_TOKEN => self.oid_field,
            SHAPE_TOKEN | SHAPE_XY_TOKEN => self.shape_field,
            SHAPE_AREA_TOKEN => self.area_field,
            SHAPE_LENGTH_TOKEN => self.length_field,
            _ => self.by_name.get(&key).copied(),
        }?;
        self.fields.get(index)
    }

    /// Returns `true` if the field or token resolves.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Looks up a field or token.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NotFound`] listing the table's fields.
    pub fn require(&self, name: &str) -> Result<&FieldDescriptor, FieldError> {
        self.field(name).ok_or_else(|| FieldError::NotFound {
            table: self.table.to_string(),
            field: name.to_string(),
            available: self.field_names().join(", "),
        })
    }
}

fn descriptor(table: &TableHandle, ordinal: usize, raw: RawField) -> Result<FieldDescriptor, SchemaError> {
    let field_type =
        FieldType::from_code(&raw.type_code).ok_or_else(|| SchemaError::UnsupportedType {
            table: table.to_string(),
            field: raw.name.clone(),
            type_code: raw.type_code.clone(),
        })?;

    Ok(FieldDescriptor {
        name: raw.name,
        ordinal,
        field_type,
        nullable: raw.nullable,
        editable: raw.editable && !field_type.is_system_maintained(),
        length: raw.length,
        domain: raw.domain.map(|d| CodedDomain {
            name: d.name,
            values: d.values,
        }),
    })
}

type Slot = Arc<Mutex<Option<Arc<TableSchema>>>>;

/// Process-wide cache of table schemas.
///
/// Schemas are shared read-only through [`Arc`]. Each table owns a slot; the
/// first caller for an uncached table holds the slot's lock while it queries
/// the engine, so concurrent callers block on the slot and then reuse the
/// result instead of issuing their own query.
pub struct FieldRegistry {
    engine: Arc<dyn GeoprocessingEngine>,
    slots: Mutex<HashMap<TableHandle, Slot>>,
}

impl FieldRegistry {
    /// Creates an empty registry backed by `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn GeoprocessingEngine>) -> Self {
        Self {
            engine,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the schema of `table`, querying the engine on first use.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the engine cannot describe the table or
    /// reports a field the toolkit cannot represent. Failures are not cached.
    pub fn describe(&self, table: &TableHandle) -> Result<Arc<TableSchema>, SchemaError> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(table.clone()).or_default())
        };

        let mut cached = slot.lock();
        if let Some(schema) = cached.as_ref() {
            return Ok(Arc::clone(schema));
        }

        debug!("Describing {table}");
        let raw = self
            .engine
            .describe_schema(table)
            .map_err(|source| SchemaError::DescribeFailed {
                table: table.to_string(),
                source,
            })?;
        let schema = Arc::new(TableSchema::from_raw(table.clone(), raw)?);
        *cached = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Drops the cached schema of `table`; the next `describe` queries again.
    pub fn invalidate(&self, table: &TableHandle) {
        if self.slots.lock().remove(table).is_some() {
            debug!("Invalidated schema of {table}");
        }
    }

    /// Drops every cached schema.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Returns `true` if the schema of `table` is cached.
    #[must_use]
    pub fn is_cached(&self, table: &TableHandle) -> bool {
        let slot = self.slots.lock().get(table).cloned();
        slot.is_some_and(|s| s.lock().is_some())
    }
}

impl std::fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRegistry")
            .field("tables", &self.slots.lock().len())
            .finish_non_exhaustive()
    }
}
