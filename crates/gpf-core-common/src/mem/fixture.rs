//! JSON fixtures for [`MemoryEngine`].
//!
//! A fixture describes one workspace:
//!
//! ```json
//! {
//!   "workspace": "C:/data/city.gdb",
//!   "tables": [{
//!     "name": "Parcels",
//!     "fields": [
//!       { "name": "OBJECTID", "type": "OID", "nullable": false, "editable": false },
//!       { "name": "USE", "type": "String", "length": 3,
//!         "domain": { "name": "LandUse", "values": [{ "code": "RES", "description": "Residential" }] } },
//!       { "name": "SHAPE", "type": "Geometry" }
//!     ],
//!     "rows": [[null, "RES", { "type": "Point", "coordinates": [8.5, 47.3] }]]
//!   }]
//! }
//! ```
//!
//! Geometries are GeoJSON geometry objects, dates are `"YYYY-MM-DD"` or
//! `"YYYY-MM-DD HH:MM:SS"` strings and blobs are arrays of bytes.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use thiserror::Error;

use super::MemoryEngine;
use crate::engine::{CodedValue, EngineError, RawDomain, RawField};
use crate::value::{FieldType, Value};

/// Errors raised while loading a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The fixture file could not be read.
    #[error("Failed to read fixture '{path}': {source}")]
    Read {
        /// Fixture path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The fixture is not valid JSON or does not match the expected layout.
    #[error("Invalid fixture JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field declares a type code the toolkit does not know.
    #[error("Field '{field}' of table '{table}' has unsupported type '{type_code}'")]
    UnsupportedType {
        /// Table name.
        table: String,
        /// Field name.
        field: String,
        /// The offending type code.
        type_code: String,
    },

    /// A value does not fit its field.
    #[error("Invalid value for field '{field}' of table '{table}': {reason}")]
    InvalidValue {
        /// Table name.
        table: String,
        /// Field name.
        field: String,
        /// What is wrong with the value.
        reason: String,
    },

    /// The engine rejected the fixture content.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Deserialize)]
struct WorkspaceFixture {
    workspace: String,
    #[serde(default)]
    tables: Vec<TableFixture>,
}

#[derive(Debug, Deserialize)]
struct TableFixture {
    name: String,
    fields: Vec<FieldFixture>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FieldFixture {
    name: String,
    #[serde(rename = "type")]
    type_code: String,
    #[serde(default = "default_true")]
    nullable: bool,
    #[serde(default = "default_true")]
    editable: bool,
    #[serde(default)]
    length: Option<usize>,
    #[serde(default)]
    domain: Option<DomainFixture>,
}

#[derive(Debug, Deserialize)]
struct DomainFixture {
    name: String,
    values: Vec<CodedValueFixture>,
}

#[derive(Debug, Deserialize)]
struct CodedValueFixture {
    code: serde_json::Value,
    description: String,
}

impl MemoryEngine {
    /// Builds an engine from fixture JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] when the JSON is malformed or a value does
    /// not match its field type.
    pub fn from_fixture_str(json: &str) -> Result<Self, FixtureError> {
        let fixture: WorkspaceFixture = serde_json::from_str(json)?;
        let engine = MemoryEngine::new(fixture.workspace);

        for table in fixture.tables {
            let mut fields = Vec::with_capacity(table.fields.len());
            let mut types = Vec::with_capacity(table.fields.len());
            for field in table.fields {
                let field_type = FieldType::from_code(&field.type_code).ok_or_else(|| {
                    FixtureError::UnsupportedType {
                        table: table.name.clone(),
                        field: field.name.clone(),
                        type_code: field.type_code.clone(),
                    }
                })?;
                let domain = field
                    .domain
                    .map(|domain| -> Result<RawDomain, FixtureError> {
                        let values = domain
                            .values
                            .into_iter()
                            .map(|v| {
                                Ok(CodedValue {
                                    code: json_to_value(&table.name, &field.name, field_type, v.code)?,
                                    description: v.description,
                                })
                            })
                            .collect::<Result<Vec<_>, FixtureError>>()?;
                        Ok(RawDomain {
                            name: domain.name,
                            values,
                        })
                    })
                    .transpose()?;
                types.push((field.name.clone(), field_type));
                fields.push(RawField {
                    name: field.name,
                    type_code: field.type_code,
                    nullable: field.nullable,
                    editable: field.editable,
                    length: field.length,
                    domain,
                });
            }

            engine.create_table(&table.name, fields)?;
            for row in table.rows {
                let values = row
                    .into_iter()
                    .zip(&types)
                    .map(|(json, (name, field_type))| json_to_value(&table.name, name, *field_type, json))
                    .collect::<Result<Vec<_>, _>>()?;
                engine.insert(&table.name, values)?;
            }
        }

        Ok(engine)
    }

    /// Builds an engine from a fixture file.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] when the file cannot be read or is invalid.
    pub fn from_fixture_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_fixture_str(&json)
    }
}

fn json_to_value(
    table: &str,
    field: &str,
    field_type: FieldType,
    json: serde_json::Value,
) -> Result<Value, FixtureError> {
    let invalid = |reason: String| FixtureError::InvalidValue {
        table: table.to_string(),
        field: field.to_string(),
        reason,
    };

    if json.is_null() {
        return Ok(Value::Null);
    }

    match field_type {
        FieldType::SmallInteger | FieldType::Integer | FieldType::ObjectId => json
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(|| invalid(format!("expected an integer, found {json}"))),
        FieldType::Single | FieldType::Double => json
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| invalid(format!("expected a number, found {json}"))),
        FieldType::Text | FieldType::Guid | FieldType::GlobalId => json
            .as_str()
            .map(Value::from)
            .ok_or_else(|| invalid(format!("expected a string, found {json}"))),
        FieldType::Date => {
            let text = json
                .as_str()
                .ok_or_else(|| invalid(format!("expected a date string, found {json}")))?;
            parse_date(text)
                .map(Value::Date)
                .ok_or_else(|| invalid(format!("cannot parse date '{text}'")))
        },
        FieldType::Geometry => {
            let geometry: geojson::Geometry = serde_json::from_value(json)
                .map_err(|e| invalid(format!("expected a GeoJSON geometry: {e}")))?;
            geo_types::Geometry::<f64>::try_from(geometry)
                .map(Value::Geometry)
                .map_err(|e| invalid(format!("unsupported geometry: {e}")))
        },
        FieldType::Blob => {
            let bytes: Vec<u8> = serde_json::from_value(json)
                .map_err(|e| invalid(format!("expected an array of bytes: {e}")))?;
            Ok(Value::Blob(bytes))
        },
    }
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
