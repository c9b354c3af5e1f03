//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions
//! for presenting table schemas and rows in a human-readable format.

use tabled::builder::Builder;
use tabled::{Table, Tabled};

use gpf_core::TableSchema;
use gpf_core_common::Value;

/// Table row representation for displaying field information.
#[derive(Tabled)]
pub struct FieldRow {
    /// Name of the field.
    #[tabled(rename = "Field")]
    pub name: String,
    /// Type code of the field.
    #[tabled(rename = "Type")]
    pub field_type: String,
    /// Whether the field accepts null values.
    #[tabled(rename = "Nullable")]
    pub nullable: String,
    /// Whether clients can write the field.
    #[tabled(rename = "Editable")]
    pub editable: String,
    /// Maximum text length, if any.
    #[tabled(rename = "Length")]
    pub length: String,
    /// Coded-value domain, if any.
    #[tabled(rename = "Domain")]
    pub domain: String,
}

fn yes_no(flag: bool) -> String {
    if flag { "Yes" } else { "No" }.to_string()
}

/// Builds one [`FieldRow`] per field of `schema`.
pub fn field_rows(schema: &TableSchema) -> Vec<FieldRow> {
    schema
        .fields()
        .iter()
        .map(|f| FieldRow {
            name: f.name().to_string(),
            field_type: f.field_type().to_string(),
            nullable: yes_no(f.is_nullable()),
            editable: yes_no(f.is_editable()),
            length: f.length().map_or_else(|| "-".to_string(), |l| l.to_string()),
            domain: f
                .domain()
                .map_or_else(|| "-".to_string(), |d| d.name().to_string()),
        })
        .collect()
}

/// Display the schema of a table.
pub fn display_schema(schema: &TableSchema) {
    println!("\nTable: {}", schema.table());
    if let Some(oid) = schema.oid_field() {
        println!("Object ID: {}", oid.name());
    }
    if let Some(shape) = schema.shape_field() {
        println!("Shape: {}", shape.name());
    }

    println!("\n=== Fields ===");
    let table = Table::new(field_rows(schema)).to_string();
    println!("{table}");
}

/// Renders one cell. Nulls are left blank.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Renders rows under the given headers.
pub fn rows_table(headers: &[&str], rows: &[Vec<Value>]) -> String {
    let mut builder = Builder::default();
    builder.push_record(headers.iter().map(|h| (*h).to_string()));
    for row in rows {
        builder.push_record(row.iter().map(cell));
    }
    builder.build().to_string()
}
