//! Small questions about tables answered through the registry and cursors.

use gpf_core_common::TableHandle;
use log::debug;

use crate::error::Result;
use crate::fields::FieldDescriptor;
use crate::workspace::Geodatabase;

/// Returns the `expected` fields (names or tokens) the table lacks, in the
/// order given. Matching is case-insensitive.
///
/// A table that cannot be described lacks every field.
pub fn missing_fields<'f>(gdb: &Geodatabase, table: &TableHandle, expected: &[&'f str]) -> Vec<&'f str> {
    match gdb.describe(table) {
        Ok(schema) => expected
            .iter()
            .copied()
            .filter(|name| !schema.contains(name))
            .collect(),
        Err(e) => {
            debug!("Cannot describe {table}, reporting all fields missing: {e}");
            expected.to_vec()
        },
    }
}

/// Counts the rows of `table` that match `filter`.
///
/// # Errors
///
/// Returns the errors of opening and reading a search session.
pub fn count_rows(gdb: &Geodatabase, table: &TableHandle, filter: Option<&str>) -> Result<u64> {
    let schema = gdb.describe(table)?;
    let field = schema
        .oid_field()
        .or_else(|| schema.fields().first())
        .map_or("*", FieldDescriptor::name);
    let mut count = 0;
    for row in gdb.search(table, &[field], filter)? {
        row?;
        count += 1;
    }
    Ok(count)
}

/// Returns the fields of `table` that clients can write.
///
/// # Errors
///
/// Returns a [`crate::error::SchemaError`] when the table cannot be described.
pub fn editable_fields(gdb: &Geodatabase, table: &TableHandle) -> Result<Vec<FieldDescriptor>> {
    Ok(gdb
        .describe(table)?
        .fields()
        .iter()
        .filter(|f| f.is_editable())
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Reporter;
    use gpf_core_common::mem::MemoryEngine;
    use gpf_core_common::{RawField, Value};
    use std::sync::Arc;

    fn setup() -> (MemoryEngine, Geodatabase) {
        let engine = MemoryEngine::new("C:/data/meta.gdb");
        engine
            .create_table(
                "Hydrants",
                vec![
                    RawField::new("OBJECTID", "OID").required().read_only(),
                    RawField::new("PRESSURE", "Double"),
                    RawField::new("GlobalID", "GlobalID").read_only(),
                ],
            )
            .unwrap();
        for pressure in [4.5, 6.0, 7.25] {
            engine
                .insert("Hydrants", vec![Value::Null, Value::Double(pressure)])
                .unwrap();
        }
        let gdb = Geodatabase::with_reporter(
            Arc::new(engine.clone()),
            Arc::new(Reporter::with_log_facade()),
        );
        (engine, gdb)
    }

    #[test]
    fn test_missing_fields() {
        let (engine, gdb) = setup();
        let table = engine.table("Hydrants");
        assert_eq!(
            missing_fields(&gdb, &table, &["pressure", "OID@", "SHAPE@", "OWNER"]),
            vec!["SHAPE@", "OWNER"]
        );
        let absent = engine.table("Valves");
        assert_eq!(missing_fields(&gdb, &absent, &["A", "B"]), vec!["A", "B"]);
    }

    #[test]
    fn test_count_rows() {
        let (engine, gdb) = setup();
        let table = engine.table("Hydrants");
        assert_eq!(count_rows(&gdb, &table, None).unwrap(), 3);
        assert_eq!(count_rows(&gdb, &table, Some("PRESSURE > 5")).unwrap(), 2);
        assert_eq!(engine.open_cursor_count(), 0);
    }

    #[test]
    fn test_editable_fields() {
        let (engine, gdb) = setup();
        let names: Vec<String> = editable_fields(&gdb, &engine.table("Hydrants"))
            .unwrap()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["PRESSURE"]);
    }
}
