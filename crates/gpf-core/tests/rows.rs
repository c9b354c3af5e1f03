mod common;

use chrono::NaiveDate;
use gpf_core::{FieldError, GpfError};
use gpf_core_common::{RawField, Value};

/// A value outside the coded domain is rejected and the row keeps its value.
#[test]
fn test_domain_violation_leaves_value_unchanged() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.update(&table, &["LANDUSE"], None)?;
    let mut row = cursor.next().expect("row")?;
    assert_eq!(row.get("LANDUSE")?, &Value::from("RES"));
    assert_eq!(row.description("LANDUSE")?, Some("Residential"));

    for rejected in [Value::from("IND"), Value::from("AGR")] {
        let err = row.set("LANDUSE", rejected).unwrap_err();
        assert!(matches!(err, GpfError::Field(FieldError::DomainViolation { .. })), "{err}");
        assert_eq!(row.get("LANDUSE")?, &Value::from("RES"));
    }
    assert!(!row.is_dirty());

    row.set("landuse", "commercial")?;
    assert_eq!(row.get("LANDUSE")?, &Value::from("COM"));
    Ok(())
}

#[test]
fn test_type_checks_on_set() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.update(&table, &["OID@", "ID", "AREA", "OWNER"], None)?;
    let mut row = cursor.next().expect("row")?;

    assert!(matches!(
        row.set("ID", "101"),
        Err(GpfError::Field(FieldError::TypeMismatch { .. }))
    ));
    assert!(matches!(
        row.set("ID", 3_000_000_000_i64),
        Err(GpfError::Field(FieldError::TypeMismatch { .. }))
    ));
    assert!(matches!(
        row.set("ID", Value::Null),
        Err(GpfError::Field(FieldError::NotNullViolation { .. }))
    ));
    assert!(matches!(
        row.set("OID@", 7),
        Err(GpfError::Field(FieldError::ReadOnlyViolation { .. }))
    ));
    assert!(matches!(
        row.set("OWNER", "x".repeat(33)),
        Err(GpfError::Field(FieldError::TypeMismatch { .. }))
    ));

    row.set("ID", 250.0)?;
    row.set("AREA", 17)?;
    assert_eq!(row.get("ID")?, &Value::Integer(250));
    assert_eq!(row.get("AREA")?, &Value::Double(17.0));
    assert_eq!(row.get_as::<i64>("OBJECTID")?, Some(1));
    assert!(matches!(
        row.get_as::<String>("ID"),
        Err(GpfError::Field(FieldError::TypeMismatch { .. }))
    ));

    let mapping = row.as_mapping()?;
    assert_eq!(mapping.len(), 4);
    assert_eq!(mapping["OWNER"], Value::from("Owner 1"));
    Ok(())
}

#[test]
fn test_dates_and_guids() -> gpf_core::Result<()> {
    let engine = common::parcels();
    engine
        .create_table(
            "Inspections",
            vec![
                RawField::new("OBJECTID", "OID").read_only(),
                RawField::new("VISITED", "Date"),
                RawField::new("ASSET", "GUID"),
                RawField::new("GlobalID", "GlobalID"),
            ],
        )
        .expect("create Inspections");
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Inspections");

    let visited = NaiveDate::from_ymd_opt(2024, 5, 17)
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .expect("valid date");
    let mut cursor = gdb.insert(&table, &["VISITED", "ASSET", "GlobalID"])?;
    let mut row = cursor.new_row()?;
    row.set("VISITED", visited)?;
    row.set("ASSET", "{0F8FAD5B-D9CB-469F-A165-70867728950E}")?;
    assert!(matches!(
        row.set("ASSET", "0F8FAD5B-D9CB-469F-A165-70867728950E"),
        Err(GpfError::Field(FieldError::TypeMismatch { .. }))
    ));
    assert!(matches!(
        row.set("GlobalID", "{0F8FAD5B-D9CB-469F-A165-70867728950E}"),
        Err(GpfError::Field(FieldError::ReadOnlyViolation { .. }))
    ));
    cursor.append(&row)?;
    cursor.close()?;

    let mut search = gdb.search(&table, &["VISITED"], None)?;
    let row = search.next().expect("row")?;
    assert_eq!(row.get_as::<chrono::NaiveDateTime>("VISITED")?, Some(visited));
    Ok(())
}

/// Shape measures follow the geometry and cannot be written.
#[test]
fn test_shape_measures_are_read_only() -> gpf_core::Result<()> {
    let engine = common::parcels();
    engine
        .create_table(
            "Lots",
            vec![
                RawField::new("OBJECTID", "OID").read_only(),
                RawField::new("SHAPE", "Geometry"),
                RawField::new("SHAPE_Area", "Double"),
                RawField::new("SHAPE_Length", "Double"),
            ],
        )
        .expect("create Lots");
    engine
        .insert("Lots", vec![Value::Null, Value::Null, Value::Double(12.5), Value::Double(14.0)])
        .expect("insert lot");
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Lots");

    let mut cursor = gdb.update(&table, &["SHAPE@AREA", "SHAPE@LENGTH"], None)?;
    let mut row = cursor.next().expect("row")?;
    for field in ["SHAPE@AREA", "SHAPE@LENGTH", "shape_area"] {
        assert!(matches!(
            row.set(field, 99.0),
            Err(GpfError::Field(FieldError::ReadOnlyViolation { .. }))
        ));
    }
    assert_eq!(row.get_as::<f64>("SHAPE@AREA")?, Some(12.5));
    Ok(())
}
