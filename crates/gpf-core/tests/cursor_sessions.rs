mod common;

use gpf_core::{CursorError, FieldError, GpfError, SessionState};
use gpf_core_common::{EngineErrorKind, Value};

/// Search on `Parcels` with `AREA > 100`, projecting `ID` and `AREA`.
#[test]
fn test_parcels_search_scenario() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut ids = Vec::new();
    for row in gdb.search(&table, &["ID", "AREA"], Some("AREA > 100"))? {
        let row = row?;
        assert_eq!(row.field_names(), vec!["ID", "AREA"]);
        assert!(row.get_as::<f64>("AREA")?.is_some_and(|a| a > 100.0));
        assert!(matches!(
            row.get("OWNER"),
            Err(GpfError::Field(FieldError::NotFound { .. }))
        ));
        ids.extend(row.get_as::<i64>("ID")?);
    }

    assert_eq!(ids, vec![103, 104, 105, 106, 107, 108, 109, 110]);
    assert_eq!(engine.open_cursor_count(), 0);
    assert_eq!(engine.lock_count(), 0);
    Ok(())
}

#[test]
fn test_write_after_advance_is_stale() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.update(&table, &["OID@", "OWNER"], None)?;
    let mut first = cursor.next().expect("first row")?;
    first.set("OWNER", "City")?;
    let second = cursor.next().expect("second row")?;

    assert!(!first.is_fresh());
    assert!(matches!(
        cursor.write_current(&first),
        Err(GpfError::Cursor(CursorError::StaleRow { .. }))
    ));
    assert!(matches!(
        first.get("OWNER"),
        Err(GpfError::Cursor(CursorError::StaleRow { .. }))
    ));
    cursor.write_current(&second)?;
    cursor.close()?;

    let rows = engine.rows("Parcels").expect("table");
    assert_eq!(rows[0][3], Value::from("Owner 1"));
    assert_eq!(rows[1][3], Value::from("Owner 2"));
    Ok(())
}

#[test]
fn test_update_writes_and_deletes_current_row() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.update(&table, &["ID", "LANDUSE"], Some("ID <= 103"))?;
    while let Some(row) = cursor.next() {
        let mut row = row?;
        if row.get_as::<i64>("ID")? == Some(102) {
            cursor.delete_current(&row)?;
            assert!(!row.is_fresh());
            continue;
        }
        row.set("LANDUSE", "Commercial")?;
        assert!(row.is_dirty());
        cursor.write_current(&row)?;
    }
    assert_eq!(cursor.state(), SessionState::Closed);
    drop(cursor);

    let rows = engine.rows("Parcels").expect("table");
    assert_eq!(rows.len(), 9);
    assert_eq!(rows[0][4], Value::from("COM"));
    assert_eq!(rows[1][1], Value::Integer(103));
    assert_eq!(rows[1][4], Value::from("COM"));
    Ok(())
}

/// Requesting one field under two names still writes the new value.
#[test]
fn test_field_requested_twice_writes_new_value() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.update(&table, &["OWNER", "owner"], None)?;
    let mut row = cursor.next().expect("row")?;
    row.set("OWNER", "City")?;
    assert_eq!(row.as_mapping()?["owner"], Value::from("City"));
    cursor.write_current(&row)?;
    cursor.close()?;

    let rows = engine.rows("Parcels").expect("table");
    assert_eq!(rows[0][3], Value::from("City"));
    Ok(())
}

/// An I/O failure on row 5 of 10 releases the cursor before the error
/// reaches the caller.
#[test]
fn test_io_failure_releases_cursor() {
    let engine = common::parcels();
    let (gdb, collector) = common::connect(&engine);
    let table = engine.table("Parcels");
    engine.fail_on_row("Parcels", 5, EngineErrorKind::ConnectionLost);

    let mut seen = 0;
    let mut failure = None;
    let mut cursor = gdb.search(&table, &["ID"], None).expect("open");
    for row in cursor.by_ref() {
        match row {
            Ok(_) => seen += 1,
            Err(e) => {
                assert_eq!(engine.open_cursor_count(), 0);
                assert_eq!(engine.lock_count(), 0);
                failure = Some(e);
            },
        }
    }

    assert_eq!(seen, 4);
    assert!(matches!(
        failure,
        Some(GpfError::Cursor(CursorError::Io { .. }))
    ));
    assert_eq!(cursor.state(), SessionState::Closed);
    assert!(cursor.next().is_none());
    assert!(collector.contains("failed and was closed"));
}

#[test]
fn test_early_break_releases_cursor() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    for row in gdb.search(&table, &["*"], None)? {
        if row?.get_as::<i64>("ID")? == Some(103) {
            break;
        }
    }
    assert_eq!(engine.open_cursor_count(), 0);

    let result: gpf_core::Result<()> = (|| {
        for row in gdb.search(&table, &["OWNER"], None)? {
            row?.get("MISSING")?;
        }
        Ok(())
    })();
    assert!(result.is_err());
    assert_eq!(engine.open_cursor_count(), 0);
    assert_eq!(engine.lock_count(), 0);
    Ok(())
}

#[test]
fn test_open_failures_acquire_nothing() {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let parcels = engine.table("Parcels");

    let missing_table = engine.table("Roads");
    let cases = [
        gdb.search(&missing_table, &["*"], None).map(drop),
        gdb.search(&parcels, &["ID", "NOPE"], None).map(drop),
        gdb.search(&parcels, &[], None).map(drop),
        gdb.search(&parcels, &["ID"], Some("AREA >>> 1")).map(drop),
    ];
    for result in cases {
        assert!(
            matches!(result, Err(GpfError::Cursor(CursorError::Open { .. }))),
            "{result:?}"
        );
    }

    engine.lock_externally("Parcels");
    let err = gdb.update(&parcels, &["ID"], None).unwrap_err();
    assert!(err.to_string().contains("another process"), "{err}");
    engine.release_external_lock("Parcels");

    assert_eq!(engine.open_cursor_count(), 0);
    assert_eq!(engine.lock_count(), 0);
}

#[test]
fn test_insert_session_appends_rows() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, collector) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.insert(&table, &["ID", "AREA", "LANDUSE"])?;
    let mut row = cursor.new_row()?;
    row.set("ID", 200)?;
    row.set("AREA", 12)?;
    row.set("LANDUSE", "Residential")?;
    assert_eq!(cursor.append(&row)?, 11);
    row.set("ID", 201)?;
    assert_eq!(cursor.append(&row)?, 12);

    let missing_id = cursor.new_row()?;
    assert!(matches!(
        cursor.append(&missing_id),
        Err(GpfError::Field(FieldError::NotNullViolation { .. }))
    ));
    assert!(matches!(
        cursor.next(),
        Some(Err(GpfError::Cursor(CursorError::Unsupported { .. })))
    ));
    cursor.close()?;

    let rows = engine.rows("Parcels").expect("table");
    assert_eq!(rows.len(), 12);
    assert_eq!(rows[10][2], Value::Double(12.0));
    assert_eq!(rows[10][4], Value::from("RES"));
    assert!(collector.contains("after 2 rows"));
    Ok(())
}

/// Insert sessions that leave out a required field cannot append at all.
#[test]
fn test_insert_without_required_field() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.insert(&table, &["AREA"])?;
    let err = cursor
        .append_values(&[("AREA", Value::Double(5.0))])
        .unwrap_err();
    match err {
        GpfError::Field(FieldError::NotNullViolation { field, .. }) => assert_eq!(field, "ID"),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_search_rows_are_read_only() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");

    let mut cursor = gdb.search(&table, &["OWNER"], None)?;
    let mut row = cursor.next().expect("row")?;
    assert!(matches!(
        row.set("OWNER", "City"),
        Err(GpfError::Field(FieldError::ReadOnlyViolation { .. }))
    ));
    assert!(matches!(
        cursor.write_current(&row),
        Err(GpfError::Cursor(CursorError::Unsupported { .. }))
    ));
    Ok(())
}
