mod common;

use std::time::Duration;

use anyhow::anyhow;
use gpf_core::{EditError, EditState, FieldError, GpfError, RetryPolicy};
use gpf_core_common::{EngineErrorKind, Value, WorkspacePath};

fn owners(engine: &gpf_core_common::mem::MemoryEngine) -> Vec<Value> {
    engine
        .rows("Parcels")
        .expect("table")
        .into_iter()
        .map(|row| row[3].clone())
        .collect()
}

/// At depth 2 and 3 only the outermost commit reaches the engine.
#[test]
fn test_only_outermost_commit_is_real() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, collector) = common::connect(&engine);
    let ws = engine.workspace().clone();

    let mut outer = gdb.begin_edit(&ws)?;
    let mut middle = gdb.begin_edit(&ws)?;
    let mut inner = middle.nest(&ws)?;
    assert_eq!(inner.depth(), 3);

    inner.commit()?;
    middle.commit()?;
    assert_eq!(engine.edits_committed(), 0);
    assert_eq!(outer.state(), EditState::Active);

    outer.commit()?;
    assert_eq!(engine.edits_begun(), 1);
    assert_eq!(engine.edits_committed(), 1);
    assert_eq!(outer.state(), EditState::Committed);
    assert!(collector.contains("Committed edits on"));

    assert!(matches!(
        outer.commit(),
        Err(GpfError::Edit(EditError::Closed { .. }))
    ));
    Ok(())
}

/// The outer handle cannot commit around a nested handle that is still open,
/// so a later rollback of the nested handle is never reported as committed.
#[test]
fn test_outer_commit_waits_for_nested_handles() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let ws = engine.workspace().clone();
    let table = engine.table("Parcels");

    let mut outer = gdb.begin_edit(&ws)?;
    let inner = gdb.begin_edit(&ws)?;
    gdb.insert(&table, &["ID"])?
        .append_values(&[("ID", Value::Integer(500))])?;

    let err = outer.commit().unwrap_err();
    assert!(matches!(err, GpfError::Edit(EditError::NestedOpen { open: 1, .. })), "{err}");
    assert!(err.recovery_suggestion().is_some());
    assert!(!outer.is_finished());
    assert_eq!(outer.state(), EditState::Active);
    assert_eq!(engine.edits_committed(), 0);

    drop(inner);
    assert_eq!(engine.edits_rolled_back(), 0);
    match outer.commit().unwrap_err() {
        GpfError::Edit(EditError::Tainted { original, .. }) => {
            assert!(matches!(*original, GpfError::Edit(EditError::Abandoned { .. })));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.edits_committed(), 0);
    assert_eq!(engine.edits_rolled_back(), 1);
    assert_eq!(engine.row_count("Parcels"), Some(10));
    assert_eq!(outer.state(), EditState::RolledBack);
    Ok(())
}

#[test]
fn test_outer_commit_after_nested_commit() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let ws = engine.workspace().clone();
    let table = engine.table("Parcels");

    let mut outer = gdb.begin_edit(&ws)?;
    let mut inner = gdb.begin_edit(&ws)?;
    gdb.insert(&table, &["ID"])?
        .append_values(&[("ID", Value::Integer(500))])?;
    assert!(outer.commit().is_err());

    inner.commit()?;
    outer.commit()?;
    assert_eq!(engine.edits_committed(), 1);
    assert_eq!(engine.row_count("Parcels"), Some(11));
    Ok(())
}

/// Row mutation code that fails after 3 of 10 writes leaves no write applied.
#[test]
fn test_failure_after_three_writes_rolls_back_everything() {
    let engine = common::parcels();
    let (gdb, collector) = common::connect(&engine);
    let table = engine.table("Parcels");
    let before = owners(&engine);

    let result: gpf_core::Result<()> = gdb.edit(engine.workspace(), |_| {
        let mut cursor = gdb.update(&table, &["OWNER"], None)?;
        let mut written = 0;
        while let Some(row) = cursor.next() {
            let mut row = row?;
            if written == 3 {
                return Err(anyhow!("could not geocode owner address").into());
            }
            row.set("OWNER", "Municipality")?;
            cursor.write_current(&row)?;
            written += 1;
        }
        Ok(())
    });

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "could not geocode owner address");
    assert_eq!(owners(&engine), before);
    assert_eq!(engine.edits_rolled_back(), 1);
    assert_eq!(engine.edits_committed(), 0);
    assert_eq!(engine.open_cursor_count(), 0);
    assert!(collector.contains("Rolled back edits on"));
}

/// A cursor failure swallowed by the caller still taints the edit.
#[test]
fn test_swallowed_cursor_failure_taints_commit() {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let table = engine.table("Parcels");
    let before = owners(&engine);
    engine.fail_on_row("Parcels", 5, EngineErrorKind::LockPreempted);

    let result = gdb.edit(engine.workspace(), |_| {
        let mut cursor = gdb.update(&table, &["OWNER"], None)?;
        while let Some(row) = cursor.next() {
            let Ok(mut row) = row else {
                break;
            };
            row.set("OWNER", "Municipality")?;
            cursor.write_current(&row)?;
        }
        Ok(())
    });

    match result.unwrap_err() {
        GpfError::Edit(EditError::Tainted { original, .. }) => {
            assert!(original.to_string().contains("Failed to read row 5"), "{original}");
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(owners(&engine), before);
    assert_eq!(engine.lock_count(), 0);
}

#[test]
fn test_inner_edit_failure_rolls_back_outer() {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let ws = engine.workspace().clone();
    let table = engine.table("Parcels");

    let result = gdb.edit(&ws, |_| {
        gdb.insert(&table, &["ID"])?
            .append_values(&[("ID", Value::Integer(500))])?;
        let inner: gpf_core::Result<()> = gdb.edit(&ws, |_| {
            let mut cursor = gdb.insert(&table, &["ID", "LANDUSE"])?;
            cursor.append_values(&[("ID", Value::Integer(501)), ("LANDUSE", Value::from("IND"))])?;
            Ok(())
        });
        assert!(matches!(
            inner,
            Err(GpfError::Field(FieldError::DomainViolation { .. }))
        ));
        Ok(())
    });

    match result.unwrap_err() {
        GpfError::Edit(EditError::Tainted { original, .. }) => {
            assert!(matches!(
                *original,
                GpfError::Field(FieldError::DomainViolation { .. })
            ));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.row_count("Parcels"), Some(10));
    assert_eq!(engine.edits_begun(), 1);
    assert_eq!(engine.edits_rolled_back(), 1);
}

#[test]
fn test_dropped_session_during_panic_rolls_back() {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let ws = engine.workspace().clone();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _session = gdb.begin_edit(&ws).expect("begin");
        engine
            .insert("Parcels", vec![Value::Null, Value::Integer(999)])
            .expect("insert");
        panic!("script bug");
    }));

    assert!(outcome.is_err());
    assert_eq!(engine.row_count("Parcels"), Some(10));
    assert!(!gdb.edits().is_editing(&ws));
    assert!(gdb.begin_edit(&ws).is_ok());
}

#[test]
fn test_nested_edit_on_other_workspace_is_rejected() -> gpf_core::Result<()> {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let mut session = gdb.begin_edit(engine.workspace())?;

    let err = gdb
        .begin_edit(&WorkspacePath::new("D:/other.gdb"))
        .unwrap_err();
    assert!(matches!(err, GpfError::Edit(EditError::NestedMismatch { .. })));
    assert!(!session.is_tainted());
    session.commit()?;
    Ok(())
}

/// Independent edits from two callers: the second fails fast, or waits when
/// asked to.
#[test]
fn test_workspace_lock_conflict_and_retry() {
    let engine = common::parcels();
    let (gdb, _) = common::connect(&engine);
    let ws = engine.workspace().clone();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    std::thread::scope(|scope| {
        let (holder_gdb, holder_ws) = (&gdb, &ws);
        scope.spawn(move || {
            let mut session = holder_gdb.begin_edit(holder_ws).expect("holder begins");
            locked_tx.send(()).expect("notify");
            release_rx.recv().expect("wait for release");
            std::thread::sleep(Duration::from_millis(20));
            session.commit().expect("holder commits");
        });

        locked_rx.recv().expect("holder started");
        let err = gdb.begin_edit(&ws).unwrap_err();
        assert!(err.is_lock_conflict());
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());

        release_tx.send(()).expect("release");
        let policy = RetryPolicy {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(10),
            multiplier: 1.0,
        };
        let mut session = gdb.begin_edit_with_retry(&ws, &policy).expect("retry wins");
        session.commit().expect("commit");
    });

    assert_eq!(engine.edits_committed(), 2);
}
