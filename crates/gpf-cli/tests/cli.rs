use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/parcels.json")
}

fn gpf() -> Command {
    Command::cargo_bin("gpf").expect("gpf binary")
}

/// `fields` prints the schema with domains and editability.
#[test]
fn test_fields_lists_schema() {
    gpf()
        .arg("fields")
        .arg(fixture())
        .arg("Parcels")
        .assert()
        .success()
        .stdout(predicate::str::contains("=== Fields ==="))
        .stdout(predicate::str::contains("LANDUSE"))
        .stdout(predicate::str::contains("LandUse"))
        .stdout(predicate::str::contains("Object ID: OBJECTID"));
}

#[test]
fn test_count_with_and_without_filter() {
    gpf()
        .arg("count")
        .arg(fixture())
        .arg("Parcels")
        .assert()
        .success()
        .stdout("4\n");

    gpf()
        .arg("count")
        .arg(fixture())
        .arg("Parcels")
        .args(["--where", "LANDUSE = 'COM'"])
        .assert()
        .success()
        .stdout("2\n");
}

/// A missing field makes the command fail and is named in the output.
#[test]
fn test_missing_fields() {
    gpf()
        .arg("missing")
        .arg(fixture())
        .arg("Parcels")
        .args(["ID", "OID@", "SHAPE@XY"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All 3 fields present"));

    gpf()
        .arg("missing")
        .arg(fixture())
        .arg("Parcels")
        .args(["ID", "HEIGHT"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("- HEIGHT"))
        .stdout(predicate::str::contains("- ID").not());
}

#[test]
fn test_dump_respects_fields_and_limit() {
    gpf()
        .arg("dump")
        .arg(fixture())
        .arg("Parcels")
        .args(["--fields", "ID,OWNER", "--limit", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ada Meyer"))
        .stdout(predicate::str::contains("City of Zurich"))
        .stdout(predicate::str::contains("Bruno Keller").not())
        .stdout(predicate::str::contains("LANDUSE").not())
        .stdout(predicate::str::contains("(2 rows)"));
}

/// Shapes print as their geometry kind, null shapes as empty cells.
#[test]
fn test_dump_shows_geometry_kind() {
    gpf()
        .arg("dump")
        .arg(fixture())
        .arg("Parcels")
        .args(["--fields", "ID,SHAPE@", "--where", "ID = 101"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<Point>"))
        .stdout(predicate::str::contains("(1 rows)"));
}

/// Library errors are printed with their recovery suggestion.
#[test]
fn test_unknown_table_prints_suggestion() {
    gpf()
        .arg("count")
        .arg(fixture())
        .arg("Hydrants")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Hydrants"))
        .stderr(predicate::str::contains("Suggestion:"));
}

#[test]
fn test_unknown_field_lists_available_fields() {
    gpf()
        .arg("dump")
        .arg(fixture())
        .arg("Parcels")
        .args(["--fields", "ID,HEIGHT"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HEIGHT"))
        .stderr(predicate::str::contains("Available fields"));
}

#[test]
fn test_missing_workspace_file() {
    gpf()
        .arg("fields")
        .arg("does/not/exist.json")
        .arg("Parcels")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot load workspace"));
}

/// With `--debug`, session feedback lands in the log file as well.
#[test]
fn test_log_file_receives_feedback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("gpf.log");

    gpf()
        .args(["--debug", "--log-file"])
        .arg(&log)
        .arg("count")
        .arg(fixture())
        .arg("Parcels")
        .assert()
        .success()
        .stdout("4\n");

    let content = std::fs::read_to_string(&log).expect("log written");
    assert!(content.contains("Opened"), "{content}");
    assert!(content.contains("Parcels"), "{content}");
}

#[test]
fn test_generated_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("poles.json");
    let workspace = json!({
        "workspace": "C:/data/network.gdb",
        "tables": [{
            "name": "Poles",
            "fields": [
                { "name": "OBJECTID", "type": "OID", "nullable": false, "editable": false },
                { "name": "HEIGHT", "type": "Double" }
            ],
            "rows": [[null, 8.0], [null, 10.5], [null, null]]
        }]
    });
    std::fs::write(&path, workspace.to_string()).expect("write fixture");

    gpf()
        .arg("count")
        .arg(&path)
        .arg("Poles")
        .args(["-w", "HEIGHT IS NOT NULL"])
        .assert()
        .success()
        .stdout("2\n");
}
