mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, orders_csv, xlsx_bytes};
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;

fn bin() -> Command {
    Command::cargo_bin("tabular-reconcile").expect("binary exists")
}

#[test]
fn sniff_reports_semicolon_and_headers() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("people.csv", "name;age\nAda;36\n");
    bin()
        .args(["sniff", "-i", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("delimiter: ;"))
        .stdout(contains("headers: true"));
}

#[test]
fn browse_prints_a_table_window() {
    let workspace = TestWorkspace::new();
    workspace.write("orders.csv", &orders_csv(12, 0));
    bin()
        .args([
            "browse",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "orders.csv",
            "--max-rows",
            "2",
            "--offset",
            "3",
        ])
        .assert()
        .success()
        .stdout(contains("order_id"))
        .stdout(contains("9.50"))
        .stdout(contains("12.50"))
        .stdout(contains("15.50").not());
}

#[test]
fn browse_json_reports_totals_and_sheets() {
    let workspace = TestWorkspace::new();
    workspace.write_bytes(
        "book.xlsx",
        &xlsx_bytes(&[("First", vec![vec!["a"], vec!["1"]]), ("Second", vec![vec!["b"]])]),
    );
    let output = bin()
        .args([
            "browse",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "book.xlsx",
            "--json",
        ])
        .output()
        .expect("run browse");
    assert!(output.status.success());
    let response: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(response["format"], "spreadsheet");
    assert_eq!(response["sheet"], "First");
    assert_eq!(response["sheets"], serde_json::json!(["First", "Second"]));
    assert_eq!(response["total_rows"], 2);
    assert_eq!(response["rows"], serde_json::json!([["1"]]));
}

#[test]
fn browse_rejects_out_of_range_rows() {
    let workspace = TestWorkspace::new();
    workspace.write("a.csv", "x\n1\n");
    bin()
        .args([
            "browse",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "a.csv",
            "--max-rows",
            "0",
        ])
        .assert()
        .failure()
        .stderr(contains("max_rows must be between 1 and 10000"));
}

#[test]
fn stream_emits_ordered_ndjson_frames() {
    let workspace = TestWorkspace::new();
    workspace.write("orders.csv", &orders_csv(5, 0));
    let output = bin()
        .args([
            "stream",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "orders.csv",
            "--chunk-size",
            "2",
        ])
        .output()
        .expect("run stream");
    assert!(output.status.success());

    let frames: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("frame"))
        .collect();
    let kinds: Vec<&str> = frames.iter().map(|f| f["frame"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["metadata", "header", "data", "data", "data", "complete"]);
    assert_eq!(frames[1]["columns"], serde_json::json!(["order_id", "amount"]));
    assert_eq!(frames[4]["progress"]["rows_processed"], 5);
    assert_eq!(frames[5]["rows_processed"], 5);
}

#[test]
fn stream_of_missing_source_ends_with_an_error_frame() {
    let workspace = TestWorkspace::new();
    bin()
        .args([
            "stream",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "absent.csv",
        ])
        .assert()
        .failure()
        .stdout(contains("\"frame\":\"error\""))
        .stdout(contains("\"code\":\"not_found\""));
}

#[test]
fn sheets_lists_workbook_sheets() {
    let workspace = TestWorkspace::new();
    workspace.write_bytes(
        "book.xlsx",
        &xlsx_bytes(&[("Alpha", vec![vec!["a"]]), ("Beta", vec![vec!["b"]])]),
    );
    bin()
        .args([
            "sheets",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "book.xlsx",
        ])
        .assert()
        .success()
        .stdout("Alpha\nBeta\n");
}

#[test]
fn export_loads_files_into_the_csv_store() {
    let workspace = TestWorkspace::new();
    workspace.write("jan.csv", &orders_csv(3, 0));
    workspace.write("feb.csv", "Order ID,Amount\n10,4.50\n");
    let store = workspace.store_dir();

    let output = bin()
        .args([
            "export",
            "--root",
            workspace.path().to_str().unwrap(),
            "--store",
            store.to_str().unwrap(),
            "--database",
            "sales",
            "--table",
            "orders",
            "-f",
            "jan.csv",
            "-f",
            "feb.csv",
        ])
        .output()
        .expect("run export");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let outcome: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(outcome["state"], "completed");
    assert_eq!(outcome["rows_written"], 4);
    let data = fs::read_to_string(store.join("sales").join("orders.csv")).unwrap();
    assert_eq!(data.lines().next(), Some("amount,order_id"));
    assert_eq!(data.lines().count(), 5);
    assert!(store.join("sales").join("orders.schema.yaml").is_file());
}

#[test]
fn export_create_into_existing_table_fails() {
    let workspace = TestWorkspace::new();
    workspace.write("jan.csv", &orders_csv(3, 0));
    let store = workspace.store_dir();
    let args = [
        "export",
        "--root",
        workspace.path().to_str().unwrap(),
        "--store",
        store.to_str().unwrap(),
        "--table",
        "orders",
        "-f",
        "jan.csv",
    ];
    bin().args(args).assert().success();
    bin()
        .args(args)
        .assert()
        .failure()
        .stderr(contains("already exists"));
}

#[test]
fn config_file_overrides_row_limits() {
    let workspace = TestWorkspace::new();
    workspace.write("orders.csv", &orders_csv(10, 0));
    let config = workspace.write("engine.yaml", "default_max_rows: 2\nmax_rows_limit: 5\n");
    let output = bin()
        .args([
            "--config",
            config.to_str().unwrap(),
            "browse",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "orders.csv",
            "--json",
        ])
        .output()
        .expect("run browse");
    assert!(output.status.success());
    let response: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(response["rows_returned"], 2);

    bin()
        .args([
            "--config",
            config.to_str().unwrap(),
            "browse",
            "--root",
            workspace.path().to_str().unwrap(),
            "--id",
            "orders.csv",
            "--max-rows",
            "6",
        ])
        .assert()
        .failure()
        .stderr(contains("between 1 and 5"));
}
