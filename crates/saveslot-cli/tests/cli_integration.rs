use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn run_saveslot<I, S>(dir: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_saveslot"))
        .arg("--dir")
        .arg(dir)
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute saveslot binary: {err}"))
}

fn run_json<I, S>(dir: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_saveslot(dir, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "saveslot command failed (status={}):\nstdout:\n{stdout}\nstderr:\n{stderr}",
            output.status
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in output: {value}"))
}

fn temp_save_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"))
}

#[test]
fn save_load_delete_cycle() {
    let tmp = temp_save_dir();
    let dir = tmp.path();

    let first = run_json(dir, ["save", "--id", "DataA", "--health", "100", "--mana", "150"]);
    assert_eq!(as_str(&first, "id"), "DataA");
    assert_eq!(as_str(&first, "type_tag"), "player");

    // Second save of the same id must come back renamed, not overwritten.
    let second = run_json(dir, ["save", "--id", "DataA"]);
    assert_eq!(as_str(&second, "id"), "DataA_0");

    let listing = run_json(dir, ["list"]);
    assert!(listing.get("DataA").is_some());
    assert!(listing.get("DataA_0").is_some());

    let fetched = run_json(dir, ["get", "--id", "DataA"]);
    assert_eq!(fetched["payload"]["health"], Value::from(100));
    assert_eq!(fetched["payload"]["mana"], Value::from(150));

    let deleted = run_json(dir, ["delete", "--id", "DataA"]);
    assert_eq!(deleted["deleted"], Value::Bool(true));
    let deleted_again = run_json(dir, ["delete", "--id", "DataA"]);
    assert_eq!(deleted_again["deleted"], Value::Bool(false));
}

#[test]
fn blank_id_gets_the_default() {
    let tmp = temp_save_dir();

    let stored = run_json(tmp.path(), ["save"]);
    assert_eq!(as_str(&stored, "id"), "record");
}

#[test]
fn overwrite_flag_replaces_in_place() {
    let tmp = temp_save_dir();
    let dir = tmp.path();

    run_json(dir, ["save", "--id", "slot1", "--health", "10"]);
    let replaced = run_json(dir, ["save", "--id", "slot1", "--health", "77", "--overwrite"]);
    assert_eq!(as_str(&replaced, "id"), "slot1");

    let listing = run_json(dir, ["list"]);
    let keys: Vec<&String> = listing
        .as_object()
        .unwrap_or_else(|| panic!("listing is not an object: {listing}"))
        .keys()
        .collect();
    assert_eq!(keys, ["slot1"]);
    assert_eq!(listing["slot1"]["payload"]["health"], Value::from(77));
}

#[test]
fn variants_round_trip_through_separate_invocations() {
    let tmp = temp_save_dir();
    let dir = tmp.path();

    run_json(dir, ["checkpoint", "--id", "cp1", "--label", "boss", "--progress", "0.5"]);

    let init = run_json(dir, ["init"]);
    assert_eq!(init["loaded"], Value::from(1));

    let fetched = run_json(dir, ["get", "--id", "cp1"]);
    assert_eq!(as_str(&fetched, "type_tag"), "checkpoint");
    assert_eq!(fetched["payload"]["label"], Value::from("boss"));
}
