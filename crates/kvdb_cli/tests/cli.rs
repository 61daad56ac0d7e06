//! End-to-end tests of the `kvdb` binary.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn kvdb(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kvdb"))
        .arg("--home")
        .arg(home)
        .args(args)
        .output()
        .expect("failed to run kvdb")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "kvdb failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn create_put_get_scan() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("db");

    stdout(&kvdb(&home, &["create"]));
    stdout(&kvdb(&home, &["kvs-create", "users", "-k", "prefix.length=2"]));
    stdout(&kvdb(&home, &["put", "users", "u:alice", "1"]));
    stdout(&kvdb(&home, &["put", "users", "u:bob", "2"]));
    stdout(&kvdb(&home, &["put", "users", "x:carol", "3"]));

    assert_eq!(stdout(&kvdb(&home, &["get", "users", "u:bob"])), "2\n");
    assert!(!kvdb(&home, &["get", "users", "u:nobody"]).status.success());

    let scan = stdout(&kvdb(&home, &["scan", "users", "--prefix", "u:", "--reverse"]));
    assert_eq!(scan, "u:bob\t2\nu:alice\t1\n(2 entries)\n");

    stdout(&kvdb(&home, &["delete", "users", "u:", "--prefix"]));
    let scan = stdout(&kvdb(&home, &["scan", "users", "--format", "json"]));
    let entries: serde_json::Value = serde_json::from_str(&scan).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["key"], "x:carol");

    let list = stdout(&kvdb(&home, &["kvs-list", "--format", "json"]));
    let list: serde_json::Value = serde_json::from_str(&list).unwrap();
    assert_eq!(list[0]["name"], "users");
    assert_eq!(list[0]["prefix_length"], 2);
}

#[test]
fn putbin_then_compact() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("db");

    stdout(&kvdb(&home, &["create", "-p", "kvdb.durability.enabled=false"]));
    stdout(&kvdb(&home, &["kvs-create", "bulk"]));
    stdout(&kvdb(
        &home,
        &["putbin", "bulk", "--threads", "2", "-c", "400", "--batch", "50"],
    ));
    stdout(&kvdb(&home, &["putbin", "bulk", "--threads", "2", "-c", "400"]));
    assert_eq!(stdout(&kvdb(&home, &["get", "bulk", "110001111"])), "110001111\n");

    let status = stdout(&kvdb(&home, &["compact", "--full", "--wait"]));
    let status: serde_json::Value = serde_json::from_str(&status).unwrap();
    assert_eq!(status["active"], false);
    assert_eq!(status["canceled"], false);
    assert_eq!(status["samp_curr_pct"], 100);

    stdout(&kvdb(&home, &["sync"]));
    stdout(&kvdb(&home, &["kvs-drop", "bulk"]));
    assert_eq!(stdout(&kvdb(&home, &["kvs-list"])), "No keyspaces\n");
}

#[test]
fn missing_database_fails() {
    let temp = tempdir().unwrap();
    let output = kvdb(&temp.path().join("absent"), &["kvs-list"]);
    assert!(!output.status.success());
}
