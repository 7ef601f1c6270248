use assert_cmd::prelude::*;
use predicates::str::{contains, is_empty};
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn homestore(dir: &TempDir, engine: &str) -> Command {
    let mut cmd = Command::cargo_bin("homestore").unwrap();
    cmd.current_dir(dir).args(["--engine", engine]);
    cmd
}

// `homestore` with no args should exit with a non-zero code.
#[test]
fn cli_no_args() {
    Command::cargo_bin("homestore").unwrap().assert().failure();
}

// `homestore -V` should print the version
#[test]
fn cli_version() {
    Command::cargo_bin("homestore")
        .unwrap()
        .args(["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_invalid_subcommand() {
    Command::cargo_bin("homestore")
        .unwrap()
        .args(["unknown", "key"])
        .assert()
        .failure();
}

#[test]
fn cli_invalid_engine() {
    let temp_dir = TempDir::new().unwrap();
    homestore(&temp_dir, "redis")
        .args(["get", "key1"])
        .assert()
        .failure();
}

#[test]
fn cli_set_get_rm_clear() {
    for engine in ["kvs", "sled"] {
        let temp_dir = TempDir::new().unwrap();

        homestore(&temp_dir, engine)
            .args(["get", "key1"])
            .assert()
            .success()
            .stdout("Key not found\n");

        homestore(&temp_dir, engine)
            .args(["set", "key1", "value1"])
            .assert()
            .success()
            .stdout(is_empty());

        homestore(&temp_dir, engine)
            .args(["set", "key1", "value2"])
            .assert()
            .success();

        homestore(&temp_dir, engine)
            .args(["get", "key1"])
            .assert()
            .success()
            .stdout("value2\n");

        homestore(&temp_dir, engine)
            .args(["rm", "key1"])
            .assert()
            .success()
            .stdout(is_empty());

        homestore(&temp_dir, engine)
            .args(["rm", "key1"])
            .assert()
            .success();

        homestore(&temp_dir, engine)
            .args(["get", "key1"])
            .assert()
            .success()
            .stdout("Key not found\n");

        homestore(&temp_dir, engine)
            .args(["set", "key2", "value"])
            .assert()
            .success();
        homestore(&temp_dir, engine).args(["clear"]).assert().success();
        homestore(&temp_dir, engine)
            .args(["get", "key2"])
            .assert()
            .success()
            .stdout("Key not found\n");
    }
}

#[test]
fn cli_reads_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let store_dir = temp_dir.path().join("store");
    let config_path = temp_dir.path().join("home.json");
    fs::write(
        &config_path,
        format!(
            r#"{{ "db_path": {}, "engine": "kvs" }}"#,
            serde_json::to_string(&store_dir).unwrap()
        ),
    )
    .unwrap();

    Command::cargo_bin("homestore")
        .unwrap()
        .args(["set", "key1", "value1", "--config"])
        .arg(&config_path)
        .assert()
        .success();
    Command::cargo_bin("homestore")
        .unwrap()
        .args(["--config"])
        .arg(&config_path)
        .args(["get", "key1"])
        .assert()
        .success()
        .stdout("value1\n");

    assert!(store_dir.join("1.log").exists());
}

#[test]
fn cli_bad_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("home.json");
    fs::write(&config_path, r#"{ "favicon": { "retry_delays_ms": [] } }"#).unwrap();
    Command::cargo_bin("homestore")
        .unwrap()
        .args(["--config"])
        .arg(&config_path)
        .args(["get", "key1"])
        .assert()
        .failure()
        .stderr(contains("retry_delays_ms"));
}
