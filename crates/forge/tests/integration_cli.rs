use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

#[test]
fn test_help_output() {
    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build-and-test orchestrator"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("test-all"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_version_output() {
    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_build_without_manifest_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.current_dir(dir.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("forge.yaml"));
}

#[test]
fn test_build_with_unknown_artifact_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("forge.yaml"),
        r#"
build:
  - name: app
    src: ./cmd/app
    dest: ./build/bin
    engine: go://build-go
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.current_dir(dir.path())
        .arg("build")
        .arg("nonexistent")
        .assert()
        .failure();
}

#[test]
fn test_test_get_on_unknown_id_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("forge.yaml"),
        "build: []\ntest: []\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.current_dir(dir.path())
        .args(["test", "unit", "get", "nonexistent-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no test environment or report"));
}

#[test]
fn test_test_list_on_empty_store_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("forge.yaml"),
        "build: []\ntest: []\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.current_dir(dir.path())
        .args(["test", "unit", "list"])
        .assert()
        .success();
}

#[test]
fn test_mcp_stub_reports_out_of_scope() {
    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.arg("--mcp")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not implemented"));
}
