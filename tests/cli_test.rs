//! CLI tests running the `converge` binary against a scratch workspace.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const WORKSPACE: &str = r#"
settings:
  parallelism: 2
variables:
  greeting: hello
resources:
  - type: null_resource
    name: base
    attributes:
      triggers:
        greeting: "${var.greeting}"
    provisioners:
      - type: local-exec
        config:
          command: "echo ${self.id} > marker.txt"
  - type: null_resource
    name: app
    depends_on: [null_resource.base]
    attributes:
      triggers:
        version: "1"
"#;

/// Builds a `converge` Command for a workspace file inside `dir`.
fn converge_cmd(dir: &Path) -> Command {
    let mut cmd = assert_cmd::cargo_bin_cmd!("converge");
    cmd.current_dir(dir)
        .arg("-c")
        .arg(dir.join("workspace.yaml"))
        .arg("--state")
        .arg(dir.join("state.db"))
        .env("NO_COLOR", "1");
    cmd
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("workspace.yaml"), WORKSPACE).unwrap();
    dir
}

#[test]
fn test_import_then_apply() {
    let dir = workspace();
    fs::write(
        dir.path().join("plan.json"),
        r#"{
  "null_resource.base": {
    "attributes": {
      "id": { "new_computed": true },
      "triggers": { "new": { "greeting": "hello" }, "requires_new": true }
    }
  }
}"#,
    )
    .unwrap();

    converge_cmd(dir.path())
        .args(["diff", "import", "plan.json"])
        .assert()
        .success();

    converge_cmd(dir.path())
        .args(["diff", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("null_resource.base"));

    converge_cmd(dir.path())
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("null_resource.base: Creating..."))
        .stdout(predicate::str::contains("1 added, 0 changed, 1 unchanged"));

    let marker = fs::read_to_string(dir.path().join("marker.txt")).unwrap();
    assert!(!marker.trim().is_empty());

    converge_cmd(dir.path())
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("null_resource.base"))
        .stdout(predicate::str::contains("1 resource(s) total."));

    converge_cmd(dir.path())
        .args(["state", "show", "null_resource.base"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("[id={}]", marker.trim())));

    // The diff was consumed; a second apply changes nothing.
    converge_cmd(dir.path())
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 added, 0 changed, 2 unchanged"));
}

#[test]
fn test_apply_reports_failures() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("workspace.yaml"),
        r#"
resources:
  - type: null_resource
    name: broken
    provisioners:
      - type: local-exec
        config:
          command: "exit 7"
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("plan.json"),
        r#"{ "null_resource.broken": { "attributes": { "id": { "new_computed": true } } } }"#,
    )
    .unwrap();

    converge_cmd(dir.path())
        .args(["diff", "import", "plan.json"])
        .assert()
        .success();
    converge_cmd(dir.path())
        .arg("apply")
        .assert()
        .failure()
        .stdout(predicate::str::contains("1 failed"));

    converge_cmd(dir.path())
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tainted"));
}

#[test]
fn test_graph_prints_dot() {
    let dir = workspace();

    converge_cmd(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph resources {"))
        .stdout(predicate::str::contains("style=solid"));
}

#[test]
fn test_diff_import() {
    let dir = workspace();
    fs::write(
        dir.path().join("plan.json"),
        r#"{
  "null_resource.app": {
    "attributes": {
      "id": { "new_computed": true },
      "triggers": { "new": { "version": "1" }, "requires_new": true }
    }
  }
}"#,
    )
    .unwrap();

    converge_cmd(dir.path())
        .args(["diff", "import", "plan.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 diff(s)."));

    converge_cmd(dir.path())
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 added, 0 changed, 1 unchanged"));
}

#[test]
fn test_diff_import_rejects_bad_ids() {
    let dir = workspace();
    fs::write(dir.path().join("plan.json"), r#"{ "not-an-id": {} }"#).unwrap();

    converge_cmd(dir.path())
        .args(["diff", "import", "plan.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid state id"));
}

#[test]
fn test_state_show_unknown_resource() {
    let dir = workspace();

    converge_cmd(dir.path())
        .args(["state", "show", "null_resource.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found in state"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("workspace.yaml"),
        r#"
resources:
  - type: null_resource
    name: web
    depends_on: [null_resource.missing]
"#,
    )
    .unwrap();

    converge_cmd(dir.path()).arg("graph").assert().failure();
}
